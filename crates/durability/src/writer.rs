//! WAL writer.
//!
//! A single writer owns the active segment. Appends assign monotonic LSNs
//! and rotate to a new segment when the size threshold is reached. The
//! sync policy controls when `fsync` happens; `commit` always forces one
//! because the durability invariant hangs on it.

use crate::record::WalRecord;
use crate::segment::{self, Segment, SEGMENT_HEADER_SIZE};
use basalt_core::error::Result;
use basalt_core::types::Lsn;
use std::path::{Path, PathBuf};

/// When the writer fsyncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every append
    Always,
    /// fsync only on `sync()` and on commit records
    OnCommit,
    /// never fsync automatically (tests and bulk loads)
    Never,
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WalWriterConfig {
    /// Rotate once a segment exceeds this many bytes
    pub segment_size: u64,
    pub sync_policy: SyncPolicy,
}

impl Default for WalWriterConfig {
    fn default() -> Self {
        WalWriterConfig {
            segment_size: 64 * 1024 * 1024,
            sync_policy: SyncPolicy::OnCommit,
        }
    }
}

impl WalWriterConfig {
    /// Small segments and eager syncs, for tests exercising rotation.
    pub fn for_testing() -> Self {
        WalWriterConfig {
            segment_size: 4 * 1024,
            sync_policy: SyncPolicy::Always,
        }
    }
}

/// Append-only WAL writer owning the active segment.
pub struct WalWriter {
    dir: PathBuf,
    database_uuid: [u8; 16],
    config: WalWriterConfig,
    segment: Segment,
    next_lsn: Lsn,
}

impl WalWriter {
    /// Open the WAL in `dir`, resuming after the highest existing segment.
    ///
    /// `next_lsn` comes from recovery (one past the last readable record);
    /// a fresh database passes 1.
    pub fn open(
        dir: impl Into<PathBuf>,
        database_uuid: [u8; 16],
        config: WalWriterConfig,
        next_lsn: Lsn,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let existing = segment::list_segments(&dir)?;
        let segment = match existing.last() {
            // A closed segment ends in a tail marker; appending after it
            // would orphan records, so always start a fresh segment on
            // reopen.
            Some(last) => Segment::create(&dir, last + 1, database_uuid)?,
            None => Segment::create(&dir, 1, database_uuid)?,
        };
        Ok(WalWriter {
            dir,
            database_uuid,
            config,
            segment,
            next_lsn,
        })
    }

    /// Append one record, returning its LSN.
    pub fn append(&mut self, record: &WalRecord) -> Result<Lsn> {
        let frame = record.encode_frame();
        if self.segment.size() + frame.len() as u64 > self.config.segment_size
            && self.segment.size() > SEGMENT_HEADER_SIZE as u64
        {
            self.rotate()?;
        }
        self.segment.write(&frame)?;
        let lsn = self.next_lsn;
        self.next_lsn += 1;

        let force = matches!(record, WalRecord::Commit { .. } | WalRecord::Checkpoint { .. });
        match self.config.sync_policy {
            SyncPolicy::Always => self.segment.sync()?,
            SyncPolicy::OnCommit if force => self.segment.sync()?,
            _ => {}
        }
        tracing::trace!(lsn, segment = self.segment.sequence(), "wal append");
        Ok(lsn)
    }

    /// Force everything written so far to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.segment.sync()
    }

    fn rotate(&mut self) -> Result<()> {
        let next_seq = self.segment.sequence() + 1;
        let old = std::mem::replace(
            &mut self.segment,
            Segment::create(&self.dir, next_seq, self.database_uuid)?,
        );
        tracing::debug!(closed = old.sequence(), opened = next_seq, "wal rotation");
        old.close()?;
        Ok(())
    }

    /// Delete every segment wholly older than `keep_from`. Called after a
    /// checkpoint has made those segments redundant.
    pub fn retain_from(&self, keep_from: u64) -> Result<usize> {
        let mut removed = 0;
        for seq in segment::list_segments(&self.dir)? {
            if seq < keep_from && seq != self.segment.sequence() {
                std::fs::remove_file(segment::segment_path(&self.dir, seq))?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, keep_from, "wal retention pass");
        }
        Ok(removed)
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    pub fn current_segment(&self) -> u64 {
        self.segment.sequence()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
