//! The database facade.
//!
//! Opening a database acquires the data-directory lock, replays the WAL
//! into the storage adapter, rebuilds the catalog, index registry, and
//! statistics, and resumes the id/timestamp counters past the recovered
//! watermarks. Statements execute inside transactions; `execute` is the
//! autocommit path, `begin`/`execute_in`/`commit` the explicit one.

use crate::catalog::{
    self, decode_row, encode_row, index_meta_key, index_meta_prefix, value_admissible,
    IndexMeta, TableCatalog, TableSchema,
};
use crate::config::EngineConfig;
use crate::provider::SnapshotProvider;
use basalt_concurrency::{IsolationLevel, TransactionManager};
use basalt_core::ast::{
    AlterAction, ColumnDef, Predicate, SelectStmt, Statement,
};
use basalt_core::column::Column;
use basalt_core::error::{Error, Result};
use basalt_core::result::ResultSet;
use basalt_core::traits::KvStore;
use basalt_core::types::{keys, Ts, TxnId};
use basalt_core::value::{DataType, Value};
use basalt_durability::recovery::{self, RecoveryReport};
use basalt_durability::{backup, SyncPolicy, WalWriter, WalWriterConfig};
use basalt_executor::accel::{AcceleratorRuntime, DeviceBufferCache, HostVectorRuntime};
use basalt_executor::kernels::filter::matches as predicate_matches;
use basalt_executor::Executor;
use basalt_planner::{
    CostModel, IndexDef, IndexRegistry, Planner, PlannerOptions, StatisticsCatalog,
};
use basalt_storage::MemStore;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An open Basalt database.
pub struct Database {
    config: EngineConfig,
    store: Arc<MemStore>,
    manager: Arc<TransactionManager>,
    catalog: Arc<TableCatalog>,
    stats: Arc<StatisticsCatalog>,
    indexes: Arc<IndexRegistry>,
    planner: Planner,
    accelerator: Option<(Arc<dyn AcceleratorRuntime>, Arc<DeviceBufferCache>)>,
    committed_ops: AtomicU64,
    /// Serializes checkpoint triggers from commit threads
    checkpoint_gate: Mutex<()>,
    _lock_file: File,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `config.data_dir`, running crash
    /// recovery.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let lock_file = File::create(config.lock_path())?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::ConstraintViolation(format!(
                "data directory {} is locked by another process",
                config.data_dir.display()
            ))
        })?;

        let store = Arc::new(MemStore::new());
        // The snapshot (when present) is the base; WAL replay layers the
        // commits that followed it.
        let loaded = basalt_durability::snapshot::load_snapshot(&config.data_dir, store.as_ref())?;
        if loaded > 0 {
            tracing::debug!(keys = loaded, "loaded storage snapshot");
        }
        let report = recovery::recover(&config.wal_dir(), store.as_ref())?;
        if let Some(t) = &report.truncation {
            tracing::error!(
                segment = t.segment,
                offset = t.offset,
                "opened with truncated WAL; writes after the tear are lost"
            );
        }

        let uuid = Self::load_or_create_identity(&config)?;
        let mut wal = WalWriter::open(
            config.wal_dir(),
            uuid,
            WalWriterConfig {
                segment_size: config.wal_segment_size,
                sync_policy: if config.sync_every_write {
                    SyncPolicy::Always
                } else {
                    SyncPolicy::OnCommit
                },
            },
            report.next_lsn,
        )?;
        if report.replayed > 0 || report.discarded > 0 {
            recovery::install_checkpoint(&mut wal, &report)?;
        }

        let manager = Arc::new(TransactionManager::new(
            Arc::clone(&store) as Arc<dyn KvStore>,
            Some(wal),
            report.max_txn_id,
            report.max_ts,
        ));

        let db = Self::assemble(config, store, manager, lock_file)?;
        tracing::info!(
            tables = db.catalog.table_names().len(),
            replayed = report.replayed,
            "database open"
        );
        Ok(db)
    }

    /// Materialize a database from a backup directory, optionally
    /// stopping WAL replay at `target_ts` (point-in-time recovery). The
    /// restored database lives at `config.data_dir` with a fresh WAL.
    pub fn restore(src: &Path, config: EngineConfig, target_ts: Option<Ts>) -> Result<Self> {
        Self::restore_with_wal(src, config, target_ts, None)
    }

    /// `restore`, additionally replaying WAL from a live directory on
    /// top of the backup. This is the full point-in-time path: the
    /// backup provides the base snapshot, the live WAL carries commits
    /// past it, and `target_ts` bounds how far replay goes. Replay is
    /// idempotent, so overlap between the bundled and live logs is
    /// harmless.
    pub fn restore_with_wal(
        src: &Path,
        config: EngineConfig,
        target_ts: Option<Ts>,
        additional_wal: Option<&Path>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let lock_file = File::create(config.lock_path())?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::ConstraintViolation(format!(
                "data directory {} is locked by another process",
                config.data_dir.display()
            ))
        })?;

        let store = Arc::new(MemStore::new());
        let mut report: RecoveryReport =
            backup::recover_from_backup(src, store.as_ref(), target_ts)?;
        if let Some(wal_dir) = additional_wal {
            let outcome = basalt_durability::WalReader::open(wal_dir)?.read_all()?;
            let extra = recovery::replay_until(&outcome.records, store.as_ref(), target_ts)?;
            report.max_txn_id = report.max_txn_id.max(extra.max_txn_id);
            report.max_ts = report.max_ts.max(extra.max_ts);
            report.next_lsn = report.next_lsn.max(extra.next_lsn);
        }

        let uuid = Self::load_or_create_identity(&config)?;
        let wal = WalWriter::open(
            config.wal_dir(),
            uuid,
            WalWriterConfig::default(),
            report.next_lsn,
        )?;
        let manager = Arc::new(TransactionManager::new(
            Arc::clone(&store) as Arc<dyn KvStore>,
            Some(wal),
            report.max_txn_id,
            report.max_ts,
        ));
        Self::assemble(config, store, manager, lock_file)
    }

    /// Shared tail of `open`/`restore`: rebuild catalog, indexes, stats,
    /// and the planner from the recovered storage tree.
    fn assemble(
        config: EngineConfig,
        store: Arc<MemStore>,
        manager: Arc<TransactionManager>,
        lock_file: File,
    ) -> Result<Self> {
        let catalog = Arc::new(TableCatalog::new());
        for (_, bytes) in store.scan_prefix(&keys::schema_prefix())? {
            let schema: TableSchema = bincode::deserialize(&bytes)
                .map_err(|e| Error::Serialization(format!("schema record: {e}")))?;
            let rows = store.scan_prefix(&keys::table_prefix(&schema.name))?;
            let next_row_id = catalog::max_row_id(&rows);
            catalog.install(schema, next_row_id);
        }

        let indexes = Arc::new(IndexRegistry::new());
        for (_, bytes) in store.scan_prefix(&index_meta_prefix())? {
            let meta: IndexMeta = bincode::deserialize(&bytes)
                .map_err(|e| Error::Serialization(format!("index record: {e}")))?;
            indexes.create(IndexDef {
                name: meta.name,
                table: meta.table,
                column: meta.column,
                kind: meta.kind,
            });
        }

        let stats = Arc::new(StatisticsCatalog::new());
        let accelerator: Option<(Arc<dyn AcceleratorRuntime>, Arc<DeviceBufferCache>)> =
            if config.accelerator_enabled {
                let runtime: Arc<dyn AcceleratorRuntime> =
                    Arc::new(HostVectorRuntime::default());
                let cache = Arc::new(DeviceBufferCache::new(runtime.memory_budget()));
                Some((runtime, cache))
            } else {
                None
            };
        let planner = Planner::new(
            Arc::clone(&stats),
            Arc::clone(&indexes),
            CostModel::default(),
            Arc::clone(&catalog) as Arc<dyn basalt_planner::SchemaProvider>,
            PlannerOptions {
                accelerator_present: accelerator.is_some(),
                min_rows_for_offload: config.min_rows_for_offload,
                force_accelerator: config.force_accelerator,
                hash_join_threshold: config.hash_join_threshold,
                max_parallelism: config.max_parallelism,
                ..PlannerOptions::default()
            },
        );

        let db = Database {
            config,
            store,
            manager,
            catalog,
            stats,
            indexes,
            planner,
            accelerator,
            committed_ops: AtomicU64::new(0),
            checkpoint_gate: Mutex::new(()),
            _lock_file: lock_file,
        };
        for table in db.catalog.table_names() {
            db.refresh_statistics(&table)?;
        }
        Ok(db)
    }

    fn load_or_create_identity(config: &EngineConfig) -> Result<[u8; 16]> {
        let path = config.data_dir.join("IDENTITY");
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let id: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                Error::StorageCorruption("identity file has wrong length".to_string())
            })?;
            Ok(id)
        } else {
            let id = *uuid::Uuid::new_v4().as_bytes();
            std::fs::write(&path, id)?;
            Ok(id)
        }
    }

    // === Transactions ===

    pub fn begin(&self, isolation: IsolationLevel) -> TxnId {
        self.manager.begin(isolation)
    }

    pub fn commit(&self, tx: TxnId) -> Result<Ts> {
        let ts = self.manager.commit(tx)?;
        let done = self.committed_ops.fetch_add(1, Ordering::SeqCst) + 1;
        if done % self.config.checkpoint_interval_ops.max(1) == 0 {
            self.checkpoint()?;
        }
        Ok(ts)
    }

    pub fn abort(&self, tx: TxnId) -> Result<()> {
        self.manager.abort(tx)
    }

    /// Autocommit: run one statement in its own serializable transaction.
    pub fn execute(&self, stmt: &Statement) -> Result<ResultSet> {
        let tx = self.begin(IsolationLevel::Serializable);
        match self.execute_in(tx, stmt) {
            Ok(rs) => {
                self.commit(tx)?;
                Ok(rs)
            }
            Err(e) => {
                let _ = self.abort(tx);
                Err(e)
            }
        }
    }

    /// Run one statement inside an open transaction.
    pub fn execute_in(&self, tx: TxnId, stmt: &Statement) -> Result<ResultSet> {
        match stmt {
            Statement::Select(select) => self.query(tx, select),
            Statement::Insert {
                table,
                columns,
                rows,
            } => self.insert(tx, table, columns, rows),
            Statement::Update {
                table,
                assignments,
                predicates,
            } => self.update(tx, table, assignments, predicates),
            Statement::Delete { table, predicates } => self.delete(tx, table, predicates),
            Statement::CreateTable { name, columns } => self.create_table(tx, name, columns),
            Statement::DropTable { name } => self.drop_table(tx, name),
            Statement::AlterTable { name, action } => self.alter_table(tx, name, action),
            Statement::CreateIndex {
                name,
                table,
                column,
                kind,
            } => self.create_index(tx, name, table, column, *kind),
            Statement::DropIndex { name } => self.drop_index(tx, name),
        }
    }

    // === Queries ===

    fn query(&self, tx: TxnId, select: &SelectStmt) -> Result<ResultSet> {
        let plan = self.planner.plan(select)?;
        // Indexes may have been dropped between planning and execution.
        let plan = self.planner.revalidate(plan)?;
        let provider = Arc::new(SnapshotProvider::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.catalog),
            tx,
        ));
        let mut executor = Executor::new(provider);
        if let Some((runtime, cache)) = &self.accelerator {
            executor =
                executor.with_accelerator_shared(Arc::clone(runtime), Arc::clone(cache));
        }
        executor.execute(&plan)
    }

    /// Render the physical plan for a query without running it.
    pub fn explain(&self, select: &SelectStmt) -> Result<String> {
        Ok(self.planner.plan(select)?.explain())
    }

    // === DML ===

    fn insert(
        &self,
        tx: TxnId,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<ResultSet> {
        let schema = self.catalog.get(table)?;
        let positions: Vec<usize> = if columns.is_empty() {
            (0..schema.columns.len()).collect()
        } else {
            columns
                .iter()
                .map(|name| {
                    schema.column_index(name).ok_or_else(|| Error::UnknownColumn {
                        table: table.to_string(),
                        column: name.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let table_indexes = self.table_indexes(table);
        let mut inserted = 0i64;
        for row in rows {
            if row.len() != positions.len() {
                return Err(Error::ConstraintViolation(format!(
                    "insert into {table}: {} values for {} columns",
                    row.len(),
                    positions.len()
                )));
            }
            let mut full = vec![Value::Null; schema.columns.len()];
            for (value, &pos) in row.iter().zip(&positions) {
                let (name, dtype) = &schema.columns[pos];
                if !value_admissible(value, *dtype) {
                    return Err(Error::TypeMismatch(format!(
                        "{table}.{name} is {dtype:?}, got {value:?}"
                    )));
                }
                full[pos] = value.clone();
            }
            let row_id = self.catalog.allocate_row_id(table)?;
            self.manager
                .write(tx, &keys::row_key(table, row_id), Some(encode_row(&full)?))?;
            for idx in &table_indexes {
                let pos = schema.column_index(&idx.column).expect("indexed column");
                if !full[pos].is_null() {
                    self.manager.write(
                        tx,
                        &keys::index_key(table, &idx.column, &full[pos], row_id),
                        Some(Vec::new()),
                    )?;
                }
            }
            inserted += 1;
        }
        affected(inserted)
    }

    fn update(
        &self,
        tx: TxnId,
        table: &str,
        assignments: &[(String, Value)],
        predicates: &[Predicate],
    ) -> Result<ResultSet> {
        let schema = self.catalog.get(table)?;
        for (name, value) in assignments {
            let dtype = schema.column_type(name).ok_or_else(|| Error::UnknownColumn {
                table: table.to_string(),
                column: name.clone(),
            })?;
            if !value_admissible(value, dtype) {
                return Err(Error::TypeMismatch(format!(
                    "{table}.{name} is {dtype:?}, got {value:?}"
                )));
            }
        }
        let table_indexes = self.table_indexes(table);
        let mut affected_rows = 0i64;
        for (key, bytes) in self.matching_rows(tx, table, &schema, predicates)? {
            let row_id = keys::row_id_of(&key).ok_or_else(|| {
                Error::StorageCorruption(format!("malformed row key in {table}"))
            })?;
            let old = decode_row(&bytes, schema.columns.len())?;
            let mut new = old.clone();
            for (name, value) in assignments {
                let pos = schema.column_index(name).expect("validated above");
                new[pos] = value.clone();
            }
            self.manager
                .write(tx, &key, Some(encode_row(&new)?))?;
            for idx in &table_indexes {
                let pos = schema.column_index(&idx.column).expect("indexed column");
                if old[pos] != new[pos] {
                    if !old[pos].is_null() {
                        self.manager.write(
                            tx,
                            &keys::index_key(table, &idx.column, &old[pos], row_id),
                            None,
                        )?;
                    }
                    if !new[pos].is_null() {
                        self.manager.write(
                            tx,
                            &keys::index_key(table, &idx.column, &new[pos], row_id),
                            Some(Vec::new()),
                        )?;
                    }
                }
            }
            affected_rows += 1;
        }
        affected(affected_rows)
    }

    fn delete(&self, tx: TxnId, table: &str, predicates: &[Predicate]) -> Result<ResultSet> {
        let schema = self.catalog.get(table)?;
        let table_indexes = self.table_indexes(table);
        let mut affected_rows = 0i64;
        for (key, bytes) in self.matching_rows(tx, table, &schema, predicates)? {
            let row_id = keys::row_id_of(&key).ok_or_else(|| {
                Error::StorageCorruption(format!("malformed row key in {table}"))
            })?;
            let old = decode_row(&bytes, schema.columns.len())?;
            self.manager.write(tx, &key, None)?;
            for idx in &table_indexes {
                let pos = schema.column_index(&idx.column).expect("indexed column");
                if !old[pos].is_null() {
                    self.manager.write(
                        tx,
                        &keys::index_key(table, &idx.column, &old[pos], row_id),
                        None,
                    )?;
                }
            }
            affected_rows += 1;
        }
        affected(affected_rows)
    }

    /// Visible rows of `table` matching every predicate, as raw
    /// `(key, payload)` pairs.
    fn matching_rows(
        &self,
        tx: TxnId,
        table: &str,
        schema: &TableSchema,
        predicates: &[Predicate],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        for pred in predicates {
            if schema.column_index(&pred.column.column).is_none() {
                return Err(Error::UnknownColumn {
                    table: table.to_string(),
                    column: pred.column.column.clone(),
                });
            }
        }
        let mut out = Vec::new();
        for (key, bytes) in self.manager.scan(tx, &keys::table_prefix(table))? {
            let row = decode_row(&bytes, schema.columns.len())?;
            let keep = predicates.iter().all(|pred| {
                let pos = schema.column_index(&pred.column.column).expect("checked");
                predicate_matches(pred, &row[pos])
            });
            if keep {
                out.push((key, bytes));
            }
        }
        Ok(out)
    }

    // === DDL ===

    fn create_table(&self, tx: TxnId, name: &str, columns: &[ColumnDef]) -> Result<ResultSet> {
        if self.catalog.contains(name) {
            return Err(Error::ConstraintViolation(format!(
                "table {name} already exists"
            )));
        }
        if columns.is_empty() {
            return Err(Error::ConstraintViolation(format!(
                "table {name} needs at least one column"
            )));
        }
        let mut seen = HashSet::new();
        for c in columns {
            if !seen.insert(c.name.as_str()) {
                return Err(Error::ConstraintViolation(format!(
                    "duplicate column {} in table {name}",
                    c.name
                )));
            }
        }
        let schema = TableSchema {
            name: name.to_string(),
            columns: columns.iter().map(|c| (c.name.clone(), c.dtype)).collect(),
        };
        let bytes =
            bincode::serialize(&schema).map_err(|e| Error::Serialization(e.to_string()))?;
        self.manager
            .write(tx, &keys::schema_key(name), Some(bytes))?;
        self.catalog.install(schema, 0);
        tracing::info!(table = name, "created table");
        affected(0)
    }

    fn drop_table(&self, tx: TxnId, name: &str) -> Result<ResultSet> {
        let _ = self.catalog.get(name)?;
        for (key, _) in self.manager.scan(tx, &keys::table_prefix(name))? {
            self.manager.write(tx, &key, None)?;
        }
        for idx in self.table_indexes(name) {
            for (key, _) in self
                .manager
                .scan(tx, &keys::index_prefix(name, &idx.column))?
            {
                self.manager.write(tx, &key, None)?;
            }
            self.manager.write(tx, &index_meta_key(&idx.name), None)?;
        }
        self.manager.write(tx, &keys::schema_key(name), None)?;
        self.indexes.drop_table(name);
        self.catalog.remove(name);
        self.stats.remove_table(name);
        tracing::info!(table = name, "dropped table");
        affected(0)
    }

    fn alter_table(&self, tx: TxnId, name: &str, action: &AlterAction) -> Result<ResultSet> {
        let mut schema = self.catalog.get(name)?;
        match action {
            AlterAction::AddColumn(def) => {
                if schema.column_index(&def.name).is_some() {
                    return Err(Error::ConstraintViolation(format!(
                        "column {} already exists on {name}",
                        def.name
                    )));
                }
                // Existing rows decode short and pad with Null.
                schema.columns.push((def.name.clone(), def.dtype));
            }
            AlterAction::DropColumn(column) => {
                let pos = schema.column_index(column).ok_or_else(|| Error::UnknownColumn {
                    table: name.to_string(),
                    column: column.clone(),
                })?;
                if self.table_indexes(name).iter().any(|i| &i.column == column) {
                    return Err(Error::ConstraintViolation(format!(
                        "column {name}.{column} is indexed; drop the index first"
                    )));
                }
                // Dropping a middle column shifts the ones after it, so
                // every row is rewritten.
                let old_width = schema.columns.len();
                for (key, bytes) in self.manager.scan(tx, &keys::table_prefix(name))? {
                    let mut row = decode_row(&bytes, old_width)?;
                    row.remove(pos);
                    self.manager.write(tx, &key, Some(encode_row(&row)?))?;
                }
                schema.columns.remove(pos);
            }
            AlterAction::RenameColumn { from, to } => {
                let pos = schema.column_index(from).ok_or_else(|| Error::UnknownColumn {
                    table: name.to_string(),
                    column: from.clone(),
                })?;
                if schema.column_index(to).is_some() {
                    return Err(Error::ConstraintViolation(format!(
                        "column {to} already exists on {name}"
                    )));
                }
                if self.table_indexes(name).iter().any(|i| &i.column == from) {
                    return Err(Error::ConstraintViolation(format!(
                        "column {name}.{from} is indexed; drop the index first"
                    )));
                }
                schema.columns[pos].0 = to.clone();
            }
        }
        let bytes =
            bincode::serialize(&schema).map_err(|e| Error::Serialization(e.to_string()))?;
        self.manager
            .write(tx, &keys::schema_key(name), Some(bytes))?;
        self.catalog.replace(schema);
        affected(0)
    }

    fn create_index(
        &self,
        tx: TxnId,
        name: &str,
        table: &str,
        column: &str,
        kind: basalt_core::ast::IndexKind,
    ) -> Result<ResultSet> {
        let schema = self.catalog.get(table)?;
        let pos = schema.column_index(column).ok_or_else(|| Error::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        })?;
        if self.indexes.exists(name) {
            return Err(Error::ConstraintViolation(format!(
                "index {name} already exists"
            )));
        }
        // Index entries for one (table, column) share a keyspace, so a
        // second index over the same column would alias the first.
        if self.table_indexes(table).iter().any(|i| i.column == column) {
            return Err(Error::ConstraintViolation(format!(
                "{table}.{column} is already indexed"
            )));
        }

        let meta = IndexMeta {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            kind,
        };
        let bytes =
            bincode::serialize(&meta).map_err(|e| Error::Serialization(e.to_string()))?;
        self.manager.write(tx, &index_meta_key(name), Some(bytes))?;

        // Backfill entries for existing rows.
        for (key, payload) in self.manager.scan(tx, &keys::table_prefix(table))? {
            let row_id = keys::row_id_of(&key).ok_or_else(|| {
                Error::StorageCorruption(format!("malformed row key in {table}"))
            })?;
            let row = decode_row(&payload, schema.columns.len())?;
            if !row[pos].is_null() {
                self.manager.write(
                    tx,
                    &keys::index_key(table, column, &row[pos], row_id),
                    Some(Vec::new()),
                )?;
            }
        }
        self.indexes.create(IndexDef {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            kind,
        });
        tracing::info!(index = name, table, column, "created index");
        affected(0)
    }

    fn drop_index(&self, tx: TxnId, name: &str) -> Result<ResultSet> {
        let meta_bytes = self
            .manager
            .read(tx, &index_meta_key(name))?
            .ok_or_else(|| Error::UnknownRelation(format!("index {name}")))?;
        let meta: IndexMeta = bincode::deserialize(&meta_bytes)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        for (key, _) in self
            .manager
            .scan(tx, &keys::index_prefix(&meta.table, &meta.column))?
        {
            self.manager.write(tx, &key, None)?;
        }
        self.manager.write(tx, &index_meta_key(name), None)?;
        self.indexes.drop_index(name);
        tracing::info!(index = name, "dropped index");
        affected(0)
    }

    // === Maintenance ===

    /// Recompute statistics for one table from a full scan.
    pub fn refresh_statistics(&self, table: &str) -> Result<()> {
        let schema = self.catalog.get(table)?;
        let tx = self.begin(IsolationLevel::RepeatableRead);
        let result = self.compute_statistics(tx, table, &schema);
        let _ = self.manager.commit(tx);
        let stats = result?;
        self.stats.put_table(table, stats);
        Ok(())
    }

    fn compute_statistics(
        &self,
        tx: TxnId,
        table: &str,
        schema: &TableSchema,
    ) -> Result<basalt_planner::TableStats> {
        use basalt_planner::{ColumnStats, TableStats};
        let mut table_stats = TableStats::default();
        let mut distinct: Vec<HashSet<Vec<u8>>> =
            schema.columns.iter().map(|_| HashSet::new()).collect();
        let mut columns: Vec<ColumnStats> =
            schema.columns.iter().map(|_| ColumnStats::default()).collect();

        for (_, bytes) in self.manager.scan(tx, &keys::table_prefix(table))? {
            let row = decode_row(&bytes, schema.columns.len())?;
            table_stats.row_count += 1;
            for (i, value) in row.iter().enumerate() {
                if value.is_null() {
                    columns[i].null_count += 1;
                    continue;
                }
                distinct[i].insert(keys::encode_value(value));
                let replace_min = columns[i]
                    .min
                    .as_ref()
                    .map(|m| value.total_cmp(m) == std::cmp::Ordering::Less)
                    .unwrap_or(true);
                if replace_min {
                    columns[i].min = Some(value.clone());
                }
                let replace_max = columns[i]
                    .max
                    .as_ref()
                    .map(|m| value.total_cmp(m) == std::cmp::Ordering::Greater)
                    .unwrap_or(true);
                if replace_max {
                    columns[i].max = Some(value.clone());
                }
            }
        }
        for (i, (name, _)) in schema.columns.iter().enumerate() {
            let mut stats = std::mem::take(&mut columns[i]);
            stats.ndv = distinct[i].len() as u64;
            table_stats.columns.insert(name.clone(), stats);
        }
        Ok(table_stats)
    }

    /// Checkpoint: persist a storage snapshot, append the checkpoint
    /// record, vacuum MVCC history, and drop redundant WAL segments.
    ///
    /// The snapshot is written under the commit quiesce so it agrees
    /// exactly with the checkpoint record that follows it.
    pub fn checkpoint(&self) -> Result<()> {
        let _gate = self.checkpoint_gate.lock();
        {
            let _quiesce = self.manager.quiesce();
            basalt_durability::snapshot::write_snapshot(
                &self.config.data_dir,
                self.store.as_ref(),
            )?;
            self.manager.checkpoint(true)?;
        }
        if let Some((_, cache)) = &self.accelerator {
            cache.evict_aged(1_000);
        }
        Ok(())
    }

    /// Write a consistent backup to `dst`.
    pub fn backup(&self, dst: &Path) -> Result<backup::BackupManifest> {
        let wal = self
            .manager
            .wal()
            .ok_or_else(|| Error::ConstraintViolation("ephemeral database".to_string()))?;
        let source_lsn = {
            let mut wal = wal.lock();
            wal.sync()?;
            wal.next_lsn()
        };
        backup::create_backup(self.store.as_ref(), &self.config.wal_dir(), source_lsn, dst)
    }

    fn table_indexes(&self, table: &str) -> Vec<IndexDef> {
        self.indexes
            .snapshot()
            .iter()
            .filter(|d| d.table == table)
            .cloned()
            .collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn stats(&self) -> &Arc<StatisticsCatalog> {
        &self.stats
    }
}

/// DML result shape: one row, one `affected` column.
fn affected(n: i64) -> Result<ResultSet> {
    let col = Column::from_values("affected", DataType::Int64, &[Value::Integer(n)])?;
    ResultSet::from_columns(vec![col])
}
