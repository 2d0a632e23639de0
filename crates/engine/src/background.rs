//! Background maintenance.
//!
//! One thread runs periodic checkpoints so WAL replay work stays bounded
//! even on idle databases. The commit path additionally triggers a
//! checkpoint every `checkpoint_interval_ops` transactions; this thread
//! covers the time axis.

use crate::database::Database;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle on the checkpointer thread; stops on drop.
pub struct Checkpointer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    /// Spawn the checkpointer for `db`, firing every
    /// `config.checkpoint_interval_ms`.
    pub fn start(db: Arc<Database>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = Duration::from_millis(db.config().checkpoint_interval_ms.max(10));
        let handle = std::thread::Builder::new()
            .name("basalt-checkpointer".to_string())
            .spawn(move || {
                // Poll the stop flag at a finer grain than the interval
                // so shutdown stays prompt.
                let step = interval.min(Duration::from_millis(50));
                let mut elapsed = Duration::ZERO;
                while !stop_flag.load(Ordering::SeqCst) {
                    std::thread::sleep(step);
                    elapsed += step;
                    if elapsed >= interval {
                        elapsed = Duration::ZERO;
                        if let Err(e) = db.checkpoint() {
                            tracing::error!(error = %e, "background checkpoint failed");
                        }
                    }
                }
            })
            .expect("spawn checkpointer thread");
        Checkpointer {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
