//! Out-of-band progress introspection.
//!
//! An operator can send SIGUSR1 to a running invocation to get a snapshot
//! of suite progress and in-flight test activity logged, without stopping
//! or otherwise affecting execution. The handler only reads shared state
//! (suite result snapshots and the worker activity registry) and never
//! takes a lock the suite loop holds for long, so it cannot block forward
//! progress. The fatal user-abort path is separate (ctrl-c driving a
//! cancellation token); this listener is purely diagnostic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::info;

use crate::suite::Suite;

/// Tracks what each in-flight test job is doing, for hang diagnosis.
///
/// Executors register an activity while a test runs; the signal listener
/// dumps the live entries. Cloning shares the underlying registry.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    entries: Arc<Mutex<BTreeMap<u64, String>>>,
    next_id: Arc<AtomicU64>,
}

impl WorkerRegistry {
    /// Registers an in-flight activity; the entry is removed when the
    /// returned guard drops.
    pub fn begin(&self, activity: String) -> WorkerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("worker registry poisoned")
            .insert(id, activity);
        WorkerGuard {
            entries: Arc::clone(&self.entries),
            id,
        }
    }

    /// A snapshot of all live activities.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("worker registry poisoned")
            .values()
            .cloned()
            .collect()
    }
}

/// Removes its registry entry on drop.
pub struct WorkerGuard {
    entries: Arc<Mutex<BTreeMap<u64, String>>>,
    id: u64,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.entries
            .lock()
            .expect("worker registry poisoned")
            .remove(&self.id);
    }
}

/// Logs the diagnostic snapshot: elapsed time, per-suite summaries for
/// every suite known so far, and the live worker dump.
pub fn log_progress_snapshot(suites: &[Suite], start: Instant, workers: &WorkerRegistry) {
    info!("======= progress snapshot =======");
    info!("elapsed: {:.2}s", start.elapsed().as_secs_f64());
    for suite in suites {
        info!("suite {}: {}", suite.display_name(), suite.summarize());
    }
    let live = workers.snapshot();
    if live.is_empty() {
        info!("no test jobs in flight");
    } else {
        info!("{} test job(s) in flight:", live.len());
        for activity in live {
            info!("  {}", activity);
        }
    }
    info!("=================================");
}

/// Registers the SIGUSR1 listener once the suite list is known.
///
/// The listener runs until the process exits; it holds clones of the
/// suites, which share result state with the orchestrator's copies.
#[cfg(unix)]
pub fn register(
    suites: Vec<Suite>,
    start: Instant,
    workers: WorkerRegistry,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut stream = signal(SignalKind::user_defined1())?;
    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            log_progress_snapshot(&suites, start, &workers);
        }
    }))
}

#[cfg(not(unix))]
pub fn register(
    _suites: Vec<Suite>,
    _start: Instant,
    _workers: WorkerRegistry,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    // No SIGUSR1 equivalent; the diagnostic dump is unix-only.
    Ok(tokio::spawn(async {}))
}
