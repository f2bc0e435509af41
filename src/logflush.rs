//! Buffered log delivery and shutdown flushing.
//!
//! A background worker batches log records and appends them to a sink
//! file, standing in for delivery to a remote log aggregation service.
//! Delivery can fall behind or fail; the finalizer run at process exit
//! makes sure buffered records reach the sink before the process
//! terminates, within a bounded wait, and escalates when they cannot.
//!
//! The forced-exit path ([`FinalizeAction::ForceExit`]) deliberately skips
//! all remaining cleanup: once log delivery is known to be broken,
//! background delivery threads may block normal process termination
//! indefinitely, so the process must go down immediately. This is the one
//! documented exception to the "teardown always runs" rule.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::executor::LOGGER_ERROR_EXIT_CODE;

/// How often the worker writes out its buffered records.
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// One record queued for delivery.
#[derive(Debug)]
struct LogRecord {
    timestamp: chrono::DateTime<Utc>,
    message: String,
}

/// Cloneable sender side of the flush pipeline.
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl RecordSender {
    /// Queues a record for background delivery. Dropped silently if the
    /// worker has already shut down.
    pub fn log(&self, message: impl Into<String>) {
        let _ = self.tx.send(LogRecord {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }
}

/// Handle to the background flush worker.
pub struct FlushHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<()>>,
    incomplete: Arc<AtomicBool>,
}

impl FlushHandle {
    /// Whether a delivery failure has been recorded.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete.load(Ordering::SeqCst)
    }

    /// Signals the worker to drain and waits up to `timeout` for it to
    /// finish. Returns `true` when the drain completed in time.
    pub async fn stop_and_drain(&mut self, timeout: Duration) -> bool {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.done_rx.take() {
            Some(done) => tokio::time::timeout(timeout, done).await.is_ok(),
            None => true,
        }
    }
}

/// Starts the background flush worker appending to `sink_path`.
pub fn start(sink_path: PathBuf) -> (FlushHandle, RecordSender) {
    let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let incomplete = Arc::new(AtomicBool::new(false));
    let worker_incomplete = Arc::clone(&incomplete);

    tokio::spawn(async move {
        let mut buffer: Vec<LogRecord> = Vec::new();
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                record = rx.recv() => match record {
                    Some(record) => buffer.push(record),
                    None => break,
                },
                _ = interval.tick() => {
                    write_batch(&sink_path, &mut buffer, &worker_incomplete).await;
                }
                _ = &mut shutdown_rx => {
                    // Drain whatever is still queued, then stop.
                    while let Ok(record) = rx.try_recv() {
                        buffer.push(record);
                    }
                    break;
                }
            }
        }

        write_batch(&sink_path, &mut buffer, &worker_incomplete).await;
        let _ = done_tx.send(());
    });

    (
        FlushHandle {
            shutdown_tx: Some(shutdown_tx),
            done_rx: Some(done_rx),
            incomplete,
        },
        RecordSender { tx },
    )
}

async fn write_batch(sink_path: &PathBuf, buffer: &mut Vec<LogRecord>, incomplete: &AtomicBool) {
    if buffer.is_empty() {
        return;
    }
    let mut chunk = String::new();
    for record in buffer.drain(..) {
        chunk.push_str(&format!(
            "{} {}\n",
            record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.message
        ));
    }
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(sink_path)
            .await?;
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        error!("failed to deliver log batch to {}: {}", sink_path.display(), e);
        incomplete.store(true, Ordering::SeqCst);
    }
}

/// What the finalizer decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeAction {
    /// Normal process exit with the given code.
    Exit { code: i32 },
    /// Immediate termination bypassing remaining cleanup, with the given
    /// code. Taken whenever log output is known incomplete.
    ForceExit { code: i32 },
}

impl FinalizeAction {
    /// The exit code this action carries.
    pub fn code(&self) -> i32 {
        match self {
            FinalizeAction::Exit { code } | FinalizeAction::ForceExit { code } => *code,
        }
    }
}

/// Pure decision step of the finalizer, given the drain outcome.
///
/// Incomplete log output on an otherwise-green run is not escalated to a
/// failure; on a failing run it overrides the exit code with the fixed
/// logger-error code to make the delivery failure visible. Either way the
/// process must terminate immediately.
pub fn decide(flush_ok: bool, incomplete: bool, exit_code: i32) -> FinalizeAction {
    if flush_ok && !incomplete {
        return FinalizeAction::Exit { code: exit_code };
    }
    if exit_code == 0 {
        info!("failed to flush all log output but all tests passed, so ignoring");
        FinalizeAction::ForceExit { code: 0 }
    } else {
        info!(
            "exiting with code {} rather than requested code {} because log output is incomplete",
            LOGGER_ERROR_EXIT_CODE, exit_code
        );
        FinalizeAction::ForceExit {
            code: LOGGER_ERROR_EXIT_CODE,
        }
    }
}

/// Runs the shutdown flush and returns the terminal action.
///
/// When the run was user-interrupted the wait is skipped entirely; a user
/// abort should not be slowed by log delivery.
pub async fn finalize(
    handle: &mut FlushHandle,
    interrupted: bool,
    exit_code: i32,
    timeout: Duration,
) -> FinalizeAction {
    if interrupted {
        return FinalizeAction::Exit { code: exit_code };
    }

    if handle.is_incomplete() {
        // Delivery already failed once; waiting for the rest would likely
        // fail too, and joining the worker could hang.
        return decide(true, true, exit_code);
    }

    let flush_ok = handle.stop_and_drain(timeout).await;
    if !flush_ok {
        warn!("failed to flush all logs within {:?}, treating logs as incomplete", timeout);
    }

    decide(flush_ok, handle.is_incomplete(), exit_code)
}

/// Terminates the process according to `action`.
///
/// `ForceExit` must be the last thing that runs: `std::process::exit`
/// skips destructors and pending tasks, so background delivery threads
/// cannot block termination.
pub fn terminate(action: FinalizeAction) -> ! {
    std::process::exit(action.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_clean_drain_keeps_code() {
        assert_eq!(decide(true, false, 0), FinalizeAction::Exit { code: 0 });
        assert_eq!(decide(true, false, 2), FinalizeAction::Exit { code: 2 });
    }

    #[test]
    fn test_decide_timeout_with_green_run_stays_green() {
        assert_eq!(decide(false, false, 0), FinalizeAction::ForceExit { code: 0 });
    }

    #[test]
    fn test_decide_timeout_with_failures_escalates() {
        assert_eq!(
            decide(false, false, 1),
            FinalizeAction::ForceExit {
                code: LOGGER_ERROR_EXIT_CODE
            }
        );
        assert_eq!(
            decide(true, true, 74),
            FinalizeAction::ForceExit {
                code: LOGGER_ERROR_EXIT_CODE
            }
        );
    }

    #[tokio::test]
    async fn test_worker_delivers_records_to_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("muster.log");

        let (mut handle, sender) = start(sink.clone());
        sender.log("suite core started");
        sender.log("suite core finished");

        assert!(handle.stop_and_drain(Duration::from_secs(5)).await);
        assert!(!handle.is_incomplete());

        let content = std::fs::read_to_string(&sink).unwrap();
        assert!(content.contains("suite core started"));
        assert!(content.contains("suite core finished"));
    }

    #[tokio::test]
    async fn test_failed_delivery_marks_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        // A sink whose parent does not exist cannot be opened.
        let sink = dir.path().join("missing").join("muster.log");

        let (mut handle, sender) = start(sink);
        sender.log("doomed record");

        handle.stop_and_drain(Duration::from_secs(5)).await;
        assert!(handle.is_incomplete());
    }

    #[tokio::test]
    async fn test_finalize_interrupted_skips_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handle, sender) = start(dir.path().join("muster.log"));
        sender.log("late record");

        let action = finalize(&mut handle, true, 130, Duration::from_secs(5)).await;
        assert_eq!(action, FinalizeAction::Exit { code: 130 });
    }

    #[tokio::test]
    async fn test_finalize_clean_run() {
        let dir = tempfile::tempdir().unwrap();
        let (mut handle, sender) = start(dir.path().join("muster.log"));
        sender.log("record");

        let action = finalize(&mut handle, false, 0, Duration::from_secs(5)).await;
        assert_eq!(action, FinalizeAction::Exit { code: 0 });
    }

    #[tokio::test]
    async fn test_finalize_prior_incompleteness_escalates_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("missing").join("muster.log");
        let (mut handle, sender) = start(sink);
        sender.log("doomed");
        // Let the failed delivery land first.
        handle.stop_and_drain(Duration::from_secs(5)).await;
        assert!(handle.is_incomplete());

        let action = finalize(&mut handle, false, 3, Duration::from_secs(5)).await;
        assert_eq!(
            action,
            FinalizeAction::ForceExit {
                code: LOGGER_ERROR_EXIT_CODE
            }
        );
    }
}
