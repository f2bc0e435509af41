//! Child-process suite executor.
//!
//! Runs each test of a suite as a local child process built from the
//! suite's command template, with bounded parallelism taken from the
//! suite's effective `num_jobs`. Honors per-suite repeat counts, fail-fast,
//! silent failure reporting, and cooperative cancellation.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ExecError, SuiteExecutor};
use crate::archival::Archival;
use crate::config::FailureStatus;
use crate::sighandler::WorkerRegistry;
use crate::suite::{Suite, TestCase};

/// Outcome of one test's (possibly repeated) execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Executes suites by spawning one child process per test.
pub struct ProcessExecutor {
    default_jobs: usize,
    test_timeout: Duration,
    cancel: CancellationToken,
    workers: WorkerRegistry,
}

impl ProcessExecutor {
    /// Create a new process executor.
    pub fn new(
        default_jobs: usize,
        test_timeout: Duration,
        cancel: CancellationToken,
        workers: WorkerRegistry,
    ) -> Self {
        Self {
            default_jobs,
            test_timeout,
            cancel,
            workers,
        }
    }

    /// Runs one test, repeating it `repeat_tests` times; the test fails if
    /// any repetition fails. Updates the suite's tallies as it goes so that
    /// progress snapshots stay current mid-suite.
    async fn run_one(
        &self,
        suite: &Suite,
        test: &TestCase,
        argv: &[String],
        repeat_tests: usize,
        archive: Option<&Archival>,
        stop: &AtomicBool,
    ) -> Result<TestStatus, ExecError> {
        if stop.load(Ordering::SeqCst) {
            suite.state().skipped += 1;
            return Ok(TestStatus::Skipped);
        }
        if self.cancel.is_cancelled() {
            return Err(ExecError::UserInterrupt);
        }

        let _guard = self
            .workers
            .begin(format!("{}: {}", suite.display_name(), test.path));

        let mut failed = false;
        for attempt in 0..repeat_tests.max(1) {
            let mut cmd = tokio::process::Command::new(&argv[0]);
            for arg in &argv[1..] {
                cmd.arg(arg.replace("{test}", &test.path));
            }
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);

            debug!(test = %test.path, attempt, "starting test process");

            let output = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ExecError::UserInterrupt),
                result = tokio::time::timeout(self.test_timeout, cmd.output()) => match result {
                    Ok(output) => Some(output?),
                    Err(_) => {
                        warn!(
                            test = %test.path,
                            "test timed out after {}s",
                            self.test_timeout.as_secs()
                        );
                        None
                    }
                },
            };

            let passed = output
                .as_ref()
                .map(|o| o.status.success())
                .unwrap_or(false);

            if !passed {
                failed = true;
                if let (Some(archive), Some(output)) = (archive, output.as_ref()) {
                    if let Err(e) = archive.archive_test_output(
                        &suite.display_name(),
                        &test.path,
                        &output.stdout,
                        &output.stderr,
                    ) {
                        warn!(test = %test.path, "failed to archive test output: {}", e);
                    }
                }
                break;
            }
        }

        let mut state = suite.state();
        if failed {
            state.failed += 1;
            Ok(TestStatus::Failed)
        } else {
            state.passed += 1;
            Ok(TestStatus::Passed)
        }
    }
}

#[async_trait]
impl SuiteExecutor for ProcessExecutor {
    async fn execute(&self, suite: &Suite, archive: Option<&Archival>) -> Result<(), ExecError> {
        let template = &suite.executor_config().run_command;
        let argv = shell_words::split(template)
            .map_err(|e| ExecError::Unexpected(anyhow!("bad run command {:?}: {}", template, e)))?;
        if argv.is_empty() {
            return Err(ExecError::Unexpected(anyhow!(
                "empty run command for suite {}",
                suite.display_name()
            )));
        }

        let options = &suite.options;
        let jobs = options.num_jobs.unwrap_or(self.default_jobs).max(1);
        let repeat_suites = options.repeat_suites.unwrap_or(1).max(1);
        let repeat_tests = options.repeat_tests.unwrap_or(1).max(1);
        let fail_fast = options.fail_fast.unwrap_or(false);
        let silent = options.report_failure_status == Some(FailureStatus::SilentFail);

        for pass in 0..repeat_suites {
            if repeat_suites > 1 {
                info!(
                    "suite {} pass {}/{}",
                    suite.display_name(),
                    pass + 1,
                    repeat_suites
                );
            }

            let stop = AtomicBool::new(false);
            let stop = &stop;
            let argv = &argv;
            let futures: Vec<_> = suite
                .tests
                .iter()
                .map(|test| async move {
                    let result = self
                        .run_one(suite, test, argv, repeat_tests, archive, stop)
                        .await;
                    if fail_fast && matches!(result, Ok(TestStatus::Failed)) {
                        stop.store(true, Ordering::SeqCst);
                    }
                    result
                })
                .collect();
            let outcomes: Vec<Result<TestStatus, ExecError>> = stream::iter(futures)
                .buffer_unordered(jobs)
                .collect()
                .await;

            for outcome in outcomes {
                outcome?;
            }

            if fail_fast && suite.state().failed > 0 {
                break;
            }
        }

        let failed = suite.state().failed;
        if failed > 0 && silent {
            info!(
                "suite {}: {} failures reported silently",
                suite.display_name(),
                failed
            );
        }
        suite.set_return_code(if failed > 0 && !silent { 1 } else { 0 });

        Ok(())
    }
}
