//! The execution orchestrator.
//!
//! Runs the expanded suite list strictly sequentially, one suite at a
//! time, classifying each suite's outcome to decide whether to keep
//! going, and aggregating the final process exit code. Owns the lifecycle
//! of the optional archival and helper process-manager resources and
//! guarantees the fixed teardown order on every exit path; only the log
//! flush finalizer's forced-exit case (see [`crate::logflush`]) may skip
//! it.

use std::path::PathBuf;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{error, info, warn};

use crate::archival::Archival;
use crate::config::{ArchivalConfig, ProcmanConfig};
use crate::executor::{ExecError, SuiteExecutor, IO_ERROR_EXIT_CODE, UNEXPECTED_ERROR_CODE};
use crate::logflush::RecordSender;
use crate::procman::ProcessManager;
use crate::report;
use crate::sighandler::{self, WorkerRegistry};
use crate::suite::Suite;

/// Outcome of the suite loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    /// The aggregated process exit code.
    pub exit_code: i32,
    /// Whether a fatal interruption stopped the loop.
    pub interrupted: bool,
}

/// The fixed teardown sequence.
///
/// Always executed in this order regardless of exit path; the log flush
/// runs last because it may terminate the process without returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// Stop the helper process manager.
    StopProcman,
    /// Finalize the artifact archive.
    FinalizeArchival,
    /// Write the machine-readable report file.
    WriteReport,
    /// Run the log flush finalizer.
    FlushLogs,
}

/// Returns the teardown steps to run, in order, for the given run state.
///
/// The report is written whenever the suite list was constructed, even on
/// abnormal exit. Archival is skipped when the run was interrupted.
pub fn teardown_plan(
    procman_started: bool,
    archival_started: bool,
    interrupted: bool,
    have_suites: bool,
) -> Vec<TeardownStep> {
    let mut steps = Vec::new();
    if procman_started {
        steps.push(TeardownStep::StopProcman);
    }
    if archival_started && !interrupted {
        steps.push(TeardownStep::FinalizeArchival);
    }
    if have_suites {
        steps.push(TeardownStep::WriteReport);
    }
    steps.push(TeardownStep::FlushLogs);
    steps
}

/// Invocation-level orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Shuffle each suite's test order before execution.
    pub shuffle: bool,
    /// Seed for the shuffle, fixed for the whole invocation.
    pub seed: u64,
    /// Where the run report is written.
    pub report_file: PathBuf,
    /// Archival settings, when enabled.
    pub archival: Option<ArchivalConfig>,
    /// Helper process-manager settings, when enabled.
    pub procman: Option<ProcmanConfig>,
}

/// Coordinates one invocation's suite executions.
pub struct TestOrchestrator<E> {
    executor: E,
    options: OrchestratorOptions,
    workers: WorkerRegistry,
    records: Option<RecordSender>,
    start: Instant,
}

impl<E: SuiteExecutor> TestOrchestrator<E> {
    /// Creates an orchestrator around the given per-suite executor.
    pub fn new(
        executor: E,
        options: OrchestratorOptions,
        workers: WorkerRegistry,
        records: Option<RecordSender>,
    ) -> Self {
        Self {
            executor,
            options,
            workers,
            records,
            start: Instant::now(),
        }
    }

    fn record(&self, message: String) {
        if let Some(records) = &self.records {
            records.log(message);
        }
    }

    /// Runs the full invocation: resource setup, the suite loop, and the
    /// non-flush teardown steps. The caller runs the log flush finalizer
    /// with the returned outcome, as the last step before process exit.
    pub async fn execute(&self, suites: &mut [Suite]) -> LoopOutcome {
        let mut archive: Option<Archival> = None;
        let mut procman: Option<ProcessManager> = None;

        let outcome = match self.setup(&mut archive, &mut procman, suites).await {
            Ok(()) => self.run_loop(suites, archive.as_ref()).await,
            Err(e) => {
                error!("failed to set up test run: {:#}", e);
                LoopOutcome {
                    exit_code: 1,
                    interrupted: false,
                }
            }
        };

        for step in teardown_plan(
            procman.is_some(),
            archive.is_some(),
            outcome.interrupted,
            true,
        ) {
            match step {
                TeardownStep::StopProcman => {
                    if let Some(manager) = procman.take() {
                        manager.stop().await;
                    }
                }
                TeardownStep::FinalizeArchival => {
                    if let Some(archive) = archive.take() {
                        if let Err(e) = archive.finalize() {
                            warn!("failed to finalize archival: {:#}", e);
                        }
                    }
                }
                TeardownStep::WriteReport => {
                    if let Err(e) = report::write(&self.options.report_file, suites) {
                        error!("failed to write report file: {:#}", e);
                    }
                }
                // The flush finalizer belongs to the caller: it must be the
                // very last thing that runs and may not return.
                TeardownStep::FlushLogs => {}
            }
        }

        outcome
    }

    async fn setup(
        &self,
        archive: &mut Option<Archival>,
        procman: &mut Option<ProcessManager>,
        suites: &[Suite],
    ) -> anyhow::Result<()> {
        if let Some(config) = &self.options.archival {
            *archive = Some(Archival::new(config.clone())?);
        }
        if let Some(config) = &self.options.procman {
            *procman = Some(ProcessManager::start(config).await?);
        }
        sighandler::register(suites.to_vec(), self.start, self.workers.clone())?;
        Ok(())
    }

    /// The sequential suite loop; public for driving pre-built suites
    /// without resource setup.
    pub async fn run_loop(&self, suites: &mut [Suite], archive: Option<&Archival>) -> LoopOutcome {
        let mut stopped: Option<i32> = None;
        let mut interrupted = false;

        for suite in suites.iter_mut() {
            interrupted = self.run_suite(suite, archive).await;
            let return_code = suite.return_code();
            if interrupted || (suite.options.fail_fast.unwrap_or(false) && return_code != 0) {
                stopped = Some(return_code);
                break;
            }
        }

        self.log_run_summary(suites);

        let exit_code = match stopped {
            Some(code) => code,
            // The worst-performing suite's code propagates.
            None => suites.iter().map(|s| s.return_code()).max().unwrap_or(0),
        };
        info!("exiting with code: {}", exit_code);
        LoopOutcome {
            exit_code,
            interrupted,
        }
    }

    /// Runs one suite; returns true when a fatal interruption occurred.
    async fn run_suite(&self, suite: &mut Suite, archive: Option<&Archival>) -> bool {
        self.log_suite_config(suite);
        self.record(format!("suite {} started", suite.display_name()));
        suite.record_start();
        let interrupted = self.execute_suite(suite, archive).await;
        suite.record_end();
        info!(
            "summary of {} suite: {}",
            suite.display_name(),
            suite.summarize()
        );
        self.record(format!(
            "suite {} finished: {}",
            suite.display_name(),
            suite.summarize()
        ));
        interrupted
    }

    async fn execute_suite(&self, suite: &mut Suite, archive: Option<&Archival>) -> bool {
        self.shuffle_tests(suite);

        if suite.tests.is_empty() {
            info!("skipping {}, no tests to run", suite.display_name());
            suite.set_return_code(0);
            return false;
        }

        match self.executor.execute(suite, archive).await {
            Ok(()) => false,
            Err(err @ (ExecError::UserInterrupt | ExecError::LoggerConfig(_))) => {
                error!(
                    "encountered an error when running {} tests of suite {}: {}",
                    suite.kind(),
                    suite.display_name(),
                    err
                );
                suite.set_return_code(err.exit_code());
                true
            }
            Err(ExecError::Io(err)) => {
                error!(
                    "I/O failure while running suite {}: {}",
                    suite.display_name(),
                    err
                );
                suite.set_return_code(IO_ERROR_EXIT_CODE);
                true
            }
            Err(ExecError::Unexpected(err)) => {
                // A bug in one suite's execution should not abort unrelated
                // suites; mark the suite failed and keep going.
                error!(
                    "encountered an unexpected error when running {} tests of suite {}: {:#}",
                    suite.kind(),
                    suite.display_name(),
                    err
                );
                suite.set_return_code(UNEXPECTED_ERROR_CODE);
                false
            }
        }
    }

    /// Shuffles the suite's test order when the shuffle flag is set.
    ///
    /// The generator is re-seeded with the invocation seed for every suite,
    /// so identical invocations reproduce identical orders.
    fn shuffle_tests(&self, suite: &mut Suite) {
        if !self.options.shuffle {
            return;
        }
        info!(
            "shuffling order of tests for suite {}, the seed is {}",
            suite.display_name(),
            self.options.seed
        );
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        suite.tests.shuffle(&mut rng);
    }

    fn log_suite_config(&self, suite: &Suite) {
        info!(
            "running suite {} ({} kind, {} tests, {} excluded)",
            suite.display_name(),
            suite.kind(),
            suite.tests.len(),
            suite.excluded.len()
        );
    }

    fn log_run_summary(&self, suites: &[Suite]) {
        let elapsed = self.start.elapsed().as_secs_f64();
        info!("{}", "=".repeat(80));
        info!("summary of the run ({:.2}s elapsed):", elapsed);
        for suite in suites {
            info!("  {}: {}", suite.display_name(), suite.summarize());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::{SuiteDef, SuiteOptions};
    use crate::suite::{TestCase, TestKind};

    /// What the scripted executor should do for one suite.
    enum Step {
        Code(i32),
        Interrupt,
        IoFailure,
        Blowup,
    }

    struct ScriptedExecutor {
        steps: Mutex<VecDeque<Step>>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                executed: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SuiteExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            suite: &Suite,
            _archive: Option<&Archival>,
        ) -> Result<(), ExecError> {
            self.executed.lock().unwrap().push(suite.display_name());
            match self.steps.lock().unwrap().pop_front() {
                None => {
                    suite.set_return_code(0);
                    Ok(())
                }
                Some(Step::Code(code)) => {
                    suite.set_return_code(code);
                    Ok(())
                }
                Some(Step::Interrupt) => Err(ExecError::UserInterrupt),
                Some(Step::IoFailure) => Err(ExecError::Io(std::io::Error::other("disk"))),
                Some(Step::Blowup) => Err(ExecError::Unexpected(anyhow::anyhow!("bug"))),
            }
        }
    }

    fn make_suite(name: &str, fail_fast: bool) -> Suite {
        let def = SuiteDef {
            kind: TestKind::Script,
            run_command: "node {test}".to_string(),
            tests: Vec::new(),
            exclude: Vec::new(),
        };
        let options = SuiteOptions {
            fail_fast: if fail_fast { Some(true) } else { None },
            ..SuiteOptions::inherit_all()
        };
        Suite::new(
            name,
            &def,
            vec![TestCase::new("a"), TestCase::new("b"), TestCase::new("c")],
            options,
        )
    }

    fn orchestrator(executor: ScriptedExecutor) -> TestOrchestrator<ScriptedExecutor> {
        let options = OrchestratorOptions {
            shuffle: false,
            seed: 0,
            report_file: std::env::temp_dir().join("muster-test-report.json"),
            archival: None,
            procman: None,
        };
        TestOrchestrator::new(executor, options, WorkerRegistry::default(), None)
    }

    #[tokio::test]
    async fn test_exit_code_is_max_of_suite_codes() {
        let executor = ScriptedExecutor::new(vec![
            Step::Code(0),
            Step::Code(2),
            Step::Code(0),
            Step::Code(1),
        ]);
        let mut suites: Vec<Suite> = (0..4).map(|i| make_suite(&format!("s{i}"), false)).collect();

        let orch = orchestrator(executor);
        let outcome = orch.run_loop(&mut suites, None).await;

        assert_eq!(outcome.exit_code, 2);
        assert!(!outcome.interrupted);
        assert_eq!(orch.executor.executed().len(), 4);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_the_loop() {
        let executor = ScriptedExecutor::new(vec![
            Step::Code(0),
            Step::Code(3),
            Step::Code(0),
            Step::Code(0),
            Step::Code(0),
        ]);
        let mut suites = vec![
            make_suite("s1", false),
            make_suite("s2", true),
            make_suite("s3", false),
            make_suite("s4", false),
            make_suite("s5", false),
        ];

        let orch = orchestrator(executor);
        let outcome = orch.run_loop(&mut suites, None).await;

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.interrupted);
        assert_eq!(orch.executor.executed(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_user_interrupt_stops_with_its_code() {
        let executor = ScriptedExecutor::new(vec![Step::Code(0), Step::Interrupt, Step::Code(0)]);
        let mut suites = vec![
            make_suite("s1", false),
            make_suite("s2", false),
            make_suite("s3", false),
        ];

        let orch = orchestrator(executor);
        let outcome = orch.run_loop(&mut suites, None).await;

        assert_eq!(outcome.exit_code, 130);
        assert!(outcome.interrupted);
        assert_eq!(orch.executor.executed(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_io_failure_is_fatal() {
        let executor = ScriptedExecutor::new(vec![Step::IoFailure, Step::Code(0)]);
        let mut suites = vec![make_suite("s1", false), make_suite("s2", false)];

        let orch = orchestrator(executor);
        let outcome = orch.run_loop(&mut suites, None).await;

        assert_eq!(outcome.exit_code, 74);
        assert!(outcome.interrupted);
        assert_eq!(orch.executor.executed(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_unexpected_error_is_not_fatal() {
        let executor = ScriptedExecutor::new(vec![Step::Blowup, Step::Code(0)]);
        let mut suites = vec![make_suite("s1", false), make_suite("s2", false)];

        let orch = orchestrator(executor);
        let outcome = orch.run_loop(&mut suites, None).await;

        // The broken suite is recorded as failed with the generic code and
        // the loop continues to the next suite.
        assert_eq!(suites[0].return_code(), 2);
        assert_eq!(outcome.exit_code, 2);
        assert!(!outcome.interrupted);
        assert_eq!(orch.executor.executed(), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_empty_suite_is_skipped_not_omitted() {
        let def = SuiteDef {
            kind: TestKind::Script,
            run_command: "node {test}".to_string(),
            tests: Vec::new(),
            exclude: Vec::new(),
        };
        let empty = Suite::new("empty", &def, Vec::new(), SuiteOptions::inherit_all());
        let executor = ScriptedExecutor::new(vec![Step::Code(0)]);
        let mut suites = vec![empty, make_suite("s2", false)];

        let orch = orchestrator(executor);
        let outcome = orch.run_loop(&mut suites, None).await;

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(suites[0].return_code(), 0);
        // The executor never saw the empty suite.
        assert_eq!(orch.executor.executed(), vec!["s2"]);
        // But it still started and ended for reporting purposes.
        assert!(suites[0].state().start_time.is_some());
    }

    #[tokio::test]
    async fn test_shuffle_is_deterministic() {
        let make = || {
            let mut suite = make_suite("s", false);
            suite.tests = (0..16).map(|i| TestCase::new(format!("t{i}"))).collect();
            suite
        };

        let options = OrchestratorOptions {
            shuffle: true,
            seed: 42,
            report_file: std::env::temp_dir().join("muster-test-report.json"),
            archival: None,
            procman: None,
        };
        let orch = TestOrchestrator::new(
            ScriptedExecutor::new(vec![]),
            options,
            WorkerRegistry::default(),
            None,
        );

        let mut first = make();
        let mut second = make();
        orch.shuffle_tests(&mut first);
        orch.shuffle_tests(&mut second);

        assert_eq!(first.tests, second.tests);
        // The shuffle must actually change something for this many tests.
        assert_ne!(first.tests, make().tests);
    }

    #[tokio::test]
    async fn test_shuffle_disabled_preserves_order() {
        let orch = orchestrator(ScriptedExecutor::new(vec![]));
        let mut suite = make_suite("s", false);
        let before = suite.tests.clone();
        orch.shuffle_tests(&mut suite);
        assert_eq!(suite.tests, before);
    }

    #[test]
    fn test_teardown_order_is_fixed() {
        assert_eq!(
            teardown_plan(true, true, false, true),
            vec![
                TeardownStep::StopProcman,
                TeardownStep::FinalizeArchival,
                TeardownStep::WriteReport,
                TeardownStep::FlushLogs,
            ]
        );
    }

    #[test]
    fn test_teardown_skips_archival_when_interrupted() {
        assert_eq!(
            teardown_plan(true, true, true, true),
            vec![
                TeardownStep::StopProcman,
                TeardownStep::WriteReport,
                TeardownStep::FlushLogs,
            ]
        );
    }

    #[test]
    fn test_teardown_always_flushes_logs() {
        assert_eq!(
            teardown_plan(false, false, false, false),
            vec![TeardownStep::FlushLogs]
        );
    }
}
