//! Configuration schema definitions for muster.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files, plus the in-memory option types the orchestrator
//! and variant expander work with.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── MusterConfig           - Core settings (seed, shuffle, report, flush)
//! ├── ArchivalConfig         - Optional artifact archival settings
//! ├── ProcmanConfig          - Optional helper process-manager settings
//! └── suite.<name>           - Named suite definitions (SuiteDef)
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::suite::TagExpr;

/// Root configuration structure for muster.
///
/// # TOML Structure
///
/// ```toml
/// [muster]
/// shuffle = false
/// seed = 42
/// report_file = "report.json"
///
/// [suite.core]
/// kind = "script"
/// run_command = "node {test}"
///
/// [[suite.core.tests]]
/// path = "tests/core/basic.js"
/// tags = ["unreliable"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core muster settings.
    #[serde(default)]
    pub muster: MusterConfig,

    /// Artifact archival settings; archival is disabled when absent.
    pub archival: Option<ArchivalConfig>,

    /// Helper process-manager settings; disabled when absent.
    pub procman: Option<ProcmanConfig>,

    /// Named suite definitions, keyed by suite name.
    #[serde(default)]
    pub suite: BTreeMap<String, SuiteDef>,
}

/// Core execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MusterConfig {
    /// Shuffle test order within each suite before execution.
    ///
    /// The shuffle uses `seed`, which is fixed for the whole invocation,
    /// so re-runs with the same seed reproduce the same order.
    ///
    /// Default: false
    #[serde(default)]
    pub shuffle: bool,

    /// Seed for the test-order shuffle.
    ///
    /// Default: 0
    #[serde(default)]
    pub seed: u64,

    /// Default parallel job count inside a suite's executor.
    ///
    /// Default: 4
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Timeout for a single test process in seconds.
    ///
    /// Default: 900 (15 minutes)
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// Path of the machine-readable run report.
    ///
    /// Default: `report.json`
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,

    /// Sink file for the buffered log-flush worker.
    ///
    /// Default: `muster.log`
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Bound on the final log drain at shutdown, in seconds.
    ///
    /// Default: 60
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,
}

impl Default for MusterConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            seed: 0,
            jobs: default_jobs(),
            test_timeout_secs: default_test_timeout(),
            report_file: default_report_file(),
            log_file: default_log_file(),
            flush_timeout_secs: default_flush_timeout(),
        }
    }
}

fn default_jobs() -> usize {
    4
}

fn default_test_timeout() -> u64 {
    900 // 15 minutes
}

fn default_report_file() -> PathBuf {
    PathBuf::from("report.json")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("muster.log")
}

fn default_flush_timeout() -> u64 {
    60
}

/// Artifact archival settings.
///
/// Archival packages output of failing tests into a tar archive, up to the
/// configured size and file-count limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchivalConfig {
    /// Path of the tar archive to create.
    pub file: PathBuf,

    /// Maximum total archive size in megabytes.
    #[serde(default = "default_archive_limit_mb")]
    pub limit_size_mb: u64,

    /// Maximum number of archived test outputs.
    #[serde(default = "default_archive_limit_files")]
    pub limit_files: usize,
}

fn default_archive_limit_mb() -> u64 {
    1024
}

fn default_archive_limit_files() -> usize {
    50
}

/// Helper process-manager settings.
///
/// When configured, the orchestrator launches this long-running process
/// before any suite executes and stops it first during teardown. The test
/// executor uses it for spawning test processes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcmanConfig {
    /// Command line used to launch the manager.
    pub command: String,

    /// TCP port the manager listens on once ready.
    pub port: u16,

    /// Bound on the readiness wait at startup, in seconds.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_ready_timeout() -> u64 {
    30
}

/// A named suite definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteDef {
    /// Test kind; decides which runner semantics apply and whether the
    /// suite participates in tag-based variant expansion.
    pub kind: crate::suite::TestKind,

    /// Command template for one test; `{test}` is replaced by the test path.
    pub run_command: String,

    /// Member tests with their tag annotations.
    #[serde(default)]
    pub tests: Vec<TestDef>,

    /// Test paths excluded from this suite regardless of selection.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One test entry inside a suite definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestDef {
    /// Test path or identifier.
    pub path: String,

    /// Tags attached to this test.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// How a suite's test failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    /// Failures fail the suite (non-zero return code).
    Fail,
    /// Failures are tallied and logged but the suite reports success.
    SilentFail,
}

/// Per-suite execution options.
///
/// Every field is optional; `None` is the "inherit" sentinel meaning "use
/// the base suite's (or the invocation's) default". Constructed once,
/// cloned-with-override per variant, never mutated after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteOptions {
    /// Human description of this option set (set per expansion variant).
    pub description: Option<String>,

    /// Stop the whole run on this suite's first failure.
    pub fail_fast: Option<bool>,

    /// Only tests matching this expression are selected.
    pub include_tags: Option<TagExpr>,

    /// Tests matching this expression are dropped from selection.
    pub exclude_tags: Option<TagExpr>,

    /// Parallel job count inside the executor.
    pub num_jobs: Option<usize>,

    /// Number of times the whole suite is repeated.
    pub repeat_suites: Option<usize>,

    /// Number of times each test is repeated within one suite pass.
    pub repeat_tests: Option<usize>,

    /// Failure-reporting mode.
    pub report_failure_status: Option<FailureStatus>,
}

impl SuiteOptions {
    /// An option set with every field inherited.
    pub fn inherit_all() -> Self {
        Self::default()
    }

    /// Combines two option sets field-by-field.
    ///
    /// For each field, an explicit value in `other` wins; an inherited
    /// (`None`) field in `other` never overrides an explicit value in
    /// `self`. The one exception is `include_tags`: when both operands set
    /// it, the filters are conjoined, since each expansion predicate
    /// contributes its own include filter and all of them must hold. The
    /// operation is associative with respect to explicitly-set fields.
    pub fn combine(&self, other: &SuiteOptions) -> SuiteOptions {
        let include_tags = match (self.include_tags.clone(), other.include_tags.clone()) {
            (Some(a), Some(b)) => Some(a.and(b)),
            (a, b) => a.or(b),
        };
        SuiteOptions {
            description: other.description.clone().or_else(|| self.description.clone()),
            fail_fast: other.fail_fast.or(self.fail_fast),
            include_tags,
            exclude_tags: other
                .exclude_tags
                .clone()
                .or_else(|| self.exclude_tags.clone()),
            num_jobs: other.num_jobs.or(self.num_jobs),
            repeat_suites: other.repeat_suites.or(self.repeat_suites),
            repeat_tests: other.repeat_tests.or(self.repeat_tests),
            report_failure_status: other.report_failure_status.or(self.report_failure_status),
        }
    }

    /// Combines a sequence of option sets, later-applied-wins per field.
    pub fn combine_all<'a, I>(options: I) -> SuiteOptions
    where
        I: IntoIterator<Item = &'a SuiteOptions>,
    {
        options
            .into_iter()
            .fold(SuiteOptions::inherit_all(), |acc, opt| acc.combine(opt))
    }

    /// Sets the description, consuming self.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Identity of the surrounding CI task, consumed only by the variant
/// expander to select the combination matrix and build hierarchical tag
/// names. Any of the identifying strings may be absent.
#[derive(Debug, Clone, Default)]
pub struct CiContext {
    /// True when running in a patch-build context rather than mainline.
    pub patch_build: bool,

    /// CI task name.
    pub task_name: Option<String>,

    /// CI build-variant name.
    pub variant_name: Option<String>,

    /// CI distro identifier.
    pub distro_id: Option<String>,
}
