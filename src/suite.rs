//! Suites, tests, and tag expressions.
//!
//! A [`Suite`] binds one test kind to a resolved test membership and a
//! concrete [`SuiteOptions`] set. Derived suites produced by
//! [`Suite::with_options`] share the parent's membership and selection logic
//! but carry independent result state, so one logical suite can be
//! multiplied into several tagged variants that are executed and reported
//! separately.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SuiteDef, SuiteOptions};

/// A boolean expression over test tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum TagExpr {
    /// Matches when the named tag is present.
    Literal(String),
    /// Matches when any of the named tags is present.
    AnyOf(Vec<String>),
    /// Matches when all inner expressions match.
    AllOf(Vec<TagExpr>),
    /// Matches when the inner expression does not.
    Not(Box<TagExpr>),
}

impl TagExpr {
    /// Evaluates the expression against a test's tag set.
    pub fn matches(&self, tags: &[String]) -> bool {
        match self {
            TagExpr::Literal(name) => tags.iter().any(|t| t == name),
            TagExpr::AnyOf(names) => names.iter().any(|n| tags.iter().any(|t| t == n)),
            TagExpr::AllOf(exprs) => exprs.iter().all(|e| e.matches(tags)),
            TagExpr::Not(inner) => !inner.matches(tags),
        }
    }

    /// Wraps the expression in a negation.
    pub fn negate(self) -> TagExpr {
        TagExpr::Not(Box::new(self))
    }

    /// Conjoins two expressions, flattening nested conjunctions so that
    /// repeated combination stays order-insensitive in structure.
    pub fn and(self, other: TagExpr) -> TagExpr {
        let mut parts = match self {
            TagExpr::AllOf(parts) => parts,
            expr => vec![expr],
        };
        match other {
            TagExpr::AllOf(more) => parts.extend(more),
            expr => parts.push(expr),
        }
        TagExpr::AllOf(parts)
    }
}

/// The category of runner a suite uses.
///
/// Only the `Script` kind carries tag annotations on its tests, so only
/// `Script` suites participate in tag-based variant expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Script tests executed through an interpreter; tag-aware.
    Script,
    /// Compiled test binaries.
    Binary,
    /// Shell-driven tests.
    Shell,
}

impl TestKind {
    /// Whether tests of this kind carry tags usable for variant expansion.
    pub fn is_tag_aware(&self) -> bool {
        matches!(self, TestKind::Script)
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestKind::Script => "script",
            TestKind::Binary => "binary",
            TestKind::Shell => "shell",
        };
        f.write_str(name)
    }
}

/// A single test within a suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Test path or identifier, e.g. `tests/core/basic.js`.
    pub path: String,

    /// Tags attached to this test.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TestCase {
    /// Create a new test case with the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tags: Vec::new(),
        }
    }

    /// Attach tags to the test case.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Mutable result state of one suite execution.
///
/// Written only by the orchestrator and the executor it delegates to, never
/// concurrently; read by the signal monitor through the shared handle.
#[derive(Debug, Default)]
pub struct SuiteState {
    /// Process-style return code of the suite; 0 means success.
    pub return_code: i32,

    /// Wall-clock start of the suite, recorded by the orchestrator.
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock end of the suite.
    pub end_time: Option<DateTime<Utc>>,

    /// Monotonic start, for elapsed-time summaries.
    start_instant: Option<Instant>,

    /// Elapsed execution time, fixed once the suite ends.
    pub elapsed: Option<Duration>,

    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that were skipped.
    pub skipped: usize,
}

/// Per-suite executor configuration resolved from the suite definition.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Command template for one test; `{test}` is replaced by the test path.
    pub run_command: String,
}

/// One logical test kind bound to a concrete option set and resolved test
/// membership.
#[derive(Debug, Clone)]
pub struct Suite {
    name: String,
    kind: TestKind,
    /// Full resolved membership before tag filtering. Derived suites
    /// re-select from this list.
    membership: Vec<TestCase>,
    /// Tests selected for execution, in order.
    pub tests: Vec<TestCase>,
    /// Tests excluded by selection or tag filters, in order.
    pub excluded: Vec<TestCase>,
    /// Resolved options for this suite.
    pub options: SuiteOptions,
    exec_config: ExecutorConfig,
    state: Arc<Mutex<SuiteState>>,
}

impl Suite {
    /// Builds a suite from its definition, an initial membership, and the
    /// invocation-level options.
    pub fn new(
        name: impl Into<String>,
        def: &SuiteDef,
        membership: Vec<TestCase>,
        options: SuiteOptions,
    ) -> Self {
        let mut suite = Self {
            name: name.into(),
            kind: def.kind,
            membership,
            tests: Vec::new(),
            excluded: Vec::new(),
            options: SuiteOptions::inherit_all(),
            exec_config: ExecutorConfig {
                run_command: def.run_command.clone(),
            },
            state: Arc::new(Mutex::new(SuiteState::default())),
        };
        suite.apply_options(options);
        suite
    }

    /// The suite's base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name shown in logs and summaries; includes the variant description
    /// when one is set.
    pub fn display_name(&self) -> String {
        match &self.options.description {
            Some(desc) => format!("{} ({})", self.name, desc),
            None => self.name.clone(),
        }
    }

    /// The suite's test kind.
    pub fn kind(&self) -> TestKind {
        self.kind
    }

    /// The resolved executor configuration.
    pub fn executor_config(&self) -> &ExecutorConfig {
        &self.exec_config
    }

    /// Derives a new suite sharing this suite's membership and selection
    /// logic but bound to `options`.
    ///
    /// The derived suite is an independent entity with its own result state;
    /// many derived suites may originate from one parent.
    pub fn with_options(&self, options: SuiteOptions) -> Suite {
        let mut derived = Suite {
            name: self.name.clone(),
            kind: self.kind,
            membership: self.membership.clone(),
            tests: Vec::new(),
            excluded: Vec::new(),
            options: SuiteOptions::inherit_all(),
            exec_config: self.exec_config.clone(),
            state: Arc::new(Mutex::new(SuiteState::default())),
        };
        derived.apply_options(options);
        derived
    }

    /// Re-selects `tests`/`excluded` from the full membership under the
    /// given options' tag filters.
    fn apply_options(&mut self, options: SuiteOptions) {
        self.tests.clear();
        self.excluded.clear();
        for test in &self.membership {
            let included = options
                .include_tags
                .as_ref()
                .map(|expr| expr.matches(&test.tags))
                .unwrap_or(true);
            let excluded = options
                .exclude_tags
                .as_ref()
                .map(|expr| expr.matches(&test.tags))
                .unwrap_or(false);
            if included && !excluded {
                self.tests.push(test.clone());
            } else {
                self.excluded.push(test.clone());
            }
        }
        self.options = options;
    }

    /// Shared handle to the suite's result state, for read-only observers.
    pub fn state_handle(&self) -> Arc<Mutex<SuiteState>> {
        Arc::clone(&self.state)
    }

    /// Locks and returns the suite's result state.
    pub fn state(&self) -> MutexGuard<'_, SuiteState> {
        self.state.lock().expect("suite state poisoned")
    }

    /// The suite's return code; 0 until a failure is recorded.
    pub fn return_code(&self) -> i32 {
        self.state().return_code
    }

    /// Sets the suite's return code.
    pub fn set_return_code(&self, code: i32) {
        self.state().return_code = code;
    }

    /// Records the start of suite execution.
    pub fn record_start(&self) {
        let mut state = self.state();
        state.start_time = Some(Utc::now());
        state.start_instant = Some(Instant::now());
    }

    /// Records the end of suite execution and fixes the elapsed time.
    pub fn record_end(&self) {
        let mut state = self.state();
        state.end_time = Some(Utc::now());
        state.elapsed = state.start_instant.map(|start| start.elapsed());
    }

    /// A one-line summary of the suite's results so far.
    pub fn summarize(&self) -> String {
        let state = self.state();
        let ran = state.passed + state.failed;
        if state.start_time.is_none() {
            return "not yet started".to_string();
        }
        if ran == 0 && state.skipped == 0 {
            return match state.elapsed {
                Some(_) => "no tests run".to_string(),
                None => "in progress, no tests finished yet".to_string(),
            };
        }
        let elapsed = state
            .elapsed
            .map(|d| format!(" in {:.2}s", d.as_secs_f64()))
            .unwrap_or_default();
        format!(
            "{} passed, {} failed, {} skipped{}",
            state.passed, state.failed, state.skipped, elapsed
        )
    }
}
