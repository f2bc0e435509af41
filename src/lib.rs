//! muster: a test-execution orchestrator for multi-kind test corpora.
//!
//! This crate runs a sequence of named test suites, each executed by a
//! per-kind runner, and supervises the whole invocation: CI-aware
//! expansion of tag-aware suites into tagged variants, interrupt and
//! failure classification, exit-code aggregation, and teardown sequencing
//! that holds on every exit path.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Registry**: resolves named suite definitions into [`Suite`]s
//! - **Expander**: multiplies tag-aware suites into CI variants
//! - **Orchestrator**: runs the suite list sequentially and owns teardown
//! - **Executor**: runs one suite's tests (child processes)
//! - **Logflush**: buffered log delivery with a bounded shutdown drain
//!
//! # Example
//!
//! ```no_run
//! use muster::config::load_config;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = load_config(std::path::Path::new("muster.toml"))?;
//! let suites = muster::registry::resolve_suites(&config, &[], &[])?;
//! println!("{} suites resolved", suites.len());
//! # Ok(())
//! # }
//! ```

pub mod archival;
pub mod config;
pub mod executor;
pub mod expand;
pub mod logflush;
pub mod orchestrator;
pub mod procman;
pub mod registry;
pub mod report;
pub mod sighandler;
pub mod suite;

// Re-export commonly used types
pub use config::{load_config, CiContext, Config, SuiteOptions};
pub use executor::{ProcessExecutor, SuiteExecutor};
pub use expand::expand_suites;
pub use orchestrator::{LoopOutcome, OrchestratorOptions, TestOrchestrator};
pub use suite::{Suite, TagExpr, TestCase, TestKind};
