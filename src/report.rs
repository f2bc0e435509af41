//! Machine-readable run report.
//!
//! Once the suite list is known, a JSON report describing every suite of
//! the invocation is written unconditionally during teardown, including on
//! abnormal exits, so downstream tooling always has a record of what ran.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::suite::Suite;

/// The whole-run report artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this invocation.
    pub run_id: String,
    /// When the report was written.
    pub generated_at: DateTime<Utc>,
    /// Per-suite results, in execution order.
    pub suites: Vec<SuiteReport>,
}

/// Result record of one suite.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Display name, including the variant description when present.
    pub name: String,
    /// Test kind.
    pub kind: String,
    /// Suite return code; 0 means success.
    pub return_code: i32,
    /// Wall-clock start, absent when the suite never started.
    pub start_time: Option<DateTime<Utc>>,
    /// Wall-clock end, absent when the suite never finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Tests that passed.
    pub passed: usize,
    /// Tests that failed.
    pub failed: usize,
    /// Tests that were skipped.
    pub skipped: usize,
    /// Tests selected for the suite.
    pub selected: usize,
    /// Tests excluded from the suite.
    pub excluded: usize,
}

impl RunReport {
    /// Builds the report from the suite list.
    pub fn from_suites(suites: &[Suite]) -> Self {
        let suite_reports = suites
            .iter()
            .map(|suite| {
                let state = suite.state();
                SuiteReport {
                    name: suite.display_name(),
                    kind: suite.kind().to_string(),
                    return_code: state.return_code,
                    start_time: state.start_time,
                    end_time: state.end_time,
                    passed: state.passed,
                    failed: state.failed,
                    skipped: state.skipped,
                    selected: suite.tests.len(),
                    excluded: suite.excluded.len(),
                }
            })
            .collect();

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            suites: suite_reports,
        }
    }
}

/// Prints a styled per-suite summary to stdout.
pub fn print_summary(suites: &[Suite]) {
    println!();
    println!("{}", console::style("Run Summary").bold());
    for suite in suites {
        let state = suite.state();
        let status = if state.start_time.is_none() {
            console::style("SKIP").yellow()
        } else if state.return_code == 0 {
            console::style("PASS").green()
        } else {
            console::style("FAIL").red().bold()
        };
        println!(
            "  {} {} ({} passed, {} failed, {} skipped)",
            status,
            suite.display_name(),
            state.passed,
            state.failed,
            state.skipped
        );
    }
}

/// Writes the report for `suites` to `path`.
pub fn write(path: &Path, suites: &[Suite]) -> Result<()> {
    let report = RunReport::from_suites(suites);
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SuiteDef, SuiteOptions};
    use crate::suite::{TestCase, TestKind};

    fn make_suite(name: &str) -> Suite {
        let def = SuiteDef {
            kind: TestKind::Script,
            run_command: "node {test}".to_string(),
            tests: Vec::new(),
            exclude: Vec::new(),
        };
        Suite::new(
            name,
            &def,
            vec![TestCase::new("a.js"), TestCase::new("b.js")],
            SuiteOptions::inherit_all(),
        )
    }

    #[test]
    fn test_report_covers_unstarted_suites() {
        let ran = make_suite("ran");
        ran.record_start();
        {
            let mut state = ran.state();
            state.passed = 2;
        }
        ran.record_end();
        ran.set_return_code(0);

        let never_started = make_suite("skipped");
        never_started.set_return_code(0);

        let report = RunReport::from_suites(&[ran, never_started]);
        assert_eq!(report.suites.len(), 2);
        assert!(report.suites[0].start_time.is_some());
        assert!(report.suites[1].start_time.is_none());
        assert_eq!(report.suites[0].passed, 2);
    }

    #[test]
    fn test_write_produces_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let suite = make_suite("core");
        suite.set_return_code(1);

        write(&path, &[suite]).unwrap();

        let report: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.suites.len(), 1);
        assert_eq!(report.suites[0].return_code, 1);
        assert_eq!(report.suites[0].kind, "script");
        assert_eq!(report.suites[0].selected, 2);
    }
}
