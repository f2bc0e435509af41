//! Suite resolution from configuration.
//!
//! Turns named suite definitions from the configuration file into
//! [`Suite`] instances, applying definition-level exclusion lists and the
//! CLI's test-file selection.

use crate::config::{Config, SuiteOptions};
use crate::suite::{Suite, TestCase};

/// Errors resolving the invocation's suites.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The requested suite is not defined in the configuration.
    #[error("suite {name:?} not found; available suites: {}", available.join(", "))]
    SuiteNotFound {
        name: String,
        available: Vec<String>,
    },

    /// No suites were requested and the configuration defines none.
    #[error("no suites defined in configuration")]
    NoSuites,
}

/// The names of all defined suites, in definition order.
pub fn suite_names(config: &Config) -> Vec<String> {
    config.suite.keys().cloned().collect()
}

/// Resolves the ordered suite list for this invocation.
///
/// `names` selects which suites run (all defined suites when empty, in
/// definition order). `test_files` restricts each suite's membership to
/// the listed tests; unmatched members land in the suite's excluded list.
pub fn resolve_suites(
    config: &Config,
    names: &[String],
    test_files: &[String],
) -> Result<Vec<Suite>, RegistryError> {
    let selected: Vec<String> = if names.is_empty() {
        suite_names(config)
    } else {
        names.to_vec()
    };
    if selected.is_empty() {
        return Err(RegistryError::NoSuites);
    }

    let mut suites = Vec::new();
    for name in &selected {
        let def = config
            .suite
            .get(name)
            .ok_or_else(|| RegistryError::SuiteNotFound {
                name: name.clone(),
                available: suite_names(config),
            })?;

        let mut membership = Vec::new();
        let mut pre_excluded = Vec::new();
        for test_def in &def.tests {
            let case = TestCase {
                path: test_def.path.clone(),
                tags: test_def.tags.clone(),
            };
            let dropped = def.exclude.iter().any(|e| e == &test_def.path)
                || (!test_files.is_empty() && !test_files.iter().any(|f| f == &test_def.path));
            if dropped {
                pre_excluded.push(case);
            } else {
                membership.push(case);
            }
        }

        let mut suite = Suite::new(name, def, membership, SuiteOptions::inherit_all());
        // Definition-level exclusions stay visible in the excluded list.
        suite.excluded.extend(pre_excluded);
        suites.push(suite);
    }

    Ok(suites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_str;

    fn config() -> Config {
        load_config_str(
            r#"
            [suite.alpha]
            kind = "script"
            run_command = "node {test}"
            exclude = ["tests/flaky.js"]

            [[suite.alpha.tests]]
            path = "tests/a.js"
            tags = ["unreliable"]

            [[suite.alpha.tests]]
            path = "tests/b.js"

            [[suite.alpha.tests]]
            path = "tests/flaky.js"

            [suite.beta]
            kind = "binary"
            run_command = "{test}"

            [[suite.beta.tests]]
            path = "build/beta_test"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolves_all_suites_by_default() {
        let suites = resolve_suites(&config(), &[], &[]).unwrap();
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[0].name(), "alpha");
        assert_eq!(suites[1].name(), "beta");
    }

    #[test]
    fn test_definition_exclusions_apply() {
        let suites = resolve_suites(&config(), &["alpha".to_string()], &[]).unwrap();
        let alpha = &suites[0];
        assert_eq!(alpha.tests.len(), 2);
        assert!(alpha.excluded.iter().any(|t| t.path == "tests/flaky.js"));
    }

    #[test]
    fn test_test_file_selection_restricts_membership() {
        let suites =
            resolve_suites(&config(), &["alpha".to_string()], &["tests/b.js".to_string()])
                .unwrap();
        assert_eq!(suites[0].tests.len(), 1);
        assert_eq!(suites[0].tests[0].path, "tests/b.js");
    }

    #[test]
    fn test_unknown_suite_lists_available() {
        let err = resolve_suites(&config(), &["nope".to_string()], &[]).unwrap_err();
        match err {
            RegistryError::SuiteNotFound { name, available } => {
                assert_eq!(name, "nope");
                assert_eq!(available, vec!["alpha".to_string(), "beta".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
