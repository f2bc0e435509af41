//! Suite variant expansion for CI contexts.
//!
//! In CI, a single tag-aware suite is run several times with different tag
//! filters so that unreliable and resource-intensive tests are isolated
//! from the rest: unreliable failures can be reported silently, and
//! resource-intensive tests can run with reduced parallelism. This module
//! turns each tag-aware suite into exactly four derived variants, one per
//! entry of the active combination matrix, in a fixed order that summary
//! reporting relies on.

use crate::config::{CiContext, FailureStatus, SuiteOptions};
use crate::suite::{Suite, TagExpr};

/// A tag predicate used by the combination matrix.
#[derive(Debug, Clone, Copy)]
struct TagInfo {
    /// Base tag name.
    tag_name: &'static str,
    /// Whether the tag's applicability is refined by task/variant/distro
    /// identity via hierarchical tag names.
    context_aware: bool,
}

impl TagInfo {
    /// Extra options a variant gets when this predicate is enabled.
    fn suite_options(&self) -> SuiteOptions {
        match self.tag_name {
            UNRELIABLE_TAG_NAME => SuiteOptions {
                report_failure_status: Some(FailureStatus::SilentFail),
                ..SuiteOptions::inherit_all()
            },
            RESOURCE_INTENSIVE_TAG_NAME => SuiteOptions {
                num_jobs: Some(1),
                ..SuiteOptions::inherit_all()
            },
            RETRY_ON_FAILURE_TAG_NAME => SuiteOptions {
                fail_fast: Some(false),
                repeat_suites: Some(2),
                repeat_tests: Some(1),
                report_failure_status: Some(FailureStatus::SilentFail),
                ..SuiteOptions::inherit_all()
            },
            _ => SuiteOptions::inherit_all(),
        }
    }
}

const UNRELIABLE_TAG_NAME: &str = "unreliable";
const RESOURCE_INTENSIVE_TAG_NAME: &str = "resource_intensive";
const RETRY_ON_FAILURE_TAG_NAME: &str = "retry_on_failure";

const UNRELIABLE_TAG: TagInfo = TagInfo {
    tag_name: UNRELIABLE_TAG_NAME,
    context_aware: true,
};

const RESOURCE_INTENSIVE_TAG: TagInfo = TagInfo {
    tag_name: RESOURCE_INTENSIVE_TAG_NAME,
    context_aware: false,
};

const RETRY_ON_FAILURE_TAG: TagInfo = TagInfo {
    tag_name: RETRY_ON_FAILURE_TAG_NAME,
    context_aware: true,
};

/// One combination-matrix entry: a human description plus two orthogonal
/// (predicate, enabled) pairs. Internal to expansion, never persisted.
type TagCombination = (&'static str, [(TagInfo, bool); 2]);

/// Returns the hierarchical family of tag names for `tag_name` in `ctx`.
///
/// The family is base tag, `tag|task`, `tag|task|variant`,
/// `tag|task|variant|distro`, including only the suffixes whose identifying
/// context string is known. With no context strings the family is just the
/// base tag.
pub fn context_aware_tags(tag_name: &str, ctx: &CiContext) -> Vec<String> {
    let mut tags = vec![tag_name.to_string()];

    if let Some(task) = &ctx.task_name {
        tags.push(format!("{}|{}", tag_name, task));

        if let Some(variant) = &ctx.variant_name {
            tags.push(format!("{}|{}|{}", tag_name, task, variant));

            if let Some(distro) = &ctx.distro_id {
                tags.push(format!("{}|{}|{}|{}", tag_name, task, variant, distro));
            }
        }
    }

    tags
}

/// Returns the active combination matrix for `ctx`, in the fixed order
/// consumers rely on.
fn tag_combinations(ctx: &CiContext) -> Vec<TagCombination> {
    if ctx.patch_build {
        vec![
            (
                "unreliable and resource intensive",
                [(UNRELIABLE_TAG, true), (RESOURCE_INTENSIVE_TAG, true)],
            ),
            (
                "unreliable and not resource intensive",
                [(UNRELIABLE_TAG, true), (RESOURCE_INTENSIVE_TAG, false)],
            ),
            (
                "reliable and resource intensive",
                [(UNRELIABLE_TAG, false), (RESOURCE_INTENSIVE_TAG, true)],
            ),
            (
                "reliable and not resource intensive",
                [(UNRELIABLE_TAG, false), (RESOURCE_INTENSIVE_TAG, false)],
            ),
        ]
    } else {
        vec![
            (
                "retry on failure and resource intensive",
                [(RETRY_ON_FAILURE_TAG, true), (RESOURCE_INTENSIVE_TAG, true)],
            ),
            (
                "retry on failure and not resource intensive",
                [(RETRY_ON_FAILURE_TAG, true), (RESOURCE_INTENSIVE_TAG, false)],
            ),
            (
                "run once and resource intensive",
                [(RETRY_ON_FAILURE_TAG, false), (RESOURCE_INTENSIVE_TAG, true)],
            ),
            (
                "run once and not resource intensive",
                [(RETRY_ON_FAILURE_TAG, false), (RESOURCE_INTENSIVE_TAG, false)],
            ),
        ]
    }
}

/// The canonical tag expression for a predicate in `ctx`.
fn tag_expression(info: &TagInfo, ctx: &CiContext) -> TagExpr {
    if info.context_aware {
        TagExpr::AnyOf(context_aware_tags(info.tag_name, ctx))
    } else {
        TagExpr::Literal(info.tag_name.to_string())
    }
}

/// Expands the resolved suite list for the given CI context.
///
/// Suites of kinds other than the tag-aware kind pass through unchanged.
/// Each tag-aware suite is expanded into exactly four derived suites, in
/// matrix order, each with the matrix entry's description. A variant left
/// with zero matching tests is still produced; the orchestrator skips it
/// rather than omitting it, so summary reporting accounts for it.
pub fn expand_suites(suites: Vec<Suite>, ctx: &CiContext) -> Vec<Suite> {
    let mut expanded = Vec::new();

    for suite in suites {
        if !suite.kind().is_tag_aware() {
            // Tags are only supported for script tests; other kinds run as-is.
            expanded.push(suite);
            continue;
        }

        for (description, combo) in tag_combinations(ctx) {
            let mut options_list = Vec::new();

            for (info, enabled) in &combo {
                let expr = tag_expression(info, ctx);

                let options = if *enabled {
                    SuiteOptions {
                        include_tags: Some(expr),
                        ..info.suite_options()
                    }
                } else {
                    // A disabled predicate contributes only the negated
                    // filter, no option overrides.
                    SuiteOptions {
                        include_tags: Some(expr.negate()),
                        ..SuiteOptions::inherit_all()
                    }
                };

                options_list.push(options);
            }

            let options =
                SuiteOptions::combine_all(&options_list).with_description(description);
            expanded.push(suite.with_options(options));
        }
    }

    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuiteDef;
    use crate::suite::{TestCase, TestKind};

    fn ctx(patch: bool) -> CiContext {
        CiContext {
            patch_build: patch,
            task_name: Some("compile_test".to_string()),
            variant_name: Some("linux-64".to_string()),
            distro_id: Some("ubuntu2004".to_string()),
        }
    }

    fn make_suite(kind: TestKind) -> Suite {
        let def = SuiteDef {
            kind,
            run_command: "run {test}".to_string(),
            tests: Vec::new(),
            exclude: Vec::new(),
        };
        let membership = vec![
            TestCase::new("a").with_tags(["unreliable"]),
            TestCase::new("b").with_tags(["resource_intensive"]),
            TestCase::new("c").with_tags(["unreliable", "resource_intensive"]),
            TestCase::new("d"),
            TestCase::new("e").with_tags(["retry_on_failure"]),
        ];
        Suite::new("core", &def, membership, SuiteOptions::inherit_all())
    }

    #[test]
    fn test_context_tag_family_sizes() {
        let empty = CiContext::default();
        assert_eq!(context_aware_tags("unreliable", &empty), vec!["unreliable"]);

        let full = ctx(true);
        assert_eq!(
            context_aware_tags("unreliable", &full),
            vec![
                "unreliable",
                "unreliable|compile_test",
                "unreliable|compile_test|linux-64",
                "unreliable|compile_test|linux-64|ubuntu2004",
            ]
        );
    }

    #[test]
    fn test_context_tag_family_stops_at_missing_string() {
        let partial = CiContext {
            patch_build: false,
            task_name: Some("t".to_string()),
            variant_name: None,
            // A distro without a variant must not extend the family.
            distro_id: Some("d".to_string()),
        };
        assert_eq!(
            context_aware_tags("unreliable", &partial),
            vec!["unreliable", "unreliable|t"]
        );
    }

    #[test]
    fn test_patch_build_expansion_order_and_count() {
        let suites = expand_suites(vec![make_suite(TestKind::Script)], &ctx(true));

        assert_eq!(suites.len(), 4);
        let descriptions: Vec<_> = suites
            .iter()
            .map(|s| s.options.description.clone().unwrap())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "unreliable and resource intensive",
                "unreliable and not resource intensive",
                "reliable and resource intensive",
                "reliable and not resource intensive",
            ]
        );
    }

    #[test]
    fn test_mainline_expansion_order_and_count() {
        let suites = expand_suites(vec![make_suite(TestKind::Script)], &ctx(false));

        assert_eq!(suites.len(), 4);
        let descriptions: Vec<_> = suites
            .iter()
            .map(|s| s.options.description.clone().unwrap())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "retry on failure and resource intensive",
                "retry on failure and not resource intensive",
                "run once and resource intensive",
                "run once and not resource intensive",
            ]
        );
    }

    #[test]
    fn test_non_tag_aware_suites_pass_through() {
        let suites = expand_suites(vec![make_suite(TestKind::Binary)], &ctx(true));
        assert_eq!(suites.len(), 1);
        assert!(suites[0].options.description.is_none());
        assert_eq!(suites[0].tests.len(), 5);
    }

    #[test]
    fn test_variant_selection_partitions_membership() {
        let suites = expand_suites(vec![make_suite(TestKind::Script)], &ctx(true));

        // unreliable ∧ resource_intensive → only "c".
        let selected: Vec<_> = suites[0].tests.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(selected, vec!["c"]);

        // unreliable ∧ ¬resource_intensive → only "a".
        let selected: Vec<_> = suites[1].tests.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(selected, vec!["a"]);

        // reliable ∧ resource_intensive → only "b".
        let selected: Vec<_> = suites[2].tests.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(selected, vec!["b"]);

        // reliable ∧ ¬resource_intensive → "d" and "e".
        let selected: Vec<_> = suites[3].tests.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(selected, vec!["d", "e"]);
    }

    #[test]
    fn test_enabled_predicates_carry_their_options() {
        let suites = expand_suites(vec![make_suite(TestKind::Script)], &ctx(true));

        // Variant 0 has both predicates enabled: silent failures from the
        // unreliable tag and single-job execution from resource_intensive.
        assert_eq!(
            suites[0].options.report_failure_status,
            Some(FailureStatus::SilentFail)
        );
        assert_eq!(suites[0].options.num_jobs, Some(1));

        // Variant 3 has both disabled: only negated filters, no overrides.
        assert_eq!(suites[3].options.report_failure_status, None);
        assert_eq!(suites[3].options.num_jobs, None);
        assert!(suites[3].options.include_tags.is_some());
    }

    #[test]
    fn test_retry_variant_repeats_suite() {
        let suites = expand_suites(vec![make_suite(TestKind::Script)], &ctx(false));

        assert_eq!(suites[0].options.repeat_suites, Some(2));
        assert_eq!(suites[0].options.fail_fast, Some(false));
        assert_eq!(suites[2].options.repeat_suites, None);
    }

    #[test]
    fn test_empty_variants_still_expanded() {
        let def = SuiteDef {
            kind: TestKind::Script,
            run_command: "run {test}".to_string(),
            tests: Vec::new(),
            exclude: Vec::new(),
        };
        // No test carries any matrix tag, so three of the four variants
        // select nothing, but all four must still exist.
        let suite = Suite::new(
            "empty-ish",
            &def,
            vec![TestCase::new("plain")],
            SuiteOptions::inherit_all(),
        );
        let suites = expand_suites(vec![suite], &ctx(true));

        assert_eq!(suites.len(), 4);
        assert!(suites[0].tests.is_empty());
        assert!(suites[1].tests.is_empty());
        assert!(suites[2].tests.is_empty());
        assert_eq!(suites[3].tests.len(), 1);
    }
}
