//! Label taxonomy parsing for issue and epic classification.
//!
//! The tracking system encodes workflow metadata in free-text labels of the
//! form `Namespace::Value` (plus a few legacy prefixes such as `C³ - `). This
//! module turns a label list into classification values using declarative
//! taxonomy tables processed by one extraction routine.
//!
//! When several labels share a namespace, the first one in label order wins.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// One taxonomy entry: which field it fills, the label prefix it reads, the
/// sentinel used when no label matches, and value renames.
#[derive(Debug, Clone, Copy)]
pub struct TaxonomyRule {
    pub field: &'static str,
    pub prefix: &'static str,
    pub default: &'static str,
    pub aliases: &'static [(&'static str, &'static str)],
}

/// Issue namespaces
pub const ISSUE_TAXONOMY: &[TaxonomyRule] = &[
    TaxonomyRule {
        field: "workflow_state",
        prefix: "Workflow::",
        default: "Unassigned State",
        aliases: &[("CF Backlog", "Backlog")],
    },
    TaxonomyRule {
        field: "workflow_issue_type",
        prefix: "IssueType::",
        default: "Unassigned IssueType",
        aliases: &[],
    },
];

/// Epic namespaces
pub const EPIC_TAXONOMY: &[TaxonomyRule] = &[
    TaxonomyRule {
        field: "epic_state",
        prefix: "Epic Stage::",
        default: "Unassigned Epic State",
        aliases: &[],
    },
    TaxonomyRule {
        field: "epic_c3",
        prefix: "C³ - ",
        default: "No C3",
        aliases: &[],
    },
    TaxonomyRule {
        field: "epic_channel",
        prefix: "Channel::",
        default: "No Channel Listed",
        aliases: &[
            ("Enterprise", "Enterprise Project"),
            ("CF", "Internal CF Project"),
        ],
    },
    TaxonomyRule {
        field: "epic_rank",
        prefix: "Epic Rank::",
        default: "Not Ranked",
        aliases: &[],
    },
    TaxonomyRule {
        field: "epic_category",
        prefix: "Category::",
        default: "No Category",
        aliases: &[],
    },
    TaxonomyRule {
        field: "epic_priority",
        prefix: "Priority::",
        default: "No Priority",
        aliases: &[],
    },
    TaxonomyRule {
        field: "epic_pillar",
        prefix: "Pillar::",
        default: "No Pillar",
        aliases: &[],
    },
];

/// Sentinel for issues without a `CI::<type>::<value>` label
pub const UNASSIGNED_CI: &str = "Unassigned CI";
/// Sentinel for the CI type of issues without a CI label
pub const UNASSIGNED_CI_TYPE: &str = "Unassigned CI Type";

/// A taxonomy table with its prefix patterns compiled.
pub struct Taxonomy {
    rules: Vec<(TaxonomyRule, Regex)>,
}

impl Taxonomy {
    /// Compile a rule table. Prefixes are matched literally.
    pub fn compile(rules: &[TaxonomyRule]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = format!("^{}(.+)$", regex::escape(rule.prefix));
                Regex::new(&pattern).map(|re| (*rule, re))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Shared compiled issue taxonomy
    pub fn issues() -> &'static Taxonomy {
        static ISSUES: OnceLock<Taxonomy> = OnceLock::new();
        ISSUES.get_or_init(|| {
            Taxonomy::compile(ISSUE_TAXONOMY).expect("Issue taxonomy patterns should compile")
        })
    }

    /// Shared compiled epic taxonomy
    pub fn epics() -> &'static Taxonomy {
        static EPICS: OnceLock<Taxonomy> = OnceLock::new();
        EPICS.get_or_init(|| {
            Taxonomy::compile(EPIC_TAXONOMY).expect("Epic taxonomy patterns should compile")
        })
    }

    /// Classify a label list: one value per rule, keyed by field name.
    pub fn classify(&self, labels: &[String]) -> Classification {
        let values = self
            .rules
            .iter()
            .map(|(rule, re)| (rule.field, extract(labels, rule, re)))
            .collect();
        Classification { values }
    }
}

/// Result of classifying one label list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    values: BTreeMap<&'static str, String>,
}

impl Classification {
    /// Value for a field; empty when the field is not part of the taxonomy.
    pub fn get(&self, field: &str) -> String {
        self.values.get(field).cloned().unwrap_or_default()
    }
}

fn extract(labels: &[String], rule: &TaxonomyRule, re: &Regex) -> String {
    labels
        .iter()
        .find_map(|label| re.captures(label))
        .and_then(|caps| caps.get(1))
        .map(|m| {
            let value = m.as_str();
            rule.aliases
                .iter()
                .find(|(from, _)| *from == value)
                .map(|(_, to)| (*to).to_string())
                .unwrap_or_else(|| value.to_string())
        })
        .unwrap_or_else(|| rule.default.to_string())
}

/// Regex for CI labels: `CI::<type>::<value>`
static CI_REGEX: OnceLock<Regex> = OnceLock::new();

fn ci_regex() -> &'static Regex {
    CI_REGEX.get_or_init(|| Regex::new(r"^CI::([^:]+)::(.+)$").expect("CI regex should compile"))
}

/// Parse the first CI label into `(ci_type, ci_value)`, falling back to the
/// unassigned sentinels.
pub fn classify_ci(labels: &[String]) -> (String, String) {
    labels
        .iter()
        .find_map(|label| ci_regex().captures(label))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .unwrap_or_else(|| (UNASSIGNED_CI_TYPE.to_string(), UNASSIGNED_CI.to_string()))
}

/// Format a `first.last` handle as `First L`.
///
/// Anything that is not exactly two non-empty dot-separated parts is returned
/// unchanged.
///
/// # Examples
///
/// ```
/// use rollup::labels::format_name;
///
/// assert_eq!(format_name("jane.doe"), "Jane D");
/// assert_eq!(format_name("Jane Doe"), "Jane Doe");
/// ```
pub fn format_name(name: &str) -> String {
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(last), None) if !first.is_empty() && !last.is_empty() => {
            let mut chars = first.chars();
            let head = chars.next().map(|c| c.to_uppercase().collect::<String>());
            let initial = last.chars().next().map(|c| c.to_uppercase().collect::<String>());
            format!(
                "{}{} {}",
                head.unwrap_or_default(),
                chars.as_str(),
                initial.unwrap_or_default()
            )
        }
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_issue_taxonomy_defaults_without_labels() {
        let class = Taxonomy::issues().classify(&[]);
        assert_eq!(class.get("workflow_state"), "Unassigned State");
        assert_eq!(class.get("workflow_issue_type"), "Unassigned IssueType");
    }

    #[test]
    fn test_issue_taxonomy_extracts_values() {
        let class = Taxonomy::issues().classify(&labels(&[
            "frontend",
            "Workflow::In Progress",
            "IssueType::Bug",
        ]));
        assert_eq!(class.get("workflow_state"), "In Progress");
        assert_eq!(class.get("workflow_issue_type"), "Bug");
    }

    #[test]
    fn test_first_matching_label_wins() {
        let class = Taxonomy::issues().classify(&labels(&[
            "Workflow::Blocked",
            "Workflow::Complete",
        ]));
        assert_eq!(class.get("workflow_state"), "Blocked");
    }

    #[test]
    fn test_aliases_are_applied() {
        let class = Taxonomy::issues().classify(&labels(&["Workflow::CF Backlog"]));
        assert_eq!(class.get("workflow_state"), "Backlog");

        let epic = Taxonomy::epics().classify(&labels(&["Channel::Enterprise"]));
        assert_eq!(epic.get("epic_channel"), "Enterprise Project");

        let epic = Taxonomy::epics().classify(&labels(&["Channel::CF"]));
        assert_eq!(epic.get("epic_channel"), "Internal CF Project");

        let epic = Taxonomy::epics().classify(&labels(&["Channel::Non-Project Related"]));
        assert_eq!(epic.get("epic_channel"), "Non-Project Related");
    }

    #[test]
    fn test_epic_taxonomy_full() {
        let epic = Taxonomy::epics().classify(&labels(&[
            "Epic Stage::QA",
            "C³ - Cost Savings",
            "Epic Rank::2",
            "Category::Platform",
            "Priority::High",
            "Pillar::Reliability",
        ]));
        assert_eq!(epic.get("epic_state"), "QA");
        assert_eq!(epic.get("epic_c3"), "Cost Savings");
        assert_eq!(epic.get("epic_channel"), "No Channel Listed");
        assert_eq!(epic.get("epic_rank"), "2");
        assert_eq!(epic.get("epic_category"), "Platform");
        assert_eq!(epic.get("epic_priority"), "High");
        assert_eq!(epic.get("epic_pillar"), "Reliability");
    }

    #[test]
    fn test_epic_taxonomy_defaults() {
        let epic = Taxonomy::epics().classify(&[]);
        assert_eq!(epic.get("epic_state"), "Unassigned Epic State");
        assert_eq!(epic.get("epic_c3"), "No C3");
        assert_eq!(epic.get("epic_rank"), "Not Ranked");
        assert_eq!(epic.get("epic_category"), "No Category");
        assert_eq!(epic.get("epic_priority"), "No Priority");
        assert_eq!(epic.get("epic_pillar"), "No Pillar");
    }

    #[test]
    fn test_prefix_must_be_at_start() {
        let class = Taxonomy::issues().classify(&labels(&["Old Workflow::Done"]));
        assert_eq!(class.get("workflow_state"), "Unassigned State");
    }

    #[test]
    fn test_classify_ci() {
        assert_eq!(
            classify_ci(&labels(&["CI::Service::Billing API"])),
            ("Service".to_string(), "Billing API".to_string())
        );
        assert_eq!(
            classify_ci(&labels(&["Workflow::Complete"])),
            (UNASSIGNED_CI_TYPE.to_string(), UNASSIGNED_CI.to_string())
        );
    }

    #[test]
    fn test_format_name() {
        assert_eq!(format_name("jane.doe"), "Jane D");
        assert_eq!(format_name("bob.smith"), "Bob S");
        assert_eq!(format_name("alice"), "alice");
        assert_eq!(format_name("a.b.c"), "a.b.c");
        assert_eq!(format_name("jane."), "jane.");
        assert_eq!(format_name(""), "");
    }
}
