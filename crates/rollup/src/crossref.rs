//! Issue/epic linkage and epic rollups.
//!
//! Issues link to epics by title. Each linked issue inherits its epic's channel
//! and channel score; an issue naming an epic outside the dataset is treated as
//! having no epic. Each epic gets counts, completion and assignee rollups over
//! the issues that name it.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::domain::{Epic, Issue, NO_EPIC_ASSIGNED};

/// Closed state as reported upstream
const CLOSED: &str = "closed";
/// Open state as reported upstream
const OPENED: &str = "opened";

/// Score of an epic channel: 6, 3, 1 or 0.
pub fn c3_score(channel: &str) -> u8 {
    match channel {
        "Enterprise Project" => 6,
        "Internal CF Project" => 3,
        "Non-Project Related" => 1,
        _ => 0,
    }
}

/// Most frequent element across `items`.
///
/// Ties go to the element that first reached the highest count while counting
/// in order. Returns `None` for an empty input.
pub fn most_common<'a, I>(items: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        let count = counts.entry(item).or_insert(0);
        if *count == 0 {
            order.push(item);
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for item in order {
        let count = counts[item];
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((item, count));
        }
    }
    best.map(|(item, _)| item.to_string())
}

/// Link issues to their epics and compute epic rollups in place.
///
/// Running this twice over the same records produces the same result.
pub fn cross_reference(issues: &mut [Issue], epics: &mut [Epic]) {
    let mut by_title: HashMap<&str, usize> = HashMap::with_capacity(epics.len());
    for (idx, epic) in epics.iter().enumerate() {
        if by_title.contains_key(epic.title.as_str()) {
            warn!(
                "Duplicate epic title '{}' (epic {}); issues link to the first epic with this title",
                epic.title, epic.id
            );
            continue;
        }
        by_title.insert(epic.title.as_str(), idx);
    }

    for issue in issues.iter_mut() {
        match by_title.get(issue.epic_title.as_str()) {
            Some(&idx) => {
                let channel = &epics[idx].epic_channel;
                issue.parent_channel = channel.clone();
                issue.c3score = c3_score(channel);
            }
            None => {
                if issue.epic_title != NO_EPIC_ASSIGNED {
                    debug!(
                        "Issue {} names unknown epic '{}'; unlinking",
                        issue.id, issue.epic_title
                    );
                    issue.epic_title = NO_EPIC_ASSIGNED.to_string();
                }
                issue.parent_channel = String::new();
                issue.c3score = 0;
            }
        }
    }

    for epic in epics.iter_mut() {
        let children: Vec<&Issue> = issues.iter().filter(|i| i.epic_title == epic.title).collect();
        apply_rollup(epic, &children);
    }
}

fn apply_rollup(epic: &mut Epic, children: &[&Issue]) {
    let total = children.len();
    let closed = children.iter().filter(|i| i.state == CLOSED).count();
    let open = children.iter().filter(|i| i.state == OPENED).count();

    let assignees: BTreeSet<&str> = children
        .iter()
        .flat_map(|i| i.assignees.iter().map(String::as_str))
        .collect();

    epic.openissues = open;
    epic.closedissues = closed;
    epic.totalissues = total;
    epic.pctcomplete = if total == 0 {
        0.0
    } else {
        closed as f64 / total as f64 * 100.0
    };
    epic.num_assignees = assignees.len();
    epic.epic_assignees = assignees.into_iter().collect::<Vec<_>>().join(", ");
    epic.most_common_epic_assignee_filter =
        most_common(children.iter().flat_map(|i| i.assignees.iter().map(String::as_str)))
            .unwrap_or_default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RawEpic, RawEpicRef, RawIssue, RawPerson};
    use crate::normalize::Normalizer;
    use chrono::{TimeZone, Utc};

    fn normalizer() -> Normalizer {
        Normalizer::new(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap())
    }

    fn issue(id: &str, state: &str, epic: Option<&str>, assignees: &[&str]) -> Issue {
        let raw = RawIssue {
            iid: Some(id.into()),
            state: Some(state.into()),
            epic: epic.map(|title| RawEpicRef {
                title: Some(title.into()),
                ..Default::default()
            }),
            assignees: Some(
                assignees
                    .iter()
                    .map(|a| RawPerson {
                        username: Some(a.to_string()),
                        name: None,
                    })
                    .collect(),
            ),
            ..Default::default()
        };
        normalizer().issue(&raw)
    }

    fn epic(id: &str, title: &str, channel: Option<&str>) -> Epic {
        let raw = RawEpic {
            iid: Some(id.into()),
            title: Some(title.into()),
            labels: channel.map(|c| vec![format!("Channel::{}", c)]),
            ..Default::default()
        };
        normalizer().epic(&raw)
    }

    #[test]
    fn test_c3_score_mapping() {
        assert_eq!(c3_score("Enterprise Project"), 6);
        assert_eq!(c3_score("Internal CF Project"), 3);
        assert_eq!(c3_score("Non-Project Related"), 1);
        assert_eq!(c3_score("No Channel Listed"), 0);
    }

    #[test]
    fn test_most_common_first_highest_wins_ties() {
        assert_eq!(most_common(["a", "b", "b", "a"]), Some("a".to_string()));
        assert_eq!(most_common(["a", "b", "b"]), Some("b".to_string()));
        assert_eq!(most_common(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_rollups_and_linkage() {
        let mut issues = vec![
            issue("1", "closed", Some("Auth"), &["jane.doe", "bob.smith"]),
            issue("2", "opened", Some("Auth"), &["jane.doe"]),
            issue("3", "closed", Some("Auth"), &[]),
            issue("4", "opened", None, &["amy.lee"]),
        ];
        let mut epics = vec![epic("10", "Auth", Some("Enterprise")), epic("11", "Empty", None)];

        cross_reference(&mut issues, &mut epics);

        assert_eq!(issues[0].parent_channel, "Enterprise Project");
        assert_eq!(issues[0].c3score, 6);
        assert_eq!(issues[3].parent_channel, "");
        assert_eq!(issues[3].c3score, 0);

        let auth = &epics[0];
        assert_eq!(auth.totalissues, 3);
        assert_eq!(auth.openissues, 1);
        assert_eq!(auth.closedissues, 2);
        assert!((auth.pctcomplete - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(auth.num_assignees, 2);
        assert_eq!(auth.epic_assignees, "Bob S, Jane D");
        assert_eq!(auth.most_common_epic_assignee_filter, "Jane D");
    }

    #[test]
    fn test_epic_without_children_is_zero_percent() {
        let mut issues = vec![issue("1", "opened", None, &[])];
        let mut epics = vec![epic("11", "Empty", None)];
        cross_reference(&mut issues, &mut epics);

        assert_eq!(epics[0].totalissues, 0);
        assert_eq!(epics[0].pctcomplete, 0.0);
        assert_eq!(epics[0].epic_assignees, "");
        assert_eq!(epics[0].most_common_epic_assignee_filter, "");
    }

    #[test]
    fn test_unknown_epic_title_is_unlinked() {
        let mut issues = vec![issue("1", "opened", Some("Elsewhere"), &[])];
        let mut epics = vec![epic("10", "Auth", Some("CF"))];
        cross_reference(&mut issues, &mut epics);

        assert_eq!(issues[0].epic_title, NO_EPIC_ASSIGNED);
        assert_eq!(epics[0].totalissues, 0);
    }

    #[test]
    fn test_duplicate_titles_link_to_first_epic() {
        let mut issues = vec![issue("1", "opened", Some("Dup"), &[])];
        let mut epics = vec![
            epic("10", "Dup", Some("CF")),
            epic("11", "Dup", Some("Enterprise")),
        ];
        cross_reference(&mut issues, &mut epics);
        assert_eq!(issues[0].parent_channel, "Internal CF Project");
        assert_eq!(issues[0].c3score, 3);
    }

    #[test]
    fn test_cross_reference_is_idempotent() {
        let mut issues = vec![
            issue("1", "closed", Some("Auth"), &["jane.doe"]),
            issue("2", "opened", Some("Auth"), &["bob.smith"]),
        ];
        let mut epics = vec![epic("10", "Auth", Some("CF"))];

        cross_reference(&mut issues, &mut epics);
        let (first_issues, first_epics) = (issues.clone(), epics.clone());
        cross_reference(&mut issues, &mut epics);

        assert_eq!(issues, first_issues);
        assert_eq!(epics, first_epics);
    }
}
