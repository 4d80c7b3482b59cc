//! Normalization of raw upstream records into canonical issues and epics.
//!
//! Normalization never fails: missing upstream fields resolve to sentinels
//! ("Unassigned …", empty strings, empty sets). Given the same `now`, the same
//! raw record always yields the same canonical record.

use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeSet;

use crate::dates::{date_only, diff_in_days, parse_timestamp, DateParts, SprintWindow};
use crate::domain::{Epic, Issue, RawEpic, RawIssue, RawPerson, RecordType, NO_EPIC_ASSIGNED};
use crate::labels::{classify_ci, format_name, Taxonomy};

/// Turns raw records into canonical ones relative to a fixed "now".
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    now: DateTime<Utc>,
}

impl Normalizer {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Normalize one raw issue. Cross-reference fields stay at their defaults.
    pub fn issue(&self, raw: &RawIssue) -> Issue {
        let labels = raw.labels.clone().unwrap_or_default();
        let class = Taxonomy::issues().classify(&labels);
        let (story_ci_type, story_ci) = classify_ci(&labels);

        let created_at = parse_opt(&raw.created_at);
        let updated_at = parse_opt(&raw.updated_at);
        let closed_at = parse_opt(&raw.closed_at);
        let due = non_empty(&raw.due_date).map(date_only);
        let due_at = due.as_deref().and_then(parse_timestamp);

        let created = DateParts::of(created_at, self.now);
        let updated = DateParts::of(updated_at, self.now);
        let closed = DateParts::of(closed_at, self.now);
        let due_parts = DateParts::of(due_at, self.now);

        let epic = raw.epic.clone().unwrap_or_default();
        let milestone = raw
            .milestone
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_default();
        let iteration = raw.iteration.clone().unwrap_or_default();
        let sprint = SprintWindow::parse(&milestone, self.now.year()).or_else(|| {
            iteration
                .title
                .as_deref()
                .and_then(|title| SprintWindow::parse(title, self.now.year()))
        });
        let time_stats = raw.time_stats.clone().unwrap_or_default();

        Issue {
            time: created_at,
            id: raw.iid.clone().unwrap_or_default(),
            title: raw.title.clone().unwrap_or_default(),
            state: raw.state.clone().unwrap_or_default(),
            record_type: RecordType::Issue,
            workflow_state: class.get("workflow_state"),
            workflow_issue_type: class.get("workflow_issue_type"),
            story_ci,
            story_ci_type,
            project_id: raw.project_id.clone().unwrap_or_default(),
            web_url: raw.web_url.clone().unwrap_or_default(),
            author: person_name(raw.author.as_ref()),
            assignee: person_name(raw.assignee.as_ref()),
            assignees: assignee_set(raw.assignees.as_deref(), raw.assignee.as_ref()),
            closed_by: person_name(raw.closed_by.as_ref()),
            milestone,
            description: raw.description.clone().unwrap_or_default(),
            time_estimate: time_stats.time_estimate.map(|t| t.to_string()).unwrap_or_default(),
            total_time_spent: time_stats
                .total_time_spent
                .map(|t| t.to_string())
                .unwrap_or_default(),
            created_at,
            created_month: created.month_name,
            created_month_number: created.month_number,
            created_year: created.year,
            created_threshold: created.threshold,
            updated_at,
            updated_month: updated.month_name,
            updated_month_number: updated.month_number,
            updated_year: updated.year,
            updated_threshold: updated.threshold,
            closed_at,
            closed_month: closed.month_name,
            closed_month_number: closed.month_number,
            closed_year: closed.year,
            closed_threshold: closed.threshold,
            due_date: due.unwrap_or_default(),
            due_date_month: due_parts.month_name,
            due_date_month_number: due_parts.month_number,
            due_date_year: due_parts.year,
            due_date_threshold: due_parts.threshold,
            ticket_age: self.ticket_age(created_at, closed_at),
            updated_days: updated_at.map(|u| diff_in_days(self.now, u)).unwrap_or(0),
            epic_id: epic.iid.clone().unwrap_or_default(),
            epic_title: non_empty(&epic.title)
                .map(str::to_string)
                .unwrap_or_else(|| NO_EPIC_ASSIGNED.to_string()),
            epic_url: non_empty(&epic.url)
                .or_else(|| non_empty(&epic.web_url))
                .map(str::to_string)
                .unwrap_or_default(),
            epic_due_date: non_empty(&epic.human_readable_end_date)
                .or_else(|| non_empty(&epic.due_date))
                .map(date_only)
                .unwrap_or_default(),
            iteration_start_date: non_empty(&iteration.start_date).map(date_only).unwrap_or_default(),
            iteration_due_date: non_empty(&iteration.due_date).map(date_only).unwrap_or_default(),
            sprint_start_date: sprint.map(|s| s.start),
            sprint_end_date: sprint.map(|s| s.end),
            days_left_in_sprint: sprint.map(|s| s.days_left(self.now)).unwrap_or(0),
            parent_channel: String::new(),
            c3score: 0,
            value: 1.0,
            labels,
        }
    }

    /// Normalize one raw epic. Rollup fields stay at zero until cross-referencing.
    pub fn epic(&self, raw: &RawEpic) -> Epic {
        let labels = raw.labels.clone().unwrap_or_default();
        let class = Taxonomy::epics().classify(&labels);

        let created_at = parse_opt(&raw.created_at);
        let updated_at = parse_opt(&raw.updated_at);
        let closed_at = parse_opt(&raw.closed_at);
        let due = non_empty(&raw.due_date)
            .or_else(|| non_empty(&raw.end_date))
            .map(date_only);
        let due_at = due.as_deref().and_then(parse_timestamp);

        let created = DateParts::of(created_at, self.now);
        let updated = DateParts::of(updated_at, self.now);
        let closed = DateParts::of(closed_at, self.now);
        let due_parts = DateParts::of(due_at, self.now);

        Epic {
            time: created_at,
            id: raw.iid.clone().unwrap_or_default(),
            title: raw.title.clone().unwrap_or_default(),
            state: raw.state.clone().unwrap_or_default(),
            record_type: RecordType::Epic,
            group_id: raw.group_id.clone().unwrap_or_default(),
            web_url: raw.web_url.clone().unwrap_or_default(),
            description: raw.description.clone().unwrap_or_default(),
            author: person_name(raw.author.as_ref()),
            closed_by: person_name(raw.closed_by.as_ref()),
            epic_state: class.get("epic_state"),
            epic_c3: class.get("epic_c3"),
            epic_channel: class.get("epic_channel"),
            epic_rank: class.get("epic_rank"),
            epic_category: class.get("epic_category"),
            epic_priority: class.get("epic_priority"),
            epic_pillar: class.get("epic_pillar"),
            created_at,
            created_month: created.month_name,
            created_month_number: created.month_number,
            created_year: created.year,
            created_threshold: created.threshold,
            updated_at,
            updated_month: updated.month_name,
            updated_month_number: updated.month_number,
            updated_year: updated.year,
            updated_threshold: updated.threshold,
            closed_at,
            closed_month: closed.month_name,
            closed_month_number: closed.month_number,
            closed_year: closed.year,
            closed_threshold: closed.threshold,
            start_date: non_empty(&raw.start_date).map(date_only).unwrap_or_default(),
            end_date: non_empty(&raw.end_date).map(date_only).unwrap_or_default(),
            due_date: due.unwrap_or_default(),
            due_date_month: due_parts.month_name,
            due_date_month_number: due_parts.month_number,
            due_date_year: due_parts.year,
            due_date_threshold: due_parts.threshold,
            ticket_age: self.ticket_age(created_at, closed_at),
            updated_days: updated_at.map(|u| diff_in_days(self.now, u)).unwrap_or(0),
            openissues: 0,
            closedissues: 0,
            totalissues: 0,
            pctcomplete: 0.0,
            num_assignees: 0,
            epic_assignees: String::new(),
            most_common_epic_assignee_filter: String::new(),
            value: 1.0,
            labels,
        }
    }

    fn ticket_age(&self, created: Option<DateTime<Utc>>, closed: Option<DateTime<Utc>>) -> i64 {
        match created {
            Some(created) => diff_in_days(created, closed.unwrap_or(self.now)),
            None => 0,
        }
    }
}

fn parse_opt(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(parse_timestamp)
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().filter(|s| !s.trim().is_empty())
}

fn person_name(person: Option<&RawPerson>) -> String {
    person
        .and_then(RawPerson::handle)
        .map(format_name)
        .unwrap_or_default()
}

/// Formatted, de-duplicated assignees. Falls back to the single `assignee`
/// when the upstream record carries no list.
fn assignee_set(assignees: Option<&[RawPerson]>, assignee: Option<&RawPerson>) -> BTreeSet<String> {
    match assignees {
        Some(list) => list
            .iter()
            .filter_map(RawPerson::handle)
            .map(format_name)
            .collect(),
        None => assignee
            .and_then(RawPerson::handle)
            .map(format_name)
            .into_iter()
            .collect(),
    }
}
