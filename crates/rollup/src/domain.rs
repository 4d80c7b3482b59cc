//! Core domain types for the rollup pipeline.
//!
//! Two families live here:
//! - raw records (`RawIssue`, `RawEpic`) as the tracking API returns them,
//!   with every upstream field optional
//! - canonical records (`Issue`, `Epic`) produced by normalization, plus the
//!   `Row` projection the query engine works on

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Sentinel epic title for issues without a parent epic.
pub const NO_EPIC_ASSIGNED: &str = "No Epic Assigned";

/// Kind of canonical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Issue,
    Epic,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Issue => "issue",
            RecordType::Epic => "epic",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "issue" | "issues" => Ok(RecordType::Issue),
            "epic" | "epics" => Ok(RecordType::Epic),
            other => Err(format!(
                "Invalid record type '{}'. Expected 'issue' or 'epic'",
                other
            )),
        }
    }
}

// ============================================================================
// Raw upstream records
// ============================================================================

/// Accepts ids that arrive as JSON numbers on some transports and strings on others.
fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A user reference (author, assignee, closer)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPerson {
    pub username: Option<String>,
    pub name: Option<String>,
}

impl RawPerson {
    /// The handle used for display: username when present, else the full name.
    pub fn handle(&self) -> Option<&str> {
        self.username
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMilestone {
    pub title: Option<String>,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIteration {
    pub title: Option<String>,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
}

/// The parent epic reference embedded in an issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEpicRef {
    #[serde(default, deserialize_with = "opt_id")]
    pub iid: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub web_url: Option<String>,
    pub human_readable_end_date: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTimeStats {
    pub time_estimate: Option<i64>,
    pub total_time_spent: Option<i64>,
}

/// An issue in the tracking API's REST shape.
///
/// Transports with a different wire shape convert into this type before
/// normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIssue {
    #[serde(default, deserialize_with = "opt_id")]
    pub iid: Option<String>,
    pub title: Option<String>,
    pub state: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub project_id: Option<String>,
    pub web_url: Option<String>,
    pub labels: Option<Vec<String>>,
    pub author: Option<RawPerson>,
    pub assignee: Option<RawPerson>,
    pub assignees: Option<Vec<RawPerson>>,
    pub closed_by: Option<RawPerson>,
    pub milestone: Option<RawMilestone>,
    pub iteration: Option<RawIteration>,
    pub epic: Option<RawEpicRef>,
    pub time_stats: Option<RawTimeStats>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,
    pub due_date: Option<String>,
}

/// An epic in the tracking API's REST shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEpic {
    #[serde(default, deserialize_with = "opt_id")]
    pub iid: Option<String>,
    pub title: Option<String>,
    pub state: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub group_id: Option<String>,
    pub web_url: Option<String>,
    pub labels: Option<Vec<String>>,
    pub author: Option<RawPerson>,
    pub closed_by: Option<RawPerson>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub due_date: Option<String>,
}

// ============================================================================
// Canonical records
// ============================================================================

/// A normalized issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "Time")]
    pub time: Option<DateTime<Utc>>,
    pub id: String,
    pub title: String,
    /// `opened` or `closed`
    pub state: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub workflow_state: String,
    pub workflow_issue_type: String,
    pub story_ci: String,
    pub story_ci_type: String,
    pub project_id: String,
    pub web_url: String,
    pub labels: Vec<String>,
    pub author: String,
    pub assignee: String,
    pub assignees: BTreeSet<String>,
    pub closed_by: String,
    pub milestone: String,
    pub description: String,
    pub time_estimate: String,
    pub total_time_spent: String,
    pub created_at: Option<DateTime<Utc>>,
    pub created_month: String,
    pub created_month_number: String,
    pub created_year: String,
    pub created_threshold: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_month: String,
    pub updated_month_number: String,
    pub updated_year: String,
    pub updated_threshold: String,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_month: String,
    pub closed_month_number: String,
    pub closed_year: String,
    pub closed_threshold: String,
    /// `YYYY-MM-DD` or empty
    pub due_date: String,
    pub due_date_month: String,
    pub due_date_month_number: String,
    pub due_date_year: String,
    pub due_date_threshold: String,
    /// Days from creation to closure, or to now while open
    pub ticket_age: i64,
    /// Days since the last update
    pub updated_days: i64,
    pub epic_id: String,
    pub epic_title: String,
    pub epic_url: String,
    pub epic_due_date: String,
    pub iteration_start_date: String,
    pub iteration_due_date: String,
    #[serde(rename = "sprintStartDate")]
    pub sprint_start_date: Option<NaiveDate>,
    #[serde(rename = "sprintEndDate")]
    pub sprint_end_date: Option<NaiveDate>,
    #[serde(rename = "daysLeftInSprint")]
    pub days_left_in_sprint: i64,
    /// Channel of the linked epic (set by cross-referencing)
    pub parent_channel: String,
    /// Channel-derived score of the linked epic: 0, 1, 3 or 6
    pub c3score: u8,
    #[serde(rename = "Value")]
    pub value: f64,
}

/// A normalized epic with rollups over its child issues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    #[serde(rename = "Time")]
    pub time: Option<DateTime<Utc>>,
    pub id: String,
    pub title: String,
    pub state: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub group_id: String,
    pub web_url: String,
    pub labels: Vec<String>,
    pub description: String,
    pub author: String,
    pub closed_by: String,
    pub epic_state: String,
    pub epic_c3: String,
    pub epic_channel: String,
    pub epic_rank: String,
    pub epic_category: String,
    pub epic_priority: String,
    pub epic_pillar: String,
    pub created_at: Option<DateTime<Utc>>,
    pub created_month: String,
    pub created_month_number: String,
    pub created_year: String,
    pub created_threshold: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_month: String,
    pub updated_month_number: String,
    pub updated_year: String,
    pub updated_threshold: String,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_month: String,
    pub closed_month_number: String,
    pub closed_year: String,
    pub closed_threshold: String,
    pub start_date: String,
    pub end_date: String,
    pub due_date: String,
    pub due_date_month: String,
    pub due_date_month_number: String,
    pub due_date_year: String,
    pub due_date_threshold: String,
    pub ticket_age: i64,
    pub updated_days: i64,
    pub openissues: usize,
    pub closedissues: usize,
    pub totalissues: usize,
    /// Closed share of child issues in percent; 0 when there are none
    pub pctcomplete: f64,
    #[serde(rename = "numAssignees")]
    pub num_assignees: usize,
    /// Distinct child-issue assignees joined with ", "
    pub epic_assignees: String,
    pub most_common_epic_assignee_filter: String,
    #[serde(rename = "Value")]
    pub value: f64,
}

// ============================================================================
// Query rows
// ============================================================================

/// Column type of a row field as seen by the visualization layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Time,
}

const TIME_FIELDS: &[&str] = &["Time", "created_at", "updated_at", "closed_at"];

const NUMBER_FIELDS: &[&str] = &[
    "Value",
    "ticket_age",
    "updated_days",
    "c3score",
    "daysLeftInSprint",
    "openissues",
    "closedissues",
    "totalissues",
    "pctcomplete",
    "numAssignees",
];

/// Column type for a canonical field name. Unknown fields are strings.
pub fn field_kind(name: &str) -> FieldKind {
    if TIME_FIELDS.contains(&name) {
        FieldKind::Time
    } else if NUMBER_FIELDS.contains(&name) {
        FieldKind::Number
    } else {
        FieldKind::String
    }
}

/// Fields offered for grouping and filtering issues
pub const ISSUE_FIELDS: &[&str] = &[
    "id",
    "title",
    "state",
    "workflow_state",
    "workflow_issue_type",
    "story_ci",
    "story_ci_type",
    "project_id",
    "author",
    "assignee",
    "closed_by",
    "milestone",
    "time_estimate",
    "total_time_spent",
    "created_at",
    "created_month",
    "created_month_number",
    "created_year",
    "updated_at",
    "updated_month",
    "updated_month_number",
    "updated_year",
    "closed_at",
    "closed_month",
    "closed_month_number",
    "closed_year",
    "due_date",
    "due_date_threshold",
    "ticket_age",
    "updated_days",
    "epic_id",
    "epic_title",
    "epic_url",
    "epic_due_date",
    "sprintStartDate",
    "sprintEndDate",
    "daysLeftInSprint",
    "parent_channel",
    "c3score",
];

/// Fields offered for grouping and filtering epics
pub const EPIC_FIELDS: &[&str] = &[
    "id",
    "title",
    "state",
    "group_id",
    "author",
    "closed_by",
    "epic_state",
    "epic_c3",
    "epic_channel",
    "epic_rank",
    "epic_category",
    "epic_priority",
    "epic_pillar",
    "created_at",
    "created_month",
    "created_month_number",
    "created_year",
    "updated_at",
    "updated_month",
    "updated_month_number",
    "updated_year",
    "closed_at",
    "closed_month",
    "closed_month_number",
    "closed_year",
    "start_date",
    "end_date",
    "due_date",
    "due_date_month",
    "due_date_year",
    "due_date_threshold",
    "openissues",
    "closedissues",
    "totalissues",
    "pctcomplete",
    "numAssignees",
    "epic_assignees",
    "most_common_epic_assignee_filter",
];

/// One tabular record: canonical field name to JSON value.
///
/// Canonical records are projected into rows once per snapshot; query output
/// is also made of rows, so the engine can be re-run over its own results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Project any serializable record into a row.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Self(map)),
            other => Ok(Self::new().with("value", other)),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// True when the field is absent or JSON null
    pub fn is_null(&self, field: &str) -> bool {
        matches!(self.get(field), None | Some(Value::Null))
    }

    /// String form of a field, `None` when absent or null.
    ///
    /// Numbers print without a trailing `.0` when integral and arrays join
    /// their elements with commas.
    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field).and_then(text_of)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn time(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field)
            .and_then(Value::as_str)
            .and_then(crate::dates::parse_timestamp)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// String form of a JSON value; `None` for null.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(text_of)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}
