//! Filter, group-by and aggregate engine over snapshot rows.
//!
//! A [`QueryRequest`] is compiled once into a [`CompiledQuery`], which is
//! where bad regexes, dates and aggregate names are rejected. Execution is pure
//! and synchronous:
//!
//! 1. type filter (case-insensitive on `type`)
//! 2. created/updated/closed date ranges (inclusive)
//! 3. equality filters (`"null"` literal, comma-list OR, exact match)
//! 4. regex filters (`"null"` literal, else a match on the field's text)
//! 5. group by `groupBy` and aggregate with `count` or `sum`
//!
//! Issues grouped by `assignee` are first split into one row per member of
//! `assignees`, so every filter sees the member rather than the primary
//! assignee. With no `groupBy` the filtered rows come back as they are.
//! Output rows can be fed back into the engine.

pub mod aggregate;
pub mod filter;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::domain::{field_kind, FieldKind, RecordType, Row};
use aggregate::{Aggregate, Grouping, VALUE_FIELD};
use filter::{DateRange, EqualityFilter, RegexFilter, TypeFilter};

/// One `{field, value}` filter entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: String,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A declarative query as sent by the visualization layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    /// `issue` or `epic`; defaults to `issue`
    pub type_filter: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub updated_after: Option<String>,
    pub updated_before: Option<String>,
    pub closed_after: Option<String>,
    pub closed_before: Option<String>,
    pub filters: Vec<FieldFilter>,
    pub regex_filters: Vec<FieldFilter>,
    pub group_by: Vec<String>,
    /// `count` or `sum`; defaults to `count`
    pub aggregate_function: Option<String>,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unsupported aggregate function '{0}' (expected 'count' or 'sum')")]
    UnsupportedAggregate(String),

    #[error("Invalid regex for field '{field}': {source}")]
    InvalidRegex {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid date '{value}' for {bound}")]
    InvalidDate { bound: String, value: String },
}

/// A typed output column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

impl Column {
    fn for_field(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: field_kind(name),
        }
    }
}

/// Tabular query output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// A validated query, ready to run against any number of row sets
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    type_filter: TypeFilter,
    expands_assignees: bool,
    dates: Vec<DateRange>,
    filters: Vec<EqualityFilter>,
    regexes: Vec<RegexFilter>,
    group_by: Vec<String>,
    aggregate: Aggregate,
}

impl CompiledQuery {
    pub fn compile(request: &QueryRequest) -> Result<Self, QueryError> {
        let record_type = request
            .type_filter
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(RecordType::Issue.as_str());
        let aggregate = request
            .aggregate_function
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(str::parse::<Aggregate>)
            .transpose()?
            .unwrap_or(Aggregate::Count);

        let dates = vec![
            DateRange::parse(
                "created_at",
                request.created_after.as_deref(),
                request.created_before.as_deref(),
            )?,
            DateRange::parse(
                "updated_at",
                request.updated_after.as_deref(),
                request.updated_before.as_deref(),
            )?,
            DateRange::parse(
                "closed_at",
                request.closed_after.as_deref(),
                request.closed_before.as_deref(),
            )?,
        ];
        let regexes = request
            .regex_filters
            .iter()
            .map(RegexFilter::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            type_filter: TypeFilter::new(record_type),
            expands_assignees: record_type.eq_ignore_ascii_case(RecordType::Issue.as_str())
                && request.group_by.iter().any(|f| f == "assignee"),
            dates: dates.into_iter().filter(|d| !d.is_unbounded()).collect(),
            filters: request.filters.iter().map(EqualityFilter::new).collect(),
            regexes,
            group_by: request.group_by.clone(),
            aggregate,
        })
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.type_filter.matches(row)
            && self.dates.iter().all(|d| d.matches(row))
            && self.filters.iter().all(|f| f.matches(row))
            && self.regexes.iter().all(|r| r.matches(row))
    }

    pub fn execute<'a, I>(&self, rows: I) -> QueryResponse
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let rows = rows.into_iter();

        if self.group_by.is_empty() {
            let rows: Vec<Row> = rows.filter(|row| self.matches(row)).cloned().collect();
            return QueryResponse {
                columns: columns_of(&rows),
                rows,
            };
        }

        let mut grouping = Grouping::new(&self.group_by);
        for row in rows {
            if self.expands_assignees {
                // Filters see each member, so `assignee` filters reach co-assignees
                for expanded in per_assignee(row) {
                    if self.matches(&expanded) {
                        grouping.insert(&expanded);
                    }
                }
            } else if self.matches(row) {
                grouping.insert(row);
            }
        }

        let mut columns: Vec<Column> = self.group_by.iter().map(|f| Column::for_field(f)).collect();
        columns.push(Column {
            name: VALUE_FIELD.to_string(),
            kind: FieldKind::Number,
        });
        QueryResponse {
            columns,
            rows: grouping.finish(self.aggregate),
        }
    }
}

/// Run a request in one step.
pub fn run<'a, I>(request: &QueryRequest, rows: I) -> Result<QueryResponse, QueryError>
where
    I: IntoIterator<Item = &'a Row>,
{
    Ok(CompiledQuery::compile(request)?.execute(rows))
}

/// One copy of an issue row per member of its `assignees`, each with
/// `assignee` set to that member. An issue with no assignees yields no rows.
fn per_assignee(row: &Row) -> Vec<Row> {
    row.get("assignees")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(crate::domain::text_of)
                .map(|member| row.clone().with("assignee", member))
                .collect()
        })
        .unwrap_or_default()
}

fn columns_of(rows: &[Row]) -> Vec<Column> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for (name, _) in row.fields() {
            if seen.insert(name.as_str()) {
                columns.push(Column::for_field(name));
            }
        }
    }
    columns
}
