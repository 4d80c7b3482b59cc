//! Row predicates: record type, date ranges, field equality and field regexes.

use chrono::{DateTime, Utc};
use regex::Regex;

use super::{FieldFilter, QueryError};
use crate::dates::parse_timestamp;
use crate::domain::Row;

/// Filter value meaning "the field is null or absent"
pub const NULL_LITERAL: &str = "null";

/// Text a row field is compared as; null and absent fields read as `"null"`.
fn compared_text(row: &Row, field: &str) -> String {
    row.text(field).unwrap_or_else(|| NULL_LITERAL.to_string())
}

/// Case-insensitive match on the `type` field
#[derive(Debug, Clone)]
pub struct TypeFilter {
    record_type: String,
}

impl TypeFilter {
    pub fn new(record_type: &str) -> Self {
        Self {
            record_type: record_type.trim().to_lowercase(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.text("type")
            .map(|t| t.to_lowercase() == self.record_type)
            .unwrap_or(false)
    }
}

/// Inclusive bounds on one timestamp field; a missing bound is unconstrained.
#[derive(Debug, Clone)]
pub struct DateRange {
    field: &'static str,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn parse(
        field: &'static str,
        after: Option<&str>,
        before: Option<&str>,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            field,
            after: parse_bound(field, "after", after)?,
            before: parse_bound(field, "before", before)?,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }

    /// A row lacking the field fails any bound set on it.
    pub fn matches(&self, row: &Row) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(value) = row.time(self.field) else {
            return false;
        };
        self.after.map_or(true, |after| value >= after)
            && self.before.map_or(true, |before| value <= before)
    }
}

fn parse_bound(
    field: &'static str,
    side: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, QueryError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| QueryError::InvalidDate {
                bound: format!("{} {}", field, side),
                value: raw.to_string(),
            }),
    }
}

/// How an equality filter compares
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expected {
    Null,
    AnyOf(Vec<String>),
    Exactly(String),
}

/// `{field, value}` equality with the null literal and comma-list rules
#[derive(Debug, Clone)]
pub struct EqualityFilter {
    field: String,
    expected: Expected,
}

impl EqualityFilter {
    pub fn new(filter: &FieldFilter) -> Self {
        let expected = if filter.value == NULL_LITERAL {
            Expected::Null
        } else if filter.value.contains(',') {
            Expected::AnyOf(filter.value.split(',').map(|v| v.trim().to_string()).collect())
        } else {
            Expected::Exactly(filter.value.clone())
        };
        Self {
            field: filter.field.clone(),
            expected,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match &self.expected {
            Expected::Null => row.is_null(&self.field),
            Expected::AnyOf(values) => {
                let actual = compared_text(row, &self.field);
                values.iter().any(|v| *v == actual)
            }
            Expected::Exactly(value) => compared_text(row, &self.field) == *value,
        }
    }
}

/// `{field, pattern}` regex test with the null literal rule
#[derive(Debug, Clone)]
pub struct RegexFilter {
    field: String,
    pattern: Option<Regex>,
}

impl RegexFilter {
    pub fn new(filter: &FieldFilter) -> Result<Self, QueryError> {
        let pattern = if filter.value == NULL_LITERAL {
            None
        } else {
            let regex = Regex::new(&filter.value).map_err(|source| QueryError::InvalidRegex {
                field: filter.field.clone(),
                source,
            })?;
            Some(regex)
        };
        Ok(Self {
            field: filter.field.clone(),
            pattern,
        })
    }

    pub fn matches(&self, row: &Row) -> bool {
        match &self.pattern {
            None => row.is_null(&self.field),
            Some(regex) => regex.is_match(&compared_text(row, &self.field)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn filter(field: &str, value: &str) -> FieldFilter {
        FieldFilter {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_type_filter_is_case_insensitive() {
        let row = Row::new().with("type", "issue");
        assert!(TypeFilter::new("Issue").matches(&row));
        assert!(!TypeFilter::new("epic").matches(&row));
        assert!(!TypeFilter::new("issue").matches(&Row::new()));
    }

    #[test]
    fn test_comma_list_is_or() {
        let f = EqualityFilter::new(&filter("state", "opened, closed"));
        assert!(f.matches(&Row::new().with("state", "opened")));
        assert!(f.matches(&Row::new().with("state", "closed")));
        assert!(!f.matches(&Row::new().with("state", "locked")));
    }

    #[test]
    fn test_exact_equality_on_numbers_and_strings() {
        assert!(EqualityFilter::new(&filter("c3score", "6")).matches(&Row::new().with("c3score", 6)));
        assert!(!EqualityFilter::new(&filter("state", "open")).matches(&Row::new().with("state", "opened")));
    }

    #[test]
    fn test_null_literal() {
        let f = EqualityFilter::new(&filter("closed_at", "null"));
        assert!(f.matches(&Row::new().with("closed_at", Value::Null)));
        assert!(f.matches(&Row::new()));
        assert!(!f.matches(&Row::new().with("closed_at", "2024-01-01T00:00:00Z")));

        let r = RegexFilter::new(&filter("closed_at", "null")).unwrap();
        assert!(r.matches(&Row::new()));
        assert!(!r.matches(&Row::new().with("closed_at", "x")));
    }

    #[test]
    fn test_null_field_compares_as_null_text() {
        let row = Row::new().with("milestone", Value::Null);
        assert!(EqualityFilter::new(&filter("milestone", "null,Sprint 1")).matches(&row));
        assert!(RegexFilter::new(&filter("milestone", "^nu")).unwrap().matches(&row));
    }

    #[test]
    fn test_regex_filter() {
        let r = RegexFilter::new(&filter("title", "^Fix")).unwrap();
        assert!(r.matches(&Row::new().with("title", "Fix login")));
        assert!(!r.matches(&Row::new().with("title", "Add Fix")));

        let labels = RegexFilter::new(&filter("labels", "Workflow::")).unwrap();
        assert!(labels.matches(&Row::new().with("labels", json!(["a", "Workflow::Doing"]))));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = RegexFilter::new(&filter("title", "(unclosed")).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRegex { .. }));
    }

    #[test]
    fn test_date_range() {
        let range = DateRange::parse("created_at", Some("2024-01-01"), Some("2024-01-31")).unwrap();
        assert!(range.matches(&Row::new().with("created_at", "2024-01-05T10:00:00Z")));
        assert!(range.matches(&Row::new().with("created_at", "2024-01-01T00:00:00Z")));
        assert!(!range.matches(&Row::new().with("created_at", "2024-02-01T00:00:00Z")));
        assert!(!range.matches(&Row::new()));

        let open = DateRange::parse("closed_at", None, None).unwrap();
        assert!(open.matches(&Row::new()));

        assert!(matches!(
            DateRange::parse("updated_at", Some("soon"), None),
            Err(QueryError::InvalidDate { .. })
        ));
    }
}
