//! Group-by bucketing and aggregation.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::QueryError;
use crate::domain::{field_kind, FieldKind, Row};

/// Group value used for absent or null fields
pub const NOT_AVAILABLE: &str = "N/A";
/// Output column carrying the aggregate
pub const VALUE_FIELD: &str = "Value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Distinct `(id, type)` pairs per bucket
    Count,
    /// Sum of `Value` over the bucket's distinct records
    Sum,
}

impl FromStr for Aggregate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count" => Ok(Aggregate::Count),
            "sum" => Ok(Aggregate::Sum),
            _ => Err(QueryError::UnsupportedAggregate(s.to_string())),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count => write!(f, "count"),
            Aggregate::Sum => write!(f, "sum"),
        }
    }
}

struct Bucket {
    key: Vec<String>,
    members: HashSet<(String, String)>,
    count: u64,
    sum: f64,
}

/// Rows sharing identical group-by values, in first-seen order.
pub struct Grouping<'a> {
    group_by: &'a [String],
    buckets: Vec<Bucket>,
    index: HashMap<Vec<String>, usize>,
}

impl<'a> Grouping<'a> {
    pub fn new(group_by: &'a [String]) -> Self {
        Self {
            group_by,
            buckets: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a row to its bucket. A row whose `(id, type)` is already in the
    /// bucket is ignored; rows without an `id` carry no identity and always count.
    pub fn insert(&mut self, row: &Row) {
        let key: Vec<String> = self
            .group_by
            .iter()
            .map(|field| row.text(field).unwrap_or_else(|| NOT_AVAILABLE.to_string()))
            .collect();

        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.buckets.push(Bucket {
                    key: key.clone(),
                    members: HashSet::new(),
                    count: 0,
                    sum: 0.0,
                });
                self.index.insert(key, self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };
        let bucket = &mut self.buckets[slot];

        if let Some(id) = row.text("id") {
            let identity = (id, row.text("type").unwrap_or_default());
            if !bucket.members.insert(identity) {
                return;
            }
        }
        bucket.count += 1;
        bucket.sum += row.number(VALUE_FIELD).unwrap_or(0.0);
    }

    /// One row per bucket: the group-by values plus `Value`.
    pub fn finish(self, aggregate: Aggregate) -> Vec<Row> {
        let group_by = self.group_by;
        self.buckets
            .into_iter()
            .map(|bucket| {
                let mut row = Row::new();
                for (field, value) in group_by.iter().zip(bucket.key) {
                    row.insert(field.clone(), typed_value(field, value));
                }
                let value = match aggregate {
                    Aggregate::Count => Value::from(bucket.count),
                    Aggregate::Sum => number_value(bucket.sum),
                };
                row.insert(VALUE_FIELD, value);
                row
            })
            .collect()
    }
}

/// Group values of numeric fields go back out as numbers.
fn typed_value(field: &str, text: String) -> Value {
    if field_kind(field) == FieldKind::Number {
        if let Ok(n) = text.parse::<f64>() {
            return number_value(n);
        }
    }
    Value::String(text)
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(id: &str, month: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("type", "issue")
            .with("created_month", month)
            .with("Value", 1)
    }

    fn group(rows: &[Row], by: &[&str], aggregate: Aggregate) -> Vec<Row> {
        let by: Vec<String> = by.iter().map(|s| s.to_string()).collect();
        let mut grouping = Grouping::new(&by);
        for row in rows {
            grouping.insert(row);
        }
        grouping.finish(aggregate)
    }

    #[test]
    fn test_aggregate_parse() {
        assert_eq!("count".parse::<Aggregate>().unwrap(), Aggregate::Count);
        assert_eq!("Sum".parse::<Aggregate>().unwrap(), Aggregate::Sum);
        assert!(matches!(
            "avg".parse::<Aggregate>(),
            Err(QueryError::UnsupportedAggregate(name)) if name == "avg"
        ));
    }

    #[test]
    fn test_duplicate_records_count_once() {
        let rows = vec![issue("1", "January"), issue("1", "January"), issue("2", "January")];
        let out = group(&rows, &["created_month"], Aggregate::Count);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].number("Value"), Some(2.0));

        let summed = group(&rows, &["created_month"], Aggregate::Sum);
        assert_eq!(summed[0].number("Value"), Some(2.0));
    }

    #[test]
    fn test_missing_group_field_is_not_available() {
        let out = group(&[issue("1", "January")], &["milestone"], Aggregate::Count);
        assert_eq!(out[0].text("milestone").as_deref(), Some(NOT_AVAILABLE));
    }

    #[test]
    fn test_numeric_group_values_stay_numeric() {
        let rows = vec![issue("1", "January").with("c3score", 6)];
        let out = group(&rows, &["c3score"], Aggregate::Count);
        assert_eq!(out[0].get("c3score"), Some(&Value::from(6)));
    }

    #[test]
    fn test_same_record_counts_in_each_bucket() {
        let rows = vec![
            issue("1", "January").with("assignee", "Jane D"),
            issue("1", "January").with("assignee", "Bob S"),
        ];
        let out = group(&rows, &["assignee"], Aggregate::Count);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.number("Value") == Some(1.0)));
    }
}
