//! The immutable result of one refresh: canonical records, their query rows
//! and per-field value indexes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::crossref::cross_reference;
use crate::domain::{text_of, Epic, Issue, RecordType, Row};
use crate::normalize::Normalizer;
use crate::transport::RawDataset;

/// Field name to its distinct non-empty values in first-seen order
pub type FieldIndex = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct Snapshot {
    issues: Vec<Issue>,
    epics: Vec<Epic>,
    issue_rows: Vec<Row>,
    epic_rows: Vec<Row>,
    issue_index: FieldIndex,
    epic_index: FieldIndex,
    refreshed_at: DateTime<Utc>,
}

impl Snapshot {
    /// Normalize, cross-reference and index a raw dataset.
    pub fn build(raw: RawDataset, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let normalizer = Normalizer::new(now);
        let mut issues: Vec<Issue> = raw.issues.iter().map(|i| normalizer.issue(i)).collect();
        let mut epics: Vec<Epic> = raw.epics.iter().map(|e| normalizer.epic(e)).collect();
        cross_reference(&mut issues, &mut epics);

        let issue_rows = issues.iter().map(Row::from_record).collect::<Result<Vec<_>, _>>()?;
        let epic_rows = epics.iter().map(Row::from_record).collect::<Result<Vec<_>, _>>()?;
        let issue_index = index_fields(&issue_rows);
        let epic_index = index_fields(&epic_rows);

        info!("Built snapshot with {} issues and {} epics", issues.len(), epics.len());
        Ok(Self {
            issues,
            epics,
            issue_rows,
            epic_rows,
            issue_index,
            epic_index,
            refreshed_at: now,
        })
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn epics(&self) -> &[Epic] {
        &self.epics
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn rows(&self, record_type: RecordType) -> &[Row] {
        match record_type {
            RecordType::Issue => &self.issue_rows,
            RecordType::Epic => &self.epic_rows,
        }
    }

    /// Every row, issues first.
    pub fn all_rows(&self) -> impl Iterator<Item = &Row> {
        self.issue_rows.iter().chain(self.epic_rows.iter())
    }

    pub fn field_index(&self, record_type: RecordType) -> &FieldIndex {
        match record_type {
            RecordType::Issue => &self.issue_index,
            RecordType::Epic => &self.epic_index,
        }
    }

    /// Distinct values of one field; empty when the field is unknown.
    pub fn field_values(&self, record_type: RecordType, field: &str) -> &[String] {
        self.field_index(record_type)
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn index_fields(rows: &[Row]) -> FieldIndex {
    let mut index = FieldIndex::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for row in rows {
        for (field, value) in row.fields() {
            let values = index.entry(field.clone()).or_default();
            let texts: Vec<String> = match value {
                Value::Array(items) => items.iter().filter_map(non_empty_text).collect(),
                other => non_empty_text(other).into_iter().collect(),
            };
            for text in texts {
                if seen.insert((field.clone(), text.clone())) {
                    values.push(text);
                }
            }
        }
    }
    index
}

fn non_empty_text(value: &Value) -> Option<String> {
    text_of(value).filter(|s| !s.is_empty())
}
