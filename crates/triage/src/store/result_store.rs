//! Ordered feed of classified records

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{ClassifiedRecord, Priority};

/// Classified records sorted by priority tier, then newest first
///
/// The sort is stable, so records with equal priority and timestamp keep
/// their insertion order.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    records: Vec<ClassifiedRecord>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from persisted records, restoring the sort order
    pub fn from_records(records: Vec<ClassifiedRecord>) -> Self {
        let mut store = Self { records };
        store.sort();
        store
    }

    /// Append a record and restore the sort order
    pub fn insert(&mut self, record: ClassifiedRecord) {
        self.records.push(record);
        self.sort();
    }

    fn sort(&mut self) {
        self.records.sort_by_key(ClassifiedRecord::sort_key);
    }

    pub fn records(&self) -> &[ClassifiedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of records in each tier, in display order
    pub fn counts(&self) -> Vec<(Priority, usize)> {
        Priority::ALL
            .iter()
            .map(|p| (*p, self.records.iter().filter(|r| r.priority == *p).count()))
            .collect()
    }

    /// Flatten records for export
    pub fn export(&self, options: &ExportOptions) -> Vec<ExportRow> {
        self.records
            .iter()
            .map(|record| ExportRow::from_record(record, options))
            .collect()
    }
}

/// Export settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Include the full plain and HTML bodies
    pub include_bodies: bool,
}

/// One exported record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportRow {
    pub time: String,
    pub priority: String,
    pub confidence: f64,
    pub sender: String,
    pub subject: String,
    pub tokens: Vec<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_full: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    #[serde(rename = "ID")]
    pub id: String,
}

impl ExportRow {
    fn from_record(record: &ClassifiedRecord, options: &ExportOptions) -> Self {
        let (content_full, content_html) = if options.include_bodies {
            (record.content_full.clone(), record.content_html.clone())
        } else {
            (None, None)
        };

        Self {
            time: record.time.to_rfc3339(),
            priority: record.priority.to_string(),
            confidence: record.confidence,
            sender: record.sender.clone(),
            subject: record.subject.clone(),
            tokens: record.tokens.clone(),
            content: record.content.clone(),
            content_full,
            content_html,
            id: record.id.clone(),
        }
    }
}

/// Serialize exported rows as a pretty JSON array
pub fn to_json(rows: &[ExportRow]) -> Result<String> {
    serde_json::to_string_pretty(rows).context("Failed to serialize export")
}
