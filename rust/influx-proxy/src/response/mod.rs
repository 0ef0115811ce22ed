//! Uniform `{results: [...]}` payload built from either backend format.

pub mod annotated_csv;
pub mod envelope;

use serde::Serialize;
use serde_json::value::RawValue;

pub use annotated_csv::{Row, TableError};
pub use envelope::Envelope;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    Row(Row),
    Raw(Box<RawValue>),
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub results: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            results: rows.into_iter().map(Record::Row).collect(),
            error: None,
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            results: envelope
                .results
                .unwrap_or_default()
                .into_iter()
                .map(Record::Raw)
                .collect(),
            error: envelope.error.filter(|e| !e.is_empty()),
        }
    }
}

/// Payload formats InfluxDB may answer a query with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    AnnotatedCsv,
    Json,
}

impl ResponseFormat {
    /// Matches on a lowercased `Content-Type`, ignoring parameters such as charset.
    pub fn detect(content_type: &str) -> Option<Self> {
        let lowered = content_type.to_ascii_lowercase();
        if lowered.contains("text/csv") {
            Some(Self::AnnotatedCsv)
        } else if lowered.contains("application/json") {
            Some(Self::Json)
        } else {
            None
        }
    }
}
