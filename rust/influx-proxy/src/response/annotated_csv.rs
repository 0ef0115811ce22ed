//! Reader for InfluxDB's annotated CSV.
//!
//! A response is a sequence of tables. Each table starts with one or more
//! annotation rows (`#datatype`, `#group`, `#default`), followed by a header
//! row and data rows. Tables are separated by blank lines and may differ in
//! column layout, so every annotation row drops the current header and the
//! next plain row becomes the new one. Rows from all tables are returned in a
//! single flat list.

use csv::{ReaderBuilder, StringRecord};
use std::collections::BTreeMap;
use thiserror::Error;

/// One data row keyed by column name.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("unterminated quoted field")]
    UnterminatedQuote,
}

enum State {
    AwaitingHeader,
    Collecting(Vec<String>),
}

struct TableReader {
    state: State,
    rows: Vec<Row>,
}

impl TableReader {
    fn new() -> Self {
        Self {
            state: State::AwaitingHeader,
            rows: Vec::new(),
        }
    }

    fn feed(&mut self, record: &StringRecord) {
        let Some(first) = record.get(0) else {
            return;
        };

        if first.starts_with('#') {
            self.state = State::AwaitingHeader;
            return;
        }

        match &self.state {
            State::Collecting(headers) => {
                // zip stops at the shorter side: short rows leave trailing
                // columns absent, extra fields are dropped.
                let row = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(name, value)| (name.clone(), value.to_string()))
                    .collect();
                self.rows.push(row);
            }
            State::AwaitingHeader => {
                let headers = record.iter().map(str::to_string).collect();
                self.state = State::Collecting(headers);
            }
        }
    }

    fn finish(self) -> Vec<Row> {
        self.rows
    }
}

/// Walks the body with RFC 4180 quoting rules and reports whether a quoted
/// field is still open at end of input. A quote only opens a field when it is
/// the field's first byte; inside a quoted field `""` is an escaped quote and
/// any other `"` closes it.
fn ends_inside_quotes(body: &[u8]) -> bool {
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut bytes = body.iter().copied().peekable();

    while let Some(byte) = bytes.next() {
        if in_quotes {
            if byte == b'"' {
                if bytes.peek() == Some(&b'"') {
                    bytes.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }

        match byte {
            b'"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            b',' | b'\n' | b'\r' => at_field_start = true,
            _ => at_field_start = false,
        }
    }

    in_quotes
}

pub fn parse(body: &[u8]) -> Result<Vec<Row>, TableError> {
    // The csv reader accepts an open quote at end of input; reject it here.
    if ends_inside_quotes(body) {
        return Err(TableError::UnterminatedQuote);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut table = TableReader::new();
    for record in reader.records() {
        table.feed(&record?);
    }
    Ok(table.finish())
}
