use crate::store::MetricTable;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Emitted alongside the metrics in ListMetrics, so no feed column may use it.
const RESERVED_COLUMN: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("feed is empty")]
    Empty,
    #[error("header has no metric columns")]
    NoMetricColumns,
    #[error("header column {index} is empty")]
    EmptyColumn { index: usize },
    #[error("header column {name:?} appears more than once")]
    DuplicateColumn { name: String },
    #[error("header column {name:?} is reserved")]
    ReservedColumn { name: String },
    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: empty entity id")]
    EmptyEntityId { line: u64 },
    #[error("line {line}: entity {entity:?} appears more than once")]
    DuplicateEntity { line: u64, entity: String },
    #[error("line {line}: column {column:?} has invalid value {value:?}")]
    InvalidValue {
        line: u64,
        column: String,
        value: String,
    },
    #[error("malformed feed: {0}")]
    Malformed(String),
}

impl From<csv::Error> for ParseError {
    fn from(err: csv::Error) -> Self {
        ParseError::Malformed(err.to_string())
    }
}

/// Parses a CSV feed into a [`MetricTable`].
///
/// The first header column names the entity id column (its name is ignored), every other
/// column is a metric. Any defect anywhere in the feed rejects the whole feed.
pub fn parse(raw: &str) -> Result<MetricTable, ParseError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(raw.as_bytes());

    let header = reader.headers()?.clone();
    let metric_names = metric_columns(&header)?;
    let expected = header.len();

    let mut table = MetricTable::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();

        if record.len() != expected {
            return Err(ParseError::ColumnCount {
                line,
                expected,
                found: record.len(),
            });
        }

        let entity = record.get(0).unwrap_or_default();
        if entity.is_empty() {
            return Err(ParseError::EmptyEntityId { line });
        }
        if table.contains_key(entity) {
            return Err(ParseError::DuplicateEntity {
                line,
                entity: entity.to_string(),
            });
        }

        let mut metrics = BTreeMap::new();
        for (name, cell) in metric_names.iter().zip(record.iter().skip(1)) {
            let value = parse_value(cell).ok_or_else(|| ParseError::InvalidValue {
                line,
                column: name.to_string(),
                value: cell.to_string(),
            })?;
            metrics.insert(name.to_string(), value);
        }
        table.insert(entity.to_string(), metrics);
    }

    Ok(table)
}

fn metric_columns(header: &StringRecord) -> Result<Vec<&str>, ParseError> {
    if header.is_empty() || (header.len() == 1 && header[0].is_empty()) {
        return Err(ParseError::Empty);
    }
    if header.len() < 2 {
        return Err(ParseError::NoMetricColumns);
    }

    let mut seen = HashSet::new();
    for (index, name) in header.iter().enumerate() {
        if name.is_empty() {
            return Err(ParseError::EmptyColumn { index });
        }
        if !seen.insert(name) {
            return Err(ParseError::DuplicateColumn {
                name: name.to_string(),
            });
        }
    }

    let metrics: Vec<&str> = header.iter().skip(1).collect();
    if let Some(name) = metrics.iter().find(|name| **name == RESERVED_COLUMN) {
        return Err(ParseError::ReservedColumn {
            name: name.to_string(),
        });
    }
    Ok(metrics)
}

fn parse_value(cell: &str) -> Option<f64> {
    cell.parse::<f64>().ok().filter(|value| value.is_finite())
}
