use std::cmp::Ordering;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Field used as the sort key of a record.
pub const END_DATE_FIELD: &str = "endDate";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("bad record file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },

    #[error("record #{index} is not a JSON object")]
    NotAnObject { index: usize },
}

// ═══════════════════════════════════════════════════════════════
//  Record
// ═══════════════════════════════════════════════════════════════

/// One recorded value. The JSON body is kept verbatim (key order
/// included) and only `endDate` is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    value: Value,
    end_date: Option<DateTime<Utc>>,
}

impl Record {
    pub fn from_value(value: Value) -> Self {
        let end_date = value
            .get(END_DATE_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_end_date);
        Self { value, end_date }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Wire form: compact JSON, same encoding the record was loaded in.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.value)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Sequence
// ═══════════════════════════════════════════════════════════════

/// Records sorted once at load time. Read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct RecordSequence {
    records: Vec<Record>,
}

impl RecordSequence {
    /// Read a JSON array of objects from `path` and sort it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let values: Vec<Value> = serde_json::from_str(&content).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let sequence = Self::from_values(values)?;
        tracing::debug!(path = %path.display(), records = sequence.len(), "records loaded");
        Ok(sequence)
    }

    pub fn from_values(values: Vec<Value>) -> Result<Self, LoadError> {
        let mut records = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            if !value.is_object() {
                return Err(LoadError::NotAnObject { index });
            }
            let record = Record::from_value(value);
            if record.end_date.is_none() {
                tracing::warn!(index, "record has no parseable {END_DATE_FIELD}, it will be published last");
            }
            records.push(record);
        }
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records: sort_by_end_date(records) }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Panics when `index` is out of bounds.
    pub fn at(&self, index: usize) -> &Record {
        &self.records[index]
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

/// Latest `endDate` first. Undated records go last in their input order.
pub fn sort_by_end_date(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by(|a, b| match (a.end_date, b.end_date) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    records
}

// ═══════════════════════════════════════════════════════════════
//  Timestamp parsing (multiple formats)
// ═══════════════════════════════════════════════════════════════

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an end date. Zone-less forms are read as UTC.
pub fn parse_end_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
