//! Extracted signer rows.
//!
//! Vendors return "an array of objects with string-ish fields" and nothing
//! stronger. [`ExtractionRecord`] gives that a schema with explicitly
//! optional fields; [`ExtractionRecord::from_value`] is the single place
//! where raw vendor JSON is accepted, and [`ExtractionRecord::normalized`]
//! the single place where it is cleaned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One structured row produced by a vendor for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,

    /// Any other scalar fields the vendor chose to return.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ExtractionRecord {
    /// Build a record from one element of a vendor's JSON array.
    ///
    /// Returns `None` for anything that is not an object. Keys are matched
    /// case-insensitively (`Name`, `NAME`, `name`); numbers and booleans are
    /// rendered as strings; nested arrays/objects and nulls are dropped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj: &Map<String, Value> = value.as_object()?;
        let mut record = ExtractionRecord::default();

        for (key, raw) in obj {
            let Some(text) = scalar_to_string(raw) else {
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "name" => record.name = Some(text),
                "address" => record.address = Some(text),
                "date" => record.date = Some(text),
                "ward" => record.ward = Some(text),
                _ => {
                    record.extra.insert(key.clone(), text);
                }
            }
        }

        Some(record)
    }

    /// Trim every field and drop the ones that end up empty.
    pub fn normalized(self) -> Self {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        Self {
            name: clean(self.name),
            address: clean(self.address),
            date: clean(self.date),
            ward: clean(self.ward),
            extra: self
                .extra
                .into_iter()
                .filter_map(|(k, v)| {
                    let v = v.trim().to_string();
                    (!v.is_empty()).then_some((k, v))
                })
                .collect(),
        }
    }

    /// True when no field carries a value.
    pub fn is_blank(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.date.is_none()
            && self.ward.is_none()
            && self.extra.is_empty()
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// An [`ExtractionRecord`] placed in the overall run.
///
/// `page_number` is the source image's 1-based position in the whole input;
/// `row_number` is the 1-based position within that image's own results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    #[serde(flatten)]
    pub record: ExtractionRecord,
    pub page_number: usize,
    pub row_number: usize,
    pub filename: String,
}

/// Attach ordering metadata to one image's records.
///
/// `image_index` is 0-based; the emitted numbers are 1-based.
pub fn annotate(
    records: Vec<ExtractionRecord>,
    image_index: usize,
    filename: &str,
) -> Vec<AnnotatedRecord> {
    records
        .into_iter()
        .enumerate()
        .map(|(row, record)| AnnotatedRecord {
            record,
            page_number: image_index + 1,
            row_number: row + 1,
            filename: filename.to_string(),
        })
        .collect()
}
