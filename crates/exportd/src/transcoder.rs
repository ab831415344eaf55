/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! JSON record set to CSV transcoding.
//!
//! A record set is a JSON array of flat objects, optionally wrapped as
//! `{"rows": [...]}`. The header comes from the first record's keys in the
//! order they appear in the document. How later records that disagree with
//! that header are treated is controlled by [`HeaderPolicy`]:
//!
//! - [`HeaderPolicy::FirstRecord`] (default): cells are looked up by header
//!   key, a missing key yields an empty cell and keys the first record does
//!   not have are dropped.
//! - [`HeaderPolicy::Union`]: the header is every key seen across all records
//!   in first-seen order, and missing keys yield empty cells.
//!
//! Cell rendering:
//!
//! | JSON value      | Cell                                      |
//! |-----------------|-------------------------------------------|
//! | string          | verbatim, quoted only where CSV requires  |
//! | integer         | decimal                                   |
//! | float           | shortest decimal, no exponent (`2.0` → `2`) |
//! | boolean         | `true` / `false`                          |
//! | null            | empty                                     |
//! | array / object  | compact JSON text                         |
//!
//! Output is deterministic for a given input and uses `\n` line endings.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::EncodingError;

/// Member name under which a wrapped record set is accepted.
const ROWS_MEMBER: &str = "rows";

/// How the header row is derived when records do not share one key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// Header from the first record only; extra keys later on are dropped.
    #[default]
    FirstRecord,
    /// Header from the union of all keys in first-seen order.
    Union,
}

/// Knobs for [`Transcoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    pub header_policy: HeaderPolicy,
    pub delimiter: u8,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            header_policy: HeaderPolicy::FirstRecord,
            delimiter: b',',
        }
    }
}

/// Converts JSON record sets into CSV documents.
#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    options: TranscodeOptions,
}

impl Transcoder {
    pub fn new(options: TranscodeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Transcodes `payload` into a fresh CSV buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::NotRecordSet`] when `payload` is neither an
    /// array nor a `{"rows": [...]}` wrapper, [`EncodingError::NotAnObject`]
    /// when an element is not an object, and an I/O or CSV error if the
    /// writer fails to flush.
    pub fn export(&self, payload: &Value) -> Result<Vec<u8>, EncodingError> {
        let records = record_set(payload)?;
        let header = self.header(&records);

        if header.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.options.delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(header.iter().map(|key| key.as_bytes()))?;

        let mut dropped = 0usize;
        for record in &records {
            dropped += record
                .keys()
                .filter(|key| !header.contains(&key.as_str()))
                .count();
            let row = header
                .iter()
                .map(|key| record.get(*key).map(render_cell).unwrap_or(Cow::Borrowed("")));
            writer.write_record(row.map(|cell| cell.into_owned()))?;
        }

        if dropped > 0 {
            debug!(
                dropped_cells = dropped,
                columns = header.len(),
                "Dropped cells whose keys are not in the header"
            );
        }

        writer.into_inner().map_err(|e| e.into_error().into())
    }

    fn header<'a>(&self, records: &[&'a Map<String, Value>]) -> Vec<&'a str> {
        match self.options.header_policy {
            HeaderPolicy::FirstRecord => records
                .first()
                .copied()
                .map(|first| first.keys().map(String::as_str).collect())
                .unwrap_or_default(),
            HeaderPolicy::Union => {
                let mut seen = HashSet::new();
                records
                    .iter()
                    .copied()
                    .flat_map(|record| record.keys())
                    .map(String::as_str)
                    .filter(|key| seen.insert(*key))
                    .collect()
            }
        }
    }
}

/// Transcodes `payload` with the default options.
pub fn transcode(payload: &Value) -> Result<Vec<u8>, EncodingError> {
    Transcoder::default().export(payload)
}

fn record_set(payload: &Value) -> Result<Vec<&Map<String, Value>>, EncodingError> {
    let records = match payload {
        Value::Array(records) => records,
        Value::Object(wrapper) => match wrapper.get(ROWS_MEMBER) {
            Some(Value::Array(records)) => records,
            _ => return Err(EncodingError::NotRecordSet),
        },
        _ => return Err(EncodingError::NotRecordSet),
    };

    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            record
                .as_object()
                .ok_or(EncodingError::NotAnObject { index })
        })
        .collect()
}

fn render_cell(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Number(n) => Cow::Owned(render_number(n)),
        Value::Bool(true) => Cow::Borrowed("true"),
        Value::Bool(false) => Cow::Borrowed("false"),
        Value::Null => Cow::Borrowed(""),
        nested => Cow::Owned(nested.to_string()),
    }
}

fn render_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        // f64's Display never uses an exponent and drops trailing zeros.
        n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
    }
}
