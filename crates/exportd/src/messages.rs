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

//! JSON schemas exchanged between the gateway, the conversion worker and the
//! completion router.
//!
//! Every hop owns its own copy of a message; nothing here is shared by
//! reference across services.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

/// A request to convert `payload` into a CSV file.
///
/// Built once by the gateway and never mutated afterwards. The id is a UUID v4
/// and is never reused, which is what lets the correlation store key on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub id: String,
    pub timestamp: i64,
    #[serde(rename = "data", default)]
    pub payload: Value,
}

impl ExportRequest {
    /// Wraps `payload` with a fresh id and the current unix time.
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp(),
            payload,
        }
    }

    /// Parses a raw inbound HTTP body into a new request.
    ///
    /// The body may be any JSON value; only well-formedness is checked here.
    pub fn from_body(body: &[u8]) -> Result<Self, ValidationError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ValidationError::EmptyBody);
        }
        let payload: Value = serde_json::from_slice(body)?;
        Ok(Self::new(payload))
    }

    /// Checks that the id can be used as a single routing-key word and as
    /// part of a file name.
    pub fn check_id(&self) -> Result<(), ValidationError> {
        let valid = !self.id.is_empty()
            && self
                .id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidId {
                id: self.id.clone(),
            })
        }
    }
}

/// Signals that the file for request `id` has been written to `file_path`.
///
/// The worker emits it on the raw completion exchange; the router re-emits
/// the same shape on the addressed exchange with a fresh timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub file_path: String,
    pub timestamp: i64,
}

/// A [`CompletionRecord`] after the router has addressed it to a waiting
/// caller. Same fields, different routing key.
pub type AddressedCompletion = CompletionRecord;

impl CompletionRecord {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            timestamp,
        }
    }

    /// Copies this record under a new id, stamped with the current time.
    pub fn readdressed(&self, id: impl Into<String>) -> AddressedCompletion {
        Self {
            id: id.into(),
            file_path: self.file_path.clone(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_export_request_uses_data_on_the_wire() {
        let request = ExportRequest {
            id: "abc".into(),
            timestamp: 1_700_000_000,
            payload: json!({"rows": []}),
        };

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"id": "abc", "timestamp": 1_700_000_000, "data": {"rows": []}})
        );
    }

    #[test]
    fn test_export_request_missing_data_defaults_to_null() {
        let request: ExportRequest =
            serde_json::from_str(r#"{"id":"x","timestamp":1}"#).unwrap();
        assert_eq!(request.payload, Value::Null);
    }

    #[test]
    fn test_from_body_assigns_unique_ids() {
        let a = ExportRequest::from_body(br#"[{"a":1}]"#).unwrap();
        let b = ExportRequest::from_body(br#"[{"a":1}]"#).unwrap();

        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_eq!(a.payload, json!([{"a": 1}]));
    }

    #[test]
    fn test_from_body_rejects_invalid_json() {
        assert!(matches!(
            ExportRequest::from_body(b"{not json"),
            Err(ValidationError::InvalidJson(_))
        ));
        assert!(matches!(
            ExportRequest::from_body(b"  \n"),
            Err(ValidationError::EmptyBody)
        ));
    }

    #[test]
    fn test_check_id() {
        let mut request = ExportRequest::new(json!([]));
        assert!(request.check_id().is_ok());

        request.id = "ABC123".into();
        assert!(request.check_id().is_ok());

        for bad in ["", "a.b", "../etc", "a#", "with space"] {
            request.id = bad.into();
            assert!(
                matches!(request.check_id(), Err(ValidationError::InvalidId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_readdressed_keeps_file_path() {
        let raw = CompletionRecord::new("old", "/csvfiles/a.csv", 10);
        let addressed = raw.readdressed("ABC123");

        assert_eq!(addressed.id, "ABC123");
        assert_eq!(addressed.file_path, "/csvfiles/a.csv");
        assert!(addressed.timestamp >= 10);
    }
}
