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

//! Routing keys and topic names.
//!
//! The routing key is the only thing that carries a request's identity from
//! hop to hop, so its grammar is strict:
//!
//! | Kind      | Shape                  | Published by | Exchange                       |
//! |-----------|------------------------|--------------|--------------------------------|
//! | raw       | `csv.<id>.<timestamp>` | worker       | [`RAW_COMPLETION_EXCHANGE`]       |
//! | addressed | `req.<id>`             | router       | [`ADDRESSED_COMPLETION_EXCHANGE`] |
//!
//! Bindings use AMQP topic semantics: `*` matches exactly one word and `#`
//! matches zero or more words. Any key whose segment count or prefix differs
//! from the table above is a [`MalformedMessage`].

use std::fmt;
use std::str::FromStr;

use crate::error::{BusError, MalformedMessage};

/// Exchange the conversion worker publishes raw completions to.
pub const RAW_COMPLETION_EXCHANGE: &str = "csv_exchange";
/// Exchange the completion router publishes addressed completions to.
pub const ADDRESSED_COMPLETION_EXCHANGE: &str = "csv_export";
/// Binding used by the completion router on the raw exchange.
pub const RAW_COMPLETION_BINDING: &str = "csv.#.#";
/// Binding used by the gateway on the addressed exchange.
pub const ADDRESSED_COMPLETION_BINDING: &str = "req.#";

const RAW_PREFIX: &str = "csv";
const ADDRESSED_PREFIX: &str = "req";
const RAW_SHAPE: &str = "csv.<id>.<timestamp>";
const ADDRESSED_SHAPE: &str = "req.<id>";

/// A parsed routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// `csv.<id>.<timestamp>`: a completion straight from the worker.
    Raw { id: String, timestamp: i64 },
    /// `req.<id>`: a completion addressed to the caller waiting on `id`.
    Addressed { id: String },
}

impl RoutingKey {
    pub fn raw(id: impl Into<String>, timestamp: i64) -> Self {
        Self::Raw {
            id: id.into(),
            timestamp,
        }
    }

    pub fn addressed(id: impl Into<String>) -> Self {
        Self::Addressed { id: id.into() }
    }

    /// The request id this key addresses.
    pub fn id(&self) -> &str {
        match self {
            Self::Raw { id, .. } | Self::Addressed { id } => id,
        }
    }

    /// Parses a key that must be of the raw `csv.<id>.<timestamp>` shape.
    pub fn parse_raw(key: &str) -> Result<Self, MalformedMessage> {
        let malformed = || MalformedMessage::RoutingKey {
            key: key.to_string(),
            expected: RAW_SHAPE,
        };

        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [RAW_PREFIX, id, timestamp] if !id.is_empty() => {
                let timestamp = timestamp.parse::<i64>().map_err(|_| malformed())?;
                Ok(Self::raw(*id, timestamp))
            }
            _ => Err(malformed()),
        }
    }

    /// Parses a key that must be of the addressed `req.<id>` shape.
    pub fn parse_addressed(key: &str) -> Result<Self, MalformedMessage> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [ADDRESSED_PREFIX, id] if !id.is_empty() => Ok(Self::addressed(*id)),
            _ => Err(MalformedMessage::RoutingKey {
                key: key.to_string(),
                expected: ADDRESSED_SHAPE,
            }),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw { id, timestamp } => write!(f, "{}.{}.{}", RAW_PREFIX, id, timestamp),
            Self::Addressed { id } => write!(f, "{}.{}", ADDRESSED_PREFIX, id),
        }
    }
}

impl FromStr for RoutingKey {
    type Err = MalformedMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("csv.") {
            Self::parse_raw(s)
        } else {
            Self::parse_addressed(s)
        }
    }
}

/// Checks that `pattern` is a usable topic binding.
///
/// Words must be non-empty, and the wildcards `*` and `#` must stand alone
/// as whole words.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    let valid = !pattern.is_empty()
        && pattern.split('.').all(|word| {
            !word.is_empty()
                && (word == "*" || word == "#" || !(word.contains('*') || word.contains('#')))
        });

    if valid {
        Ok(())
    } else {
        Err(BusError::InvalidBinding {
            pattern: pattern.to_string(),
        })
    }
}

/// Returns whether `key` is selected by the topic `pattern`.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    words_match(&pattern, &key)
}

/// Decodes a message key carried as raw bytes and returns it when `pattern`
/// selects it. A missing key counts as the empty key; invalid UTF-8 is
/// replaced rather than rejected so the consumer can still see and drop it.
pub fn bound_key(pattern: &str, key: Option<&[u8]>) -> Option<String> {
    let key = key
        .map(|key| String::from_utf8_lossy(key).into_owned())
        .unwrap_or_default();
    topic_matches(pattern, &key).then_some(key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}
