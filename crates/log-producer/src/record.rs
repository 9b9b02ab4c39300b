// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

/// A single key/value field of a log line. The value may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogField {
    pub key: String,
    pub value: Option<String>,
}

/// One structured log line: an ordered list of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Unix time in seconds, if the caller stamped the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u32>,
    pub fields: Vec<LogField>,
}

impl LogRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_time(mut self, time: u32) -> Self {
        self.time = Some(time);
        self
    }

    /// Appends a field with a value.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(LogField {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Appends a field without a value.
    #[must_use]
    pub fn empty_field(mut self, key: impl Into<String>) -> Self {
        self.fields.push(LogField {
            key: key.into(),
            value: None,
        });
        self
    }

    /// Estimated size of the record: the UTF-16 length of every key and value.
    ///
    /// This approximates the wire size and does not match the encoded byte
    /// length for text outside the BMP or for multi-byte UTF-8.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|f| utf16_len(&f.key) + f.value.as_deref().map_or(0, utf16_len))
            .sum()
    }
}

impl<K, V> FromIterator<(K, V)> for LogRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            time: None,
            fields: iter
                .into_iter()
                .map(|(key, value)| LogField {
                    key: key.into(),
                    value: Some(value.into()),
                })
                .collect(),
        }
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
