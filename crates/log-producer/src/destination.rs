// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination identity used to group records into batches.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A tag attached to every record of a batch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Records with equal keys may share a batch.
///
/// Tags keep the order the caller supplied them in, which is the order they
/// are transmitted and rendered in, but equality and hashing treat them as a
/// set.
#[derive(Debug, Clone)]
pub struct DestinationKey {
    pub source: String,
    pub topic: String,
    pub shard_hash: Option<String>,
    pub tags: Vec<Tag>,
    sorted_tags: Vec<Tag>,
}

impl DestinationKey {
    pub fn new(
        source: impl Into<String>,
        topic: impl Into<String>,
        shard_hash: Option<String>,
        tags: Vec<Tag>,
    ) -> Self {
        let mut sorted_tags = tags.clone();
        sorted_tags.sort_unstable();
        sorted_tags.dedup();
        Self {
            source: source.into(),
            topic: topic.into(),
            shard_hash,
            tags,
            sorted_tags,
        }
    }

    /// String form of the key; tag order follows insertion order.
    #[must_use]
    pub fn as_key_string(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for DestinationKey {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.topic == other.topic
            && self.shard_hash == other.shard_hash
            && self.sorted_tags == other.sorted_tags
    }
}

impl Eq for DestinationKey {}

impl Hash for DestinationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.topic.hash(state);
        self.shard_hash.hash(state);
        self.sorted_tags.hash(state);
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.source,
            self.topic,
            self.shard_hash.as_deref().unwrap_or_default()
        )?;
        for tag in &self.tags {
            write!(f, "|{}={}", tag.key, tag.value)?;
        }
        Ok(())
    }
}
