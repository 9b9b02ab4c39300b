// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remaps caller-supplied shard hashes onto a fixed number of buckets.
//!
//! The ingestion service routes a batch to the shard whose hash range contains
//! the batch's shard hash. Callers tend to use high-cardinality values (request
//! ids, user ids) as hints, which spreads every destination over every shard
//! and multiplies the number of partially filled batches. Keeping only the top
//! `log2(buckets)` bits of the hint caps the number of distinct hashes.

use crate::constants::{MAX_BUCKETS, SHARD_HASH_WIDTH};
use crate::errors::ProducerError;
use fnv::FnvHasher;
use std::hash::Hasher;

#[derive(Debug, Clone, Copy)]
pub struct ShardHashAdjuster {
    reserved_bits: u32,
}

impl ShardHashAdjuster {
    /// `buckets` must be a power of two no larger than [`MAX_BUCKETS`].
    pub fn new(buckets: u32) -> Result<Self, ProducerError> {
        if !buckets.is_power_of_two() || buckets > MAX_BUCKETS {
            return Err(ProducerError::InvalidConfig(format!(
                "buckets must be a power of two between 1 and {MAX_BUCKETS}, got {buckets}"
            )));
        }
        Ok(Self {
            reserved_bits: buckets.trailing_zeros(),
        })
    }

    #[must_use]
    pub fn buckets(&self) -> u32 {
        1 << self.reserved_bits
    }

    /// Maps `shard_hash` to its bucket's hash. Empty hints are returned as-is.
    #[must_use]
    pub fn adjust(&self, shard_hash: &str) -> String {
        if shard_hash.is_empty() {
            return String::new();
        }
        let mut hasher = FnvHasher::default();
        hasher.write(shard_hash.as_bytes());
        let hash = hasher.finish();

        let bucket_bits = match self.reserved_bits {
            0 => 0,
            bits => hash >> (64 - bits) << (64 - bits),
        };
        // Top 64 bits carry the bucket, the low half of the range stays zero
        format!("{bucket_bits:016x}{:0>width$}", "", width = SHARD_HASH_WIDTH - 16)
    }
}
