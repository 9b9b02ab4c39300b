// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Capacity of the dispatch queue, in batches.
pub const DEFAULT_PRODUCER_QUEUE_SIZE: usize = 4096;

/// Ceiling on bytes held by buffered and in-flight batches (100 MiB).
pub const DEFAULT_TOTAL_SIZE_IN_BYTES: usize = 100 * 1024 * 1024;

/// A batch is cut once it holds this many bytes (512 KiB).
pub const DEFAULT_LOG_GROUP_SIZE: usize = 512 * 1024;

/// A batch is cut once it holds this many records.
pub const DEFAULT_LOG_GROUP_MAX_LINES: usize = 4096;

/// Records above this size are rejected (8 MiB).
pub const DEFAULT_MAX_RECORD_SIZE_IN_BYTES: usize = 8 * 1024 * 1024;

pub const DEFAULT_IO_THREAD_NUM: usize = 8;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(2000);

/// Upper bound on how long `close` waits for workers to drain.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_BUCKETS: u32 = 64;

/// Largest supported shard bucket count.
pub const MAX_BUCKETS: u32 = 256;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_RETRY_ATTEMPTS: u64 = 3;

/// Width of a rendered shard hash, in hex digits.
pub const SHARD_HASH_WIDTH: usize = 32;

pub const API_VERSION: &str = "0.6.0";

/// Identity string sent as the user agent by the HTTP client.
pub const USER_AGENT: &str = concat!("log-producer/", env!("CARGO_PKG_VERSION"));
