// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::errors::ProducerError;
use regex::Regex;
use std::env;
use std::time::Duration;

/// How the HTTP client retries a failed request before giving up on a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Number of attempts, retried back to back.
    Immediate(u64),
    /// Number of attempts and the delay in milliseconds between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    #[must_use]
    pub fn attempts(&self) -> u64 {
        match self {
            Self::Immediate(attempts) | Self::LinearBackoff(attempts, _) => *attempts,
        }
    }

    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Immediate(_) => None,
            Self::LinearBackoff(_, delay_ms) => Some(Duration::from_millis(*delay_ms)),
        }
    }
}

/// Producer configuration, read once at construction.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Destination project every batch is shipped to
    pub project: String,
    /// Destination log store inside the project
    pub logstore: String,
    /// Base URL of the ingestion service (e.g., "https://cn-hangzhou.log.example.com")
    pub endpoint: String,
    pub access_key_id: String,
    /// Capacity of the dispatch queue, in batches
    pub producer_queue_size: usize,
    /// Ceiling on bytes held by buffered and in-flight batches
    pub total_size_in_bytes: usize,
    /// Byte threshold at which a batch is cut
    pub log_group_size: usize,
    /// Line threshold at which a batch is cut
    pub log_group_max_lines: usize,
    /// Records larger than this are rejected
    pub max_record_size_in_bytes: usize,
    /// Number of send workers
    pub io_thread_num: usize,
    pub flush_interval: Duration,
    /// Upper bound on how long `close` waits for draining
    pub close_timeout: Duration,
    /// Remap shard hashes into `buckets` values
    pub adjust_shard_hash: bool,
    pub buckets: u32,
    pub https_proxy: Option<String>,
    /// Per-request timeout of the HTTP client
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    /// zstd level for request bodies, 0 sends them uncompressed
    pub compression_level: i32,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            logstore: String::new(),
            endpoint: String::new(),
            access_key_id: String::new(),
            producer_queue_size: constants::DEFAULT_PRODUCER_QUEUE_SIZE,
            total_size_in_bytes: constants::DEFAULT_TOTAL_SIZE_IN_BYTES,
            log_group_size: constants::DEFAULT_LOG_GROUP_SIZE,
            log_group_max_lines: constants::DEFAULT_LOG_GROUP_MAX_LINES,
            max_record_size_in_bytes: constants::DEFAULT_MAX_RECORD_SIZE_IN_BYTES,
            io_thread_num: constants::DEFAULT_IO_THREAD_NUM,
            flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
            close_timeout: constants::DEFAULT_CLOSE_TIMEOUT,
            adjust_shard_hash: false,
            buckets: constants::DEFAULT_BUCKETS,
            https_proxy: None,
            timeout: constants::DEFAULT_REQUEST_TIMEOUT,
            retry_strategy: RetryStrategy::Immediate(constants::DEFAULT_RETRY_ATTEMPTS),
            compression_level: 0,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}

impl ProducerConfig {
    /// Create configuration from `LOG_PRODUCER_*` environment variables.
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Result<Self, ProducerError> {
        let defaults = Self::default();

        let retry_strategy = match (
            env_parse::<u64>("LOG_PRODUCER_RETRY_ATTEMPTS"),
            env_parse::<u64>("LOG_PRODUCER_RETRY_BACKOFF_MS"),
        ) {
            (Some(attempts), Some(delay_ms)) => RetryStrategy::LinearBackoff(attempts, delay_ms),
            (Some(attempts), None) => RetryStrategy::Immediate(attempts),
            (None, _) => defaults.retry_strategy.clone(),
        };

        let config = Self {
            project: env::var("LOG_PRODUCER_PROJECT").unwrap_or_default(),
            logstore: env::var("LOG_PRODUCER_LOGSTORE").unwrap_or_default(),
            endpoint: env::var("LOG_PRODUCER_ENDPOINT").unwrap_or_default(),
            access_key_id: env::var("LOG_PRODUCER_ACCESS_KEY_ID").unwrap_or_default(),
            producer_queue_size: env_parse("LOG_PRODUCER_QUEUE_SIZE")
                .unwrap_or(defaults.producer_queue_size),
            total_size_in_bytes: env_parse("LOG_PRODUCER_TOTAL_SIZE_IN_BYTES")
                .unwrap_or(defaults.total_size_in_bytes),
            log_group_size: env_parse("LOG_PRODUCER_LOG_GROUP_SIZE")
                .unwrap_or(defaults.log_group_size),
            log_group_max_lines: env_parse("LOG_PRODUCER_LOG_GROUP_MAX_LINES")
                .unwrap_or(defaults.log_group_max_lines),
            max_record_size_in_bytes: env_parse("LOG_PRODUCER_MAX_RECORD_SIZE_IN_BYTES")
                .unwrap_or(defaults.max_record_size_in_bytes),
            io_thread_num: env_parse("LOG_PRODUCER_IO_THREAD_NUM")
                .unwrap_or(defaults.io_thread_num),
            flush_interval: env_parse("LOG_PRODUCER_FLUSH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            close_timeout: env_parse("LOG_PRODUCER_CLOSE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_timeout),
            adjust_shard_hash: env::var("LOG_PRODUCER_ADJUST_SHARD_HASH")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(defaults.adjust_shard_hash),
            buckets: env_parse("LOG_PRODUCER_BUCKETS").unwrap_or(defaults.buckets),
            https_proxy: env::var("LOG_PRODUCER_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
            timeout: env_parse("LOG_PRODUCER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            retry_strategy,
            compression_level: env_parse("LOG_PRODUCER_COMPRESSION_LEVEL")
                .unwrap_or(defaults.compression_level),
            log_level: env::var("LOG_PRODUCER_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ProducerError> {
        #[allow(clippy::expect_used)]
        let name_pattern =
            Regex::new(r"^[a-z0-9][a-z0-9_-]{1,126}[a-z0-9]$").expect("static pattern is valid");

        if !name_pattern.is_match(&self.project) {
            return Err(ProducerError::InvalidConfig(format!(
                "Invalid project name '{}'",
                self.project
            )));
        }
        if !name_pattern.is_match(&self.logstore) {
            return Err(ProducerError::InvalidConfig(format!(
                "Invalid logstore name '{}'",
                self.logstore
            )));
        }

        let positive = [
            ("producer_queue_size", self.producer_queue_size),
            ("total_size_in_bytes", self.total_size_in_bytes),
            ("log_group_size", self.log_group_size),
            ("log_group_max_lines", self.log_group_max_lines),
            ("max_record_size_in_bytes", self.max_record_size_in_bytes),
            ("io_thread_num", self.io_thread_num),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ProducerError::InvalidConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        // A batch is at most one record past the size threshold, so this keeps
        // every budget acquisition within the ceiling.
        let largest_batch = self
            .log_group_size
            .saturating_add(self.max_record_size_in_bytes);
        if largest_batch > self.total_size_in_bytes {
            return Err(ProducerError::InvalidConfig(format!(
                "log_group_size + max_record_size_in_bytes ({largest_batch}) must not exceed total_size_in_bytes ({})",
                self.total_size_in_bytes
            )));
        }
        if u32::try_from(self.total_size_in_bytes).is_err() {
            return Err(ProducerError::InvalidConfig(format!(
                "total_size_in_bytes must not exceed {}",
                u32::MAX
            )));
        }

        if self.flush_interval.is_zero() {
            return Err(ProducerError::InvalidConfig(
                "flush_interval must be greater than 0".to_string(),
            ));
        }

        if self.adjust_shard_hash
            && (!self.buckets.is_power_of_two() || self.buckets > constants::MAX_BUCKETS)
        {
            return Err(ProducerError::InvalidConfig(format!(
                "buckets must be a power of two between 1 and {}, got {}",
                constants::MAX_BUCKETS,
                self.buckets
            )));
        }

        if self.retry_strategy.attempts() == 0 {
            return Err(ProducerError::InvalidConfig(
                "retry attempts must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ProducerError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
