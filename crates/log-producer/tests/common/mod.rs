// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod mocks;

use log_producer::config::ProducerConfig;
use log_producer::record::LogRecord;
use std::time::Duration;

/// Config with the thresholds used across the tests: 100 bytes or 5 lines.
#[allow(dead_code)]
pub fn test_config() -> ProducerConfig {
    ProducerConfig {
        project: "test-project".to_string(),
        logstore: "test-store".to_string(),
        endpoint: "http://127.0.0.1:1".to_string(),
        log_group_size: 100,
        log_group_max_lines: 5,
        max_record_size_in_bytes: 1000,
        total_size_in_bytes: 100_000,
        io_thread_num: 3,
        producer_queue_size: 16,
        flush_interval: Duration::from_secs(3600),
        close_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// A record whose estimated size is exactly `size` bytes, tagged with `seq`.
#[allow(dead_code)]
pub fn record(seq: usize, size: usize) -> LogRecord {
    let seq = format!("{seq:04}");
    // "n" + 4 digits = 5, the rest goes into a padding field
    let padding = size.checked_sub(5 + 1).expect("record size too small");
    LogRecord::new()
        .field("n", seq)
        .field("p", "x".repeat(padding))
}

/// Sequence number stored by [`record`].
#[allow(dead_code)]
pub fn seq_of(record: &LogRecord) -> usize {
    record
        .fields
        .iter()
        .find(|f| f.key == "n")
        .and_then(|f| f.value.as_deref())
        .and_then(|v| v.parse().ok())
        .expect("record has no sequence number")
}

/// Polls `condition` until it holds, failing the test after two seconds.
#[allow(dead_code)]
pub async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
