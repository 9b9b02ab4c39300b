// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transport clients for testing

use async_trait::async_trait;
use log_producer::batch::Batch;
use log_producer::client::LogClient;
use log_producer::destination::DestinationKey;
use log_producer::errors::TransportError;
use log_producer::record::LogRecord;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// What a mock client saw for one batch
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub destination: DestinationKey,
    pub records: Vec<LogRecord>,
    pub size_in_bytes: usize,
    pub reserved_bytes: usize,
}

/// Accepts every batch and remembers it
#[derive(Default)]
pub struct RecordingClient {
    pub sent: Mutex<Vec<SentBatch>>,
    pub close_calls: AtomicUsize,
    /// Applied before each batch is recorded
    pub delay: Option<Duration>,
}

#[allow(dead_code)]
impl RecordingClient {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<SentBatch> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl LogClient for RecordingClient {
    async fn send_batch(
        &self,
        _project: &str,
        _logstore: &str,
        batch: &Batch,
    ) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().expect("lock poisoned").push(SentBatch {
            destination: batch.destination().clone(),
            records: batch.records().to_vec(),
            size_in_bytes: batch.size_in_bytes(),
            reserved_bytes: batch.reserved_bytes(),
        });
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Rejects every batch as if retries were exhausted
#[derive(Default)]
pub struct FailingClient {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl LogClient for FailingClient {
    async fn send_batch(
        &self,
        _project: &str,
        _logstore: &str,
        _batch: &Batch,
    ) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Destination(None, "connection refused".to_string()))
    }

    async fn close(&self) {}
}

/// Holds every batch until released
#[derive(Default)]
pub struct BlockingClient {
    pub release: Notify,
    pub started: AtomicUsize,
}

#[async_trait]
impl LogClient for BlockingClient {
    async fn send_batch(
        &self,
        _project: &str,
        _logstore: &str,
        _batch: &Batch,
    ) -> Result<(), TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(())
    }

    async fn close(&self) {}
}
