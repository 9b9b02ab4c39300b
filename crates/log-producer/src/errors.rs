// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types.

use reqwest::StatusCode;

/// Errors surfaced to callers of the producer.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Producer is not open")]
    NotOpen,

    #[error("Producer is already open")]
    AlreadyOpen,

    #[error("Producer is stopped")]
    Stopped,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Dispatch queue is closed")]
    QueueClosed,

    #[error("Record of {size} bytes exceeds the limit of {limit} bytes")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl ProducerError {
    /// True for errors caused by calling an operation in the wrong lifecycle state.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::NotOpen | Self::AlreadyOpen | Self::Stopped)
    }
}

/// Failure reported by a transport client once its own retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Destination rejected request ({0:?}): {1}")]
    Destination(Option<StatusCode>, String),

    #[error("Client error: {0}")]
    Client(String),
}
