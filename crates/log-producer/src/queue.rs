// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded queue between producers and the send workers.

use crate::batch::Batch;
use crate::errors::ProducerError;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Unit of work handed to a send worker.
#[derive(Debug)]
pub enum DispatchUnit {
    /// A complete batch ready for transmission.
    Batch(Batch),
    /// Tells the receiving worker to exit.
    Shutdown,
}

/// Multi-producer, multi-consumer bounded queue.
///
/// Producers push through a cloned sender; workers take turns on the shared
/// receiver, so each unit is delivered to exactly one worker.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<DispatchUnit>,
    rx: Arc<Mutex<mpsc::Receiver<DispatchUnit>>>,
}

impl DispatchQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Pushes a unit, waiting while the queue is full.
    pub async fn push(
        &self,
        unit: DispatchUnit,
        cancel: &CancellationToken,
    ) -> Result<(), ProducerError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProducerError::Cancelled),
            sent = self.tx.send(unit) => sent.map_err(|_| ProducerError::QueueClosed),
        }
    }

    /// Pops the next unit, waiting while the queue is empty.
    /// Returns `None` once `cancel` fires or the queue is closed.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<DispatchUnit> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            unit = async { self.rx.lock().await.recv().await } => unit,
        }
    }

    /// Closes the queue and drops what is still in it, returning the number of
    /// discarded batches. Later pushes fail with [`ProducerError::QueueClosed`].
    pub async fn close(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut discarded = 0;
        while let Ok(unit) = rx.try_recv() {
            if matches!(unit, DispatchUnit::Batch(_)) {
                discarded += 1;
            }
        }
        discarded
    }

    /// Number of units waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
