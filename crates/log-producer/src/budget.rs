// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Byte budget shared by every buffered and in-flight batch.
//!
//! The budget is a counting semaphore with one permit per byte. A batch holds
//! a [`Reservation`] for its bytes from the moment it is admitted until the
//! worker that ships it is done with it; dropping the reservation returns the
//! bytes, so they come back on the success path, the failure path and when a
//! pending `send` future is dropped.

use crate::errors::ProducerError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct ByteBudget {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Bytes held against a [`ByteBudget`]. Released on drop.
#[derive(Debug)]
pub struct Reservation {
    permit: Option<OwnedSemaphorePermit>,
    bytes: usize,
}

impl ByteBudget {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Waits until `bytes` are available and reserves them.
    ///
    /// Fails with [`ProducerError::Cancelled`] if `cancel` fires first, and with
    /// [`ProducerError::RecordTooLarge`] if the request can never be satisfied.
    pub async fn acquire(
        &self,
        bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<Reservation, ProducerError> {
        if bytes == 0 {
            return Ok(Reservation::empty());
        }
        let permits = u32::try_from(bytes)
            .ok()
            .filter(|_| bytes <= self.capacity)
            .ok_or(ProducerError::RecordTooLarge {
                size: bytes,
                limit: self.capacity,
            })?;

        let semaphore = Arc::clone(&self.semaphore);
        let permit = tokio::select! {
            // Cancellation wins over a permit that frees up at the same time
            biased;
            () = cancel.cancelled() => return Err(ProducerError::Cancelled),
            permit = semaphore.acquire_many_owned(permits) => {
                permit.map_err(|_| ProducerError::Cancelled)?
            }
        };
        trace!("Reserved {bytes} bytes, {} in use", self.reserved());

        Ok(Reservation {
            permit: Some(permit),
            bytes,
        })
    }
}

impl Reservation {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            permit: None,
            bytes: 0,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Folds `other` into this reservation; both must come from the same budget.
    pub fn merge(&mut self, mut other: Reservation) {
        self.bytes += other.bytes;
        other.bytes = 0;
        match (self.permit.as_mut(), other.permit.take()) {
            (Some(permit), Some(other_permit)) => permit.merge(other_permit),
            (None, other_permit) => self.permit = other_permit,
            (Some(_), None) => {}
        }
    }

    /// Returns the bytes to the budget.
    pub fn release(self) {
        drop(self);
    }
}
