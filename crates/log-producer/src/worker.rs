// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background tasks: send workers draining the dispatch queue and the
//! periodic flush worker.

use crate::batch::Batch;
use crate::producer::ProducerCore;
use crate::queue::DispatchUnit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters updated by the send workers.
#[derive(Debug, Default)]
pub struct ProducerStats {
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    records_sent: AtomicU64,
    shutdowns_observed: AtomicU64,
}

/// Point-in-time copy of [`ProducerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub records_sent: u64,
    /// Send workers that exited on a shutdown signal
    pub shutdowns_observed: u64,
}

impl ProducerStats {
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            shutdowns_observed: self.shutdowns_observed.load(Ordering::Relaxed),
        }
    }
}

/// Why a send worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    Cancelled,
}

pub(crate) struct SendWorker {
    id: usize,
    core: Arc<ProducerCore>,
}

impl SendWorker {
    pub(crate) fn new(id: usize, core: Arc<ProducerCore>) -> Self {
        Self { id, core }
    }

    pub(crate) async fn run(self) -> WorkerExit {
        debug!("Send worker {} started", self.id);
        loop {
            match self.core.queue.pop(&self.core.cancel).await {
                Some(DispatchUnit::Batch(batch)) => self.ship(batch).await,
                Some(DispatchUnit::Shutdown) => {
                    self.core
                        .stats
                        .shutdowns_observed
                        .fetch_add(1, Ordering::Relaxed);
                    debug!("Send worker {} received shutdown signal", self.id);
                    return WorkerExit::Shutdown;
                }
                None => {
                    debug!("Send worker {} cancelled", self.id);
                    return WorkerExit::Cancelled;
                }
            }
        }
    }

    async fn ship(&self, batch: Batch) {
        let lines = batch.line_count() as u64;
        let result = self
            .core
            .client
            .send_batch(&self.core.project, &self.core.logstore, &batch)
            .await;

        // Bytes go back to the budget on both paths; retrying is the client's job
        let (destination, _, reservation) = batch.into_parts();
        reservation.release();

        match result {
            Ok(()) => {
                self.core.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.core
                    .stats
                    .records_sent
                    .fetch_add(lines, Ordering::Relaxed);
            }
            Err(e) => {
                self.core
                    .stats
                    .batches_failed
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    "Failed to send {lines} records for {destination} to {}/{}: {e}",
                    self.core.project, self.core.logstore
                );
            }
        }
    }
}

pub(crate) struct FlushWorker {
    core: Arc<ProducerCore>,
    interval: Duration,
    stop: CancellationToken,
}

impl FlushWorker {
    pub(crate) fn new(core: Arc<ProducerCore>, interval: Duration, stop: CancellationToken) -> Self {
        Self {
            core,
            interval,
            stop,
        }
    }

    pub(crate) async fn run(self) {
        info!("Flush worker started");
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            // Runs to completion once started; what it swapped out gets queued
            if let Err(e) = self.core.flush().await {
                warn!("Periodic flush interrupted: {e}");
                break;
            }
        }
        info!("Flush worker stopped");
    }
}
