// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public producer: lifecycle, admission and flushing.
//!
//! ```text
//!   send() ──> BatchBuilder ──(full)──────────────────────┐
//!                  │                                       v
//!                  └─(rest)─> AggregationTable ─(full)─> DispatchQueue ─> SendWorker x N ─> LogClient
//!                                   ^                      ^
//!                   FlushWorker ────┴── flush() / close() ─┘
//! ```
//!
//! Every admitted byte is reserved against the [`ByteBudget`] before it enters
//! the table or the queue and stays reserved until a send worker is done with
//! the batch holding it.

use crate::aggregator::AggregationTable;
use crate::batch::{Batch, BatchBuilder, BatchLimits};
use crate::budget::ByteBudget;
use crate::client::{HttpLogClient, LogClient};
use crate::config::ProducerConfig;
use crate::destination::{DestinationKey, Tag};
use crate::errors::{ProducerError, TransportError};
use crate::queue::{DispatchQueue, DispatchUnit};
use crate::record::LogRecord;
use crate::shard_hash::ShardHashAdjuster;
use crate::worker::{FlushWorker, ProducerStats, SendWorker, StatsSnapshot, WorkerExit};
use derive_more::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LifecycleState {
    Created,
    Open,
    Stopping,
    Closed,
}

/// State shared between the producer and its background tasks.
pub(crate) struct ProducerCore {
    pub(crate) project: String,
    pub(crate) logstore: String,
    pub(crate) table: AggregationTable,
    pub(crate) queue: DispatchQueue,
    pub(crate) budget: ByteBudget,
    pub(crate) client: Arc<dyn LogClient>,
    pub(crate) stats: ProducerStats,
    /// Fires when the producer gives up on draining; aborts every pending wait
    pub(crate) cancel: CancellationToken,
}

impl ProducerCore {
    /// Moves every buffered batch to the dispatch queue.
    pub(crate) async fn flush(&self) -> Result<(), ProducerError> {
        let batches = self.table.take_all();
        if batches.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} batches", batches.len());
        for batch in batches {
            self.dispatch(batch, &self.cancel).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<(), ProducerError> {
        debug!(
            "Add {} records for {} to queue",
            batch.line_count(),
            batch.destination()
        );
        self.queue
            .push(DispatchUnit::Batch(batch), cancel)
            .await
    }
}

struct Tasks {
    flush: JoinHandle<()>,
    senders: JoinSet<WorkerExit>,
}

pub struct Producer {
    core: Arc<ProducerCore>,
    state: RwLock<LifecycleState>,
    tasks: Mutex<Option<Tasks>>,
    flush_stop: CancellationToken,
    /// Aborts sends still waiting on backpressure once close stops waiting
    /// for them; child of the core token
    admission: CancellationToken,
    shard_hash_adjuster: Option<ShardHashAdjuster>,
    limits: BatchLimits,
    max_record_size_in_bytes: usize,
    io_thread_num: usize,
    flush_interval: Duration,
    close_timeout: Duration,
}

impl Producer {
    /// Validates `config` and builds a producer shipping through `client`.
    pub fn new(config: ProducerConfig, client: Arc<dyn LogClient>) -> Result<Self, ProducerError> {
        config.validate()?;

        let shard_hash_adjuster = if config.adjust_shard_hash {
            Some(ShardHashAdjuster::new(config.buckets)?)
        } else {
            None
        };
        let limits = BatchLimits::new(config.log_group_size, config.log_group_max_lines);

        let core = ProducerCore {
            project: config.project,
            logstore: config.logstore,
            table: AggregationTable::new(limits),
            queue: DispatchQueue::new(config.producer_queue_size),
            budget: ByteBudget::new(config.total_size_in_bytes),
            client,
            stats: ProducerStats::default(),
            cancel: CancellationToken::new(),
        };

        let admission = core.cancel.child_token();
        Ok(Self {
            core: Arc::new(core),
            admission,
            state: RwLock::new(LifecycleState::Created),
            tasks: Mutex::new(None),
            flush_stop: CancellationToken::new(),
            shard_hash_adjuster,
            limits,
            max_record_size_in_bytes: config.max_record_size_in_bytes,
            io_thread_num: config.io_thread_num,
            flush_interval: config.flush_interval,
            close_timeout: config.close_timeout,
        })
    }

    /// Builds a producer shipping through an [`HttpLogClient`].
    pub fn with_http_client(config: ProducerConfig) -> Result<Self, ProducerError> {
        config.validate()?;
        let client = HttpLogClient::new(&config).map_err(|e: TransportError| {
            ProducerError::InvalidConfig(format!("Failed to build HTTP client: {e}"))
        })?;
        Self::new(config, Arc::new(client))
    }

    /// Starts the send workers and the flush worker on the current runtime.
    pub async fn open(&self) -> Result<(), ProducerError> {
        let mut state = self.state.write().await;
        if *state != LifecycleState::Created {
            return Err(ProducerError::AlreadyOpen);
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ProducerError::Runtime(e.to_string()))?;

        info!(
            "Opening producer for {}/{} with {} send workers, queue size {}, budget {} bytes",
            self.core.project,
            self.core.logstore,
            self.io_thread_num,
            self.core.queue.capacity(),
            self.core.budget.capacity()
        );

        let mut senders = JoinSet::new();
        for id in 0..self.io_thread_num {
            senders.spawn_on(SendWorker::new(id, Arc::clone(&self.core)).run(), &handle);
        }
        let flush = handle.spawn(
            FlushWorker::new(
                Arc::clone(&self.core),
                self.flush_interval,
                self.flush_stop.clone(),
            )
            .run(),
        );

        *self.tasks.lock().await = Some(Tasks { flush, senders });
        *state = LifecycleState::Open;
        Ok(())
    }

    /// Admits `records` for the destination described by the other arguments.
    ///
    /// Records are cut into batches as the size or line threshold is crossed;
    /// complete batches go straight to the dispatch queue and the remainder is
    /// buffered until it fills up or is flushed. Waits while the byte budget
    /// or the queue is exhausted.
    pub async fn send(
        &self,
        topic: &str,
        source: &str,
        shard_hash: Option<&str>,
        tags: Vec<Tag>,
        records: Vec<LogRecord>,
    ) -> Result<(), ProducerError> {
        if records.is_empty() {
            return Ok(());
        }
        // Held until the records are in the table or the queue, so close()
        // cannot run its final flush in between
        let state = self.state.read().await;
        match *state {
            LifecycleState::Open => {}
            LifecycleState::Created => return Err(ProducerError::NotOpen),
            LifecycleState::Stopping | LifecycleState::Closed => {
                return Err(ProducerError::Stopped)
            }
        }

        let sizes: Vec<usize> = records.iter().map(LogRecord::size_in_bytes).collect();
        if let Some(&size) = sizes.iter().find(|&&s| s > self.max_record_size_in_bytes) {
            return Err(ProducerError::RecordTooLarge {
                size,
                limit: self.max_record_size_in_bytes,
            });
        }

        let shard_hash = match (shard_hash, &self.shard_hash_adjuster) {
            (Some(hash), Some(adjuster)) => Some(adjuster.adjust(hash)),
            (hash, _) => hash.map(str::to_string),
        };
        let destination = DestinationKey::new(source, topic, shard_hash, tags);

        let mut builder = BatchBuilder::new(self.limits);
        for (record, size) in records.into_iter().zip(sizes) {
            if let Some((full, bytes)) = builder.push(record, size) {
                let reservation = self.core.budget.acquire(bytes, &self.admission).await?;
                let batch = Batch::new(destination.clone(), full, bytes, reservation);
                self.core.dispatch(batch, &self.admission).await?;
            }
        }

        let Some((rest, bytes)) = builder.finish() else {
            return Ok(());
        };
        let reservation = self.core.budget.acquire(bytes, &self.admission).await?;
        if let Some(batch) = self.core.table.merge(destination, rest, bytes, reservation) {
            // Carries records admitted by earlier calls
            self.core.dispatch(batch, &self.core.cancel).await?;
        }
        drop(state);
        Ok(())
    }

    /// Queues every buffered batch for transmission.
    pub async fn flush(&self) -> Result<(), ProducerError> {
        debug!("Flushing producer");
        self.core.flush().await
    }

    /// Flushes what is buffered, stops the workers once the queue is drained
    /// and closes the client. Every wait is bounded by `close_timeout`.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), ProducerError> {
        {
            let mut state = self.stop_admission().await;
            match *state {
                LifecycleState::Open => *state = LifecycleState::Stopping,
                LifecycleState::Created => {
                    *state = LifecycleState::Closed;
                    info!("Producer closed before being opened");
                    return Ok(());
                }
                LifecycleState::Stopping | LifecycleState::Closed => {
                    warn!("Producer is stopped already");
                    return Ok(());
                }
            }
        }

        if let Some(mut tasks) = self.tasks.lock().await.take() {
            let drained =
                tokio::time::timeout(self.close_timeout, self.drain(&mut tasks)).await;
            if drained.is_err() {
                warn!(
                    "Workers did not drain within {:?}, abandoning {} of them",
                    self.close_timeout,
                    tasks.senders.len()
                );
                self.core.cancel.cancel();
                tasks.senders.detach_all();
            }
        }
        let discarded = self.core.queue.close().await;
        if discarded > 0 {
            warn!("Dropped {discarded} batches left in the queue");
        }

        self.core.client.close().await;
        *self.state.write().await = LifecycleState::Closed;
        info!("Producer closed");
        Ok(())
    }

    /// Waits for in-flight sends and takes the state lock.
    ///
    /// Sends stuck on a full queue or budget hold the read lock. Past
    /// `close_timeout` they are cancelled, which leaves what was already
    /// admitted in place for the drain. Only if a send is still stuck pushing
    /// a promoted batch after another `close_timeout` is the queue abandoned.
    async fn stop_admission(&self) -> RwLockWriteGuard<'_, LifecycleState> {
        if let Ok(state) = tokio::time::timeout(self.close_timeout, self.state.write()).await {
            return state;
        }
        warn!(
            "Pending sends did not finish within {:?}, cancelling them",
            self.close_timeout
        );
        self.admission.cancel();
        if let Ok(state) = tokio::time::timeout(self.close_timeout, self.state.write()).await {
            return state;
        }
        warn!("Pending sends are still blocked on the queue, abandoning it");
        self.core.cancel.cancel();
        self.state.write().await
    }

    async fn drain(&self, tasks: &mut Tasks) {
        self.flush_stop.cancel();
        // A periodic flush in progress finishes queueing what it swapped out
        if let Err(e) = (&mut tasks.flush).await {
            error!("Flush worker failed: {e}");
        }

        if let Err(e) = self.core.flush().await {
            error!("Final flush failed: {e}");
        }

        for _ in 0..self.io_thread_num {
            if let Err(e) = self
                .core
                .queue
                .push(DispatchUnit::Shutdown, &self.core.cancel)
                .await
            {
                error!("Failed to signal send workers: {e}");
                break;
            }
        }

        let mut shutdowns = 0;
        while let Some(exit) = tasks.senders.join_next().await {
            match exit {
                Ok(WorkerExit::Shutdown) => shutdowns += 1,
                Ok(WorkerExit::Cancelled) => {}
                Err(e) => error!("Send worker failed: {e}"),
            }
        }
        debug!("{shutdowns} send workers stopped");
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Bytes held by buffered and in-flight batches.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.core.budget.reserved()
    }

    /// Destinations with records waiting in the aggregation table.
    #[must_use]
    pub fn buffered_batches(&self) -> usize {
        self.core.table.len()
    }

    /// Batches waiting in the dispatch queue.
    #[must_use]
    pub fn queued_batches(&self) -> usize {
        self.core.queue.len()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // Lets background tasks exit if the producer is dropped without close()
        self.flush_stop.cancel();
        self.core.cancel.cancel();
    }
}
