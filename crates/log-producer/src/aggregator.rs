// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination batches waiting for a threshold or a flush.
//!
//! All access goes through one mutex, held only for map lookups, appends and
//! the wholesale swap done by [`AggregationTable::take_all`]. Nothing awaits
//! while holding it; promoted and flushed batches are returned to the caller,
//! which pushes them to the dispatch queue after the lock is gone.

use crate::batch::{Batch, BatchLimits};
use crate::budget::Reservation;
use crate::destination::DestinationKey;
use crate::record::LogRecord;
use fnv::FnvHasher;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Mutex;
use tracing::debug;

type Table = HashMap<DestinationKey, Batch, BuildHasherDefault<FnvHasher>>;

#[derive(Debug)]
pub struct AggregationTable {
    table: Mutex<Table>,
    limits: BatchLimits,
}

impl AggregationTable {
    #[must_use]
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            limits,
        }
    }

    /// Merges a partial buffer into the destination's batch.
    ///
    /// When the merge makes the batch full it is removed from the table and
    /// returned; the caller must dispatch it.
    pub fn merge(
        &self,
        destination: DestinationKey,
        records: Vec<LogRecord>,
        size_in_bytes: usize,
        reservation: Reservation,
    ) -> Option<Batch> {
        #[allow(clippy::expect_used)]
        let mut table = self.table.lock().expect("lock poisoned");

        match table.entry(destination) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().append(records, size_in_bytes, reservation);
                if entry.get().is_full(&self.limits) {
                    let batch = entry.remove();
                    debug!(
                        "Promoting {} records for {} to the queue",
                        batch.line_count(),
                        batch.destination()
                    );
                    return Some(batch);
                }
                None
            }
            Entry::Vacant(entry) => {
                let batch = Batch::new(entry.key().clone(), records, size_in_bytes, reservation);
                if batch.is_full(&self.limits) {
                    return Some(batch);
                }
                entry.insert(batch);
                None
            }
        }
    }

    /// Swaps in an empty table and returns every batch the old one held.
    pub fn take_all(&self) -> Vec<Batch> {
        let drained = {
            #[allow(clippy::expect_used)]
            let mut table = self.table.lock().expect("lock poisoned");
            if table.is_empty() {
                return Vec::new();
            }
            std::mem::take(&mut *table)
        };
        drained.into_values().collect()
    }

    /// Number of destinations with buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.table.lock().expect("lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
