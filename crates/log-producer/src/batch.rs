// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::budget::Reservation;
use crate::destination::DestinationKey;
use crate::record::LogRecord;

/// Size and line thresholds at which a batch is considered full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_lines: usize,
}

impl BatchLimits {
    #[must_use]
    pub fn new(max_bytes: usize, max_lines: usize) -> Self {
        Self {
            max_bytes,
            max_lines,
        }
    }

    /// True once either threshold is reached.
    #[must_use]
    pub fn should_send(&self, bytes: usize, lines: usize) -> bool {
        bytes >= self.max_bytes || lines >= self.max_lines
    }
}

/// Records bound for one destination, with the budget bytes backing them.
///
/// A batch is appended to while it sits in the aggregation table and is moved
/// into the dispatch queue once complete; the consuming worker owns it from
/// then on.
#[derive(Debug)]
pub struct Batch {
    destination: DestinationKey,
    records: Vec<LogRecord>,
    size_in_bytes: usize,
    reservation: Reservation,
}

impl Batch {
    #[must_use]
    pub fn new(
        destination: DestinationKey,
        records: Vec<LogRecord>,
        size_in_bytes: usize,
        reservation: Reservation,
    ) -> Self {
        Self {
            destination,
            records,
            size_in_bytes,
            reservation,
        }
    }

    /// Appends records from another send call along with their reservation.
    pub fn append(&mut self, records: Vec<LogRecord>, size_in_bytes: usize, reservation: Reservation) {
        self.records.extend(records);
        self.size_in_bytes += size_in_bytes;
        self.reservation.merge(reservation);
    }

    #[must_use]
    pub fn is_full(&self, limits: &BatchLimits) -> bool {
        limits.should_send(self.size_in_bytes, self.records.len())
    }

    #[must_use]
    pub fn destination(&self) -> &DestinationKey {
        &self.destination
    }

    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.records.len()
    }

    /// Bytes this batch holds against the budget.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.bytes()
    }

    /// Splits the batch, handing back its records and the reservation so the
    /// caller decides when the bytes are returned.
    #[must_use]
    pub fn into_parts(self) -> (DestinationKey, Vec<LogRecord>, Reservation) {
        (self.destination, self.records, self.reservation)
    }
}

/// Accumulates records of a single send call and cuts them into batches as
/// thresholds are crossed.
#[derive(Debug)]
pub(crate) struct BatchBuilder {
    limits: BatchLimits,
    records: Vec<LogRecord>,
    size_in_bytes: usize,
}

impl BatchBuilder {
    pub(crate) fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            records: Vec::new(),
            size_in_bytes: 0,
        }
    }

    /// Adds a record of `size` bytes. Returns the buffered records and their
    /// size when this record completes a batch.
    pub(crate) fn push(&mut self, record: LogRecord, size: usize) -> Option<(Vec<LogRecord>, usize)> {
        self.records.push(record);
        self.size_in_bytes += size;
        if self
            .limits
            .should_send(self.size_in_bytes, self.records.len())
        {
            return Some(self.take());
        }
        None
    }

    /// Drains whatever is left below the thresholds.
    pub(crate) fn finish(mut self) -> Option<(Vec<LogRecord>, usize)> {
        if self.records.is_empty() {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> (Vec<LogRecord>, usize) {
        let size = std::mem::take(&mut self.size_in_bytes);
        (std::mem::take(&mut self.records), size)
    }
}
