// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side log shipping.
//!
//! Callers hand records to a [`producer::Producer`], which groups them into
//! per-destination batches, bounds the memory they use and ships complete
//! batches from a pool of send workers through a [`client::LogClient`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod batch;
pub mod budget;
pub mod client;
pub mod config;
pub mod constants;
pub mod destination;
pub mod errors;
pub mod producer;
pub mod queue;
pub mod record;
pub mod shard_hash;
pub mod worker;
