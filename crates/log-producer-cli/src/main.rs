// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_producer::config::ProducerConfig;
use log_producer::producer::Producer;
use log_producer::record::LogRecord;

const CHUNK_SIZE: usize = 64;
const SEND_INTERVAL: Duration = Duration::from_secs(1);
const CONTENT_KEY: &str = "content";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_PRODUCER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match ProducerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading log producer configuration: {e}");
            return;
        }
    };

    let topic = env::var("LOG_PRODUCER_TOPIC").unwrap_or_default();
    let source = env::var("LOG_PRODUCER_SOURCE").unwrap_or_default();

    let producer = match Producer::with_http_client(config) {
        Ok(producer) => producer,
        Err(e) => {
            error!("Error creating log producer: {e}");
            return;
        }
    };
    if let Err(e) = producer.open().await {
        error!("Error opening log producer: {e}");
        return;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Vec<LogRecord> = Vec::with_capacity(CHUNK_SIZE);
    let mut send_interval = interval(SEND_INTERVAL);
    send_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    send_interval.tick().await; // discard first tick, which is instantaneous
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(record) = parse_line(&line, unix_now()) {
                        pending.push(record);
                    }
                    if pending.len() >= CHUNK_SIZE
                        && !send_pending(&producer, &topic, &source, &mut pending).await
                    {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("Error reading input: {e}");
                    break;
                }
            },
            _ = send_interval.tick() => {
                if !send_pending(&producer, &topic, &source, &mut pending).await {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    send_pending(&producer, &topic, &source, &mut pending).await;
    if let Err(e) = producer.close().await {
        error!("Error closing log producer: {e}");
    }
    let stats = producer.stats();
    info!(
        "Sent {} records in {} batches, {} batches failed",
        stats.records_sent, stats.batches_sent, stats.batches_failed
    );
}

/// Hands `pending` to the producer. Returns false once the producer no longer
/// accepts records.
async fn send_pending(
    producer: &Producer,
    topic: &str,
    source: &str,
    pending: &mut Vec<LogRecord>,
) -> bool {
    if pending.is_empty() {
        return true;
    }
    let records = std::mem::take(pending);
    let count = records.len();
    match producer.send(topic, source, None, vec![], records).await {
        Ok(()) => {
            debug!("Handed {count} records to the producer");
            true
        }
        Err(e) => {
            error!("Dropping {count} records: {e}");
            !e.is_state_error()
        }
    }
}

fn unix_now() -> Option<u32> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
}

/// Turns `key=value` tokens into fields. Bare words are joined into the
/// `content` field. Blank lines yield nothing.
fn parse_line(line: &str, time: Option<u32>) -> Option<LogRecord> {
    let mut record = LogRecord::new();
    let mut words = Vec::new();
    for token in line.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => record = record.field(key, value),
            _ => words.push(token),
        }
    }
    if !words.is_empty() {
        record = record.field(CONTENT_KEY, words.join(" "));
    }
    if record.fields.is_empty() {
        return None;
    }
    record.time = time;
    Some(record)
}
