// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transport to the log ingestion service.
//!
//! The producer only depends on [`LogClient`]; [`HttpLogClient`] is the
//! implementation that talks to the ingestion HTTP API. Retries live here, not
//! in the producer: once `send_batch` returns, the batch is done with, whether
//! it was delivered or dropped.

use crate::batch::Batch;
use crate::config::{ProducerConfig, RetryStrategy};
use crate::constants;
use crate::errors::TransportError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::debug;

#[async_trait]
pub trait LogClient: Send + Sync {
    /// Ships one batch to `project`/`logstore`. Returns the final error once
    /// the client has given up on the batch.
    async fn send_batch(
        &self,
        project: &str,
        logstore: &str,
        batch: &Batch,
    ) -> Result<(), TransportError>;

    /// Releases the client's resources. Called once, after every worker stopped.
    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct HttpLogClient {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    retry_strategy: RetryStrategy,
    compression_level: i32,
}

impl HttpLogClient {
    pub fn new(config: &ProducerConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| TransportError::Client(format!("Invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(constants::USER_AGENT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-log-apiversion",
            HeaderValue::from_static(constants::API_VERSION),
        );
        let header_value = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| TransportError::Client(format!("Invalid header value: {e}")))
        };
        headers.insert("x-log-project", header_value(&config.project)?);
        headers.insert("x-acs-access-key-id", header_value(&config.access_key_id)?);
        if config.compression_level > 0 {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            headers,
            retry_strategy: config.retry_strategy.clone(),
            compression_level: config.compression_level,
        })
    }

    fn url(&self, logstore: &str, shard_hash: Option<&str>) -> String {
        match shard_hash.filter(|hash| !hash.is_empty()) {
            Some(hash) => format!(
                "{}/logstores/{logstore}/shards/route?key={hash}",
                self.endpoint
            ),
            None => format!("{}/logstores/{logstore}/shards/lb", self.endpoint),
        }
    }

    fn encode(&self, batch: &Batch) -> Result<(Vec<u8>, usize), TransportError> {
        let body = serde_json::to_vec(&payload(batch))
            .map_err(|e| TransportError::Payload(e.to_string()))?;
        let raw_size = body.len();
        if self.compression_level > 0 {
            let compressed = zstd::bulk::compress(&body, self.compression_level)
                .map_err(|e| TransportError::Payload(e.to_string()))?;
            return Ok((compressed, raw_size));
        }
        Ok((body, raw_size))
    }

    async fn send_with_retry(
        &self,
        url: &str,
        body: Vec<u8>,
        raw_size: usize,
    ) -> Result<(), TransportError> {
        let attempts = self.retry_strategy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(url)
                .headers(self.headers.clone())
                .header("x-log-bodyrawsize", raw_size)
                .body(body.clone())
                .send()
                .await;

            if let Err((error, retryable)) = classify(result).await {
                if !retryable || attempt >= attempts {
                    return Err(error);
                }
                debug!("Attempt {attempt}/{attempts} failed: {error}");
                if let Some(delay) = self.retry_strategy.delay() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
            return Ok(());
        }
    }
}

/// Maps a response to success, or to an error and whether it is worth retrying.
async fn classify(
    result: Result<Response, reqwest::Error>,
) -> Result<(), (TransportError, bool)> {
    match result {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            // 4xx will not get better by resending the same payload
            let retryable = !status.is_client_error() || status == StatusCode::TOO_MANY_REQUESTS;
            Err((TransportError::Destination(Some(status), body), retryable))
        }
        Err(e) => Err((TransportError::Destination(e.status(), e.to_string()), true)),
    }
}

fn payload(batch: &Batch) -> Value {
    let destination = batch.destination();
    let tags: Map<String, Value> = destination
        .tags
        .iter()
        .map(|tag| (tag.key.clone(), Value::String(tag.value.clone())))
        .collect();
    let logs: Vec<Value> = batch
        .records()
        .iter()
        .map(|record| {
            let contents: Map<String, Value> = record
                .fields
                .iter()
                .map(|f| {
                    let value = f.value.clone().map_or(Value::Null, Value::String);
                    (f.key.clone(), value)
                })
                .collect();
            let mut log = json!({ "contents": contents });
            if let Some(time) = record.time {
                log["time"] = json!(time);
            }
            log
        })
        .collect();

    json!({
        "topic": destination.topic,
        "source": destination.source,
        "tags": tags,
        "logs": logs,
    })
}

#[async_trait]
impl LogClient for HttpLogClient {
    async fn send_batch(
        &self,
        project: &str,
        logstore: &str,
        batch: &Batch,
    ) -> Result<(), TransportError> {
        let url = self.url(logstore, batch.destination().shard_hash.as_deref());
        let (body, raw_size) = self.encode(batch)?;
        debug!(
            "Sending {} records ({raw_size} bytes) to {project}/{logstore}",
            batch.line_count()
        );
        self.send_with_retry(&url, body, raw_size).await
    }

    async fn close(&self) {
        debug!("HTTP log client closed");
    }
}
