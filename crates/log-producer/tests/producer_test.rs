// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mocks::{BlockingClient, FailingClient, RecordingClient};
use common::{record, seq_of, test_config, wait_for};
use log_producer::client::LogClient;
use log_producer::config::ProducerConfig;
use log_producer::destination::Tag;
use log_producer::errors::ProducerError;
use log_producer::producer::{LifecycleState, Producer};
use log_producer::record::LogRecord;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration, Instant};

async fn open_producer(config: ProducerConfig, client: Arc<dyn LogClient>) -> Arc<Producer> {
    let producer = Producer::new(config, client).expect("failed to create producer");
    producer.open().await.expect("failed to open producer");
    Arc::new(producer)
}

fn records(range: std::ops::Range<usize>, size: usize) -> Vec<LogRecord> {
    range.map(|seq| record(seq, size)).collect()
}

#[tokio::test]
async fn line_threshold_cuts_batch_and_buffers_rest() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    producer
        .send("app", "host-1", None, vec![], records(0..6, 10))
        .await
        .expect("send failed");

    wait_for(|| client.batches().len() == 1).await;
    let sent = client.batches();
    let seqs: Vec<usize> = sent[0].records.iter().map(seq_of).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert_eq!(producer.buffered_batches(), 1);

    producer.close().await.expect("close failed");
    let sent = client.batches();
    assert_eq!(sent.len(), 2);
    assert_eq!(seq_of(&sent[1].records[0]), 5);
    assert_eq!(sent[1].records.len(), 1);
}

#[tokio::test]
async fn size_threshold_cuts_batch() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    producer
        .send("app", "host-1", None, vec![], records(0..2, 60))
        .await
        .expect("send failed");

    wait_for(|| client.batches().len() == 1).await;
    assert_eq!(client.batches()[0].records.len(), 2);
    assert_eq!(client.batches()[0].size_in_bytes, 120);
    assert_eq!(producer.buffered_batches(), 0);

    producer.close().await.expect("close failed");
    assert_eq!(client.batches().len(), 1);
}

#[tokio::test]
async fn small_sends_merge_until_threshold() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    for seq in 0..4 {
        producer
            .send("app", "host-1", None, vec![], vec![record(seq, 10)])
            .await
            .expect("send failed");
    }
    assert!(client.batches().is_empty());
    assert_eq!(producer.buffered_batches(), 1);

    producer
        .send("app", "host-1", None, vec![], vec![record(4, 10)])
        .await
        .expect("send failed");
    wait_for(|| client.batches().len() == 1).await;
    assert_eq!(client.batches()[0].records.len(), 5);
    assert_eq!(producer.buffered_batches(), 0);

    producer.close().await.expect("close failed");
}

#[tokio::test]
async fn every_record_delivered_once_in_order() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    let mut next = 0;
    for count in [1, 3, 7, 2, 11, 4, 1, 9] {
        let size = 10 + count * 3;
        producer
            .send("app", "host-1", None, vec![], records(next..next + count, size))
            .await
            .expect("send failed");
        next += count;
    }
    producer.close().await.expect("close failed");

    let sent = client.batches();
    let mut seen = HashSet::new();
    for batch in &sent {
        let seqs: Vec<usize> = batch.records.iter().map(seq_of).collect();
        assert!(
            seqs.windows(2).all(|w| w[0] < w[1]),
            "batch out of order: {seqs:?}"
        );
        for seq in seqs {
            assert!(seen.insert(seq), "record {seq} delivered twice");
        }
        assert_eq!(batch.reserved_bytes, batch.size_in_bytes);
    }
    assert_eq!(seen.len(), next);
    assert_eq!(producer.stats().records_sent, next as u64);
}

#[tokio::test]
async fn destinations_never_share_a_batch() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    let destinations = [
        ("app", "host-1", vec![Tag::new("env", "prod")]),
        ("app", "host-2", vec![Tag::new("env", "prod")]),
        ("web", "host-1", vec![Tag::new("env", "prod")]),
        ("app", "host-1", vec![Tag::new("env", "dev")]),
    ];
    for round in 0..3 {
        for (i, (topic, source, tags)) in destinations.iter().enumerate() {
            let seq = round * 10 + i;
            let record = record(seq, 20).field("dest", i.to_string());
            producer
                .send(topic, source, None, tags.clone(), vec![record])
                .await
                .expect("send failed");
        }
    }
    assert_eq!(producer.buffered_batches(), destinations.len());
    producer.close().await.expect("close failed");

    let sent = client.batches();
    assert_eq!(sent.len(), destinations.len());
    for batch in sent {
        let marks: HashSet<&str> = batch
            .records
            .iter()
            .filter_map(|r| r.fields.iter().find(|f| f.key == "dest"))
            .filter_map(|f| f.value.as_deref())
            .collect();
        assert_eq!(marks.len(), 1, "mixed batch for {}", batch.destination);
        assert_eq!(batch.records.len(), 3);
    }
}

#[tokio::test]
async fn tag_order_does_not_split_destination() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    producer
        .send(
            "app",
            "host-1",
            None,
            vec![Tag::new("a", "1"), Tag::new("b", "2")],
            vec![record(0, 10)],
        )
        .await
        .expect("send failed");
    producer
        .send(
            "app",
            "host-1",
            None,
            vec![Tag::new("b", "2"), Tag::new("a", "1")],
            vec![record(1, 10)],
        )
        .await
        .expect("send failed");
    assert_eq!(producer.buffered_batches(), 1);
    producer.close().await.expect("close failed");
}

#[tokio::test]
async fn flush_empties_the_table() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    for (i, topic) in ["a", "b", "c"].iter().enumerate() {
        producer
            .send(topic, "host-1", None, vec![], records(i * 2..i * 2 + 2, 10))
            .await
            .expect("send failed");
    }
    assert_eq!(producer.buffered_batches(), 3);

    producer.flush().await.expect("flush failed");
    assert_eq!(producer.buffered_batches(), 0);

    wait_for(|| client.batches().len() == 3).await;
    wait_for(|| producer.reserved_bytes() == 0).await;
    producer.close().await.expect("close failed");
    assert_eq!(client.batches().len(), 3);
}

#[tokio::test]
async fn periodic_flush_ships_idle_batches() {
    let client = Arc::new(RecordingClient::default());
    let config = ProducerConfig {
        flush_interval: Duration::from_millis(20),
        ..test_config()
    };
    let producer = open_producer(config, client.clone()).await;

    producer
        .send("app", "host-1", None, vec![], vec![record(0, 10)])
        .await
        .expect("send failed");

    wait_for(|| client.batches().len() == 1).await;
    assert_eq!(producer.buffered_batches(), 0);
    producer.close().await.expect("close failed");
}

#[tokio::test]
async fn reserved_bytes_stay_under_ceiling() {
    const CEILING: usize = 400;
    let client = Arc::new(RecordingClient::with_delay(Duration::from_millis(2)));
    let config = ProducerConfig {
        total_size_in_bytes: CEILING,
        max_record_size_in_bytes: 200,
        io_thread_num: 2,
        ..test_config()
    };
    let producer = open_producer(config, client.clone()).await;

    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let producer = Arc::clone(&producer);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut peak = 0;
            while !done.load(Ordering::SeqCst) {
                let reserved = producer.reserved_bytes();
                assert!(reserved <= CEILING, "{reserved} bytes reserved");
                peak = peak.max(reserved);
                tokio::time::sleep(Duration::from_micros(200)).await;
            }
            peak
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move {
                for call in 0..10 {
                    let first = w * 1000 + call * 3;
                    producer
                        .send(
                            &format!("topic-{w}"),
                            "host-1",
                            None,
                            vec![],
                            records(first..first + 3, 20),
                        )
                        .await
                        .expect("send failed");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.expect("writer panicked");
    }

    producer.close().await.expect("close failed");
    done.store(true, Ordering::SeqCst);
    let peak = sampler.await.expect("sampler panicked");

    assert!(peak > 0);
    assert_eq!(producer.reserved_bytes(), 0);
    let delivered: usize = client.batches().iter().map(|b| b.records.len()).sum();
    assert_eq!(delivered, 120);
}

#[tokio::test]
async fn close_is_idempotent() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    producer
        .send("app", "host-1", None, vec![], records(0..3, 10))
        .await
        .expect("send failed");
    producer.close().await.expect("close failed");
    producer.close().await.expect("second close failed");

    assert_eq!(producer.state().await, LifecycleState::Closed);
    assert_eq!(client.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.batches().len(), 1);
    assert_eq!(producer.reserved_bytes(), 0);

    let result = producer
        .send("app", "host-1", None, vec![], vec![record(9, 10)])
        .await;
    assert!(matches!(result, Err(ProducerError::Stopped)));
}

#[tokio::test]
async fn every_worker_sees_one_shutdown() {
    let client = Arc::new(RecordingClient::default());
    let producer = open_producer(test_config(), client.clone()).await;

    producer
        .send("app", "host-1", None, vec![], records(0..23, 10))
        .await
        .expect("send failed");
    producer.close().await.expect("close failed");

    let stats = producer.stats();
    assert_eq!(stats.shutdowns_observed, 3);
    assert_eq!(stats.batches_sent, 5);
    assert_eq!(producer.queued_batches(), 0);
    assert!(client.is_closed());
}

#[tokio::test]
async fn failed_batches_release_their_bytes() {
    let client = Arc::new(FailingClient::default());
    let config = ProducerConfig {
        total_size_in_bytes: 1200,
        ..test_config()
    };
    let producer = open_producer(config, client.clone()).await;

    // Far more than the budget: only progresses if failures hand bytes back
    for call in 0..20 {
        producer
            .send(
                "app",
                "host-1",
                None,
                vec![],
                records(call * 12..call * 12 + 12, 50),
            )
            .await
            .expect("send failed");
    }
    producer.close().await.expect("close failed");

    let stats = producer.stats();
    assert_eq!(stats.batches_sent, 0);
    assert_eq!(stats.batches_failed, client.attempts.load(Ordering::SeqCst) as u64);
    assert_eq!(stats.shutdowns_observed, 3);
    assert_eq!(producer.reserved_bytes(), 0);
}

#[tokio::test]
async fn close_gives_up_on_stuck_workers() {
    let client = Arc::new(BlockingClient::default());
    let config = ProducerConfig {
        io_thread_num: 1,
        producer_queue_size: 1,
        close_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let producer = open_producer(config, client.clone()).await;

    // Worker holds batch 1, the queue holds batch 2, the sender waits on batch 3
    let sender = {
        let producer = Arc::clone(&producer);
        tokio::spawn(async move {
            producer
                .send("app", "host-1", None, vec![], records(0..15, 10))
                .await
        })
    };
    wait_for(|| client.started.load(Ordering::SeqCst) == 1 && producer.queued_batches() == 1)
        .await;

    let started = Instant::now();
    timeout(Duration::from_secs(3), producer.close())
        .await
        .expect("close hung")
        .expect("close failed");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(producer.state().await, LifecycleState::Closed);

    let result = sender.await.expect("sender panicked");
    assert!(matches!(result, Err(ProducerError::Cancelled)));
    // The batch left in the queue was dropped and its bytes returned
    assert_eq!(producer.queued_batches(), 0);

    client.release.notify_waiters();
}

#[tokio::test]
async fn close_delivers_buffered_records_when_a_send_is_stuck() {
    let client = Arc::new(RecordingClient::default());
    let config = ProducerConfig {
        total_size_in_bytes: 200,
        log_group_size: 100,
        max_record_size_in_bytes: 100,
        io_thread_num: 1,
        close_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let producer = open_producer(config, client.clone()).await;

    producer
        .send("a", "host-1", None, vec![], vec![record(0, 90)])
        .await
        .expect("send failed");
    producer
        .send("b", "host-1", None, vec![], vec![record(1, 90)])
        .await
        .expect("send failed");
    assert_eq!(producer.reserved_bytes(), 180);

    // Needs 50 bytes while only 20 are free and nothing flushes before close
    let sender = {
        let producer = Arc::clone(&producer);
        tokio::spawn(async move {
            producer
                .send("c", "host-1", None, vec![], vec![record(2, 50)])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sender.is_finished());

    producer.close().await.expect("close failed");

    let result = sender.await.expect("sender panicked");
    assert!(matches!(result, Err(ProducerError::Cancelled)));

    let mut delivered: Vec<usize> = client
        .batches()
        .iter()
        .flat_map(|b| b.records.iter().map(seq_of))
        .collect();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![0, 1]);
    assert_eq!(producer.stats().shutdowns_observed, 1);
    assert_eq!(producer.reserved_bytes(), 0);
}
