use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::hint::black_box;
use std::time::Duration;

use bytes::Bytes;
use seqmq::core::message::{current_timestamp, IdGenerator, Message};
use seqmq::core::queue::Resolution;
use seqmq::core::subscription::SubscriptionState;
use seqmq::{AckReply, Broker, Config, SubscriptionOptions};

fn create_messages(count: usize, keys: usize) -> Vec<Message> {
    let ids = IdGenerator::new();
    (0..count)
        .map(|i| Message {
            id: ids.next_id(),
            ordering_key: Some(format!("key-{}", i % keys)),
            payload: Bytes::from(vec![0u8; 256]),
            attributes: BTreeMap::new(),
            publish_time: current_timestamp(),
            attempt: 0,
            ack_id: None,
        })
        .collect()
}

/// Enqueue a batch, then dispatch and ack until the state is empty.
fn bench_state_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscription_state_cycle");

    for &keys in [1usize, 16, 256].iter() {
        let messages = create_messages(10_000, keys);
        group.throughput(Throughput::Elements(messages.len() as u64));
        group.bench_with_input(BenchmarkId::new("keys", keys), &messages, |b, messages| {
            b.iter(|| {
                let mut state = SubscriptionState::new(true);
                for msg in messages {
                    state.enqueue(msg.clone());
                }
                let mut batch = Vec::with_capacity(keys);
                loop {
                    while let Some(next) = state.next_dispatch() {
                        batch.push(next);
                    }
                    if batch.is_empty() {
                        break;
                    }
                    for (lane, msg) in batch.drain(..) {
                        black_box(state.resolve(&lane, &msg.id, Resolution::Ack));
                    }
                }
            });
        });
    }

    group.finish();
}

fn bench_publish_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fanout");

    for &subs in [1usize, 8].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("subscriptions", subs), &subs, |b, &subs| {
            let broker = Broker::new(Config::default());
            broker.create_topic("bench").unwrap();
            for i in 0..subs {
                broker
                    .create_subscription(&format!("sub-{i}"), "bench", SubscriptionOptions::ordered())
                    .unwrap();
            }
            let payload = Bytes::from_static(b"payload");
            b.iter(|| {
                black_box(
                    broker
                        .publish("bench", payload.clone(), Some("key"))
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    const BATCH: u64 = 1_000;
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("end_to_end");
    group.throughput(Throughput::Elements(BATCH));
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("ordered_1000_msgs_8_keys", |b| {
        b.to_async(&rt).iter(|| async {
            let broker = Broker::new(Config::default());
            broker.create_topic("bench").unwrap();
            broker
                .create_subscription("sub", "bench", SubscriptionOptions::ordered())
                .unwrap();
            for i in 0..BATCH {
                let key = format!("key-{}", i % 8);
                broker.publish("bench", "x", Some(key.as_str())).unwrap();
            }

            let handle = broker
                .subscribe("sub", |_msg: seqmq::Message| async { AckReply::Ack })
                .unwrap();
            while broker.subscription_stats("sub").unwrap().messages_acked < BATCH {
                tokio::task::yield_now().await;
            }
            handle.close().await;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_state_cycle,
    bench_publish_fanout,
    bench_end_to_end
);
criterion_main!(benches);
