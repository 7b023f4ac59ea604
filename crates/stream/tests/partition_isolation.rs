//! End-to-end queue behaviour over the in-memory transport.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use redstream_core::{QueueId, RequestContext, StreamId, StreamNamespace};
use redstream_stream::{
    ChannelName, HashRingMapperOptions, JsonCodec, NameBounds, QueueAdapter, QueueAdapterFactory, QueueReceiver,
    ReceiverState, StreamOptions, UNLIMITED_MESSAGE_COUNT,
};
use redstream_transport::{ConnectionCache, ConnectionFactory};
use redstream_transport_memory::MemoryConnectionFactory;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    transport: Arc<MemoryConnectionFactory>,
    cache: Arc<ConnectionCache>,
    adapter: QueueAdapter,
}

fn fixture(options: StreamOptions) -> Fixture {
    let transport = Arc::new(MemoryConnectionFactory::default());
    let cache = Arc::new(ConnectionCache::new(
        Arc::clone(&transport) as Arc<dyn ConnectionFactory>
    ));
    let factory = QueueAdapterFactory::new(
        "TestProvider",
        options,
        &HashRingMapperOptions::new(8),
        Arc::clone(&cache),
        Arc::new(JsonCodec),
        "SomeServiceId",
    )
    .expect("valid configuration");
    let adapter = factory.create_adapter().expect("adapter");
    Fixture {
        transport,
        cache,
        adapter,
    }
}

/// Two streams that the ring places on different partitions.
fn streams_on_distinct_partitions(adapter: &QueueAdapter) -> [(StreamId, QueueId); 2] {
    let namespace = StreamNamespace::new("ns");
    let first = StreamId::new(Uuid::from_u128(1));
    let first_queue = adapter.mapper().queue_for_stream(&first, &namespace);
    let (second, second_queue) = (2..u128::from(u16::MAX))
        .map(|i| StreamId::new(Uuid::from_u128(i)))
        .map(|id| (id, adapter.mapper().queue_for_stream(&id, &namespace)))
        .find(|(_, queue)| *queue != first_queue)
        .expect("eight partitions leave room for a second one");
    [(first, first_queue), (second, second_queue)]
}

async fn active_receiver(adapter: &QueueAdapter, queue: &QueueId) -> QueueReceiver {
    let receiver = adapter.create_receiver(queue).expect("receiver");
    receiver.initialize(TIMEOUT).await.expect("initialize");
    assert_eq!(receiver.state(), ReceiverState::Active);
    receiver
}

async fn drain_values(receiver: &QueueReceiver) -> BTreeSet<String> {
    receiver
        .get_messages(UNLIMITED_MESSAGE_COUNT)
        .await
        .expect("drain")
        .iter()
        .flat_map(|batch| batch.events::<String>())
        .map(|(value, _)| value)
        .collect()
}

#[tokio::test]
async fn partitions_do_not_cross_deliver() {
    let fx = fixture(StreamOptions::new("redis://memory"));
    let namespace = StreamNamespace::new("ns");
    let [(stream_a, queue_a), (stream_b, queue_b)] = streams_on_distinct_partitions(&fx.adapter);

    let receiver_a = active_receiver(&fx.adapter, &queue_a).await;
    let receiver_b = active_receiver(&fx.adapter, &queue_b).await;

    let mut sent_a = BTreeSet::new();
    let mut sent_b = BTreeSet::new();
    for i in 0..100 {
        let a = format!("a-{i}");
        let b = format!("b-{i}");
        fx.adapter
            .send_batch(&stream_a, &namespace, &[a.as_str()], None, &RequestContext::new())
            .await
            .expect("send a");
        fx.adapter
            .send_batch(&stream_b, &namespace, &[b.as_str()], None, &RequestContext::new())
            .await
            .expect("send b");
        sent_a.insert(a);
        sent_b.insert(b);
    }

    assert_eq!(drain_values(&receiver_a).await, sent_a);
    assert_eq!(drain_values(&receiver_b).await, sent_b);

    // Senders and both receivers share one connection.
    assert_eq!(fx.transport.connect_count(), 1);
    assert_eq!(fx.cache.len(), 1);
}

#[tokio::test]
async fn request_context_travels_with_the_batch() {
    let fx = fixture(StreamOptions::new("redis://memory"));
    let namespace = StreamNamespace::new("ns");
    let [(stream, queue), _] = streams_on_distinct_partitions(&fx.adapter);
    let receiver = active_receiver(&fx.adapter, &queue).await;

    let mut context = RequestContext::new();
    context.insert("trace".into(), serde_json::json!("abc"));
    fx.adapter
        .send_batch(&stream, &namespace, &[1, 2, 3], None, &context)
        .await
        .unwrap();

    let batches = receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.stream_id(), &stream);
    assert_eq!(batch.namespace(), &namespace);
    assert_eq!(batch.request_context(), &context);
    let numbers: Vec<i64> = batch.events::<i64>().into_iter().map(|(n, _)| n).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    receiver.messages_delivered(&batches);
}

#[tokio::test]
async fn receiver_buffer_overflow_drops_oldest() {
    let fx = fixture(StreamOptions::new("redis://memory").with_queue_cache_size(10));
    let namespace = StreamNamespace::new("ns");
    let [(stream, queue), _] = streams_on_distinct_partitions(&fx.adapter);
    let receiver = active_receiver(&fx.adapter, &queue).await;

    for i in 0..25 {
        fx.adapter
            .send_batch(&stream, &namespace, &[i], None, &RequestContext::new())
            .await
            .unwrap();
    }

    let batches = receiver.get_messages(UNLIMITED_MESSAGE_COUNT).await.unwrap();
    let kept: Vec<i64> = batches
        .iter()
        .flat_map(|b| b.events::<i64>())
        .map(|(n, _)| n)
        .collect();
    assert_eq!(kept, (15..25).collect::<Vec<i64>>());
}

#[tokio::test]
async fn shutdown_stops_delivery_and_keeps_the_connection() {
    let fx = fixture(StreamOptions::new("redis://memory"));
    let namespace = StreamNamespace::new("ns");
    let [(stream, queue), _] = streams_on_distinct_partitions(&fx.adapter);
    let receiver = active_receiver(&fx.adapter, &queue).await;

    receiver.shutdown(TIMEOUT).await.unwrap();
    assert_eq!(receiver.state(), ReceiverState::Shutdown);

    // The send side keeps working on the shared connection.
    fx.adapter
        .send_batch(&stream, &namespace, &["after"], None, &RequestContext::new())
        .await
        .unwrap();
    assert!(
        receiver
            .get_messages(UNLIMITED_MESSAGE_COUNT)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(fx.transport.broker().connection_count(), 1);

    assert_eq!(fx.cache.close_all().await.unwrap(), 1);
    assert_eq!(fx.transport.broker().connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_shutdown_still_releases_the_channel() {
    let fx = fixture(StreamOptions::new("redis://memory"));
    let [(_, queue), _] = streams_on_distinct_partitions(&fx.adapter);
    let receiver = active_receiver(&fx.adapter, &queue).await;

    fx.transport.broker().set_latency(Duration::from_secs(1));
    let err = receiver
        .shutdown(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(receiver.state(), ReceiverState::Shutdown);

    // The abandoned unsubscribe is finished in the background.
    tokio::time::sleep(Duration::from_secs(2)).await;
    fx.transport.broker().set_latency(Duration::ZERO);

    let channel = ChannelName::new("SomeServiceId", &queue.to_string(), NameBounds::STANDARD)
        .expect("valid channel");
    let publisher = fx.transport.connect("redis://memory").await.expect("connect");
    let receivers = publisher
        .publish(channel.as_str(), Bytes::from_static(b"late"))
        .await
        .expect("publish");
    assert_eq!(receivers, 0);
}

#[tokio::test]
async fn zero_timeout_initialize_is_cancelled() {
    let fx = fixture(StreamOptions::new("redis://memory"));
    let [(_, queue), _] = streams_on_distinct_partitions(&fx.adapter);
    let receiver = fx.adapter.create_receiver(&queue).unwrap();

    let err = receiver.initialize(Duration::ZERO).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(fx.transport.connect_count(), 0);

    receiver.initialize(TIMEOUT).await.unwrap();
    assert_eq!(receiver.state(), ReceiverState::Active);
}
