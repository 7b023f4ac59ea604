use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::connection::{Connection, MessageHandler};
use crate::error::TransportError;

const DELIVERY_WAIT: Duration = Duration::from_secs(5);

fn collecting_handler() -> (MessageHandler, Arc<Mutex<Vec<Bytes>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: MessageHandler =
        Arc::new(move |_: &str, payload: Bytes| sink.lock().push(payload));
    (handler, seen)
}

/// Poll until `seen` holds `expected` payloads or the wait expires.
async fn wait_for_count(seen: &Mutex<Vec<Bytes>>, expected: usize) {
    let deadline = tokio::time::Instant::now() + DELIVERY_WAIT;
    while seen.lock().len() < expected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run the full connection conformance test suite.
///
/// `prefix` namespaces every channel and key the suite touches so runs
/// against a shared server do not collide.
///
/// # Errors
///
/// Returns an error if a transport operation fails. Behavioural mismatches
/// panic with a descriptive assertion message.
pub async fn run_connection_conformance_tests(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    test_publish_without_subscribers(conn, prefix).await?;
    test_publish_reaches_subscriber(conn, prefix).await?;
    test_multiple_handlers_on_channel(conn, prefix).await?;
    test_channels_are_isolated(conn, prefix).await?;
    test_unsubscribe_stops_delivery(conn, prefix).await?;
    test_unsubscribe_unknown_is_ok(conn, prefix).await?;
    test_key_value_roundtrip(conn, prefix).await?;
    test_compare_and_set(conn, prefix).await?;
    Ok(())
}

async fn test_publish_without_subscribers(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    let receivers = conn
        .publish(&format!("{prefix}:nobody"), Bytes::from_static(b"x"))
        .await?;
    assert_eq!(receivers, 0, "publish with no subscribers reaches nobody");
    Ok(())
}

async fn test_publish_reaches_subscriber(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    let channel = format!("{prefix}:roundtrip");
    let (handler, seen) = collecting_handler();
    let id = conn.subscribe(&channel, handler).await?;

    let payload = Bytes::from_static(&[0, 159, 146, 150, 255]);
    conn.publish(&channel, payload.clone()).await?;
    wait_for_count(&seen, 1).await;

    assert_eq!(
        seen.lock().as_slice(),
        &[payload],
        "payload must arrive byte-identical"
    );
    conn.unsubscribe(&channel, id).await?;
    Ok(())
}

async fn test_multiple_handlers_on_channel(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    let channel = format!("{prefix}:fanout");
    let (h1, seen1) = collecting_handler();
    let (h2, seen2) = collecting_handler();
    let id1 = conn.subscribe(&channel, h1).await?;
    let id2 = conn.subscribe(&channel, h2).await?;

    conn.publish(&channel, Bytes::from_static(b"both")).await?;
    wait_for_count(&seen1, 1).await;
    wait_for_count(&seen2, 1).await;

    assert_eq!(seen1.lock().len(), 1, "first handler receives the message");
    assert_eq!(seen2.lock().len(), 1, "second handler receives the message");

    conn.unsubscribe(&channel, id1).await?;
    conn.unsubscribe(&channel, id2).await?;
    Ok(())
}

async fn test_channels_are_isolated(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    let a = format!("{prefix}:iso-a");
    let b = format!("{prefix}:iso-b");
    let (ha, seen_a) = collecting_handler();
    let (hb, seen_b) = collecting_handler();
    let id_a = conn.subscribe(&a, ha).await?;
    let id_b = conn.subscribe(&b, hb).await?;

    conn.publish(&a, Bytes::from_static(b"for-a")).await?;
    wait_for_count(&seen_a, 1).await;
    // Give a misrouted message the same chance to arrive.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(seen_a.lock().len(), 1);
    assert!(seen_b.lock().is_empty(), "message leaked across channels");

    conn.unsubscribe(&a, id_a).await?;
    conn.unsubscribe(&b, id_b).await?;
    Ok(())
}

async fn test_unsubscribe_stops_delivery(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    let channel = format!("{prefix}:unsub");
    let (handler, seen) = collecting_handler();
    let id = conn.subscribe(&channel, handler).await?;
    conn.unsubscribe(&channel, id).await?;

    conn.publish(&channel, Bytes::from_static(b"late")).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(
        seen.lock().is_empty(),
        "unsubscribed handler must not be called"
    );
    Ok(())
}

async fn test_unsubscribe_unknown_is_ok(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    conn.unsubscribe(
        &format!("{prefix}:never"),
        crate::connection::SubscriptionId::new(u64::MAX),
    )
    .await
}

async fn test_key_value_roundtrip(
    conn: &dyn Connection,
    prefix: &str,
) -> Result<(), TransportError> {
    let key = format!("{prefix}:kv");
    assert!(conn.get(&key).await?.is_none(), "missing key reads as None");

    conn.set(&key, Bytes::from_static(b"v1")).await?;
    assert_eq!(conn.get(&key).await?, Some(Bytes::from_static(b"v1")));

    conn.set(&key, Bytes::from_static(b"v2")).await?;
    assert_eq!(conn.get(&key).await?, Some(Bytes::from_static(b"v2")));

    assert!(conn.delete(&key).await?, "delete reports existing key");
    assert!(!conn.delete(&key).await?, "second delete reports missing key");
    assert!(conn.get(&key).await?.is_none());
    Ok(())
}

async fn test_compare_and_set(conn: &dyn Connection, prefix: &str) -> Result<(), TransportError> {
    let key = format!("{prefix}:cas");
    conn.delete(&key).await?;
    let v1 = Bytes::from_static(b"v1");
    let v2 = Bytes::from_static(b"v2");

    assert!(
        !conn.compare_and_set(&key, Some(v1.clone()), v2.clone()).await?,
        "expecting a value on a missing key must fail"
    );
    assert!(conn.get(&key).await?.is_none());

    assert!(
        conn.compare_and_set(&key, None, v1.clone()).await?,
        "create-if-absent on a missing key succeeds"
    );
    assert!(
        !conn.compare_and_set(&key, None, v2.clone()).await?,
        "create-if-absent on an existing key must fail"
    );
    assert!(
        !conn
            .compare_and_set(&key, Some(Bytes::from_static(b"stale")), v2.clone())
            .await?,
        "a stale expected value must fail"
    );
    assert_eq!(conn.get(&key).await?, Some(v1.clone()));

    assert!(conn.compare_and_set(&key, Some(v1), v2.clone()).await?);
    assert_eq!(conn.get(&key).await?, Some(v2));

    conn.delete(&key).await?;
    Ok(())
}
