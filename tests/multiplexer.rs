use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use serde_json::json;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    time::timeout,
};

use redmux::{
    handler, Broker, ChannelRequest, ChannelSpec, ConnectOptions, Connection, DecodeMode, Delivery,
    Handler, MuxError, MuxState, Multiplexer, Payload, PublishPayload,
};

const WAIT: Duration = Duration::from_secs(1);

async fn pair() -> (Multiplexer, Multiplexer) {
    let broker = Arc::new(Broker::default());
    let sub = Multiplexer::in_memory(broker, ConnectOptions::default())
        .await
        .unwrap();
    let publisher = sub.new_sibling().await.unwrap();
    (sub, publisher)
}

/// A handler that forwards every delivery into a channel.
fn recorder() -> (Handler, UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let h = handler(move |d: Delivery| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(d);
            anyhow::Ok(())
        }
    });
    (h, rx)
}

async fn next(rx: &mut UnboundedReceiver<Delivery>) -> Delivery {
    timeout(WAIT, rx.recv())
        .await
        .expect("no delivery in time")
        .expect("handler dropped")
}

/// No delivery arrives. A closed receiver (its handler was dropped) counts
/// as nothing too.
async fn nothing(rx: &mut UnboundedReceiver<Delivery>) {
    let got = timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(matches!(got, Err(_) | Ok(None)), "unexpected delivery");
}

#[tokio::test]
async fn test_unsubscribe_clears_callbacks() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();

    sub.subscribe("news", DecodeMode::Text, Some(h)).await.unwrap();
    publisher.publish("news", "first").await.unwrap();
    assert_eq!(next(&mut rx).await.payload.as_text(), Some("first"));

    let removed = sub.unsubscribe("news", true).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(sub.callback_count(), 0);
    assert!(sub.subscribed_specs().is_empty());

    assert_eq!(publisher.publish("news", "second").await.unwrap(), 0);
    nothing(&mut rx).await;
}

/// Wire-only unsubscribe: delivery stops, the callbacks stay until removed
/// explicitly.
#[tokio::test]
async fn test_unsubscribe_keeps_callbacks() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();

    let id = sub.subscribe("c", DecodeMode::Text, Some(h)).await.unwrap();
    assert_eq!(sub.unsubscribe("c", false).await.unwrap(), 0);
    assert!(sub.subscribed_specs().is_empty());
    assert_eq!(sub.connection().wire_count(), 0);
    assert_eq!(sub.callback_count(), 1);
    assert!(sub.contains(id.one().unwrap()));

    assert_eq!(publisher.publish("c", "gone").await.unwrap(), 0);
    nothing(&mut rx).await;

    assert_eq!(sub.remove_callback(id.ids()), 1);
    assert_eq!(sub.callback_count(), 0);
    assert_eq!(sub.state(), MuxState::Idle);
}

#[tokio::test]
async fn test_punsubscribe_stops_pattern_delivery() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();

    sub.psubscribe("room-*", DecodeMode::Text, Some(h))
        .await
        .unwrap();
    publisher.publish("room-1", "a").await.unwrap();
    assert_eq!(next(&mut rx).await.payload.as_text(), Some("a"));

    assert_eq!(sub.punsubscribe("room-*", true).await.unwrap(), 1);
    assert_eq!(sub.callback_count(), 0);
    assert!(sub.connection().wire_subscriptions().is_empty());

    assert_eq!(publisher.publish("room-1", "b").await.unwrap(), 0);
    nothing(&mut rx).await;
}

/// Only `*` makes `subscribe` pick a pattern; brackets stay literal.
#[tokio::test]
async fn test_brackets_are_literal() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();

    let id = sub
        .subscribe("user[1]", DecodeMode::Text, Some(h))
        .await
        .unwrap();
    assert_eq!(id.one().unwrap().spec(), &ChannelSpec::literal("user[1]"));

    assert_eq!(publisher.publish("user[1]", "hi").await.unwrap(), 1);
    let d = next(&mut rx).await;
    assert_eq!(&*d.channel, "user[1]");
    assert_eq!(d.payload.as_text(), Some("hi"));

    assert_eq!(publisher.publish("user1", "no").await.unwrap(), 0);
    nothing(&mut rx).await;
}

/// Two instances borrowing one connection: stopping one must not pull the
/// other's channel off the wire.
#[tokio::test]
async fn test_borrowed_connection_stop_keeps_sibling_channel() {
    let broker = Arc::new(Broker::default());
    let conn = Arc::new(Connection::in_memory(broker, ConnectOptions::default()));
    let a = Multiplexer::with_connection(conn.clone()).await.unwrap();
    let b = Multiplexer::with_connection(conn.clone()).await.unwrap();
    let (ha, _rx_a) = recorder();
    let (hb, mut rx_b) = recorder();

    b.subscribe("c", DecodeMode::Text, Some(hb)).await.unwrap();
    a.subscribe("c", DecodeMode::Text, Some(ha)).await.unwrap();
    assert_eq!(conn.wire_count(), 1);
    assert_eq!(conn.holders(&ChannelSpec::literal("c")), 2);

    assert!(a.stop().await);
    assert!(conn.is_connected());
    assert_eq!(conn.wire_count(), 1);
    assert_eq!(b.callback_count(), 1);

    let publisher = b.new_sibling().await.unwrap();
    assert_eq!(publisher.publish("c", "still here").await.unwrap(), 1);
    assert_eq!(next(&mut rx_b).await.payload.as_text(), Some("still here"));

    assert!(b.stop().await);
    assert_eq!(conn.wire_count(), 0);
}

#[tokio::test]
async fn test_remove_callback_is_precise() {
    let (sub, publisher) = pair().await;
    let (h1, mut rx1) = recorder();
    let (h2, mut rx2) = recorder();

    let first = sub
        .subscribe("c", DecodeMode::Text, Some(h1))
        .await
        .unwrap();
    sub.subscribe("c", DecodeMode::Text, Some(h2))
        .await
        .unwrap();
    assert_eq!(sub.callback_count(), 2);

    assert_eq!(sub.remove_callback(first.ids()), 1);
    assert_eq!(sub.remove_callback(first.ids()), 0);
    assert_eq!(sub.callback_count(), 1);
    // Wire interest survives the removal.
    assert_eq!(sub.subscribed_specs(), vec![ChannelSpec::literal("c")]);

    publisher.publish("c", "ping").await.unwrap();
    assert_eq!(next(&mut rx2).await.payload.as_text(), Some("ping"));
    nothing(&mut rx1).await;
}

#[tokio::test]
async fn test_text_and_binary_on_one_channel() {
    let (sub, publisher) = pair().await;
    let (text, mut text_rx) = recorder();
    let (binary, mut binary_rx) = recorder();

    sub.subscribe("c", DecodeMode::Text, Some(text)).await.unwrap();
    sub.subscribe("c", DecodeMode::Binary, Some(binary))
        .await
        .unwrap();
    // Two modes, one wire subscription.
    assert_eq!(sub.connection().wire_count(), 1);

    let value = json!({"say": "hi"});
    publisher
        .publish("c", PublishPayload::Json(value.clone()))
        .await
        .unwrap();

    let t = next(&mut text_rx).await;
    assert_eq!(t.payload.as_json(), Some(&value));
    let b = next(&mut binary_rx).await;
    assert_eq!(
        b.payload.as_bytes(),
        Some(&Bytes::from(serde_json::to_vec(&value).unwrap()))
    );
}

#[tokio::test]
async fn test_pattern_delivery() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();

    let id = sub
        .psubscribe("room-*", DecodeMode::Text, Some(h))
        .await
        .unwrap();
    assert!(id.one().unwrap().spec().is_pattern());

    publisher.publish("room-7", "hello").await.unwrap();
    let d = next(&mut rx).await;
    assert_eq!(d.pattern.as_deref(), Some("room-*"));
    assert_eq!(&*d.channel, "room-7");
    assert_eq!(d.payload.as_text(), Some("hello"));

    publisher.publish("lobby", "hello").await.unwrap();
    nothing(&mut rx).await;
}

#[tokio::test]
async fn test_publish_conflicts_while_subscribed() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();
    sub.subscribe("c", DecodeMode::Text, Some(h)).await.unwrap();

    let err = sub.publish("c", "x").await.unwrap_err();
    assert!(matches!(err, MuxError::SubscribeModeConflict { active: 1 }));

    assert_eq!(publisher.publish("c", "x").await.unwrap(), 1);
    assert_eq!(next(&mut rx).await.payload.as_text(), Some("x"));
}

#[tokio::test]
async fn test_stop_twice() {
    let (sub, publisher) = pair().await;
    let (h, _rx) = recorder();
    sub.subscribe(["a", "b*"], DecodeMode::Text, Some(h))
        .await
        .unwrap();

    assert!(sub.stop().await);
    assert!(!sub.stop().await);
    assert_eq!(sub.state(), MuxState::Stopped);
    assert_eq!(sub.callback_count(), 0);
    assert!(!sub.connection().is_connected());

    // The sibling has its own link and keeps working.
    assert_eq!(publisher.publish("a", "x").await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_stops_resolve() {
    let (sub, _publisher) = pair().await;
    let a = sub.clone();
    let b = sub.clone();
    let (ra, rb) = tokio::join!(a.stop(), b.stop());
    // Exactly one of them did the work.
    assert!(ra ^ rb);
}

#[tokio::test]
async fn test_end_to_end_binary() {
    let (sub, publisher) = pair().await;
    let (a, mut rx_a) = recorder();
    let (b, mut rx_b) = recorder();

    sub.subscribe("c1", DecodeMode::Binary, Some(a))
        .await
        .unwrap();
    sub.subscribe("c2", DecodeMode::Binary, Some(b))
        .await
        .unwrap();

    publisher.publish("c1", "x").await.unwrap();
    publisher.publish("c2", "y").await.unwrap();

    let got_a = next(&mut rx_a).await;
    assert_eq!(&*got_a.channel, "c1");
    assert_eq!(*got_a.payload, Payload::Binary(Bytes::from_static(b"x")));

    let got_b = next(&mut rx_b).await;
    assert_eq!(&*got_b.channel, "c2");
    assert_eq!(got_b.raw, Bytes::from_static(b"y"));

    nothing(&mut rx_a).await;
}

#[tokio::test]
async fn test_batch_subscribe() {
    let (sub, publisher) = pair().await;
    let (h1, mut rx1) = recorder();
    let (h2, mut rx2) = recorder();

    let out = sub
        .subscribe_many(vec![
            ChannelRequest::new("orders", DecodeMode::Text, h1),
            ChannelRequest::new(vec!["audit", "audit-*"], DecodeMode::Binary, h2),
        ])
        .await
        .unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].ids().len(), 1);
    assert_eq!(out[1].ids().len(), 2);

    publisher.publish("orders", r#"{"id":1}"#).await.unwrap();
    assert_eq!(
        next(&mut rx1).await.payload.as_json(),
        Some(&json!({"id": 1}))
    );

    publisher.publish("audit-login", "z").await.unwrap();
    let d = next(&mut rx2).await;
    assert_eq!(d.pattern.as_deref(), Some("audit-*"));
}

#[tokio::test]
async fn test_failing_callback_does_not_block_siblings() {
    let (sub, publisher) = pair().await;
    let (h, mut rx) = recorder();
    let failing = handler(|_d: Delivery| async { Err::<(), _>(anyhow::anyhow!("bad input")) });

    sub.subscribe("c", DecodeMode::Text, Some(failing))
        .await
        .unwrap();
    sub.subscribe("c", DecodeMode::Text, Some(h)).await.unwrap();

    publisher.publish("c", "1").await.unwrap();
    publisher.publish("c", "2").await.unwrap();
    assert_eq!(next(&mut rx).await.payload.as_json(), Some(&json!(1)));
    assert_eq!(next(&mut rx).await.payload.as_json(), Some(&json!(2)));

    let stats = timeout(WAIT, async {
        loop {
            let s = sub.stats();
            if s.failed == 2 && s.in_flight == 0 {
                break s;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("stats never settled");
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.received, 2);
}
