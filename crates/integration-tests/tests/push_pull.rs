//! Push/Pull Integration Tests
//!
//! End-to-end behaviour over the in-memory broker: payload round trips,
//! attribute routing, poison messages and flow control.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use topiq_core::application::DroppedMessage;
use topiq_core::port::broker::mocks::MockBroker;
use topiq_core::{Credentials, Message, PullOptions, PushOutcome, QueueConfig, QueueInstance};

const TOPIC: &str = "projects/acme/topics/orders";
const DEFAULT_SUB: &str = "projects/acme/subscriptions/default";

fn queue(broker: &MockBroker, max_messages: usize) -> QueueInstance {
    let credentials = Credentials::from_value(json!({
        "project_id": "acme",
        "client_email": "svc@acme.iam.gserviceaccount.com"
    }))
    .unwrap();
    let config = QueueConfig::new(TOPIC, credentials)
        .with_name("orders")
        .with_max_messages(max_messages);
    QueueInstance::connect(config, broker.connector().as_ref()).unwrap()
}

/// Handler forwarding every message to a channel without settling it
fn forwarding() -> (
    impl Fn(Message) -> std::future::Ready<()> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Message>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |message: Message| {
        let _ = tx.send(message);
        std::future::ready(())
    };
    (handler, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[derive(Serialize)]
struct Order {
    id: u32,
    lines: Vec<String>,
    note: Option<String>,
}

#[tokio::test]
async fn test_round_trip_is_deep_equal() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);
    let (handler, mut rx) = forwarding();
    let subscription = queue.pull(handler).await.unwrap();

    let payload = json!({
        "id": 7,
        "nested": {"list": [1, 2.5, "three", null, {"deep": true}]},
        "unicode": "zoë ✓"
    });
    queue.push(&payload).await.unwrap();

    let message = next(&mut rx).await;
    assert_eq!(message.data(), Some(&payload));
    message.ack();
    eventually(|| broker.acked() == vec![message.id.clone()]).await;
    subscription.close().await;
}

#[tokio::test]
async fn test_typed_payload_round_trip() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);
    let (handler, mut rx) = forwarding();
    queue.pull(handler).await.unwrap();

    let order = Order {
        id: 42,
        lines: vec!["widget".into(), "gadget".into()],
        note: None,
    };
    queue.push(&order).await.unwrap();

    let message = next(&mut rx).await;
    assert_eq!(
        message.data(),
        Some(&json!({"id": 42, "lines": ["widget", "gadget"], "note": null}))
    );
}

#[tokio::test]
async fn test_attributes_are_metadata_not_body() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);
    let (handler, mut rx) = forwarding();
    queue.pull(handler).await.unwrap();

    queue
        .push(&json!({"a": 1, "attributes": {"k": "v"}}))
        .await
        .unwrap();

    let message = next(&mut rx).await;
    assert_eq!(message.data(), Some(&json!({"a": 1})));
    assert_eq!(message.attributes.get("k").map(String::as_str), Some("v"));
}

#[tokio::test]
async fn test_empty_array_and_null_touch_nothing() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);

    let empty = queue.push(&json!([])).await.unwrap();
    let null = queue.push(&Value::Null).await.unwrap();

    assert_eq!(empty, PushOutcome::Batch(vec![]));
    assert!(null.is_skipped());
    assert_eq!(broker.publish_calls(), 0);
    assert_eq!(broker.publisher_creations(), 0);
}

#[tokio::test]
async fn test_batch_push_delivers_every_element() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 10);
    let (handler, mut rx) = forwarding();
    queue.pull(handler).await.unwrap();

    let outcome = queue.push(&json!([{"n": 0}, {"n": 1}, {"n": 2}])).await.unwrap();
    assert_eq!(outcome.message_ids().len(), 3);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let message = next(&mut rx).await;
        seen.push(message.data().and_then(|d| d["n"].as_i64()).unwrap());
        message.ack();
    }
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_poison_messages_are_acked_and_reported() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 5);
    let (handler, mut rx) = forwarding();
    let dropped = Arc::new(Mutex::new(Vec::<DroppedMessage>::new()));
    let sink = Arc::clone(&dropped);
    let options = PullOptions::default().with_dead_letter(Arc::new(move |d: &DroppedMessage| {
        sink.lock().unwrap().push(d.clone());
    }));
    queue.pull_with(handler, options).await.unwrap();

    let bad_utf8 = broker.inject(DEFAULT_SUB, vec![0xff, 0xfe, 0xfd]);
    let bad_json = broker.inject(DEFAULT_SUB, b"{not json".to_vec());
    let good = broker.inject(DEFAULT_SUB, br#"{"x":1}"#.to_vec());

    let message = next(&mut rx).await;
    assert_eq!(message.id, good);
    assert_eq!(message.data(), Some(&json!({"x": 1})));

    eventually(|| {
        let acked = broker.acked();
        acked.contains(&bad_utf8) && acked.contains(&bad_json)
    })
    .await;
    assert!(!broker.acked().contains(&good));

    let dropped = dropped.lock().unwrap();
    let ids: Vec<&str> = dropped.iter().map(|d| d.id.as_str()).collect();
    assert!(ids.contains(&bad_utf8.as_str()));
    assert!(ids.contains(&bad_json.as_str()));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_flow_control_caps_unsettled_messages() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 2);
    let (handler, mut rx) = forwarding();
    queue.pull(handler).await.unwrap();

    for n in 0..5 {
        queue.push(&json!({"n": n})).await.unwrap();
    }

    let first = next(&mut rx).await;
    let _second = next(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "third message delivered before a slot freed");

    first.ack();
    let _third = next(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_nack_redelivers() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);
    let (handler, mut rx) = forwarding();
    queue.pull(handler).await.unwrap();

    queue.push(&json!({"retry": true})).await.unwrap();

    let first = next(&mut rx).await;
    first.nack();
    let again = next(&mut rx).await;
    assert_eq!(again.id, first.id);
    assert_eq!(again.data(), Some(&json!({"retry": true})));
    again.ack();

    eventually(|| broker.acked() == vec![first.id.clone()]).await;
    assert_eq!(broker.nacked(), vec![first.id.clone()]);
}

#[tokio::test]
async fn test_close_stops_delivery() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);
    let (handler, mut rx) = forwarding();
    let subscription = queue.pull(handler).await.unwrap();

    subscription.close().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.push(&json!({"late": true})).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.backlog_len(DEFAULT_SUB), 1);
}

#[tokio::test]
async fn test_flow_control_spans_every_pull_on_a_subscription() {
    let broker = MockBroker::new();
    let queue = queue(&broker, 1);
    let (first_handler, mut first_rx) = forwarding();
    let (second_handler, mut second_rx) = forwarding();
    let a = queue.pull(first_handler).await.unwrap();
    let b = queue.pull(second_handler).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    for n in 0..4 {
        queue.push(&json!({"n": n})).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut held = Vec::new();
    while let Ok(message) = first_rx.try_recv() {
        held.push(message);
    }
    while let Ok(message) = second_rx.try_recv() {
        held.push(message);
    }
    assert_eq!(held.len(), 1, "unsettled messages exceed max_messages");

    held.remove(0).ack();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let delivered = std::iter::from_fn(|| first_rx.try_recv().ok())
        .chain(std::iter::from_fn(|| second_rx.try_recv().ok()))
        .count();
    assert_eq!(delivered, 1);
}
