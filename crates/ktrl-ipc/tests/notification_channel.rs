//! End-to-end tests for the notification channel over real sockets.

use std::time::Duration;

use bytes::Bytes;
use ktrl_ipc::{IpcError, LAYER_TOPIC, NotificationClient};
use ktrl_test_utils::{StubPublisher, unused_port};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

const RECEIVE_WINDOW: Duration = Duration::from_secs(2);

async fn subscribe(publisher: &StubPublisher, filter: &str) -> NotificationClient {
    let client = NotificationClient::connect(&publisher.endpoint(), filter)
        .await
        .unwrap();
    publisher.settle().await;
    client
}

#[test_log::test(tokio::test)]
async fn test_layer_changes_arrive_in_order() {
    let mut publisher = StubPublisher::bind().await;
    let mut client = subscribe(&publisher, LAYER_TOPIC).await;

    publisher.publish("layer", b"1").await;
    publisher.publish("layer", b"2").await;

    let first = timeout(RECEIVE_WINDOW, client.receive()).await.unwrap().unwrap();
    let second = timeout(RECEIVE_WINDOW, client.receive()).await.unwrap().unwrap();
    assert_eq!(first.topic, "layer");
    assert_eq!(first.payload, Bytes::from_static(b"1"));
    assert_eq!(second.payload, Bytes::from_static(b"2"));
    assert_eq!(first.to_string(), "layer:1");
}

#[test_log::test(tokio::test)]
async fn test_late_subscriber_gets_no_replay() {
    let mut publisher = StubPublisher::bind().await;
    publisher.publish("layer", b"1").await;
    publisher.publish("layer", b"2").await;

    let mut client = subscribe(&publisher, LAYER_TOPIC).await;
    publisher.publish("layer", b"3").await;

    let n = timeout(RECEIVE_WINDOW, client.receive()).await.unwrap().unwrap();
    assert_eq!(n.payload_str(), Some("3"));
}

#[test_log::test(tokio::test)]
async fn test_other_topics_are_filtered_out() {
    let mut publisher = StubPublisher::bind().await;
    let mut client = subscribe(&publisher, LAYER_TOPIC).await;

    publisher.publish_raw(b"keymap:loaded").await;
    publisher.publish_raw(b"layer:nav").await;

    let n = timeout(RECEIVE_WINDOW, client.receive()).await.unwrap().unwrap();
    assert_eq!(n.topic, "layer");
    assert_eq!(n.payload_str(), Some("nav"));
}

#[test_log::test(tokio::test)]
async fn test_empty_filter_receives_everything() {
    let mut publisher = StubPublisher::bind().await;
    let mut client = subscribe(&publisher, "").await;

    publisher.publish_raw(b"keymap:loaded").await;
    publisher.publish_raw(b"layer 4").await;

    let first = timeout(RECEIVE_WINDOW, client.receive()).await.unwrap().unwrap();
    let second = timeout(RECEIVE_WINDOW, client.receive()).await.unwrap().unwrap();
    assert_eq!(first.topic, "keymap");
    assert_eq!(first.payload_str(), Some("loaded"));
    assert_eq!(second.topic, "layer");
    assert_eq!(second.payload_str(), Some("4"));
}

#[test_log::test(tokio::test)]
async fn test_close_interrupts_pending_receive() {
    let publisher = StubPublisher::bind().await;
    let mut client = subscribe(&publisher, LAYER_TOPIC).await;
    let handle = client.close_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.close();
    });

    let result = timeout(RECEIVE_WINDOW, client.receive())
        .await
        .expect("receive must return once closed");
    assert!(matches!(result, Err(IpcError::Closed)));
    assert!(client.is_closed());
}

#[test_log::test(tokio::test)]
async fn test_unreachable_publisher_is_a_connection_error() {
    let endpoint = ktrl_ipc::Endpoint::new("127.0.0.1", unused_port());
    let result =
        NotificationClient::connect_with_timeout(&endpoint, LAYER_TOPIC, Duration::from_millis(300))
            .await;
    assert!(matches!(result, Err(IpcError::Connection { .. })));
}
