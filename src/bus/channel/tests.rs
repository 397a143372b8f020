use super::*;
use crate::test_utils::RecordingHandler;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_channel_publish_no_receivers() {
    let bus = ChannelMessageBus::default();

    // Should not error even with no receivers
    let result = bus.publish(Message::new("requests.1", "corr", vec![1])).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_channel_subscribe_and_receive() {
    let bus = ChannelMessageBus::default();

    let handler = RecordingHandler::new();
    bus.subscribe("requests.1", handler.clone()).await.unwrap();

    bus.publish(Message::new("requests.1", "corr", vec![1, 2, 3]))
        .await
        .unwrap();

    sleep(Duration::from_millis(50)).await;

    let received = handler.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].correlation_id, "corr");
    assert_eq!(received[0].body, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_channel_filter_is_exact() {
    let bus = ChannelMessageBus::default();

    let handler = RecordingHandler::new();
    bus.subscribe("requests.1", handler.clone()).await.unwrap();

    bus.publish(Message::new("requests.1", "a", vec![])).await.unwrap();
    bus.publish(Message::new("requests.2", "b", vec![])).await.unwrap();
    bus.publish(Message::new("requests.10", "c", vec![])).await.unwrap();

    sleep(Duration::from_millis(50)).await;

    let received = handler.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].correlation_id, "a");
}

#[tokio::test]
async fn test_channel_preserves_order_per_subscription() {
    let bus = ChannelMessageBus::default();

    let handler = RecordingHandler::new();
    bus.subscribe("responses.3", handler.clone()).await.unwrap();

    for i in 0..10u8 {
        bus.publish(Message::new("responses.3", format!("corr-{}", i), vec![i]))
            .await
            .unwrap();
    }

    sleep(Duration::from_millis(50)).await;

    let bodies: Vec<u8> = handler.received().await.iter().map(|m| m.body[0]).collect();
    assert_eq!(bodies, (0..10).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_channel_fan_out_to_multiple_subscribers() {
    let bus = ChannelMessageBus::default();

    let first = RecordingHandler::new();
    let second = RecordingHandler::new();
    bus.subscribe("responses.1", first.clone()).await.unwrap();
    bus.subscribe("responses.1", second.clone()).await.unwrap();
    assert_eq!(bus.subscriber_count(), 2);

    bus.publish(Message::new("responses.1", "corr", vec![])).await.unwrap();

    sleep(Duration::from_millis(50)).await;

    assert_eq!(first.received().await.len(), 1);
    assert_eq!(second.received().await.len(), 1);
}

#[tokio::test]
async fn test_channel_handler_error_does_not_stop_consumer() {
    let bus = ChannelMessageBus::default();

    let handler = RecordingHandler::failing();
    bus.subscribe("requests.1", handler.clone()).await.unwrap();

    bus.publish(Message::new("requests.1", "a", vec![])).await.unwrap();
    bus.publish(Message::new("requests.1", "b", vec![])).await.unwrap();

    sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.received().await.len(), 2);
}
