//! End-to-end handle behavior against the mock driver.

use std::sync::Arc;
use std::time::Duration;

use broker_bridge::config::{generate_group_id, host_name, GroupIdStrategy};
use broker_bridge::driver::mock::DeliveryMode;
use broker_bridge::{
    BridgeConfig, BridgeError, BrokerHandle, Event, EventStatus, MockDriver, Mode, PollTimeout,
    PollingStatus, QueueStatus,
};

const INTERVAL: Duration = Duration::from_millis(10);

async fn producer_with(driver: Arc<MockDriver>) -> BrokerHandle {
    let handle = BrokerHandle::new(INTERVAL, PollTimeout::Never);
    handle
        .configure(
            Mode::Producer,
            &BridgeConfig::producer("orders").with_bootstrap_servers("localhost:9092"),
            driver,
        )
        .await
        .unwrap();
    handle
}

/// Poll the handle until `done` holds or the deadline passes.
async fn wait_for<F>(handle: &BrokerHandle, done: F) -> QueueStatus
where
    F: Fn(QueueStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = handle.status().await;
        if done(status) || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_produce_single_event_is_delivered_and_removed() {
    let driver = Arc::new(MockDriver::new());
    let handle = producer_with(driver.clone()).await;

    handle.produce(Event::new("A")).await.unwrap();
    handle.poll_once().await.unwrap();

    assert_eq!(handle.status().await, QueueStatus::new(0, 0, 0));
    assert_eq!(handle.recount().await, QueueStatus::new(0, 0, 0));
    assert_eq!(driver.sent().await[0].payload, b"A".to_vec());
}

#[tokio::test]
async fn test_produce_single_event_with_failing_driver() {
    let handle = producer_with(Arc::new(MockDriver::failing())).await;

    handle.produce(Event::new("A")).await.unwrap();
    handle.poll_once().await.unwrap();

    assert_eq!(handle.status().await, QueueStatus::new(0, 0, 1));
}

#[tokio::test]
async fn test_liveness_with_background_loop() {
    let driver = Arc::new(MockDriver::new());
    let handle = producer_with(driver.clone()).await;
    handle.start_polling().await.unwrap();

    for i in 0..50 {
        handle
            .produce(Event::new(format!("event-{}", i)))
            .await
            .unwrap();
    }

    let status = wait_for(&handle, |s| s.total() == 0).await;
    handle.stop_polling().await.unwrap();

    assert_eq!(status, QueueStatus::default());
    assert_eq!(driver.sent_count().await, 50);
}

#[tokio::test]
async fn test_liveness_with_mixed_outcomes() {
    let driver = Arc::new(MockDriver::new());
    driver.set_delivery_mode(DeliveryMode::Fail).await;
    let handle = producer_with(driver.clone()).await;
    handle.start_polling().await.unwrap();

    for i in 0..10 {
        handle
            .produce(Event::new(format!("event-{}", i)))
            .await
            .unwrap();
    }

    let status = wait_for(&handle, |s| s.queued == 0 && s.waiting == 0).await;
    handle.stop_polling().await.unwrap();

    assert_eq!(status, QueueStatus::new(0, 0, 10));
    assert_eq!(handle.failed_deliveries().await.len(), 10);
}

#[tokio::test]
async fn test_counters_match_queue_contents_between_iterations() {
    let driver = Arc::new(MockDriver::new());
    driver.set_delivery_mode(DeliveryMode::Hold).await;
    let handle = producer_with(driver.clone()).await;

    for round in 0..5 {
        handle
            .produce(Event::new(format!("round-{}", round)))
            .await
            .unwrap();
        handle.poll_once().await.unwrap();
        assert_eq!(handle.status().await, handle.recount().await);

        if round % 2 == 0 {
            driver.complete_held(round % 4 == 0).await;
            handle.poll_once().await.unwrap();
            assert_eq!(handle.status().await, handle.recount().await);
        }
    }
}

#[tokio::test]
async fn test_concurrent_producers() {
    let driver = Arc::new(MockDriver::new());
    let handle = Arc::new(producer_with(driver.clone()).await);
    handle.start_polling().await.unwrap();

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                handle
                    .produce(Event::new(format!("{}-{}", worker, i)))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let status = wait_for(&handle, |s| s.total() == 0).await;
    handle.stop_polling().await.unwrap();

    assert_eq!(status, QueueStatus::default());
    assert_eq!(driver.sent_count().await, 100);
}

#[tokio::test]
async fn test_produce_rejects_non_created_event() {
    let consumer_driver = Arc::new(MockDriver::new());
    let consumer = BrokerHandle::new(INTERVAL, PollTimeout::Never);
    consumer
        .configure(
            Mode::Consumer,
            &BridgeConfig::consumer(["orders"]),
            consumer_driver.clone(),
        )
        .await
        .unwrap();
    consumer_driver.push_message("orders", "A", Vec::new()).await;
    consumer.poll_once().await.unwrap();
    let received = consumer.get_event().await.unwrap();
    assert_eq!(received.status(), EventStatus::Ok);

    let producer = producer_with(Arc::new(MockDriver::new())).await;
    let result = producer.produce(received).await;

    assert!(matches!(result, Err(BridgeError::Validation(_))));
}

#[tokio::test]
async fn test_second_new_headers_keeps_first_set() {
    let mut event = Event::new("A");
    event.new_headers(1).unwrap();
    event.add_header("k", "v").unwrap();

    let result = event.new_headers(4);

    assert!(matches!(result, Err(BridgeError::Concurrency(_))));
    assert_eq!(event.headers().unwrap().len(), 1);
}

#[tokio::test]
async fn test_consumer_group_id_is_deterministic() {
    let first = BrokerHandle::new(INTERVAL, PollTimeout::Never);
    let second = BrokerHandle::new(INTERVAL, PollTimeout::Never);
    let config = BridgeConfig::consumer(["a", "b"]);

    first
        .configure(Mode::Consumer, &config, Arc::new(MockDriver::new()))
        .await
        .unwrap();
    second
        .configure(Mode::Consumer, &config, Arc::new(MockDriver::new()))
        .await
        .unwrap();

    let expected = generate_group_id(
        GroupIdStrategy::UniqueGroup,
        &host_name(),
        &["a".to_string(), "b".to_string()],
        std::process::id(),
    );
    assert_eq!(first.group_id(), Some(expected.as_str()));
    assert_eq!(first.group_id(), second.group_id());
}

#[tokio::test]
async fn test_consumer_host_topic_group() {
    let handle = BrokerHandle::new(INTERVAL, PollTimeout::Never);
    let mut config = BridgeConfig::consumer(["a", "b"]);
    config.group_id_autogen = Some(GroupIdStrategy::HostTopicGroup);

    handle
        .configure(Mode::Consumer, &config, Arc::new(MockDriver::new()))
        .await
        .unwrap();

    assert_eq!(
        handle.group_id(),
        Some(format!("{}_a_b", host_name()).as_str())
    );
}

#[tokio::test]
async fn test_consumer_background_loop() {
    let driver = Arc::new(MockDriver::new());
    let handle = BrokerHandle::new(INTERVAL, PollTimeout::Never);
    handle
        .configure(
            Mode::Consumer,
            &BridgeConfig::consumer(["a", "b"]).with_group_id("readers"),
            driver.clone(),
        )
        .await
        .unwrap();
    handle.start_polling().await.unwrap();

    for i in 0..5 {
        driver
            .push_message(
                if i % 2 == 0 { "a" } else { "b" },
                format!("m{}", i),
                vec![("seq".to_string(), Some(i.to_string().into_bytes()))],
            )
            .await;
    }

    let status = wait_for(&handle, |s| s.queued == 5).await;
    assert_eq!(status.queued, 5);

    let mut payloads = Vec::new();
    while let Some(event) = handle.get_event().await {
        payloads.push(String::from_utf8(event.payload().to_vec()).unwrap());
        assert_eq!(event.received_headers().len(), 1);
    }
    handle.stop_polling().await.unwrap();

    assert_eq!(payloads, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(handle.status().await, QueueStatus::default());
}

#[tokio::test]
async fn test_delete_drains_and_blocks_further_use() {
    let driver = Arc::new(MockDriver::new());
    driver.set_delivery_mode(DeliveryMode::Hold).await;
    let handle = producer_with(driver.clone()).await;
    handle.produce(Event::new("A")).await.unwrap();
    handle.start_polling().await.unwrap();

    handle.delete().await.unwrap();

    assert_eq!(handle.polling_status().await, PollingStatus::Stopped);
    assert_eq!(handle.status().await, QueueStatus::default());
    assert!(driver.is_closed().await);
    assert!(matches!(
        handle.produce(Event::new("B")).await,
        Err(BridgeError::Resource(_))
    ));
    handle.delete().await.unwrap();
}
