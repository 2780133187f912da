use super::*;
use std::collections::BTreeMap;

fn settings(mode: Mode, entries: &[(&str, &str)]) -> DriverSettings {
    DriverSettings {
        mode,
        topic: None,
        properties: entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[test]
fn test_client_config_forwards_properties() {
    let config = client_config(&settings(
        Mode::Consumer,
        &[
            ("bootstrap.servers", "localhost:9092"),
            ("group.id", "readers"),
            ("auto.offset.reset", "earliest"),
        ],
    ));

    assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
    assert_eq!(config.get("group.id"), Some("readers"));
    assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
}

#[test]
fn test_owned_headers_empty() {
    assert!(owned_headers(&[]).is_none());
}

#[test]
fn test_owned_headers_preserve_order() {
    let headers = vec![
        Header {
            key: b"trace".to_vec(),
            value: b"abc".to_vec(),
        },
        Header {
            key: b"kind".to_vec(),
            value: b"order".to_vec(),
        },
    ];

    let owned = owned_headers(&headers).unwrap();

    assert_eq!(owned.count(), 2);
    let first = owned.get(0);
    assert_eq!(first.key, "trace");
    assert_eq!(first.value, Some(&b"abc"[..]));
    assert_eq!(owned.get(1).key, "kind");
}

#[tokio::test]
async fn test_unconfigured_driver_rejects_calls() {
    let driver = KafkaDriver::new();

    let send = driver
        .send(SendRequest {
            id: EventId(1),
            topic: "orders",
            payload: b"A",
            headers: &[],
        })
        .await;
    assert!(matches!(send, Err(BridgeError::Connection(_))));

    let receive = driver.receive(Duration::from_millis(1)).await;
    assert!(matches!(receive, Err(BridgeError::Connection(_))));
}

#[tokio::test]
async fn test_close_unconfigured_is_noop() {
    let driver = KafkaDriver::new().with_flush_timeout(Duration::from_millis(10));
    driver.close().await.unwrap();
}
