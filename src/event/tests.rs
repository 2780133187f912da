use super::*;

#[test]
fn test_new_event_is_created() {
    let event = Event::new("A");
    assert_eq!(event.status(), EventStatus::Created);
    assert_eq!(event.payload(), b"A");
    assert_eq!(event.id(), None);
    assert!(event.headers().is_none());
}

#[test]
fn test_schema_framing_hidden_from_payload() {
    let event = Event::with_schema(b"hello", 42).unwrap();

    assert_eq!(event.schema_id(), Some(42));
    assert_eq!(event.payload(), b"hello");
    assert_eq!(event.len(), 5);
    assert_eq!(event.wire_bytes().len(), 10);
    assert_eq!(schema::read_schema_id(event.wire_bytes()), Some(42));
}

#[test]
fn test_into_payload_strips_framing() {
    let event = Event::with_schema(b"body", 7).unwrap();
    assert_eq!(event.into_payload(), b"body".to_vec());
}

#[test]
fn test_schema_out_of_range() {
    let result = Event::with_schema(b"x", 10_000);
    assert!(matches!(result, Err(BridgeError::Validation(_))));
}

#[test]
fn test_headers_single_allocation() {
    let mut event = Event::new("A");
    event.new_headers(2).unwrap();
    event.add_header("k1", "v1").unwrap();

    let second = event.new_headers(4);
    assert!(matches!(second, Err(BridgeError::Concurrency(_))));

    let headers = event.headers().unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers.as_slice()[0].key, b"k1".to_vec());
}

#[test]
fn test_add_header_requires_allocation() {
    let mut event = Event::new("A");
    let result = event.add_header("k", "v");
    assert!(matches!(result, Err(BridgeError::Validation(_))));
}

#[test]
fn test_received_event_captures_metadata() {
    let framed = schema::frame(12, b"data");
    let event = Event::received("orders", &framed, vec!["a=1".to_string()], true);

    assert_eq!(event.status(), EventStatus::Ok);
    assert_eq!(event.origin_topic(), Some("orders"));
    assert_eq!(event.schema_id(), Some(12));
    assert_eq!(event.payload(), b"data");
    assert_eq!(event.received_headers(), &["a=1".to_string()]);
}

#[test]
fn test_received_event_without_schema_mode_is_raw() {
    let framed = schema::frame(12, b"data");
    let event = Event::received("orders", &framed, Vec::new(), false);

    assert_eq!(event.schema_id(), None);
    assert_eq!(event.payload(), framed.as_slice());
}

#[test]
fn test_fail_and_requeue() {
    let mut event = Event::new("A");
    event.enqueue(EventId(3));
    event.fail("broker down");

    assert_eq!(event.status(), EventStatus::Error);
    assert_eq!(event.failure(), Some("broker down"));

    event.requeue();
    assert_eq!(event.status(), EventStatus::Queued);
    assert_eq!(event.failure(), None);
    assert_eq!(event.id(), Some(EventId(3)));
}

#[tokio::test]
async fn test_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("event.json");
    tokio::fs::write(&path, b"{\"a\":1}").await.unwrap();

    let event = Event::from_file(&path, Some(5))
        .await
        .unwrap()
        .with_cleanup_path(&path);

    assert_eq!(event.payload(), b"{\"a\":1}");
    assert_eq!(event.schema_id(), Some(5));
    assert_eq!(event.cleanup_paths(), &[path]);
}
