//! Mock broker driver for testing.
//!
//! Sends are recorded and answered with delivery reports according to the
//! configured `DeliveryMode`. Messages pushed with `push_message` are handed
//! out by `receive` in FIFO order. Blocking calls wait for their timeout when
//! there is nothing to return, like a real client would.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BrokerDriver, DeliveryReport, DriverSettings, ReceivedMessage, SendRequest};
use crate::error::{BridgeError, Result};
use crate::event::{EventId, Header};

/// How the mock answers accepted sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Report every send as delivered.
    #[default]
    Ack,
    /// Report every send as failed.
    Fail,
    /// Report nothing until `complete_held` is called.
    Hold,
}

/// A message accepted by `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: EventId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub headers: Vec<Header>,
}

#[derive(Debug, Default)]
struct Behavior {
    delivery: DeliveryMode,
    fail_on_configure: bool,
    fail_on_send: bool,
    fail_on_subscribe: bool,
    fail_on_receive: bool,
}

/// Mock driver for testing.
#[derive(Default)]
pub struct MockDriver {
    behavior: RwLock<Behavior>,
    settings: RwLock<Option<DriverSettings>>,
    sent: RwLock<Vec<SentMessage>>,
    reports: RwLock<VecDeque<DeliveryReport>>,
    held: RwLock<Vec<EventId>>,
    inbox: RwLock<VecDeque<ReceivedMessage>>,
    subscriptions: RwLock<Vec<String>>,
    closed: RwLock<bool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose deliveries always fail.
    pub fn failing() -> Self {
        Self {
            behavior: RwLock::new(Behavior {
                delivery: DeliveryMode::Fail,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub async fn set_delivery_mode(&self, mode: DeliveryMode) {
        self.behavior.write().await.delivery = mode;
    }

    pub async fn set_fail_on_configure(&self, fail: bool) {
        self.behavior.write().await.fail_on_configure = fail;
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        self.behavior.write().await.fail_on_send = fail;
    }

    pub async fn set_fail_on_subscribe(&self, fail: bool) {
        self.behavior.write().await.fail_on_subscribe = fail;
    }

    pub async fn set_fail_on_receive(&self, fail: bool) {
        self.behavior.write().await.fail_on_receive = fail;
    }

    /// Queue a message for `receive`.
    pub async fn push_message(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        headers: Vec<(String, Option<Vec<u8>>)>,
    ) {
        let mut inbox = self.inbox.write().await;
        let offset = inbox.len() as i64;
        inbox.push_back(ReceivedMessage {
            topic: topic.into(),
            payload: payload.into(),
            headers,
            partition: 0,
            offset,
        });
    }

    /// Answer every held send with the given outcome.
    pub async fn complete_held(&self, delivered: bool) -> usize {
        let held = std::mem::take(&mut *self.held.write().await);
        let count = held.len();
        let mut reports = self.reports.write().await;
        for id in held {
            reports.push_back(if delivered {
                DeliveryReport::delivered(id)
            } else {
                DeliveryReport::failed(id, "Mock delivery failure")
            });
        }
        count
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    pub async fn settings(&self) -> Option<DriverSettings> {
        self.settings.read().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().await.clone()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    async fn ensure_open(&self) -> Result<()> {
        if *self.closed.read().await {
            return Err(BridgeError::connection("Mock driver is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerDriver for MockDriver {
    async fn configure(&self, settings: &DriverSettings) -> Result<()> {
        if self.behavior.read().await.fail_on_configure {
            return Err(BridgeError::connection("Mock configure failure"));
        }
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<()> {
        self.ensure_open().await?;
        let behavior = self.behavior.read().await;
        if behavior.fail_on_send {
            return Err(BridgeError::connection("Mock send failure"));
        }

        self.sent.write().await.push(SentMessage {
            id: request.id,
            topic: request.topic.to_string(),
            payload: request.payload.to_vec(),
            headers: request.headers.to_vec(),
        });

        match behavior.delivery {
            DeliveryMode::Ack => self
                .reports
                .write()
                .await
                .push_back(DeliveryReport::delivered(request.id)),
            DeliveryMode::Fail => self
                .reports
                .write()
                .await
                .push_back(DeliveryReport::failed(request.id, "Mock delivery failure")),
            DeliveryMode::Hold => self.held.write().await.push(request.id),
        }
        Ok(())
    }

    async fn poll_delivery_reports(&self, timeout: Duration) -> Result<Vec<DeliveryReport>> {
        if self.reports.read().await.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(self.reports.write().await.drain(..).collect())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        if self.behavior.read().await.fail_on_subscribe {
            return Err(BridgeError::connection("Mock subscribe failure"));
        }
        self.subscriptions.write().await.extend(topics.iter().cloned());
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>> {
        self.ensure_open().await?;
        if self.behavior.read().await.fail_on_receive {
            return Err(BridgeError::connection("Mock receive failure"));
        }
        if self.inbox.read().await.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(self.inbox.write().await.pop_front())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(id: u64, payload: &'a [u8]) -> SendRequest<'a> {
        SendRequest {
            id: EventId(id),
            topic: "orders",
            payload,
            headers: &[],
        }
    }

    #[tokio::test]
    async fn test_mock_driver_acks_sends() {
        let driver = MockDriver::new();
        driver.send(request(1, b"A")).await.unwrap();

        let reports = driver
            .poll_delivery_reports(Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(reports, vec![DeliveryReport::delivered(EventId(1))]);
        assert_eq!(driver.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_driver_failing() {
        let driver = MockDriver::failing();
        driver.send(request(1, b"A")).await.unwrap();

        let reports = driver
            .poll_delivery_reports(Duration::from_millis(1))
            .await
            .unwrap();

        assert!(reports[0].outcome.is_err());
    }

    #[tokio::test]
    async fn test_mock_driver_fail_on_send() {
        let driver = MockDriver::new();
        driver.set_fail_on_send(true).await;

        let result = driver.send(request(1, b"A")).await;
        assert!(matches!(result, Err(BridgeError::Connection(_))));
        assert_eq!(driver.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_driver_hold_then_complete() {
        let driver = MockDriver::new();
        driver.set_delivery_mode(DeliveryMode::Hold).await;
        driver.send(request(1, b"A")).await.unwrap();

        let reports = driver
            .poll_delivery_reports(Duration::from_millis(1))
            .await
            .unwrap();
        assert!(reports.is_empty());

        assert_eq!(driver.complete_held(true).await, 1);
        let reports = driver
            .poll_delivery_reports(Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(reports, vec![DeliveryReport::delivered(EventId(1))]);
    }

    #[tokio::test]
    async fn test_mock_driver_receive_fifo() {
        let driver = MockDriver::new();
        driver.push_message("a", "first", Vec::new()).await;
        driver.push_message("b", "second", Vec::new()).await;

        let first = driver.receive(Duration::from_millis(1)).await.unwrap().unwrap();
        let second = driver.receive(Duration::from_millis(1)).await.unwrap().unwrap();
        let none = driver.receive(Duration::from_millis(1)).await.unwrap();

        assert_eq!(first.payload, b"first".to_vec());
        assert_eq!(second.topic, "b");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_mock_driver_closed_rejects_send() {
        let driver = MockDriver::new();
        driver.close().await.unwrap();

        assert!(driver.is_closed().await);
        assert!(driver.send(request(1, b"A")).await.is_err());
    }
}
