//! Broker driver adapter.
//!
//! This module contains:
//! - `BrokerDriver` trait: the thin interface the handle uses to reach the broker
//! - Request/report types exchanged with drivers
//! - Implementations: Kafka (feature `kafka`), Mock

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Mode;
use crate::error::Result;
use crate::event::{EventId, Header};

// Implementation modules
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
#[cfg(feature = "kafka")]
pub use kafka::KafkaDriver;
pub use mock::MockDriver;

// ============================================================================
// Types
// ============================================================================

/// Settings handed to a driver at configure time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Producer or consumer.
    pub mode: Mode,
    /// Producer topic (producer mode only).
    pub topic: Option<String>,
    /// Driver properties forwarded verbatim (e.g. `bootstrap.servers`, `group.id`).
    pub properties: BTreeMap<String, String>,
}

impl DriverSettings {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// One outbound message handed to the driver.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    /// Identity echoed back in the matching delivery report.
    pub id: EventId,
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub headers: &'a [Header],
}

/// Outcome of one delivery, reported by `poll_delivery_reports`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub id: EventId,
    /// `Err` carries the broker's failure reason.
    pub outcome: std::result::Result<(), String>,
}

impl DeliveryReport {
    pub fn delivered(id: EventId) -> Self {
        Self { id, outcome: Ok(()) }
    }

    pub fn failed(id: EventId, reason: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Err(reason.into()),
        }
    }
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Headers in arrival order. Values may be absent on the wire.
    pub headers: Vec<(String, Option<Vec<u8>>)>,
    pub partition: i32,
    pub offset: i64,
}

impl ReceivedMessage {
    /// Headers rendered as `key=value` strings, in arrival order.
    pub fn header_pairs(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(key, value)| {
                let value = value
                    .as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default();
                format!("{}={}", key, value)
            })
            .collect()
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Interface to the actual broker client.
///
/// Implementations:
/// - `KafkaDriver`: librdkafka via `rdkafka`
/// - `MockDriver`: in-memory double for tests
///
/// Blocking calls (`poll_delivery_reports`, `receive`) must return within
/// roughly `timeout`, since the polling loop's stop latency depends on it.
#[async_trait]
pub trait BrokerDriver: Send + Sync {
    /// Apply configuration. Called once, before any other method.
    async fn configure(&self, settings: &DriverSettings) -> Result<()>;

    /// Hand one message to the broker client (producer).
    ///
    /// `Ok` means the client accepted the message; the delivery outcome
    /// arrives later through `poll_delivery_reports`.
    async fn send(&self, request: SendRequest<'_>) -> Result<()>;

    /// Serve client callbacks for up to `timeout` and return the delivery
    /// reports collected since the previous call (producer).
    async fn poll_delivery_reports(&self, timeout: Duration) -> Result<Vec<DeliveryReport>>;

    /// Subscribe to the given topics (consumer).
    async fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Wait up to `timeout` for the next message (consumer).
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>>;

    /// Release the client. Producers flush pending deliveries first.
    async fn close(&self) -> Result<()>;
}
