//! Kafka broker driver.
//!
//! Producers use a `BaseProducer` whose context forwards delivery reports
//! into a channel; `poll_delivery_reports` serves the client's callbacks and
//! drains that channel. Consumers use a `BaseConsumer`. Blocking librdkafka
//! calls run on the blocking thread pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header as KafkaHeader, Headers, Message, OwnedHeaders};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::ClientConfig;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{BrokerDriver, DeliveryReport, DriverSettings, ReceivedMessage, SendRequest};
use crate::config::Mode;
use crate::error::{BridgeError, Result};
use crate::event::{EventId, Header};

/// Default bound on the flush performed by `close`.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer context forwarding delivery reports to the driver.
pub struct DeliveryContext {
    reports: mpsc::UnboundedSender<DeliveryReport>,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<u64>;

    fn delivery(&self, result: &DeliveryResult<'_>, id: Self::DeliveryOpaque) {
        let id = EventId(*id);
        let report = match result {
            Ok(_) => DeliveryReport::delivered(id),
            Err((e, _)) => DeliveryReport::failed(id, e.to_string()),
        };
        if self.reports.send(report).is_err() {
            warn!(event_id = %id, "Delivery report dropped, driver is gone");
        }
    }
}

#[derive(Clone)]
enum Client {
    Producer(Arc<BaseProducer<DeliveryContext>>),
    Consumer(Arc<BaseConsumer>),
}

/// Broker driver backed by librdkafka.
pub struct KafkaDriver {
    client: RwLock<Option<Client>>,
    reports: Mutex<Option<mpsc::UnboundedReceiver<DeliveryReport>>>,
    flush_timeout: Duration,
}

impl Default for KafkaDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl KafkaDriver {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            reports: Mutex::new(None),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Set the bound on the flush performed by `close`.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    async fn producer(&self) -> Result<Arc<BaseProducer<DeliveryContext>>> {
        match self.client.read().await.as_ref() {
            Some(Client::Producer(producer)) => Ok(Arc::clone(producer)),
            Some(Client::Consumer(_)) => Err(BridgeError::config("driver is configured as a consumer")),
            None => Err(BridgeError::connection("Kafka driver is not configured")),
        }
    }

    async fn consumer(&self) -> Result<Arc<BaseConsumer>> {
        match self.client.read().await.as_ref() {
            Some(Client::Consumer(consumer)) => Ok(Arc::clone(consumer)),
            Some(Client::Producer(_)) => Err(BridgeError::config("driver is configured as a producer")),
            None => Err(BridgeError::connection("Kafka driver is not configured")),
        }
    }
}

/// Build a librdkafka client configuration from driver settings.
pub fn client_config(settings: &DriverSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in &settings.properties {
        config.set(key, value);
    }
    config
}

/// Convert event headers to Kafka headers. Keys are sent as UTF-8.
pub fn owned_headers(headers: &[Header]) -> Option<OwnedHeaders> {
    if headers.is_empty() {
        return None;
    }
    let owned = headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, header| {
            let key = String::from_utf8_lossy(&header.key);
            acc.insert(KafkaHeader {
                key: &*key,
                value: Some(header.value.as_slice()),
            })
        });
    Some(owned)
}

fn kafka_error(context: &str, e: KafkaError) -> BridgeError {
    BridgeError::connection(format!("{}: {}", context, e))
}

fn join_error(e: tokio::task::JoinError) -> BridgeError {
    BridgeError::connection(format!("Kafka client task failed: {}", e))
}

#[async_trait]
impl BrokerDriver for KafkaDriver {
    async fn configure(&self, settings: &DriverSettings) -> Result<()> {
        let mut client = self.client.write().await;
        if client.is_some() {
            return Err(BridgeError::config("Kafka driver is already configured"));
        }

        let config = client_config(settings);
        match settings.mode {
            Mode::Producer => {
                let (tx, rx) = mpsc::unbounded_channel();
                let producer: BaseProducer<DeliveryContext> = config
                    .create_with_context(DeliveryContext { reports: tx })
                    .map_err(|e| kafka_error("Failed to create Kafka producer", e))?;
                *self.reports.lock().await = Some(rx);
                *client = Some(Client::Producer(Arc::new(producer)));
                info!(
                    topic = ?settings.topic,
                    bootstrap_servers = ?settings.property("bootstrap.servers"),
                    "Kafka producer created"
                );
            }
            Mode::Consumer => {
                let consumer: BaseConsumer = config
                    .create()
                    .map_err(|e| kafka_error("Failed to create Kafka consumer", e))?;
                *client = Some(Client::Consumer(Arc::new(consumer)));
                info!(
                    group_id = ?settings.property("group.id"),
                    bootstrap_servers = ?settings.property("bootstrap.servers"),
                    "Kafka consumer created"
                );
            }
        }
        Ok(())
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<()> {
        let producer = self.producer().await?;

        let mut record = BaseRecord::<(), [u8], Box<u64>>::with_opaque_to(
            request.topic,
            Box::new(request.id.0),
        )
        .payload(request.payload);
        if let Some(headers) = owned_headers(request.headers) {
            record = record.headers(headers);
        }

        producer
            .send(record)
            .map_err(|(e, _)| kafka_error("Failed to enqueue message", e))?;

        debug!(
            event_id = %request.id,
            topic = request.topic,
            len = request.payload.len(),
            "Message handed to Kafka"
        );
        Ok(())
    }

    async fn poll_delivery_reports(&self, timeout: Duration) -> Result<Vec<DeliveryReport>> {
        let producer = self.producer().await?;
        tokio::task::spawn_blocking(move || {
            producer.poll(timeout);
        })
        .await
        .map_err(join_error)?;

        let mut reports = Vec::new();
        if let Some(rx) = self.reports.lock().await.as_mut() {
            while let Ok(report) = rx.try_recv() {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        let consumer = self.consumer().await?;
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| kafka_error("Failed to subscribe", e))?;
        info!(topics = ?topics, "Subscribed to Kafka topics");
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>> {
        let consumer = self.consumer().await?;
        let polled = tokio::task::spawn_blocking(move || {
            consumer.poll(timeout).map(|result| {
                result.map(|message| {
                    let headers = message
                        .headers()
                        .map(|headers| {
                            headers
                                .iter()
                                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec)))
                                .collect()
                        })
                        .unwrap_or_default();
                    ReceivedMessage {
                        topic: message.topic().to_string(),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        headers,
                        partition: message.partition(),
                        offset: message.offset(),
                    }
                })
            })
        })
        .await
        .map_err(join_error)?;

        match polled {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(kafka_error("Failed to receive", e)),
        }
    }

    async fn close(&self) -> Result<()> {
        let Some(client) = self.client.write().await.take() else {
            return Ok(());
        };

        match client {
            Client::Producer(producer) => {
                let timeout = self.flush_timeout;
                let in_flight = producer.in_flight_count();
                let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
                    .await
                    .map_err(join_error)?;
                if let Err(e) = flushed {
                    warn!(in_flight, error = %e, "Kafka producer flush incomplete");
                }
                self.reports.lock().await.take();
                info!(in_flight, "Kafka producer closed");
            }
            Client::Consumer(consumer) => {
                consumer.unsubscribe();
                info!("Kafka consumer closed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
