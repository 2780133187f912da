//! Events moving through the bridge.
//!
//! Producer events follow `Created -> Queued -> WaitingAck -> {Ok, Error}`.
//! Consumer events are built by the polling loop from received messages and
//! start out as `Ok`.

mod headers;
pub mod schema;

pub use headers::{Header, Headers, MAX_HEADER_FIELD_LEN};

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// Identity assigned to an event when a handle takes ownership of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Built by the application, not yet handed to a handle.
    Created,
    /// Sitting in the outbound queue, not yet sent.
    Queued,
    /// Sent to the driver, delivery report pending.
    WaitingAck,
    /// Delivered (producer) or received (consumer).
    Ok,
    /// Send or delivery failed.
    Error,
}

impl EventStatus {
    /// True for events that still count against the outbound counters.
    pub fn is_unresolved(self) -> bool {
        !matches!(self, EventStatus::Ok)
    }
}

/// One unit of payload plus metadata.
#[derive(Debug, Clone)]
pub struct Event {
    id: Option<EventId>,
    /// Wire bytes, schema framing included when `schema_id` is set.
    data: Vec<u8>,
    schema_id: Option<u32>,
    status: EventStatus,
    headers: Option<Headers>,
    received_headers: Vec<String>,
    origin_topic: Option<String>,
    cleanup_paths: Vec<PathBuf>,
    failure: Option<String>,
}

impl Event {
    /// Create an event carrying `payload` as-is.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::from_parts(payload.into(), None)
    }

    /// Create an event whose wire payload is prefixed with schema framing.
    pub fn with_schema(payload: impl AsRef<[u8]>, schema_id: u32) -> Result<Self> {
        let schema_id = schema::validate_schema_id(schema_id)?;
        Ok(Self::from_parts(
            schema::frame(schema_id, payload.as_ref()),
            Some(schema_id),
        ))
    }

    /// Create an event from an optional schema id, as read from configuration.
    pub fn with_optional_schema(payload: impl AsRef<[u8]>, schema_id: Option<u32>) -> Result<Self> {
        match schema_id {
            Some(id) => Self::with_schema(payload, id),
            None => Ok(Self::new(payload.as_ref())),
        }
    }

    /// Create an event from the content of a file.
    pub async fn from_file(path: impl AsRef<Path>, schema_id: Option<u32>) -> Result<Self> {
        let content = tokio::fs::read(path.as_ref()).await?;
        Self::with_optional_schema(content, schema_id)
    }

    /// Build a consumer-side event from a received message.
    ///
    /// The payload is copied. When `schema_mode` is set and the payload is
    /// long enough, the schema id is read from the framing bytes.
    pub(crate) fn received(
        topic: &str,
        payload: &[u8],
        headers: Vec<String>,
        schema_mode: bool,
    ) -> Self {
        let schema_id = if schema_mode {
            schema::read_schema_id(payload)
        } else {
            None
        };
        let mut event = Self::from_parts(payload.to_vec(), schema_id);
        event.status = EventStatus::Ok;
        event.origin_topic = Some(topic.to_string());
        event.received_headers = headers;
        event
    }

    fn from_parts(data: Vec<u8>, schema_id: Option<u32>) -> Self {
        Self {
            id: None,
            data,
            schema_id,
            status: EventStatus::Created,
            headers: None,
            received_headers: Vec::new(),
            origin_topic: None,
            cleanup_paths: Vec::new(),
            failure: None,
        }
    }

    /// Schedule `path` for deletion once the broker acknowledges the event.
    pub fn with_cleanup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.add_cleanup_path(path);
        self
    }

    pub fn add_cleanup_path(&mut self, path: impl Into<PathBuf>) {
        self.cleanup_paths.push(path.into());
    }

    /// Allocate the header set. Only one allocation is allowed per event.
    pub fn new_headers(&mut self, expected_count: usize) -> Result<()> {
        if self.headers.is_some() {
            return Err(BridgeError::concurrency("event headers already allocated"));
        }
        self.headers = Some(Headers::with_capacity(expected_count));
        Ok(())
    }

    /// Append a header. `new_headers` must have been called first.
    pub fn add_header(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let headers = self
            .headers
            .as_mut()
            .ok_or_else(|| BridgeError::validation("event headers are not allocated"))?;
        headers.push(key.as_ref(), value.as_ref())
    }

    pub fn id(&self) -> Option<EventId> {
        self.id
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn schema_id(&self) -> Option<u32> {
        self.schema_id
    }

    /// User-visible payload, schema framing excluded.
    pub fn payload(&self) -> &[u8] {
        match self.schema_id {
            Some(_) => self.data.get(schema::FRAMING_LEN..).unwrap_or_default(),
            None => &self.data,
        }
    }

    /// Bytes handed to the driver, schema framing included.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.data
    }

    /// User-visible payload length.
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Consume the event, returning the user-visible payload.
    pub fn into_payload(mut self) -> Vec<u8> {
        if self.schema_id.is_some() {
            let cut = schema::FRAMING_LEN.min(self.data.len());
            self.data.drain(..cut);
        }
        self.data
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// Headers of a received event, as `key=value` strings in arrival order.
    pub fn received_headers(&self) -> &[String] {
        &self.received_headers
    }

    pub fn origin_topic(&self) -> Option<&str> {
        self.origin_topic.as_deref()
    }

    pub fn cleanup_paths(&self) -> &[PathBuf] {
        &self.cleanup_paths
    }

    /// Reason recorded for the last send or delivery failure.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub(crate) fn enqueue(&mut self, id: EventId) {
        self.id = Some(id);
        self.status = EventStatus::Queued;
    }

    pub(crate) fn set_status(&mut self, status: EventStatus) {
        self.status = status;
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = EventStatus::Error;
        self.failure = Some(reason.into());
    }

    pub(crate) fn requeue(&mut self) {
        self.status = EventStatus::Queued;
        self.failure = None;
    }

    pub(crate) fn take_cleanup_paths(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.cleanup_paths)
    }
}

#[cfg(test)]
mod tests;
