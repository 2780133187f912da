//! broker-bridge - buffered produce/consume bridge to a publish-subscribe broker
//!
//! A `BrokerHandle` queues outbound events, hands them to a `BrokerDriver`
//! from a background polling loop and tracks their delivery, or collects
//! received messages for the application to pick up.

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod handle;
pub mod utils;

pub use config::{BridgeConfig, Mode, PollTimeout};
pub use driver::{BrokerDriver, MockDriver};
pub use error::{BridgeError, Result};
pub use event::{Event, EventId, EventStatus};
pub use handle::{BrokerHandle, PollingStatus, QueueStatus};

#[cfg(feature = "kafka")]
pub use driver::KafkaDriver;
