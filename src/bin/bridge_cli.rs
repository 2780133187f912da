//! bridge-cli: produce one event to Kafka, or consume and print events.
//!
//! ## Configuration
//! - BRIDGE_CONFIG: [required] path to the JSON/YAML handle configuration
//! - BRIDGE_MODE: `producer` or `consumer` (default: producer)
//! - BRIDGE_EVENT: event payload to produce
//! - BRIDGE_EVENT_FILE: file whose content is produced (exclusive with BRIDGE_EVENT)
//! - BRIDGE_HEADERS: headers to attach, `key=value` pairs separated by `,`
//! - BRIDGE_DUMP_DIR: where unacknowledged events are dumped on exit
//!   (default: DATAS/kafka/unprocessed)
//! - BRIDGE_POLL_INTERVAL_MS: polling interval (default: 100)
//! - BRIDGE_LOG: tracing filter (default: info)
//!
//! The producer exits once its event is acknowledged or failed and prints the
//! final queue status as JSON. The consumer prints received payloads until
//! interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use broker_bridge::utils::bootstrap::{env_millis, env_var, init_tracing};
use broker_bridge::{
    BridgeConfig, BridgeError, BrokerHandle, Event, KafkaDriver, Mode, PollTimeout, PollingStatus,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_DUMP_DIR: &str = "DATAS/kafka/unprocessed";
const IDLE_SLEEP: Duration = Duration::from_millis(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = BridgeConfig::from_env()?;
    let mode: Mode = env_var("BRIDGE_MODE")
        .as_deref()
        .unwrap_or("producer")
        .parse()?;
    let poll_interval = env_millis("BRIDGE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL);

    let handle = BrokerHandle::new(poll_interval, PollTimeout::Never);
    handle
        .configure(mode, &config, Arc::new(KafkaDriver::new()))
        .await?;

    if mode == Mode::Producer {
        let event = build_event(&config).await?;
        let id = handle.produce(event).await?;
        info!(event_id = %id, topic = ?handle.topic(), "Event queued");
    }

    handle.start_polling().await?;
    info!(mode = %mode, "bridge-cli started");

    match mode {
        Mode::Producer => run_producer(&handle).await,
        Mode::Consumer => run_consumer(&handle).await,
    }

    handle.stop_polling().await?;

    let status = handle.status().await;
    info!(
        queued = status.queued,
        waiting = status.waiting,
        error = status.error,
        "bridge-cli stopping"
    );

    if mode == Mode::Producer {
        println!("{}", serde_json::to_string(&status)?);
    }

    if mode == Mode::Producer && status.total() > 0 {
        for (id, reason) in handle.failed_deliveries().await {
            error!(event_id = %id, reason = %reason, "Event was not delivered");
        }
        let dir = env_var("BRIDGE_DUMP_DIR").unwrap_or_else(|| DEFAULT_DUMP_DIR.to_string());
        let written = handle.dump_unprocessed(&dir).await?;
        warn!(count = written, dir = %dir, "Unprocessed events dumped");
    }

    if mode == Mode::Consumer {
        while let Some(event) = handle.get_event().await {
            print_event("unprocessed", &event);
        }
    }

    handle.delete().await?;
    Ok(())
}

async fn build_event(config: &BridgeConfig) -> Result<Event, BridgeError> {
    let mut event = match (env_var("BRIDGE_EVENT"), env_var("BRIDGE_EVENT_FILE")) {
        (Some(_), Some(_)) => {
            return Err(BridgeError::Config(
                "set only one of BRIDGE_EVENT and BRIDGE_EVENT_FILE".to_string(),
            ))
        }
        (Some(text), None) => Event::with_optional_schema(text, config.schema_id)?,
        (None, Some(path)) => Event::from_file(path, config.schema_id).await?,
        (None, None) => {
            return Err(BridgeError::Config(
                "one of BRIDGE_EVENT and BRIDGE_EVENT_FILE is required".to_string(),
            ))
        }
    };

    if let Some(raw) = env_var("BRIDGE_HEADERS") {
        let pairs: Vec<(&str, &str)> = raw
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(|pair| {
                pair.split_once('=').ok_or_else(|| {
                    BridgeError::Validation(format!("header '{}' is not key=value", pair))
                })
            })
            .collect::<Result<_, _>>()?;
        event.new_headers(pairs.len())?;
        for (key, value) in pairs {
            event.add_header(key.trim(), value.trim())?;
        }
    }

    Ok(event)
}

/// Wait until the event is resolved, polling stops, or ctrl-c.
async fn run_producer(handle: &BrokerHandle) {
    loop {
        let status = handle.status().await;
        if status.queued == 0 && status.waiting == 0 {
            return;
        }
        if handle.polling_status().await == PollingStatus::Stopped {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(IDLE_SLEEP) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
        }
    }
}

/// Print received events until ctrl-c or polling stops.
async fn run_consumer(handle: &BrokerHandle) {
    loop {
        if let Some(event) = handle.get_event().await {
            print_event("received", &event);
            continue;
        }
        if handle.polling_status().await == PollingStatus::Stopped {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(IDLE_SLEEP) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
        }
    }
}

fn print_event(label: &str, event: &Event) {
    info!(
        topic = ?event.origin_topic(),
        schema_id = ?event.schema_id(),
        headers = ?event.received_headers(),
        len = event.len(),
        "Event {}",
        label
    );
    println!("{}", String::from_utf8_lossy(event.payload()));
}
