//! Handle configuration.
//!
//! Configuration is a flat key/value map, read once at configure time. It can
//! be built in code with `BridgeConfig::from_properties` or loaded from a JSON
//! or YAML file with `BridgeConfig::load`.
//!
//! Reserved keys are interpreted by the bridge; every other key is forwarded
//! verbatim to the driver. Keys starting with `-` are disabled and ignored.

mod group_id;

pub use group_id::{generate_group_id, host_name, GroupIdStrategy};

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::driver::DriverSettings;
use crate::error::{BridgeError, Result};
use crate::event::schema;

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BRIDGE_CONFIG";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BRIDGE_LOG";

/// Producer topic.
pub const KEY_TOPIC: &str = "topic";
/// Consumer topics, comma-separated.
pub const KEY_TOPICS: &str = "topics";
/// Consumer group id.
pub const KEY_GROUP_ID: &str = "group.id";
/// Group id generation strategy when `group.id` is absent.
pub const KEY_GROUP_ID_AUTOGEN: &str = "group.id.autogen";
/// Polling interval in milliseconds.
pub const KEY_POLL_INTERVAL: &str = "poll.interval";
/// Polling timeout in milliseconds, `-1` for none.
pub const KEY_POLL_TIMEOUT: &str = "poll.timeout";
/// Schema id for framed payloads, 0..=9999 or `-1`.
pub const KEY_SCHEMA_ID: &str = "value.schema.id";
/// Schema type label (informational).
pub const KEY_SCHEMA_TYPE: &str = "value.schema.type";
/// Refresh interval of a monitored directory in milliseconds.
pub const KEY_MONITORED_DIRECTORY_INTERVAL: &str = "monitored.directory.interval";
/// Broker addresses.
pub const KEY_BOOTSTRAP_SERVERS: &str = "bootstrap.servers";

/// Keys consumed by the bridge and never forwarded to the driver as-is.
const RESERVED_KEYS: &[&str] = &[
    KEY_TOPIC,
    KEY_TOPICS,
    KEY_GROUP_ID,
    KEY_GROUP_ID_AUTOGEN,
    KEY_POLL_INTERVAL,
    KEY_POLL_TIMEOUT,
    KEY_SCHEMA_ID,
    KEY_SCHEMA_TYPE,
    KEY_MONITORED_DIRECTORY_INTERVAL,
    KEY_BOOTSTRAP_SERVERS,
];

/// Handle mode, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Producer,
    Consumer,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Producer => f.write_str("producer"),
            Mode::Consumer => f.write_str("consumer"),
        }
    }
}

impl FromStr for Mode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "producer" | "p" => Ok(Mode::Producer),
            "consumer" | "c" => Ok(Mode::Consumer),
            other => Err(BridgeError::config(format!("unknown mode '{}'", other))),
        }
    }
}

/// Upper bound on a polling loop's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollTimeout {
    /// Poll until stopped.
    #[default]
    Never,
    /// Stop on its own once this much time has elapsed.
    After(Duration),
}

impl PollTimeout {
    /// Zero and negative values mean "no timeout".
    pub fn from_millis(ms: i64) -> Self {
        if ms <= 0 {
            PollTimeout::Never
        } else {
            PollTimeout::After(Duration::from_millis(ms as u64))
        }
    }

    pub fn duration(self) -> Option<Duration> {
        match self {
            PollTimeout::Never => None,
            PollTimeout::After(d) => Some(d),
        }
    }
}

/// Parsed bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Producer topic.
    pub topic: Option<String>,
    /// Consumer topics, in subscription order.
    pub topics: Vec<String>,
    /// Explicit consumer group id.
    pub group_id: Option<String>,
    /// Strategy used when `group_id` is absent.
    pub group_id_autogen: Option<GroupIdStrategy>,
    /// Overrides the handle's polling interval.
    pub poll_interval: Option<Duration>,
    /// Overrides the handle's polling timeout.
    pub poll_timeout: Option<PollTimeout>,
    /// Schema id for framed payloads.
    pub schema_id: Option<u32>,
    pub schema_type: Option<String>,
    pub monitored_directory_interval: Option<Duration>,
    pub bootstrap_servers: Option<String>,
    /// Keys forwarded verbatim to the driver.
    pub driver_properties: BTreeMap<String, String>,
}

impl BridgeConfig {
    /// Build a configuration from a flat property map.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = BridgeConfig::default();

        for (key, value) in properties {
            let key = key.into();
            let value = value.into();

            if key.starts_with('-') {
                debug!(key = %key, "Disabled configuration entry");
                continue;
            }

            match key.as_str() {
                KEY_TOPIC => config.topic = non_empty(&value),
                KEY_TOPICS => config.topics = split_topics(&value),
                KEY_GROUP_ID => config.group_id = non_empty(&value),
                KEY_GROUP_ID_AUTOGEN => config.group_id_autogen = Some(value.parse()?),
                KEY_POLL_INTERVAL => {
                    let ms = parse_millis(&key, &value)?;
                    if ms == 0 {
                        return Err(BridgeError::config(format!("{} must be at least 1 ms", key)));
                    }
                    config.poll_interval = Some(Duration::from_millis(ms));
                }
                KEY_POLL_TIMEOUT => {
                    let ms: i64 = value.trim().parse().map_err(|_| {
                        BridgeError::config(format!("invalid {}: '{}'", key, value))
                    })?;
                    config.poll_timeout = Some(PollTimeout::from_millis(ms));
                }
                KEY_SCHEMA_ID => config.schema_id = schema::parse_schema_id(&value)?,
                KEY_SCHEMA_TYPE => config.schema_type = non_empty(&value),
                KEY_MONITORED_DIRECTORY_INTERVAL => {
                    config.monitored_directory_interval =
                        Some(Duration::from_millis(parse_millis(&key, &value)?))
                }
                KEY_BOOTSTRAP_SERVERS => config.bootstrap_servers = non_empty(&value),
                _ => {
                    debug!(key = %key, "Forwarding driver configuration entry");
                    config.driver_properties.insert(key, value);
                }
            }
        }

        Ok(config)
    }

    /// Load a configuration file. `.yaml`/`.yml` files are read as YAML,
    /// everything else as JSON. The document must be a flat object.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let properties = if is_yaml {
            let document: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)?;
            document
                .into_iter()
                .filter_map(|(key, value)| yaml_scalar(&value).map(|v| (key, v)))
                .collect::<Vec<_>>()
        } else {
            let document: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)?;
            document
                .into_iter()
                .filter_map(|(key, value)| json_scalar(&value).map(|v| (key, v)))
                .collect::<Vec<_>>()
        };

        debug!(path = %path.display(), entries = properties.len(), "Loaded configuration file");
        Self::from_properties(properties)
    }

    /// Load the file named by `BRIDGE_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV_VAR)
            .map_err(|_| BridgeError::config(format!("{} is not set", CONFIG_ENV_VAR)))?;
        Self::load(path)
    }

    /// Producer configuration for `topic`.
    pub fn producer(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Default::default()
        }
    }

    /// Consumer configuration for `topics`.
    pub fn consumer<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set the broker addresses.
    pub fn with_bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    /// Set an explicit consumer group id.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the schema id used for framed payloads.
    pub fn with_schema_id(mut self, schema_id: u32) -> Result<Self> {
        self.schema_id = Some(schema::validate_schema_id(schema_id)?);
        Ok(self)
    }

    /// Add a driver pass-through property.
    pub fn with_driver_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_properties.insert(key.into(), value.into());
        self
    }

    /// Consumer group id: the explicit one, or one generated from the host
    /// name, the topic list and (for unique groups) the process id.
    pub fn resolve_group_id(&self) -> String {
        match &self.group_id {
            Some(group_id) => group_id.clone(),
            None => generate_group_id(
                self.group_id_autogen.unwrap_or_default(),
                &host_name(),
                &self.topics,
                std::process::id(),
            ),
        }
    }

    /// Settings handed to the driver. `group_id` is only forwarded in
    /// consumer mode.
    pub fn driver_settings(&self, mode: Mode, group_id: Option<&str>) -> DriverSettings {
        let mut properties = self.driver_properties.clone();
        if let Some(servers) = &self.bootstrap_servers {
            properties.insert(KEY_BOOTSTRAP_SERVERS.to_string(), servers.clone());
        }
        if let (Mode::Consumer, Some(group_id)) = (mode, group_id) {
            properties.insert(KEY_GROUP_ID.to_string(), group_id.to_string());
        }

        DriverSettings {
            mode,
            topic: match mode {
                Mode::Producer => self.topic.clone(),
                Mode::Consumer => None,
            },
            properties,
        }
    }
}

/// True if `key` is interpreted by the bridge rather than the driver.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn split_topics(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::config(format!("invalid {}: '{}'", key, value)))
}

fn json_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
