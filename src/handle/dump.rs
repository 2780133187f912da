//! Dump and restore of unacknowledged outbound events.
//!
//! Dump files live flat in one directory:
//! ```text
//! {dir}/
//!   {topic}+{instance}-{event_id}.{base64url(bootstrap.servers)}
//! ```
//!
//! `instance` is the time-ordered id of the handle that wrote the file, so
//! handles sharing a directory never overwrite each other's dumps. The broker
//! tag ties a file to the cluster it was meant for, so a restore never
//! replays events against a different broker.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::PollingStatus;
use super::{ensure_alive, HandleInner, Setup};
use crate::error::{BridgeError, Result};
use crate::event::{Event, EventId};

/// Parsed name of a dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFileName {
    pub topic: String,
    /// Instance id of the handle that wrote the file.
    pub instance: Uuid,
    pub id: EventId,
    /// `bootstrap.servers` of the handle that wrote the file.
    pub broker: String,
}

impl DumpFileName {
    pub fn new(
        topic: impl Into<String>,
        instance: Uuid,
        id: EventId,
        broker: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            instance,
            id,
            broker: broker.into(),
        }
    }

    /// Parse a file name. Returns `None` for names that do not follow the
    /// dump naming.
    pub fn parse(name: &str) -> Option<Self> {
        let (topic, rest) = name.rsplit_once('+')?;
        let (stem, tag) = rest.split_once('.')?;
        let (instance, id) = stem.split_once('-')?;
        if topic.is_empty() || instance.len() != 32 {
            return None;
        }
        let instance = Uuid::try_parse(instance).ok()?;
        let id = id.parse::<u64>().ok()?;
        let broker = URL_SAFE_NO_PAD.decode(tag).ok()?;
        let broker = String::from_utf8(broker).ok()?;
        Some(Self::new(topic, instance, EventId(id), broker))
    }
}

impl fmt::Display for DumpFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}-{}.{}",
            self.topic,
            self.instance.simple(),
            self.id,
            URL_SAFE_NO_PAD.encode(self.broker.as_bytes())
        )
    }
}

pub(super) async fn dump_unprocessed(inner: &HandleInner, setup: &Setup, dir: &Path) -> Result<usize> {
    // The read lock keeps the loop from being started while files are written.
    let state = inner.state.read().await;
    ensure_alive(&state)?;
    if state.polling != PollingStatus::Stopped {
        return Err(BridgeError::concurrency(
            "cannot dump while the polling loop is running",
        ));
    }
    if state.counters.total() == 0 {
        debug!(dir = %dir.display(), "Nothing to dump");
        return Ok(0);
    }

    fs::create_dir_all(dir).await?;

    let topic = setup.topic.as_deref().unwrap_or_default();
    let broker = setup.bootstrap_servers.as_deref().unwrap_or_default();

    let mut written = 0;
    for event in state.outbound.iter().filter(|e| e.status().is_unresolved()) {
        let Some(id) = event.id() else {
            continue;
        };
        // An event restored from this directory keeps its original file.
        let path = match restored_from(event, dir) {
            Some(path) => path.clone(),
            None => dir.join(DumpFileName::new(topic, inner.instance, id, broker).to_string()),
        };
        write_atomic(&path, event.payload()).await?;
        debug!(
            event_id = %id,
            status = ?event.status(),
            path = %path.display(),
            "Dumped event"
        );
        written += 1;
    }

    info!(count = written, dir = %dir.display(), "Dumped unprocessed events");
    Ok(written)
}

pub(super) async fn load_unprocessed(inner: &HandleInner, setup: &Setup, dir: &Path) -> Result<usize> {
    ensure_alive(&*inner.state.read().await)?;

    let topic = setup.topic.as_deref().unwrap_or_default();
    let broker = setup.bootstrap_servers.as_deref().unwrap_or_default();

    let mut candidates: Vec<(Uuid, EventId, PathBuf)> = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let Some(parsed) = DumpFileName::parse(name) else {
            warn!(path = %path.display(), "Skipping file with unexpected name");
            continue;
        };
        if parsed.topic != topic {
            warn!(
                path = %path.display(),
                file_topic = %parsed.topic,
                topic,
                "Skipping dump file for another topic"
            );
            continue;
        }
        if parsed.broker != broker {
            warn!(
                path = %path.display(),
                file_broker = %parsed.broker,
                broker,
                "Skipping dump file for another broker"
            );
            continue;
        }
        candidates.push((parsed.instance, parsed.id, path));
    }
    // Instance ids are time-ordered, so this replays in original production order.
    candidates.sort();

    let mut events = Vec::with_capacity(candidates.len());
    for (_, _, path) in candidates {
        let payload = fs::read(&path).await?;
        let event = Event::with_optional_schema(payload, setup.schema_id)?.with_cleanup_path(&path);
        events.push((path, event));
    }

    let mut state = inner.state.write().await;
    ensure_alive(&state)?;

    let mut loaded = 0;
    for (path, mut event) in events {
        let already_queued = state
            .outbound
            .iter()
            .any(|e| e.cleanup_paths().contains(&path));
        if already_queued {
            debug!(path = %path.display(), "Dump file already queued");
            continue;
        }
        let id = inner.allocate_id();
        event.enqueue(id);
        debug!(event_id = %id, path = %path.display(), "Loaded dumped event");
        state.push_outbound(event);
        loaded += 1;
    }

    info!(count = loaded, dir = %dir.display(), "Loaded unprocessed events");
    Ok(loaded)
}

/// Dump file in `dir` the event was loaded from, if any.
fn restored_from<'a>(event: &'a Event, dir: &Path) -> Option<&'a PathBuf> {
    event.cleanup_paths().iter().find(|path| {
        path.parent() == Some(dir)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(DumpFileName::parse)
                .is_some()
    })
}

/// Write using temp file + rename so a crash never leaves a partial dump.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(format!(".{}.tmp", name)),
        None => path.with_extension("tmp"),
    };
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}
