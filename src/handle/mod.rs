//! Broker handle: one configured connection with its queues and polling loop.
//!
//! A handle is created unconfigured with `BrokerHandle::new`, bound to a mode
//! and a driver with `configure`, and driven either by a background polling
//! task (`start_polling`/`stop_polling`) or inline with `poll_once`.
//!
//! All queue and counter mutation happens under a single readers-writer lock.
//! Delivery reports are pulled from the driver by the polling task and applied
//! under the write lock, so there is no callback re-entrancy.

mod consumer;
mod dump;
mod polling;
mod producer;
mod state;

pub use dump::DumpFileName;
pub use state::{PollingStatus, QueueStatus};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BridgeConfig, Mode, PollTimeout};
use crate::driver::BrokerDriver;
use crate::error::{BridgeError, Result};
use crate::event::{Event, EventId, EventStatus};
use state::HandleState;

/// Fields fixed by `configure`.
pub(crate) struct Setup {
    pub mode: Mode,
    pub topic: Option<String>,
    pub topics: Vec<String>,
    pub group_id: Option<String>,
    pub schema_id: Option<u32>,
    pub bootstrap_servers: Option<String>,
    pub poll_interval: Duration,
    pub poll_timeout: PollTimeout,
    pub driver: Arc<dyn BrokerDriver>,
}

/// State shared between the handle and its polling task.
pub(crate) struct HandleInner {
    pub state: RwLock<HandleState>,
    pub setup: OnceLock<Setup>,
    /// Wakes a throttled polling loop when a stop is requested.
    pub stop: Notify,
    /// Mirrors `HandleState::polling` so stoppers can wait for the loop to exit.
    polling_watch: watch::Sender<PollingStatus>,
    /// Time-ordered id of this handle, part of every dump file name.
    pub instance: Uuid,
    next_id: AtomicU64,
    poll_interval: Duration,
    poll_timeout: PollTimeout,
}

impl HandleInner {
    fn allocate_id(&self) -> EventId {
        EventId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Change the polling status. Callers hold the state write lock.
    pub(crate) fn set_polling(&self, state: &mut HandleState, status: PollingStatus) {
        state.polling = status;
        self.polling_watch.send_replace(status);
    }
}

/// Lower bound for the polling interval; a zero interval would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A configured producer or consumer.
pub struct BrokerHandle {
    inner: Arc<HandleInner>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerHandle {
    /// Create an unconfigured handle. `poll_interval` bounds every blocking
    /// driver call made by the polling loop; `poll_timeout` bounds the loop's
    /// lifetime. Both can be overridden by the configuration.
    pub fn new(poll_interval: Duration, poll_timeout: PollTimeout) -> Self {
        let (polling_watch, _) = watch::channel(PollingStatus::Stopped);
        Self {
            inner: Arc::new(HandleInner {
                state: RwLock::new(HandleState::new()),
                setup: OnceLock::new(),
                stop: Notify::new(),
                polling_watch,
                instance: Uuid::now_v7(),
                next_id: AtomicU64::new(1),
                poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
                poll_timeout,
            }),
            poller: Mutex::new(None),
        }
    }

    /// Bind the handle to `mode` and `driver`.
    ///
    /// Producers need a topic. Consumers need at least one topic; their group
    /// id is taken from the configuration or generated. On failure the handle
    /// stays unconfigured.
    pub async fn configure(
        &self,
        mode: Mode,
        config: &BridgeConfig,
        driver: Arc<dyn BrokerDriver>,
    ) -> Result<()> {
        // Held for the whole call so concurrent configures serialize.
        let state = self.inner.state.write().await;
        ensure_alive(&state)?;
        if self.inner.setup.get().is_some() {
            return Err(BridgeError::config("handle is already configured"));
        }

        let (topic, topics, group_id) = match mode {
            Mode::Producer => {
                let topic = config
                    .topic
                    .clone()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| BridgeError::config("producer requires a topic"))?;
                (Some(topic), Vec::new(), None)
            }
            Mode::Consumer => {
                if config.topics.is_empty() {
                    return Err(BridgeError::config("consumer requires at least one topic"));
                }
                (None, config.topics.clone(), Some(config.resolve_group_id()))
            }
        };

        let settings = config.driver_settings(mode, group_id.as_deref());
        driver.configure(&settings).await?;

        if mode == Mode::Consumer {
            if let Err(e) = driver.subscribe(&topics).await {
                if let Err(close_err) = driver.close().await {
                    warn!(error = %close_err, "Failed to close driver after subscribe failure");
                }
                return Err(e);
            }
        }

        let setup = Setup {
            mode,
            topic,
            topics,
            group_id,
            schema_id: config.schema_id,
            bootstrap_servers: config.bootstrap_servers.clone(),
            poll_interval: config
                .poll_interval
                .map(|i| i.max(MIN_POLL_INTERVAL))
                .unwrap_or(self.inner.poll_interval),
            poll_timeout: config.poll_timeout.unwrap_or(self.inner.poll_timeout),
            driver,
        };

        info!(
            mode = %setup.mode,
            topic = ?setup.topic,
            topics = ?setup.topics,
            group_id = ?setup.group_id,
            schema_id = ?setup.schema_id,
            poll_interval_ms = setup.poll_interval.as_millis() as u64,
            "Broker handle configured"
        );

        if self.inner.setup.set(setup).is_err() {
            return Err(BridgeError::config("handle is already configured"));
        }
        drop(state);
        Ok(())
    }

    /// Instance id written into this handle's dump file names.
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance
    }

    pub fn is_configured(&self) -> bool {
        self.inner.setup.get().is_some()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.inner.setup.get().map(|s| s.mode)
    }

    /// Producer topic.
    pub fn topic(&self) -> Option<&str> {
        self.inner.setup.get().and_then(|s| s.topic.as_deref())
    }

    /// Consumer topics.
    pub fn topics(&self) -> &[String] {
        self.inner
            .setup
            .get()
            .map(|s| s.topics.as_slice())
            .unwrap_or_default()
    }

    /// Consumer group id in effect.
    pub fn group_id(&self) -> Option<&str> {
        self.inner.setup.get().and_then(|s| s.group_id.as_deref())
    }

    pub fn schema_id(&self) -> Option<u32> {
        self.inner.setup.get().and_then(|s| s.schema_id)
    }

    /// Polling interval in effect, configuration override included.
    pub fn poll_interval(&self) -> Duration {
        self.inner
            .setup
            .get()
            .map(|s| s.poll_interval)
            .unwrap_or(self.inner.poll_interval)
    }

    /// Queue an event for sending. The handle takes ownership of it.
    pub async fn produce(&self, mut event: Event) -> Result<EventId> {
        let setup = self.producer_setup()?;
        if event.status() != EventStatus::Created {
            return Err(BridgeError::validation(format!(
                "only created events can be produced, got {:?}",
                event.status()
            )));
        }

        let mut state = self.inner.state.write().await;
        ensure_alive(&state)?;

        let id = self.inner.allocate_id();
        event.enqueue(id);
        debug!(
            event_id = %id,
            topic = ?setup.topic,
            len = event.len(),
            "Event queued"
        );
        state.push_outbound(event);
        Ok(id)
    }

    /// Pop the oldest received event, if any. The caller takes ownership.
    pub async fn get_event(&self) -> Option<Event> {
        let mut state = self.inner.state.write().await;
        let event = state.pop_inbound()?;
        debug!(topic = ?event.origin_topic(), len = event.len(), "Event handed out");
        Some(event)
    }

    /// Spawn the polling loop.
    pub async fn start_polling(&self) -> Result<()> {
        let setup = self.setup()?;
        {
            let mut state = self.inner.state.write().await;
            ensure_alive(&state)?;
            if state.polling != PollingStatus::Stopped {
                return Err(BridgeError::concurrency(format!(
                    "polling loop is already {:?}",
                    state.polling
                )));
            }
            self.inner.set_polling(&mut state, PollingStatus::Running);

            // Stored before the lock is released so a stop always finds it.
            // A previous loop that timed out on its own has already finished.
            let task = tokio::spawn(polling::run(Arc::clone(&self.inner)));
            *self.poller_slot() = Some(task);
        }

        info!(mode = %setup.mode, "Polling started");
        Ok(())
    }

    /// Request a stop and wait for the polling loop to exit.
    ///
    /// Concurrent callers all wait for the same loop. Returns `false` if no
    /// loop was running.
    pub async fn stop_polling(&self) -> Result<bool> {
        {
            let mut state = self.inner.state.write().await;
            match state.polling {
                PollingStatus::Stopped => {
                    self.poller_slot().take();
                    debug!("Polling already stopped");
                    return Ok(false);
                }
                PollingStatus::StopRequested => {
                    debug!("Polling stop already requested");
                }
                PollingStatus::Running => {
                    self.inner
                        .set_polling(&mut state, PollingStatus::StopRequested)
                }
            }
        }
        self.inner.stop.notify_waiters();

        // One caller joins the task; the others wait for the loop to report
        // `Stopped`.
        let task = self.poller_slot().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    let mut state = self.inner.state.write().await;
                    self.inner.set_polling(&mut state, PollingStatus::Stopped);
                    return Err(BridgeError::Resource(format!("polling task failed: {}", e)));
                }
            }
            None => {
                let mut status = self.inner.polling_watch.subscribe();
                status
                    .wait_for(|s| *s == PollingStatus::Stopped)
                    .await
                    .map_err(|e| BridgeError::Resource(format!("polling status lost: {}", e)))?;
            }
        }

        info!("Polling stopped");
        Ok(true)
    }

    /// Run one polling iteration inline.
    pub async fn poll_once(&self) -> Result<()> {
        let setup = self.setup()?;
        ensure_alive(&*self.inner.state.read().await)?;
        polling::iteration(&self.inner, setup).await
    }

    /// Current queue counters.
    pub async fn status(&self) -> QueueStatus {
        self.inner.state.read().await.counters
    }

    /// Counters recomputed by scanning the queues. Always equal to `status()`
    /// between iterations.
    pub async fn recount(&self) -> QueueStatus {
        self.inner.state.read().await.recount(self.mode())
    }

    pub async fn polling_status(&self) -> PollingStatus {
        self.inner.state.read().await.polling
    }

    pub async fn enable_production(&self) {
        self.inner.state.write().await.production_enabled = true;
        debug!("Production enabled");
    }

    /// Pause sending. The polling loop keeps running but makes no driver calls.
    pub async fn disable_production(&self) {
        self.inner.state.write().await.production_enabled = false;
        debug!("Production disabled");
    }

    pub async fn enable_consumption(&self) {
        self.inner.state.write().await.consumption_enabled = true;
        debug!("Consumption enabled");
    }

    /// Pause receiving. The polling loop keeps running but makes no driver calls.
    pub async fn disable_consumption(&self) {
        self.inner.state.write().await.consumption_enabled = false;
        debug!("Consumption disabled");
    }

    /// Write every unacknowledged outbound event to `dir`, one file each.
    /// Returns the number of files written.
    pub async fn dump_unprocessed(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let setup = self.producer_setup()?;
        dump::dump_unprocessed(&self.inner, setup, dir.as_ref()).await
    }

    /// Queue the dump files found in `dir` that match this handle's topic and
    /// broker. Returns the number of events queued.
    pub async fn load_unprocessed(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let setup = self.producer_setup()?;
        dump::load_unprocessed(&self.inner, setup, dir.as_ref()).await
    }

    /// `(id, reason)` of every event whose send or delivery failed.
    pub async fn failed_deliveries(&self) -> Vec<(EventId, String)> {
        let state = self.inner.state.read().await;
        state
            .outbound
            .iter()
            .filter(|e| e.status() == EventStatus::Error)
            .filter_map(|e| {
                e.id()
                    .map(|id| (id, e.failure().unwrap_or_default().to_string()))
            })
            .collect()
    }

    /// Move every failed event back to `Queued`. Returns how many were moved.
    pub async fn retry_failed(&self) -> usize {
        let mut state = self.inner.state.write().await;
        let HandleState {
            outbound, counters, ..
        } = &mut *state;

        let mut retried = 0;
        for event in outbound
            .iter_mut()
            .filter(|e| e.status() == EventStatus::Error)
        {
            event.requeue();
            counters.record(EventStatus::Error, EventStatus::Queued);
            retried += 1;
        }

        if retried > 0 {
            info!(count = retried, "Failed events re-queued");
        }
        retried
    }

    /// Stop polling, close the driver and drop every queued event.
    ///
    /// Idempotent. Every later operation fails with `BridgeError::Resource`.
    pub async fn delete(&self) -> Result<()> {
        if self.inner.state.read().await.deleted {
            debug!("Handle already deleted");
            return Ok(());
        }

        self.stop_polling().await?;

        if let Some(setup) = self.inner.setup.get() {
            if let Err(e) = setup.driver.close().await {
                warn!(error = %e, "Failed to close driver");
            }
        }

        let mut state = self.inner.state.write().await;
        if state.deleted {
            return Ok(());
        }
        state.deleted = true;
        let (outbound, inbound) = state.drain();

        info!(
            dropped_outbound = outbound,
            dropped_inbound = inbound,
            "Broker handle deleted"
        );
        Ok(())
    }

    fn setup(&self) -> Result<&Setup> {
        self.inner
            .setup
            .get()
            .ok_or_else(|| BridgeError::config("handle is not configured"))
    }

    fn producer_setup(&self) -> Result<&Setup> {
        let setup = self.setup()?;
        if setup.mode != Mode::Producer {
            return Err(BridgeError::config(format!(
                "operation requires a producer handle, this one is a {}",
                setup.mode
            )));
        }
        Ok(setup)
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        let task = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

fn ensure_alive(state: &HandleState) -> Result<()> {
    if state.deleted {
        return Err(BridgeError::Resource("handle has been deleted".to_string()));
    }
    Ok(())
}
