//! Background polling loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::state::PollingStatus;
use super::{consumer, producer, HandleInner, Setup};
use crate::config::Mode;
use crate::error::Result;

/// Loop body of the task spawned by `start_polling`.
///
/// Runs iterations until a stop is requested or the poll timeout elapses,
/// then marks the handle `Stopped`.
pub(super) async fn run(inner: Arc<HandleInner>) {
    let Some(setup) = inner.setup.get() else {
        let mut state = inner.state.write().await;
        inner.set_polling(&mut state, PollingStatus::Stopped);
        return;
    };

    let started = Instant::now();
    let mut iterations: u64 = 0;
    debug!(mode = %setup.mode, "Polling loop running");

    loop {
        if let Err(e) = iteration(&inner, setup).await {
            warn!(mode = %setup.mode, error = %e, "Polling iteration failed");
        }
        iterations += 1;

        if inner.state.read().await.polling == PollingStatus::StopRequested {
            debug!(iterations, "Polling loop stop requested");
            break;
        }
        if let Some(limit) = setup.poll_timeout.duration() {
            if started.elapsed() >= limit {
                info!(
                    iterations,
                    timeout_ms = limit.as_millis() as u64,
                    "Polling loop timed out"
                );
                break;
            }
        }
    }

    let mut state = inner.state.write().await;
    inner.set_polling(&mut state, PollingStatus::Stopped);
}

/// One iteration in the handle's mode.
pub(super) async fn iteration(inner: &HandleInner, setup: &Setup) -> Result<()> {
    match setup.mode {
        Mode::Producer => producer::iteration(inner, setup).await,
        Mode::Consumer => consumer::iteration(inner, setup).await,
    }
}

/// Sleep for `interval`, returning early if a stop is requested.
pub(super) async fn throttle(inner: &HandleInner, interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = inner.stop.notified() => {
            debug!("Throttle interrupted by stop request");
        }
    }
}
