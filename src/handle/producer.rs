//! Producer iteration: send queued events, collect delivery reports, reconcile.

use std::path::PathBuf;

use tracing::{debug, error, warn};

use super::polling::throttle;
use super::state::HandleState;
use super::{HandleInner, Setup};
use crate::driver::{BrokerDriver, DeliveryReport, SendRequest};
use crate::error::Result;
use crate::event::EventStatus;

pub(super) async fn iteration(inner: &HandleInner, setup: &Setup) -> Result<()> {
    if !inner.state.read().await.production_enabled {
        throttle(inner, setup.poll_interval).await;
        return Ok(());
    }

    let topic = setup.topic.as_deref().unwrap_or_default();

    let sent = {
        let mut state = inner.state.write().await;
        send_queued(&mut state, setup.driver.as_ref(), topic).await
    };

    let reports = setup
        .driver
        .poll_delivery_reports(setup.poll_interval)
        .await?;

    let (delivered, cleanup) = {
        let mut state = inner.state.write().await;
        apply_reports(&mut state, reports);
        sweep_delivered(&mut state)
    };

    if sent > 0 || delivered > 0 {
        debug!(topic, sent, delivered, "Producer iteration");
    }

    remove_cleanup_paths(cleanup).await;
    Ok(())
}

/// Hand every queued event to the driver. Returns the number accepted.
async fn send_queued(state: &mut HandleState, driver: &dyn BrokerDriver, topic: &str) -> usize {
    let HandleState {
        outbound, counters, ..
    } = state;

    let mut sent = 0;
    for event in outbound.iter_mut() {
        let from = event.status();
        if !matches!(from, EventStatus::Created | EventStatus::Queued) {
            continue;
        }
        let Some(id) = event.id() else {
            continue;
        };

        let request = SendRequest {
            id,
            topic,
            payload: event.wire_bytes(),
            headers: event.headers().map(|h| h.as_slice()).unwrap_or_default(),
        };

        let result = driver.send(request).await;
        match result {
            Ok(()) => {
                event.set_status(EventStatus::WaitingAck);
                counters.record(from, EventStatus::WaitingAck);
                sent += 1;
            }
            Err(e) => {
                warn!(event_id = %id, topic, error = %e, "Send failed");
                event.fail(e.to_string());
                counters.record(from, EventStatus::Error);
            }
        }
    }
    sent
}

fn apply_reports(state: &mut HandleState, reports: Vec<DeliveryReport>) {
    let HandleState {
        outbound, counters, ..
    } = state;

    for report in reports {
        let Some(event) = outbound
            .iter_mut()
            .find(|e| e.id() == Some(report.id) && e.status() == EventStatus::WaitingAck)
        else {
            warn!(event_id = %report.id, "Delivery report for unknown event");
            continue;
        };

        match report.outcome {
            Ok(()) => {
                event.set_status(EventStatus::Ok);
                counters.record(EventStatus::WaitingAck, EventStatus::Ok);
            }
            Err(reason) => {
                warn!(event_id = %report.id, reason = %reason, "Delivery failed");
                event.fail(reason);
                counters.record(EventStatus::WaitingAck, EventStatus::Error);
            }
        }
    }
}

/// Unlink delivered events. Returns how many were removed and the files to
/// delete once the lock is released.
fn sweep_delivered(state: &mut HandleState) -> (usize, Vec<PathBuf>) {
    let mut delivered = 0;
    let mut cleanup = Vec::new();
    state.outbound.retain_mut(|event| {
        if event.status() != EventStatus::Ok {
            return true;
        }
        delivered += 1;
        cleanup.extend(event.take_cleanup_paths());
        false
    });
    (delivered, cleanup)
}

async fn remove_cleanup_paths(paths: Vec<PathBuf>) {
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed file of delivered event"),
            Err(e) => error!(
                path = %path.display(),
                error = %e,
                "Failed to remove file of delivered event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventId};

    fn state_with(ids: &[u64]) -> HandleState {
        let mut state = HandleState::new();
        for id in ids {
            let mut event = Event::new(format!("payload-{}", id));
            event.enqueue(EventId(*id));
            state.push_outbound(event);
        }
        state
    }

    fn mark_waiting(state: &mut HandleState) {
        for event in state.outbound.iter_mut() {
            event.set_status(EventStatus::WaitingAck);
            state
                .counters
                .record(EventStatus::Queued, EventStatus::WaitingAck);
        }
    }

    #[test]
    fn test_apply_reports_updates_counters() {
        let mut state = state_with(&[1, 2]);
        mark_waiting(&mut state);

        apply_reports(
            &mut state,
            vec![
                DeliveryReport::delivered(EventId(1)),
                DeliveryReport::failed(EventId(2), "broker down"),
            ],
        );

        assert_eq!(state.counters, state.recount(None));
        assert_eq!(state.counters.error, 1);
        assert_eq!(state.counters.waiting, 0);
        assert_eq!(state.outbound[1].failure(), Some("broker down"));
    }

    #[test]
    fn test_apply_reports_ignores_unknown_ids() {
        let mut state = state_with(&[1]);
        mark_waiting(&mut state);

        apply_reports(&mut state, vec![DeliveryReport::delivered(EventId(99))]);

        assert_eq!(state.counters.waiting, 1);
        assert_eq!(state.outbound[0].status(), EventStatus::WaitingAck);
    }

    #[test]
    fn test_sweep_delivered_collects_cleanup_paths() {
        let mut state = HandleState::new();
        let mut event = Event::new("x").with_cleanup_path("/tmp/x.dump");
        event.enqueue(EventId(1));
        state.push_outbound(event);
        let mut other = Event::new("y");
        other.enqueue(EventId(2));
        state.push_outbound(other);

        state.outbound[0].set_status(EventStatus::Ok);
        state.counters.record(EventStatus::Queued, EventStatus::Ok);

        let (delivered, cleanup) = sweep_delivered(&mut state);

        assert_eq!(delivered, 1);
        assert_eq!(cleanup, vec![PathBuf::from("/tmp/x.dump")]);
        assert_eq!(state.outbound.len(), 1);
        assert_eq!(state.counters, state.recount(None));
    }
}
