//! Consumer iteration: drain the driver into the inbound queue.

use tracing::{debug, error};

use super::polling::throttle;
use super::state::PollingStatus;
use super::{HandleInner, Setup};
use crate::error::Result;
use crate::event::Event;

pub(super) async fn iteration(inner: &HandleInner, setup: &Setup) -> Result<()> {
    if !inner.state.read().await.consumption_enabled {
        throttle(inner, setup.poll_interval).await;
        return Ok(());
    }

    let schema_mode = setup.schema_id.is_some();
    let mut received = 0usize;

    loop {
        let message = match setup.driver.receive(setup.poll_interval).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                error!(topics = ?setup.topics, error = %e, "Receive failed");
                throttle(inner, setup.poll_interval).await;
                return Err(e);
            }
        };

        let mut state = inner.state.write().await;
        if message.payload.is_empty() {
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Skipping empty message"
            );
        } else {
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                len = message.payload.len(),
                "Message received"
            );
            let event = Event::received(
                &message.topic,
                &message.payload,
                message.header_pairs(),
                schema_mode,
            );
            state.push_inbound(event);
            received += 1;
        }

        if !state.consumption_enabled || state.polling == PollingStatus::StopRequested {
            break;
        }
    }

    if received > 0 {
        debug!(received, "Consumer iteration");
    }
    Ok(())
}
