//! Mutable handle state, guarded by the handle's readers-writer lock.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::Mode;
use crate::event::{Event, EventStatus};

/// Status of a handle's polling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingStatus {
    #[default]
    Stopped,
    Running,
    /// A stop was requested; the loop exits at its next iteration boundary.
    StopRequested,
}

/// Queue counters as reported by `BrokerHandle::status`.
///
/// In producer mode they count outbound events by state. In consumer mode
/// `queued` counts received events waiting for `get_event`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub waiting: usize,
    pub error: usize,
}

impl QueueStatus {
    pub fn new(queued: usize, waiting: usize, error: usize) -> Self {
        Self {
            queued,
            waiting,
            error,
        }
    }

    /// Events not yet acknowledged.
    pub fn total(&self) -> usize {
        self.queued + self.waiting + self.error
    }

    fn slot(&mut self, status: EventStatus) -> Option<&mut usize> {
        match status {
            EventStatus::Created | EventStatus::Queued => Some(&mut self.queued),
            EventStatus::WaitingAck => Some(&mut self.waiting),
            EventStatus::Error => Some(&mut self.error),
            EventStatus::Ok => None,
        }
    }

    /// Move one event from the `from` bucket to the `to` bucket.
    pub(crate) fn record(&mut self, from: EventStatus, to: EventStatus) {
        if let Some(count) = self.slot(from) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = self.slot(to) {
            *count += 1;
        }
    }
}

#[derive(Debug)]
pub(crate) struct HandleState {
    pub outbound: VecDeque<Event>,
    pub inbound: VecDeque<Event>,
    pub counters: QueueStatus,
    pub production_enabled: bool,
    pub consumption_enabled: bool,
    pub polling: PollingStatus,
    pub deleted: bool,
}

impl HandleState {
    pub fn new() -> Self {
        Self {
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            counters: QueueStatus::default(),
            production_enabled: true,
            consumption_enabled: true,
            polling: PollingStatus::Stopped,
            deleted: false,
        }
    }

    /// Append a queued event to the outbound queue.
    pub fn push_outbound(&mut self, event: Event) {
        self.counters.queued += 1;
        self.outbound.push_back(event);
    }

    /// Append a received event to the inbound queue.
    pub fn push_inbound(&mut self, event: Event) {
        self.counters.queued += 1;
        self.inbound.push_back(event);
    }

    /// Pop the oldest received event.
    pub fn pop_inbound(&mut self) -> Option<Event> {
        let event = self.inbound.pop_front()?;
        self.counters.queued = self.counters.queued.saturating_sub(1);
        Some(event)
    }

    /// Counters computed by scanning the queues.
    pub fn recount(&self, mode: Option<Mode>) -> QueueStatus {
        match mode {
            Some(Mode::Consumer) => QueueStatus::new(self.inbound.len(), 0, 0),
            _ => {
                let mut status = QueueStatus::default();
                for event in &self.outbound {
                    match event.status() {
                        EventStatus::Created | EventStatus::Queued => status.queued += 1,
                        EventStatus::WaitingAck => status.waiting += 1,
                        EventStatus::Error => status.error += 1,
                        EventStatus::Ok => {}
                    }
                }
                status
            }
        }
    }

    /// Drop every queued event and reset the counters. Returns the number of
    /// events dropped from (outbound, inbound).
    pub fn drain(&mut self) -> (usize, usize) {
        let dropped = (self.outbound.len(), self.inbound.len());
        self.outbound.clear();
        self.inbound.clear();
        self.counters = QueueStatus::default();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventId;

    fn queued(id: u64) -> Event {
        let mut event = Event::new("x");
        event.enqueue(EventId(id));
        event
    }

    #[test]
    fn test_record_moves_between_buckets() {
        let mut status = QueueStatus::new(1, 0, 0);

        status.record(EventStatus::Queued, EventStatus::WaitingAck);
        assert_eq!(status, QueueStatus::new(0, 1, 0));

        status.record(EventStatus::WaitingAck, EventStatus::Error);
        assert_eq!(status, QueueStatus::new(0, 0, 1));

        status.record(EventStatus::Error, EventStatus::Queued);
        assert_eq!(status, QueueStatus::new(1, 0, 0));
    }

    #[test]
    fn test_record_ack_leaves_counters() {
        let mut status = QueueStatus::new(0, 1, 0);
        status.record(EventStatus::WaitingAck, EventStatus::Ok);
        assert_eq!(status.total(), 0);
    }

    #[test]
    fn test_recount_matches_incremental_counters() {
        let mut state = HandleState::new();
        state.push_outbound(queued(1));
        state.push_outbound(queued(2));

        let event = &mut state.outbound[0];
        event.set_status(EventStatus::WaitingAck);
        state
            .counters
            .record(EventStatus::Queued, EventStatus::WaitingAck);

        assert_eq!(state.counters, state.recount(Some(Mode::Producer)));
        assert_eq!(state.counters, QueueStatus::new(1, 1, 0));
    }

    #[test]
    fn test_inbound_fifo_and_counters() {
        let mut state = HandleState::new();
        state.push_inbound(Event::received("a", b"1", Vec::new(), false));
        state.push_inbound(Event::received("a", b"2", Vec::new(), false));

        assert_eq!(state.recount(Some(Mode::Consumer)), QueueStatus::new(2, 0, 0));
        assert_eq!(state.pop_inbound().unwrap().payload(), b"1");
        assert_eq!(state.counters.queued, 1);
    }

    #[test]
    fn test_queue_status_serializes() {
        let json = serde_json::to_string(&QueueStatus::new(1, 2, 3)).unwrap();
        assert_eq!(json, r#"{"queued":1,"waiting":2,"error":3}"#);
        assert_eq!(
            serde_json::to_string(&PollingStatus::StopRequested).unwrap(),
            r#""stop_requested""#
        );
    }

    #[test]
    fn test_drain() {
        let mut state = HandleState::new();
        state.push_outbound(queued(1));
        state.push_inbound(Event::received("a", b"1", Vec::new(), false));

        assert_eq!(state.drain(), (1, 1));
        assert_eq!(state.counters.total(), 0);
    }
}
