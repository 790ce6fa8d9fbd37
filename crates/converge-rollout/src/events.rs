//! Rollout phase transition events.
//!
//! Every transition a [`Rollout`](crate::Rollout) makes is handed to its
//! sink synchronously, in the order the transitions happen.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{info, warn};

use converge_state::RolloutEvent;

/// Receives one event per rollout phase transition.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RolloutEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RolloutEvent) {
        info!(
            workload = %event.workload,
            phase = %event.phase,
            old_revision = event.old_revision,
            new_revision = event.new_revision,
            rollback_revision = ?event.rollback_revision,
            "rollout phase changed"
        );
    }
}

/// Forwards events over an unbounded tokio channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RolloutEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RolloutEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RolloutEvent) {
        if self.tx.send(event).is_err() {
            warn!("rollout event receiver dropped");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RolloutEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<RolloutEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: RolloutEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_state::RolloutPhase;

    fn event(phase: RolloutPhase) -> RolloutEvent {
        RolloutEvent {
            workload: "web".to_string(),
            phase,
            old_revision: 1,
            new_revision: 2,
            rollback_revision: None,
            at: 1000,
        }
    }

    #[tokio::test]
    async fn channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(event(RolloutPhase::Progressing));
        sink.emit(event(RolloutPhase::Paused));
        sink.emit(event(RolloutPhase::Progressing));

        let phases: Vec<_> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|e| e.unwrap().phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                RolloutPhase::Progressing,
                RolloutPhase::Paused,
                RolloutPhase::Progressing
            ]
        );
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(event(RolloutPhase::Complete));
    }
}
