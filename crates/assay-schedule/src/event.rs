//! Scheduling lifecycle events
//!
//! A schedule publishes the sequence
//! `BeginProcedure → {BeginStep → Proceed* → CompleteStep}* → CompleteProcedure`,
//! with `Interrupt` and `Terminate` possible at any point. Listeners subscribe
//! to an [`EventBus`] and receive events on their own bounded channel;
//! publishing never waits for a listener.

use crate::products::StepState;
use assay_declaration::ExperimentPath;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use ulid::Ulid;

/// Lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulingEvent {
    /// Conducting started
    BeginProcedure { schedule: Ulid, procedure: String },
    /// An instruction started
    BeginStep { schedule: Ulid, path: ExperimentPath },
    /// A running instruction reported progress
    Proceed { schedule: Ulid, path: ExperimentPath },
    /// An instruction reached a final state
    CompleteStep {
        schedule: Ulid,
        path: ExperimentPath,
        state: StepState,
    },
    /// Every instruction reached a final state
    CompleteProcedure { schedule: Ulid, procedure: String },
    /// No further instructions will start
    Interrupt { schedule: Ulid },
    /// The schedule was ended
    Terminate { schedule: Ulid },
}

impl SchedulingEvent {
    /// Schedule the event belongs to
    #[must_use]
    pub fn schedule(&self) -> Ulid {
        match self {
            Self::BeginProcedure { schedule, .. }
            | Self::BeginStep { schedule, .. }
            | Self::Proceed { schedule, .. }
            | Self::CompleteStep { schedule, .. }
            | Self::CompleteProcedure { schedule, .. }
            | Self::Interrupt { schedule }
            | Self::Terminate { schedule } => *schedule,
        }
    }

    /// Path of the instruction the event is about
    #[must_use]
    pub fn path(&self) -> Option<&ExperimentPath> {
        match self {
            Self::BeginStep { path, .. } | Self::Proceed { path, .. } | Self::CompleteStep { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for SchedulingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginProcedure { procedure, .. } => write!(f, "begin procedure {procedure}"),
            Self::BeginStep { path, .. } => write!(f, "begin {path}"),
            Self::Proceed { path, .. } => write!(f, "proceed {path}"),
            Self::CompleteStep { path, state, .. } => write!(f, "complete {path}: {state}"),
            Self::CompleteProcedure { procedure, .. } => write!(f, "complete procedure {procedure}"),
            Self::Interrupt { .. } => f.write_str("interrupt"),
            Self::Terminate { .. } => f.write_str("terminate"),
        }
    }
}

/// Id of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Ulid);

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<SchedulingEvent>,
}

impl Subscription {
    /// Subscription id, for unsubscribing
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<SchedulingEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is ready
    pub fn try_recv(&mut self) -> Option<SchedulingEvent> {
        self.receiver.try_recv().ok()
    }

    /// Every event ready now
    pub fn drain(&mut self) -> Vec<SchedulingEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Fan-out of scheduling events to subscribers
#[derive(Debug)]
pub struct EventBus {
    buffer: usize,
    subscribers: DashMap<SubscriptionId, mpsc::Sender<SchedulingEvent>>,
}

impl EventBus {
    /// Create bus with a per-subscriber capacity
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: DashMap::new(),
        }
    }

    /// Add a subscriber
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = SubscriptionId(Ulid::new());
        self.subscribers.insert(id, sender);
        Subscription { id, receiver }
    }

    /// Remove a subscriber
    ///
    /// Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver an event to every subscriber without waiting
    ///
    /// Events for a full subscriber are dropped; closed subscribers are
    /// removed.
    pub fn publish(&self, event: &SchedulingEvent) {
        tracing::trace!(%event, "publishing scheduling event");
        self.subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(subscription = %id.0, "subscriber full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interrupt() -> SchedulingEvent {
        SchedulingEvent::Interrupt { schedule: Ulid::nil() }
    }

    #[test]
    fn subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(&interrupt());

        assert_eq!(first.try_recv(), Some(interrupt()));
        assert_eq!(second.try_recv(), Some(interrupt()));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(4);
        let mut subscription = bus.subscribe();

        assert!(bus.unsubscribe(subscription.id()));
        assert!(!bus.unsubscribe(subscription.id()));
        bus.publish(&interrupt());

        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn full_subscriber_drops_events() {
        let bus = EventBus::new(1);
        let mut subscription = bus.subscribe();

        bus.publish(&interrupt());
        bus.publish(&SchedulingEvent::Terminate { schedule: Ulid::nil() });

        assert_eq!(subscription.drain(), vec![interrupt()]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn dropped_subscriber_removed() {
        let bus = EventBus::new(1);
        drop(bus.subscribe());
        bus.publish(&interrupt());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn serialized_with_tag() {
        let json = serde_json::to_value(interrupt()).unwrap();
        assert_eq!(json["event"], "interrupt");
    }
}
