// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Engine Events
//
// In-memory fan-out of engine lifecycle events over a tokio broadcast
// channel. Events are dropped when nobody listens; slow subscribers lag and
// are told how many events they missed.

use crate::domain::events::EngineEvent;
use crate::domain::manifold::ManifoldName;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Event bus for publishing and subscribing to engine events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: EngineEvent) {
        trace!("Publishing engine event: {:?}", event);
        // send() only fails when there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for engine events
pub struct EventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Wait for the first event matching `predicate`, skipping the rest
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&EngineEvent) -> bool,
    ) -> Result<EngineEvent, EventBusError> {
        loop {
            match self.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(EventBusError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for the next event concerning `manifold`
    pub async fn next_for(&mut self, manifold: &str) -> Result<EngineEvent, EventBusError> {
        let manifold = ManifoldName::from(manifold);
        self.wait_for(|event| event.manifold() == Some(&manifold)).await
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn installed(name: &str) -> EngineEvent {
        EngineEvent::ManifoldInstalled {
            manifold: ManifoldName::from(name),
            installed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(installed("agent"));

        match receiver.recv().await.unwrap() {
            EngineEvent::ManifoldInstalled { manifold, .. } => assert_eq!(manifold.as_str(), "agent"),
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_next_for_filters_other_manifolds() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(installed("agent"));
        event_bus.publish(EngineEvent::EngineStopping { reason: None });
        event_bus.publish(installed("api-caller"));

        let event = receiver.next_for("api-caller").await.unwrap();
        assert_eq!(event.manifold().map(|m| m.as_str()), Some("api-caller"));
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(installed("agent"));

        // Both receivers should get the event
        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let event_bus = EventBus::new(1);
        event_bus.publish(installed("agent"));
        assert_eq!(event_bus.subscriber_count(), 0);
    }
}
