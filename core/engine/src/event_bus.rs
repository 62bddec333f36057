//! Structured activity stream. Publishers never block on subscribers;
//! `tokio::sync::broadcast` already gives each subscriber its own bounded
//! queue with drop-oldest-on-overflow semantics, which is exactly the
//! delivery contract this needs.

use shared_types::{Event, IncidentId};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_REPLAY_CAPACITY: usize = 1000;

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    replay: Mutex<VecDeque<Event>>,
    replay_capacity: usize,
}

pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    incident_filter: Option<IncidentId>,
}

impl Subscription {
    /// Returns the next event matching the filter, or `None` if the
    /// publisher side has been dropped. A lagged subscriber receives a
    /// synthetic `subscriber_lag` warning event instead of panicking.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(lag_event(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &Event) -> bool {
        match self.incident_filter {
            Some(id) => event.incident_id == Some(id),
            None => true,
        }
    }
}

fn lag_event(skipped: u64) -> Event {
    Event {
        timestamp: chrono::Utc::now(),
        level: shared_types::EventLevel::Warning,
        message: format!("subscriber_lag: dropped {skipped} events"),
        incident_id: None,
        stage: None,
        integration: None,
        action: None,
        progress: None,
        attributes: Default::default(),
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLAY_CAPACITY)
    }

    pub fn with_capacities(queue_capacity: usize, replay_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(queue_capacity.max(1));
        EventBus {
            sender,
            replay: Mutex::new(VecDeque::with_capacity(replay_capacity)),
            replay_capacity,
        }
    }

    /// Publishes an event. Never blocks: if there are no subscribers this
    /// is a no-op aside from the replay buffer append.
    pub fn publish(&self, event: Event) {
        {
            let mut replay = self.replay.lock().expect("event bus replay mutex poisoned");
            if replay.len() >= self.replay_capacity {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        let _ = self.sender.send(event);
    }

    /// Subscribes to the live feed, optionally filtered by incident id.
    pub fn subscribe(&self, incident_filter: Option<IncidentId>) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            incident_filter,
        }
    }

    /// Returns the recent replay history, most recent last, matching an
    /// optional incident filter. Used so a new subscriber can catch up.
    pub fn replay(&self, incident_filter: Option<IncidentId>) -> Vec<Event> {
        let replay = self.replay.lock().expect("event bus replay mutex poisoned");
        replay
            .iter()
            .filter(|e| match incident_filter {
                Some(id) => e.incident_id == Some(id),
                None => true,
            })
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::EventLevel;
    use uuid::Uuid;

    fn event(incident_id: Option<IncidentId>, message: &str) -> Event {
        Event {
            timestamp: chrono::Utc::now(),
            level: EventLevel::Info,
            message: message.to_string(),
            incident_id,
            stage: None,
            integration: None,
            action: None,
            progress: None,
            attributes: Default::default(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        bus.publish(event(None, "hello"));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.message, "hello");
    }

    #[tokio::test]
    async fn subscriber_filters_by_incident_id() {
        let bus = EventBus::new();
        let incident = Uuid::new_v4();
        let mut sub = bus.subscribe(Some(incident));
        bus.publish(event(None, "unrelated"));
        bus.publish(event(Some(incident), "for me"));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.message, "for me");
    }

    #[tokio::test]
    async fn replay_returns_recent_history_for_new_subscribers() {
        let bus = EventBus::new();
        bus.publish(event(None, "first"));
        bus.publish(event(None, "second"));
        let history = bus.replay(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].message, "second");
    }

    #[tokio::test]
    async fn slow_subscriber_gets_a_lag_warning_instead_of_blocking_publisher() {
        let bus = EventBus::with_capacities(2, 10);
        let mut sub = bus.subscribe(None);
        for i in 0..10 {
            bus.publish(event(None, &format!("event-{i}")));
        }
        let received = sub.recv().await.unwrap();
        assert_eq!(received.level, EventLevel::Warning);
        assert!(received.message.contains("subscriber_lag"));
    }
}
