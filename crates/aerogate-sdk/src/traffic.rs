//! Traffic monitoring attached to an active flight.

use std::sync::{Mutex, MutexGuard};

use aerogate_core::models::TrafficUpdate;

/// Receives traffic advisories for the monitored flight.
pub trait TrafficSubscriber: Send + Sync {
    fn handle_update(&self, updates: &[TrafficUpdate]);
}

/// Handle for a traffic-monitor attachment. Subscribers registered here
/// receive every batch of updates published by the transport layer, in
/// registration order.
pub struct TrafficMonitor {
    flight_id: String,
    subscribers: Mutex<Vec<std::sync::Arc<dyn TrafficSubscriber>>>,
}

impl TrafficMonitor {
    pub fn new(flight_id: impl Into<String>) -> Self {
        Self {
            flight_id: flight_id.into(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn flight_id(&self) -> &str {
        &self.flight_id
    }

    pub fn subscribe(&self, subscriber: std::sync::Arc<dyn TrafficSubscriber>) {
        self.guard().push(subscriber);
    }

    pub fn unsubscribe(&self, subscriber: &std::sync::Arc<dyn TrafficSubscriber>) {
        self.guard()
            .retain(|existing| !std::sync::Arc::ptr_eq(existing, subscriber));
    }

    /// Deliver a batch of updates to all current subscribers.
    pub fn publish(&self, updates: &[TrafficUpdate]) {
        let subscribers = self.guard().clone();
        for subscriber in subscribers {
            subscriber.handle_update(updates);
        }
    }

    fn guard(&self) -> MutexGuard<'_, Vec<std::sync::Arc<dyn TrafficSubscriber>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
