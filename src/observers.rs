//! ==============================================================================
//! observers.rs - live observer registry and fan-out
//! ==============================================================================
//!
//! purpose:
//!     every connected observer (dashboard tab, logger, ...) owns a bounded
//!     outbound queue. the pipeline only ever does a non-blocking push into
//!     those queues; a per-session task drains its own queue onto the socket.
//!     one slow or dead observer therefore never holds up ingestion or the
//!     other observers.
//!
//! failure policy:
//!     - queue closed (session gone mid-broadcast): dropped silently
//!     - queue full (observer not keeping up): dropped with a warning
//!     in both cases the observer is unregistered. dropping its sender ends
//!     the session's receive loop, which closes the socket.
//!
//! relationships:
//!     - used by: pipeline.rs (broadcast_all after each committed mutation)
//!     - used by: server.rs (websocket sessions drain ObserverHandle)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::alerts::{AlertEvent, AlertThresholds};
use crate::domain::Reading;
use crate::error::DeliveryError;
use crate::stats::Statistics;

pub type ObserverId = u64;

pub const DEFAULT_QUEUE_DEPTH: usize = 64;

// ==============================================================================
// events pushed to observers
// ==============================================================================
// on the wire: {"event": "new_data", "data": {...}}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverEvent {
    NewData(DataUpdate),
    NewAlerts(Vec<AlertEvent>),
    ActuatorUpdate(ActuatorUpdate),
    ThresholdsUpdated(AlertThresholds),
    HistoryData(Vec<Reading>),
}

impl ObserverEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewData(_) => "new_data",
            Self::NewAlerts(_) => "new_alerts",
            Self::ActuatorUpdate(_) => "actuator_update",
            Self::ThresholdsUpdated(_) => "thresholds_updated",
            Self::HistoryData(_) => "history_data",
        }
    }
}

/// a reading with the statistics computed right after it was applied
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DataUpdate {
    #[serde(flatten)]
    pub reading: Reading,
    pub stats: Option<Statistics>,
}

impl DataUpdate {
    /// a sensor's own `stats` field would collide with ours on the wire
    pub fn new(mut reading: Reading, stats: Option<Statistics>) -> Self {
        reading.extra.remove("stats");
        Self { reading, stats }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ActuatorUpdate {
    pub state: bool,
}

// ==============================================================================
// registry
// ==============================================================================

/// receiving side of a registered observer
pub struct ObserverHandle {
    pub id: ObserverId,
    pub events: mpsc::Receiver<Arc<ObserverEvent>>,
}

/// outcome of one fan-out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct ObserverRegistry {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<Arc<ObserverEvent>>>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl ObserverRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<Arc<ObserverEvent>>>> {
        // the map stays consistent even if a holder panicked
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.lock().insert(id, tx);
        tracing::debug!(observer = id, "observer registered");
        ObserverHandle { id, events: rx }
    }

    /// returns whether the observer was still registered
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(observer = id, "observer unregistered");
        }
        removed
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// deliver to a single observer; a failed delivery unregisters it
    pub fn send_to(&self, id: ObserverId, event: ObserverEvent) -> Result<(), DeliveryError> {
        let mut observers = self.lock();
        let tx = observers.get(&id).ok_or(DeliveryError::UnknownObserver(id))?;
        match deliver(id, tx, Arc::new(event)) {
            Ok(()) => Ok(()),
            Err(e) => {
                observers.remove(&id);
                drop(observers);
                log_drop(&e);
                Err(e)
            }
        }
    }

    /// deliver to every registered observer without waiting on any of them
    pub fn broadcast_all(&self, event: ObserverEvent) -> BroadcastReport {
        let event = Arc::new(event);
        let mut report = BroadcastReport::default();
        let mut failures = Vec::new();

        {
            let mut observers = self.lock();
            for (id, tx) in observers.iter() {
                match deliver(*id, tx, event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => failures.push(e),
                }
            }
            for failure in &failures {
                if let DeliveryError::QueueFull(id) | DeliveryError::Disconnected(id) = failure {
                    observers.remove(id);
                }
            }
        }

        report.dropped = failures.len();
        for failure in &failures {
            log_drop(failure);
        }
        tracing::trace!(
            event = event.name(),
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast"
        );
        report
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

fn deliver(
    id: ObserverId,
    tx: &mpsc::Sender<Arc<ObserverEvent>>,
    event: Arc<ObserverEvent>,
) -> Result<(), DeliveryError> {
    tx.try_send(event).map_err(|e| match e {
        TrySendError::Full(_) => DeliveryError::QueueFull(id),
        TrySendError::Closed(_) => DeliveryError::Disconnected(id),
    })
}

fn log_drop(e: &DeliveryError) {
    match e {
        DeliveryError::QueueFull(_) => tracing::warn!("dropping observer: {}", e),
        _ => tracing::debug!("dropping observer: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led(state: bool) -> ObserverEvent {
        ObserverEvent::ActuatorUpdate(ActuatorUpdate { state })
    }

    #[test]
    fn test_register_unregister_idempotent() {
        let registry = ObserverRegistry::default();
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(a.id));
        assert!(!registry.unregister(a.id));
        assert!(!registry.unregister(9999));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(b.id));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = ObserverRegistry::default();
        let mut a = registry.register();
        let mut b = registry.register();

        let report = registry.broadcast_all(led(true));
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });

        assert_eq!(*a.events.recv().await.unwrap(), led(true));
        assert_eq!(*b.events.recv().await.unwrap(), led(true));
    }

    #[tokio::test]
    async fn test_disconnected_observer_is_isolated() {
        let registry = ObserverRegistry::default();
        let mut a = registry.register();
        let gone = registry.register();
        let mut c = registry.register();
        let gone_id = gone.id;
        drop(gone);

        let report = registry.broadcast_all(led(true));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);
        assert!(!registry.contains(gone_id));

        assert!(a.events.recv().await.is_some());
        assert!(c.events.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_slow_observer_is_dropped_without_blocking() {
        let registry = ObserverRegistry::new(1);
        let slow = registry.register();
        let mut fast = registry.register();

        registry.broadcast_all(led(true));
        assert!(fast.events.recv().await.is_some());

        // slow never drained its single slot
        let report = registry.broadcast_all(led(false));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert!(!registry.contains(slow.id));
        assert_eq!(*fast.events.recv().await.unwrap(), led(false));

        // sender side is gone, so the slow session sees the end of its stream
        let mut slow_events = slow.events;
        assert!(slow_events.recv().await.is_some());
        assert!(slow_events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_single_observer() {
        let registry = ObserverRegistry::default();
        let mut a = registry.register();
        let mut b = registry.register();

        registry.send_to(a.id, led(true)).unwrap();
        assert_eq!(*a.events.recv().await.unwrap(), led(true));
        assert!(b.events.try_recv().is_err());

        assert_eq!(registry.send_to(42, led(true)), Err(DeliveryError::UnknownObserver(42)));

        let b_id = b.id;
        drop(b);
        assert_eq!(registry.send_to(b_id, led(true)), Err(DeliveryError::Disconnected(b_id)));
        assert!(!registry.contains(b_id));
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(led(true)).unwrap();
        assert_eq!(json, serde_json::json!({"event": "actuator_update", "data": {"state": true}}));

        let update = ObserverEvent::NewData(DataUpdate::new(
            Reading::new(20.0, 40.0, "2026-01-01T00:00:00"),
            None,
        ));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["event"], "new_data");
        assert_eq!(json["data"]["temperature"], 20.0);
        assert!(json["data"]["stats"].is_null());
        assert_eq!(update.name(), "new_data");
    }

    #[test]
    fn test_sensor_stats_field_is_replaced() {
        let mut reading = Reading::new(20.0, 50.0, "2026-01-01T00:00:00");
        reading.extra.insert("stats".to_string(), serde_json::json!("x"));
        reading.extra.insert("sensor_id".to_string(), serde_json::json!("esp32"));

        let text = serde_json::to_string(&ObserverEvent::NewData(DataUpdate::new(reading, None))).unwrap();
        assert_eq!(text.matches("\"stats\"").count(), 1);

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(json["data"]["stats"].is_null());
        assert_eq!(json["data"]["sensor_id"], "esp32");
    }
}
