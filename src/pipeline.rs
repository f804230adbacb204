//! ==============================================================================
//! pipeline.rs - ingestion pipeline
//! ==============================================================================
//!
//! purpose:
//!     the one place shared telemetry state is mutated. every mutating call
//!     follows the same order:
//!
//! ```text
//!         validate -> apply (under lock) -> notify observers -> persist
//!
//!     a rejected request never reaches the apply step, so validation and
//!     configuration errors leave all state untouched.
//! ```
//!
//! locking:
//!     - ingestion: tokio mutex over history + current reading + counter.
//!       tokio's mutex is fair, so concurrent uploads are applied in arrival
//!       order. fan-out happens while it is held, which keeps every observer's
//!       view in the same order as the history. fan-out never waits on an
//!       observer (see observers.rs) so this stays short.
//!     - thresholds: std rwlock, copied out before use.
//!     - actuator: atomic flag; writes + their broadcast are serialized by a
//!       small mutex so observers see the same final state as `get_actuator`.
//!     - snapshot writes happen on the blocking pool after the ingestion lock
//!       is released, with a sequence check so an older copy never
//!       overwrites a newer one.
//!
//! relationships:
//!     - uses: history.rs, stats.rs, alerts.rs, actuator.rs, observers.rs
//!     - uses: persistence.rs (SnapshotStore trait object)
//!     - used by: server.rs (http + websocket), main.rs (restore/shutdown)
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::actuator::{ActuatorCommand, ActuatorState};
use crate::alerts::{self, AlertThresholds, ThresholdUpdate};
use crate::domain::{now_timestamp, Reading, SensorPayload};
use crate::error::{DeliveryError, PersistenceError, PipelineResult};
use crate::history::{HistoryBuffer, DEFAULT_CAPACITY};
use crate::observers::{
    ActuatorUpdate, DataUpdate, ObserverEvent, ObserverHandle, ObserverId, ObserverRegistry,
    DEFAULT_QUEUE_DEPTH,
};
use crate::persistence::SnapshotStore;
use crate::stats::{self, Statistics};

/// history entries replayed to a new observer
pub const DEFAULT_REPLAY_WINDOW: usize = 50;
/// history entries returned when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_PERSIST_EVERY: u64 = 10;

/// the replay sends up to four events before the session starts draining
const REPLAY_EVENTS: usize = 4;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capacity: usize,
    /// snapshot after every Nth accepted reading (0 disables)
    pub persist_every: u64,
    pub replay_window: usize,
    pub queue_depth: usize,
    /// log each reading at info instead of debug
    pub log_readings: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            persist_every: DEFAULT_PERSIST_EVERY,
            replay_window: DEFAULT_REPLAY_WINDOW,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            log_readings: true,
        }
    }
}

// ==============================================================================
// responses
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct IngestAck {
    pub accepted: bool,
    pub observers_notified: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryPage {
    pub data: Vec<Reading>,
    pub total: usize,
    pub returned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub timestamp: String,
    pub latest_data: Option<Reading>,
    pub clients_connected: usize,
    pub led_state: bool,
    pub total_readings: usize,
    pub alerts_config: AlertThresholds,
    pub stats: Option<Statistics>,
}

// ==============================================================================
// pipeline
// ==============================================================================

struct IngestionState {
    history: HistoryBuffer,
    current: Option<Reading>,
    /// accepted readings since startup, drives the snapshot trigger
    accepted: u64,
}

pub struct IngestionPipeline {
    ingestion: tokio::sync::Mutex<IngestionState>,
    thresholds: RwLock<AlertThresholds>,
    threshold_writes: tokio::sync::Mutex<()>,
    actuator: ActuatorState,
    actuator_writes: Mutex<()>,
    observers: ObserverRegistry,
    store: Arc<dyn SnapshotStore>,
    /// sequence number of the newest snapshot on disk
    last_saved: Arc<Mutex<u64>>,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn SnapshotStore>, settings: PipelineSettings) -> Self {
        Self::with_state(store, settings, Vec::new(), AlertThresholds::default())
    }

    fn with_state(
        store: Arc<dyn SnapshotStore>,
        settings: PipelineSettings,
        readings: Vec<Reading>,
        thresholds: AlertThresholds,
    ) -> Self {
        let mut history = HistoryBuffer::new(settings.capacity);
        history.extend(readings);

        Self {
            ingestion: tokio::sync::Mutex::new(IngestionState {
                history,
                current: None,
                accepted: 0,
            }),
            thresholds: RwLock::new(thresholds),
            threshold_writes: tokio::sync::Mutex::new(()),
            actuator: ActuatorState::default(),
            actuator_writes: Mutex::new(()),
            observers: ObserverRegistry::new(settings.queue_depth.max(REPLAY_EVENTS)),
            store,
            last_saved: Arc::new(Mutex::new(0)),
            settings,
        }
    }

    /// build a pipeline from whatever the store has saved
    ///
    /// load failures are logged and the pipeline starts empty / with default
    /// thresholds.
    pub async fn restore(store: Arc<dyn SnapshotStore>, settings: PipelineSettings) -> Self {
        let loader = store.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            (loader.load_snapshot(), loader.load_thresholds())
        })
        .await;

        let (readings, thresholds) = match loaded {
            Ok(pair) => pair,
            Err(e) => {
                let e = PersistenceError::Worker(e.to_string());
                (Err(e), Ok(None))
            }
        };

        let readings = readings.unwrap_or_else(|e| {
            tracing::error!("failed to load reading snapshot: {}", e);
            Vec::new()
        });
        let thresholds = thresholds
            .unwrap_or_else(|e| {
                tracing::error!("failed to load alert thresholds: {}", e);
                None
            })
            .unwrap_or_default();

        let kept = readings.len().min(settings.capacity.max(1));
        tracing::info!("restored {} readings from snapshot", kept);

        Self::with_state(store, settings, readings, thresholds)
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    // --------------------------------------------------------------------------
    // ingestion
    // --------------------------------------------------------------------------

    /// accept one reading from a sensor
    pub async fn ingest(&self, payload: SensorPayload) -> PipelineResult<IngestAck> {
        let reading = payload.into_reading(now_timestamp)?;

        if self.settings.log_readings {
            tracing::info!(
                temperature = ?reading.temperature,
                humidity = ?reading.humidity,
                timestamp = %reading.timestamp,
                "reading received"
            );
        } else {
            tracing::debug!(timestamp = %reading.timestamp, "reading received");
        }

        let (ack, pending_snapshot) = {
            let mut state = self.ingestion.lock().await;

            state.history.append(reading.clone());
            state.current = Some(reading.clone());
            state.accepted += 1;

            let alerts = alerts::evaluate(&reading, &self.thresholds());
            let stats = stats::compute(&state.history);

            if !alerts.is_empty() {
                for alert in &alerts {
                    tracing::warn!(kind = ?alert.kind, "{}", alert.message);
                }
                self.observers.broadcast_all(ObserverEvent::NewAlerts(alerts));
            }

            let report = self
                .observers
                .broadcast_all(ObserverEvent::NewData(DataUpdate::new(reading, stats)));
            tracing::debug!("new_data sent to {} observers", report.delivered);

            let every = self.settings.persist_every;
            let pending = (every > 0 && state.accepted % every == 0)
                .then(|| (state.accepted, state.history.to_vec()));

            let ack = IngestAck {
                accepted: true,
                observers_notified: report.delivered,
            };
            (ack, pending)
        };

        if let Some((seq, readings)) = pending_snapshot {
            self.persist(seq, readings).await;
        }

        Ok(ack)
    }

    // --------------------------------------------------------------------------
    // actuator
    // --------------------------------------------------------------------------

    /// apply an actuator command from either http or an observer session
    pub fn set_actuator_command(&self, command: &Value) -> PipelineResult<bool> {
        let ActuatorCommand { state } = ActuatorCommand::from_value(command)?;
        Ok(self.set_actuator(state))
    }

    pub fn set_actuator(&self, on: bool) -> bool {
        let _gate = self.actuator_writes.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.actuator.set(on);
        tracing::info!("actuator set {}", if state { "ON" } else { "OFF" });
        self.observers
            .broadcast_all(ObserverEvent::ActuatorUpdate(ActuatorUpdate { state }));
        state
    }

    pub fn get_actuator(&self) -> bool {
        self.actuator.get()
    }

    // --------------------------------------------------------------------------
    // thresholds
    // --------------------------------------------------------------------------

    pub fn thresholds(&self) -> AlertThresholds {
        *self.thresholds.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// replace every threshold at once, persist and broadcast
    pub async fn replace_thresholds(&self, update: ThresholdUpdate) -> PipelineResult<AlertThresholds> {
        let new = update.validate()?;

        let _gate = self.threshold_writes.lock().await;
        *self.thresholds.write().unwrap_or_else(PoisonError::into_inner) = new;
        tracing::info!(?new, "alert thresholds replaced");
        self.observers.broadcast_all(ObserverEvent::ThresholdsUpdated(new));

        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_thresholds(&new))
            .await
            .map_err(|e| PersistenceError::Worker(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = saved {
            tracing::error!("failed to persist alert thresholds: {}", e);
        }

        Ok(new)
    }

    // --------------------------------------------------------------------------
    // queries
    // --------------------------------------------------------------------------

    /// most recent `limit` readings (clamped to capacity), oldest first
    pub async fn get_history(&self, limit: usize) -> HistoryPage {
        let state = self.ingestion.lock().await;
        let data = state.history.snapshot(limit);
        HistoryPage {
            total: state.history.len(),
            returned: data.len(),
            data,
        }
    }

    pub async fn get_stats(&self) -> Option<Statistics> {
        let state = self.ingestion.lock().await;
        stats::compute(&state.history)
    }

    pub async fn current(&self) -> Option<Reading> {
        self.ingestion.lock().await.current.clone()
    }

    /// full copy of the history, oldest first
    pub async fn export(&self) -> Vec<Reading> {
        self.ingestion.lock().await.history.to_vec()
    }

    pub async fn status(&self) -> StatusReport {
        let (latest_data, total_readings, stats) = {
            let state = self.ingestion.lock().await;
            (
                state.current.clone(),
                state.history.len(),
                stats::compute(&state.history),
            )
        };
        StatusReport {
            status: "running",
            timestamp: now_timestamp(),
            latest_data,
            clients_connected: self.observers.len(),
            led_state: self.get_actuator(),
            total_readings,
            alerts_config: self.thresholds(),
            stats,
        }
    }

    // --------------------------------------------------------------------------
    // observers
    // --------------------------------------------------------------------------

    /// register an observer and replay the current state to it
    ///
    /// holds the ingestion lock for the whole replay, so the first live
    /// `new_data` an observer sees is always newer than its replay.
    pub async fn connect_observer(&self) -> ObserverHandle {
        let state = self.ingestion.lock().await;
        let handle = self.observers.register();
        let id = handle.id;

        let mut replay = Vec::with_capacity(REPLAY_EVENTS);
        if let Some(current) = &state.current {
            replay.push(ObserverEvent::NewData(DataUpdate::new(
                current.clone(),
                stats::compute(&state.history),
            )));
        }
        replay.push(ObserverEvent::ActuatorUpdate(ActuatorUpdate {
            state: self.get_actuator(),
        }));
        replay.push(ObserverEvent::ThresholdsUpdated(self.thresholds()));
        replay.push(ObserverEvent::HistoryData(
            state.history.snapshot(self.settings.replay_window),
        ));

        for event in replay {
            if let Err(e) = self.observers.send_to(id, event) {
                tracing::warn!("initial replay to observer {} failed: {}", id, e);
                break;
            }
        }
        tracing::info!(observer = id, connected = self.observers.len(), "observer connected");
        handle
    }

    pub fn disconnect_observer(&self, id: ObserverId) {
        if self.observers.unregister(id) {
            tracing::info!(observer = id, connected = self.observers.len(), "observer disconnected");
        }
    }

    /// history window pulled by one observer
    pub async fn request_history(&self, id: ObserverId, limit: Option<usize>) -> Result<(), DeliveryError> {
        let page = self.get_history(limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await;
        self.observers.send_to(id, ObserverEvent::HistoryData(page.data))
    }

    // --------------------------------------------------------------------------
    // persistence
    // --------------------------------------------------------------------------

    /// snapshot the history right now (used at shutdown)
    pub async fn persist_now(&self) {
        let (seq, readings) = {
            let state = self.ingestion.lock().await;
            (state.accepted, state.history.to_vec())
        };
        self.persist(seq, readings).await;
    }

    pub async fn shutdown(&self) {
        tracing::info!("saving final snapshot");
        self.persist_now().await;
    }

    async fn persist(&self, seq: u64, readings: Vec<Reading>) {
        let store = self.store.clone();
        let last_saved = self.last_saved.clone();
        let count = readings.len();

        let result = tokio::task::spawn_blocking(move || -> Result<bool, PersistenceError> {
            let mut last = last_saved.lock().unwrap_or_else(PoisonError::into_inner);
            if seq < *last {
                return Ok(false);
            }
            store.save_snapshot(&readings)?;
            *last = seq;
            Ok(true)
        })
        .await
        .map_err(|e| PersistenceError::Worker(e.to_string()))
        .and_then(|r| r);

        match result {
            Ok(true) => tracing::debug!("snapshot saved ({} readings)", count),
            Ok(false) => tracing::debug!("skipped stale snapshot #{}", seq),
            Err(e) => tracing::error!("snapshot save failed: {}", e),
        }
    }
}
