//! telemetry-hub: sensor telemetry ingestion, alerting and live fan-out.
//!
//! the interesting part is [`pipeline::IngestionPipeline`]; everything in
//! `server` is transport around it.

pub mod actuator;
pub mod alerts;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod history;
pub mod observers;
pub mod persistence;
pub mod pipeline;
pub mod server;
pub mod stats;

pub use domain::{Reading, SensorPayload};
pub use error::{DeliveryError, PersistenceError, PipelineError};
pub use pipeline::{IngestionPipeline, PipelineSettings};
