//! ==============================================================================
//! error.rs - error taxonomy for the telemetry pipeline
//! ==============================================================================
//!
//! purpose:
//!     caller-visible errors (validation, configuration) are returned from the
//!     mutating pipeline operations. persistence and delivery errors never
//!     reach the caller: the pipeline logs them and carries on.
//!
//! relationships:
//!     - returned by: pipeline.rs (ingest, set_actuator, replace_thresholds)
//!     - returned by: persistence.rs (SnapshotStore implementations)
//!     - returned by: observers.rs (send_to)
//!     - mapped to http status by: server.rs (ApiError)
//!
//! ==============================================================================

use thiserror::Error;

/// rejected request - nothing was mutated
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// missing or malformed field in a reading or actuator command
    #[error("{0}")]
    Validation(String),

    /// threshold update that does not carry every required field
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// snapshot load/save failure
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("snapshot writer task failed: {0}")]
    Worker(String),
}

/// per-observer delivery failure
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// outbound queue is full, the observer is not keeping up
    #[error("observer {0} outbound queue is full")]
    QueueFull(u64),

    #[error("observer {0} has disconnected")]
    Disconnected(u64),

    #[error("observer {0} is not registered")]
    UnknownObserver(u64),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
