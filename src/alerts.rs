//! ==============================================================================
//! alerts.rs - threshold alerts
//! ==============================================================================
//!
//! purpose:
//!     maps a reading and the configured thresholds to zero or more alerts.
//!     per quantity, the low bound is checked first and the high bound only
//!     when the value is not low, so one quantity never raises both.
//!     a value sitting exactly on a bound is considered safe.
//!
//! relationships:
//!     - called by: pipeline.rs (once per ingested reading)
//!     - thresholds persisted by: persistence.rs
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

use crate::domain::Reading;
use crate::error::PipelineError;

/// alert bounds, replaced as a whole
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
    pub alerts_enabled: bool,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temperature_min: 15.0,
            temperature_max: 35.0,
            humidity_min: 30.0,
            humidity_max: 80.0,
            alerts_enabled: true,
        }
    }
}

/// a threshold update as submitted; every field must be present
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ThresholdUpdate {
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
    pub alerts_enabled: Option<bool>,
}

impl ThresholdUpdate {
    pub fn from_value(value: serde_json::Value) -> Result<Self, PipelineError> {
        if !value.is_object() {
            return Err(PipelineError::configuration("expected a json object"));
        }
        serde_json::from_value(value).map_err(|e| PipelineError::configuration(e.to_string()))
    }

    /// all-or-nothing: a partial update is rejected, never merged
    pub fn validate(self) -> Result<AlertThresholds, PipelineError> {
        match self {
            Self {
                temperature_min: Some(temperature_min),
                temperature_max: Some(temperature_max),
                humidity_min: Some(humidity_min),
                humidity_max: Some(humidity_max),
                alerts_enabled: Some(alerts_enabled),
            } => Ok(AlertThresholds {
                temperature_min,
                temperature_max,
                humidity_min,
                humidity_max,
                alerts_enabled,
            }),
            partial => {
                let missing: Vec<&str> = [
                    ("temperature_min", partial.temperature_min.is_none()),
                    ("temperature_max", partial.temperature_max.is_none()),
                    ("humidity_min", partial.humidity_min.is_none()),
                    ("humidity_max", partial.humidity_max.is_none()),
                    ("alerts_enabled", partial.alerts_enabled.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(PipelineError::configuration(format!("missing {}", missing.join(", "))))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TemperatureLow,
    TemperatureHigh,
    HumidityLow,
    HumidityHigh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

impl AlertEvent {
    fn new(kind: AlertKind, value: f64, threshold: f64) -> Self {
        // {:?} keeps the trailing ".0" on whole numbers
        let message = match kind {
            AlertKind::TemperatureLow => format!("Temperature too low: {:?}°C (threshold: {:?}°C)", value, threshold),
            AlertKind::TemperatureHigh => format!("Temperature too high: {:?}°C (threshold: {:?}°C)", value, threshold),
            AlertKind::HumidityLow => format!("Humidity too low: {:?}% (threshold: {:?}%)", value, threshold),
            AlertKind::HumidityHigh => format!("Humidity too high: {:?}% (threshold: {:?}%)", value, threshold),
        };
        let severity = match kind {
            AlertKind::TemperatureLow | AlertKind::HumidityLow => Severity::Warning,
            AlertKind::TemperatureHigh | AlertKind::HumidityHigh => Severity::Danger,
        };
        Self { kind, severity, value, threshold, message }
    }
}

/// alerts for one reading, temperature before humidity
///
/// a quantity missing from the reading is not checked.
pub fn evaluate(reading: &Reading, thresholds: &AlertThresholds) -> Vec<AlertEvent> {
    if !thresholds.alerts_enabled {
        return Vec::new();
    }

    let checks = [
        (
            reading.temperature,
            thresholds.temperature_min,
            thresholds.temperature_max,
            AlertKind::TemperatureLow,
            AlertKind::TemperatureHigh,
        ),
        (
            reading.humidity,
            thresholds.humidity_min,
            thresholds.humidity_max,
            AlertKind::HumidityLow,
            AlertKind::HumidityHigh,
        ),
    ];

    checks
        .into_iter()
        .filter_map(|(value, min, max, low, high)| {
            let value = value?;
            if value < min {
                Some(AlertEvent::new(low, value, min))
            } else if value > max {
                Some(AlertEvent::new(high, value, max))
            } else {
                None
            }
        })
        .collect()
}
