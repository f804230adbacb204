use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

/// a stored sensor reading
///
/// quantities are optional only so that old snapshots with null samples can
/// be reloaded. everything accepted through `ingest` carries both.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Reading {
    /// temperature in celsius
    pub temperature: Option<f64>,

    /// relative humidity (0-100%)
    pub humidity: Option<f64>,

    /// ISO-8601 timestamp, assigned by the hub when the sensor sends none
    pub timestamp: String,

    /// any other fields the sensor sent (device id, rssi, ...)
    /// examples:
    /// - {"sensor_id": "esp32-kitchen"}
    /// - {"sensor_id": "dht22-gpio4", "rssi": -61}
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reading {
    /// build a reading with no extra fields
    pub fn new(temperature: f64, humidity: f64, timestamp: impl Into<String>) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
            timestamp: timestamp.into(),
            extra: Map::new(),
        }
    }
}

/// an upload as it arrives from a sensor, before validation
#[derive(Clone, Deserialize, Debug, Default)]
pub struct SensorPayload {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SensorPayload {
    /// decode an arbitrary json body
    ///
    /// wrongly typed fields (a string temperature, a numeric timestamp) are
    /// validation errors, same as missing ones.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        match &value {
            Value::Object(map) if !map.is_empty() => {}
            _ => return Err(PipelineError::validation("No data provided")),
        }
        serde_json::from_value(value)
            .map_err(|e| PipelineError::validation(format!("Malformed reading: {}", e)))
    }

    /// check required fields and stamp the reading
    pub fn into_reading(self, now: impl FnOnce() -> String) -> Result<Reading, PipelineError> {
        let (Some(temperature), Some(humidity)) = (self.temperature, self.humidity) else {
            return Err(PipelineError::validation("Missing temperature or humidity"));
        };
        Ok(Reading {
            temperature: Some(temperature),
            humidity: Some(humidity),
            timestamp: self.timestamp.unwrap_or_else(now),
            extra: self.extra,
        })
    }
}

/// current time as the hub stamps readings
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// parse a reading timestamp
///
/// accepts RFC 3339 (with offset) and naive ISO-8601, which is read as
/// local time.
pub fn parse_timestamp(ts: &str) -> Option<chrono::DateTime<chrono::Local>> {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Local));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}
