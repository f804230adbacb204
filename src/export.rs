//! csv export of the reading history

use crate::domain::Reading;

pub const CSV_HEADER: &str = "timestamp,temperature,humidity";

/// `iot_data_20260301_120000.csv`
pub fn csv_filename(now: chrono::DateTime<chrono::Local>) -> String {
    format!("iot_data_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// one row per reading, oldest first; null samples are empty cells
pub fn to_csv<'a>(readings: impl IntoIterator<Item = &'a Reading>) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push_str("\r\n");
    for reading in readings {
        out.push_str(&escape(&reading.timestamp));
        out.push(',');
        out.push_str(&cell(reading.temperature));
        out.push(',');
        out.push_str(&cell(reading.humidity));
        out.push_str("\r\n");
    }
    out
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:?}", v)).unwrap_or_default()
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
