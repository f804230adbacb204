//! rolling statistics over the reading history

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::domain::{parse_timestamp, Reading};
use crate::history::HistoryBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityStats {
    /// latest non-null sample
    pub current: f64,
    pub min: f64,
    pub max: f64,
    /// arithmetic mean, 1 decimal
    #[serde(rename = "avg")]
    pub mean: f64,
    /// 1 decimal
    pub median: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub temperature: QuantityStats,
    pub humidity: QuantityStats,
    pub total_readings: usize,
    pub time_span_hours: f64,
}

/// statistics as of now
pub fn compute(buffer: &HistoryBuffer) -> Option<Statistics> {
    compute_at(buffer, Local::now())
}

/// statistics as of `now`
///
/// absent with fewer than two readings, or when either quantity has no
/// non-null sample at all.
pub fn compute_at(buffer: &HistoryBuffer, now: DateTime<Local>) -> Option<Statistics> {
    if buffer.len() < 2 {
        return None;
    }

    let temperature = summarize(buffer.iter().filter_map(|r| r.temperature))?;
    let humidity = summarize(buffer.iter().filter_map(|r| r.humidity))?;

    Some(Statistics {
        temperature,
        humidity,
        total_readings: buffer.len(),
        time_span_hours: buffer.oldest().map(|r| span_hours(r, now)).unwrap_or(0.0),
    })
}

fn summarize(samples: impl Iterator<Item = f64>) -> Option<QuantityStats> {
    let mut values: Vec<f64> = samples.collect();
    let current = *values.last()?;

    let mean = values.iter().sum::<f64>() / values.len() as f64;

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };

    Some(QuantityStats {
        current,
        min: values[0],
        max: values[values.len() - 1],
        mean: round1(mean),
        median: round1(median),
    })
}

fn span_hours(oldest: &Reading, now: DateTime<Local>) -> f64 {
    match parse_timestamp(&oldest.timestamp) {
        Some(start) => round1((now - start).num_milliseconds() as f64 / 3_600_000.0),
        None => {
            tracing::debug!("unparseable timestamp on oldest reading: {}", oldest.timestamp);
            0.0
        }
    }
}

/// one decimal, rounding the exact binary value with ties to even
///
/// an exact tie at one decimal is only possible on a quarter (x.25, x.75),
/// everything else goes through the exactly rounded decimal formatter.
fn round1(x: f64) -> f64 {
    let quarters = x * 4.0;
    if quarters.fract() == 0.0 && quarters % 2.0 != 0.0 {
        let lower = (x * 10.0).floor();
        let even = if lower % 2.0 == 0.0 { lower } else { lower + 1.0 };
        return even / 10.0;
    }
    format!("{:.1}", x).parse().unwrap_or(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, h, m, 0).single().unwrap()
    }

    fn buffer(readings: Vec<Reading>) -> HistoryBuffer {
        let mut buf = HistoryBuffer::new(100);
        buf.extend(readings);
        buf
    }

    #[test]
    fn test_absent_for_short_history() {
        assert!(compute_at(&buffer(vec![]), at(12, 0)).is_none());
        let one = buffer(vec![Reading::new(20.0, 50.0, "2026-03-01T10:00:00")]);
        assert!(compute_at(&one, at(12, 0)).is_none());
    }

    #[test]
    fn test_basic_summary() {
        let buf = buffer(vec![
            Reading::new(20.0, 40.0, "2026-03-01T10:00:00"),
            Reading::new(22.0, 60.0, "2026-03-01T10:30:00"),
            Reading::new(21.0, 45.0, "2026-03-01T11:00:00"),
            Reading::new(25.0, 55.0, "2026-03-01T11:30:00"),
        ]);
        let stats = compute_at(&buf, at(12, 30)).unwrap();

        assert_eq!(stats.total_readings, 4);
        assert_eq!(stats.time_span_hours, 2.5);

        assert_eq!(stats.temperature.current, 25.0);
        assert_eq!(stats.temperature.min, 20.0);
        assert_eq!(stats.temperature.max, 25.0);
        assert_eq!(stats.temperature.mean, 22.0);
        // even count: mean of 21 and 22
        assert_eq!(stats.temperature.median, 21.5);

        assert_eq!(stats.humidity.median, 50.0);
        assert_eq!(stats.humidity.mean, 50.0);
    }

    #[test]
    fn test_rounding() {
        let buf = buffer(vec![
            Reading::new(20.0, 33.0, "2026-03-01T12:00:00"),
            Reading::new(20.0, 33.0, "2026-03-01T12:00:00"),
            Reading::new(21.0, 34.0, "2026-03-01T12:00:00"),
        ]);
        let stats = compute_at(&buf, at(12, 0)).unwrap();
        assert_eq!(stats.temperature.mean, 20.3);
        assert_eq!(stats.humidity.mean, 33.3);
        assert_eq!(stats.temperature.median, 20.0);
    }

    #[test]
    fn test_half_way_values_round_to_even() {
        let buf = buffer(vec![
            Reading::new(22.0, 1.1, "2026-03-01T12:00:00"),
            Reading::new(22.5, 1.2, "2026-03-01T12:00:00"),
        ]);
        let stats = compute_at(&buf, at(12, 0)).unwrap();
        // 22.25 is an exact tie
        assert_eq!(stats.temperature.median, 22.2);
        assert_eq!(stats.temperature.mean, 22.2);
        // (1.1 + 1.2) / 2 sits just below 1.15
        assert_eq!(stats.humidity.mean, 1.1);
        assert_eq!(stats.humidity.median, 1.1);

        assert_eq!(round1(22.75), 22.8);
        assert_eq!(round1(-22.25), -22.2);
        assert_eq!(round1(2.675), 2.7);
        assert_eq!(round1(0.05), 0.1);
    }

    #[test]
    fn test_null_samples_are_skipped() {
        let mut gap = Reading::new(0.0, 70.0, "2026-03-01T11:00:00");
        gap.temperature = None;
        let buf = buffer(vec![
            Reading::new(18.0, 50.0, "2026-03-01T10:00:00"),
            gap,
        ]);
        let stats = compute_at(&buf, at(12, 0)).unwrap();
        assert_eq!(stats.temperature.current, 18.0);
        assert_eq!(stats.temperature.max, 18.0);
        assert_eq!(stats.humidity.current, 70.0);
        assert_eq!(stats.total_readings, 2);
    }

    #[test]
    fn test_absent_when_quantity_all_null() {
        let mut a = Reading::new(18.0, 0.0, "2026-03-01T10:00:00");
        let mut b = Reading::new(19.0, 0.0, "2026-03-01T11:00:00");
        a.humidity = None;
        b.humidity = None;
        assert!(compute_at(&buffer(vec![a, b]), at(12, 0)).is_none());
    }

    #[test]
    fn test_unparseable_timestamp_gives_zero_span() {
        let buf = buffer(vec![
            Reading::new(18.0, 50.0, "not-a-time"),
            Reading::new(19.0, 51.0, "2026-03-01T11:00:00"),
        ]);
        assert_eq!(compute_at(&buf, at(12, 0)).unwrap().time_span_hours, 0.0);
    }

    #[test]
    fn test_serializes_mean_as_avg() {
        let buf = buffer(vec![
            Reading::new(18.0, 50.0, "2026-03-01T10:00:00"),
            Reading::new(19.0, 51.0, "2026-03-01T11:00:00"),
        ]);
        let json = serde_json::to_value(compute_at(&buf, at(12, 0)).unwrap()).unwrap();
        assert_eq!(json["temperature"]["avg"], 18.5);
        assert_eq!(json["time_span_hours"], 2.0);
    }
}
