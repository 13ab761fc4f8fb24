use crate::common::measurement::{HealthRecord, Measurement};
use serde::Deserialize;
use std::fmt;
use tracing::warn;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// int64 values arrive as JSON strings from the Fitness REST API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Int64 {
    Text(String),
    Number(i64),
}

impl Int64 {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Int64::Text(text) => text.trim().parse().ok(),
            Int64::Number(n) => Some(*n),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawValue {
    pub int_val: Option<i64>,
    pub fp_val: Option<f64>,
}

/// A dataset point as returned by `users.dataSources.datasets.get`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawPoint {
    pub start_time_nanos: Option<Int64>,
    pub end_time_nanos: Option<Int64>,
    #[serde(default)]
    pub value: Option<Vec<RawValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    MissingTimestamp(&'static str),
    InvalidTimestamp(&'static str),
    MissingValue {
        measurement: Measurement,
        expected: &'static str,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::MissingTimestamp(field) => write!(f, "point is missing {field}"),
            NormalizeError::InvalidTimestamp(field) => write!(f, "point has unparsable {field}"),
            NormalizeError::MissingValue {
                measurement,
                expected,
            } => write!(f, "{measurement} point has no {expected} in its first value"),
        }
    }
}

impl std::error::Error for NormalizeError {}

fn seconds(nanos: Option<&Int64>, field: &'static str) -> Result<i64, NormalizeError> {
    let nanos = nanos.ok_or(NormalizeError::MissingTimestamp(field))?;
    nanos
        .as_i64()
        .map(|n| n.div_euclid(NANOS_PER_SECOND))
        .ok_or(NormalizeError::InvalidTimestamp(field))
}

/// Convert raw points for one measurement into records. Points without any value entries are
/// skipped; a point whose value entry lacks the expected type fails the whole batch.
pub fn normalize_points(
    measurement: Measurement,
    points: &[RawPoint],
) -> Result<Vec<HealthRecord>, NormalizeError> {
    let mut records = Vec::with_capacity(points.len());

    for point in points {
        let Some(first) = point.value.as_deref().and_then(|values| values.first()) else {
            warn!("Skipping {} point without values", measurement);
            continue;
        };

        let start = seconds(point.start_time_nanos.as_ref(), "startTimeNanos")?;

        let record = match measurement {
            Measurement::Steps => {
                let steps = first.int_val.ok_or(NormalizeError::MissingValue {
                    measurement,
                    expected: "intVal",
                })?;
                HealthRecord::new(measurement, steps as f64, start)
            }
            Measurement::Calories
            | Measurement::Distance
            | Measurement::Weight
            | Measurement::HeartRate => {
                let value = first.fp_val.ok_or(NormalizeError::MissingValue {
                    measurement,
                    expected: "fpVal",
                })?;
                HealthRecord::new(measurement, value, start)
            }
            Measurement::Sleep => {
                let end = seconds(point.end_time_nanos.as_ref(), "endTimeNanos")?;
                let sleep_type = first.int_val.ok_or(NormalizeError::MissingValue {
                    measurement,
                    expected: "intVal",
                })?;
                HealthRecord::sleep(end - start, start, sleep_type)
            }
        };

        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<RawPoint> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_steps_from_int_val() {
        let points = parse(
            r#"[{"startTimeNanos": "1700000000123456789", "endTimeNanos": "1700000060000000000",
                 "dataTypeName": "com.google.step_count.delta", "value": [{"intVal": 42}]}]"#,
        );
        let records = normalize_points(Measurement::Steps, &points).unwrap();

        assert_eq!(records, vec![HealthRecord::new(Measurement::Steps, 42.0, 1_700_000_000)]);
    }

    #[test]
    fn test_float_measurements_use_fp_val() {
        let points = parse(
            r#"[{"startTimeNanos": "1700000000000000000", "value": [{"fpVal": 72.5}]},
                {"startTimeNanos": 1700000100000000000, "value": [{"fpVal": 73.0, "mapVal": []}]}]"#,
        );

        for measurement in [
            Measurement::Calories,
            Measurement::Distance,
            Measurement::Weight,
            Measurement::HeartRate,
        ] {
            let records = normalize_points(measurement, &points).unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].value, Some(72.5));
            assert_eq!(records[1].timestamp, Some(1_700_000_100));
            assert_eq!(records[1].measurement.as_deref(), Some(measurement.as_str()));
        }
    }

    #[test]
    fn test_sleep_duration_and_code() {
        let points = parse(
            r#"[{"startTimeNanos": "1700000000000000000", "endTimeNanos": "1700028800000000000",
                 "value": [{"intVal": 5}]}]"#,
        );
        let records = normalize_points(Measurement::Sleep, &points).unwrap();

        assert_eq!(records, vec![HealthRecord::sleep(28_800, 1_700_000_000, 5)]);
    }

    #[test]
    fn test_points_without_values_are_skipped() {
        let points = parse(
            r#"[{"startTimeNanos": "1700000000000000000"},
                {"startTimeNanos": "1700000000000000000", "value": []},
                {"startTimeNanos": "1700000000000000000", "value": [{"intVal": 10}]}]"#,
        );
        let records = normalize_points(Measurement::Steps, &points).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Some(10.0));
    }

    #[test]
    fn test_valueless_point_is_skipped_before_timestamp_checks() {
        // logged at warn level and dropped, even without a usable timestamp
        let points = parse(
            r#"[{"dataTypeName": "com.google.weight", "value": []},
                {"startTimeNanos": "1700000000000000000", "value": [{"fpVal": 70.5}]}]"#,
        );
        let records = normalize_points(Measurement::Weight, &points).unwrap();

        assert_eq!(records, vec![HealthRecord::new(Measurement::Weight, 70.5, 1_700_000_000)]);
    }

    #[test]
    fn test_wrong_value_type_fails_batch() {
        let points = parse(r#"[{"startTimeNanos": "1700000000000000000", "value": [{"fpVal": 1.5}]}]"#);
        let err = normalize_points(Measurement::Steps, &points).unwrap_err();

        assert_eq!(
            err,
            NormalizeError::MissingValue {
                measurement: Measurement::Steps,
                expected: "intVal"
            }
        );
    }

    #[test]
    fn test_bad_timestamp_fails_batch() {
        let points = parse(r#"[{"startTimeNanos": "soon", "value": [{"fpVal": 1.5}]}]"#);
        assert_eq!(
            normalize_points(Measurement::Weight, &points).unwrap_err(),
            NormalizeError::InvalidTimestamp("startTimeNanos")
        );

        let points = parse(r#"[{"startTimeNanos": "1700000000000000000", "value": [{"intVal": 2}]}]"#);
        assert_eq!(
            normalize_points(Measurement::Sleep, &points).unwrap_err(),
            NormalizeError::MissingTimestamp("endTimeNanos")
        );
    }
}
