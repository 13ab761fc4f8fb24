use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of health measurements written to InfluxDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Measurement {
    Steps,
    Calories,
    Distance,
    Weight,
    HeartRate,
    Sleep,
}

impl Measurement {
    /// Types pulled from Google Fit on each run, in fetch order.
    pub const FETCHED: [Measurement; 5] = [
        Measurement::Steps,
        Measurement::Calories,
        Measurement::Weight,
        Measurement::HeartRate,
        Measurement::Sleep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Measurement::Steps => "steps",
            Measurement::Calories => "calories",
            Measurement::Distance => "distance",
            Measurement::Weight => "weight",
            Measurement::HeartRate => "heart_rate",
            Measurement::Sleep => "sleep",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Measurement::Steps => "count",
            Measurement::Calories => "kcal",
            Measurement::Distance => "meters",
            Measurement::Weight => "kg",
            Measurement::HeartRate => "bpm",
            Measurement::Sleep => "seconds",
        }
    }

    /// Google Fit data source backing this measurement.
    pub fn data_source_id(self) -> &'static str {
        match self {
            Measurement::Steps => {
                "derived:com.google.step_count.delta:com.google.android.gms:estimated_steps"
            }
            Measurement::Calories => {
                "derived:com.google.calories.expended:com.google.android.gms:merge_calories_expended"
            }
            Measurement::Distance => {
                "derived:com.google.distance.delta:com.google.android.gms:merge_distance_delta"
            }
            Measurement::Weight => "derived:com.google.weight:com.google.android.gms:merge_weight",
            Measurement::HeartRate => {
                "derived:com.google.heart_rate.bpm:com.google.android.gms:merge_heart_rate_bpm"
            }
            Measurement::Sleep => "derived:com.google.sleep.segment:com.google.android.gms:merged",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMeasurement(pub String);

impl fmt::Display for UnknownMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown measurement type: {}", self.0)
    }
}

impl std::error::Error for UnknownMeasurement {}

impl FromStr for Measurement {
    type Err = UnknownMeasurement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steps" => Ok(Measurement::Steps),
            "calories" => Ok(Measurement::Calories),
            "distance" => Ok(Measurement::Distance),
            "weight" => Ok(Measurement::Weight),
            "heart_rate" => Ok(Measurement::HeartRate),
            "sleep" => Ok(Measurement::Sleep),
            other => Err(UnknownMeasurement(other.to_string())),
        }
    }
}

/// Name for a Google Fit sleep segment code.
pub fn sleep_type_name(code: i64) -> &'static str {
    match code {
        1 => "awake",
        2 => "sleep",
        3 => "out_of_bed",
        4 => "light_sleep",
        5 => "deep_sleep",
        6 => "rem_sleep",
        _ => "unknown",
    }
}

pub const SLEEP_LIGHT: i64 = 4;
pub const SLEEP_DEEP: i64 = 5;
pub const SLEEP_REM: i64 = 6;

/// One normalized observation, the unit handed to the InfluxDB writer.
///
/// Fields are optional because records may come from loosely-typed input (JSON files, older
/// exports); the writer drops any record that is missing a required part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub measurement: Option<String>,
    pub value: Option<f64>,
    /// Seconds since the Unix epoch, UTC.
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_type: Option<i64>,
}

impl HealthRecord {
    pub fn new(measurement: Measurement, value: f64, timestamp: i64) -> Self {
        Self {
            measurement: Some(measurement.as_str().to_string()),
            value: Some(value),
            timestamp: Some(timestamp),
            sleep_type: None,
        }
    }

    pub fn sleep(duration_seconds: i64, timestamp: i64, sleep_type: i64) -> Self {
        Self {
            sleep_type: Some(sleep_type),
            ..Self::new(Measurement::Sleep, duration_seconds as f64, timestamp)
        }
    }
}
