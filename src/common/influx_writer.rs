use crate::common::config::InfluxConfig;
use crate::common::measurement::{HealthRecord, Measurement, sleep_type_name};
use crate::common::metrics;
use crate::common::types::{CommonError, CommonResult};
use chrono::{DateTime, Utc};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use tracing::{error, info, warn};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

/// One InfluxDB point: measurement, tag set, field set and a nanosecond timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePoint {
    measurement: Measurement,
    tags: BTreeMap<&'static str, String>,
    fields: BTreeMap<&'static str, FieldValue>,
    timestamp_nanos: i64,
}

impl WritePoint {
    pub fn measurement(&self) -> Measurement {
        self.measurement
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }

    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Render as a single line of InfluxDB line protocol.
    pub fn to_line(&self) -> String {
        let mut line = escape_measurement(self.measurement.as_str());
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| match value {
                FieldValue::Integer(n) => format!("{}={n}i", escape_key(key)),
                FieldValue::Float(x) => format!("{}={x}", escape_key(key)),
            })
            .collect();

        line.push(' ');
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&self.timestamp_nanos.to_string());
        line
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointError {
    MissingField(&'static str),
    UnknownMeasurement(String),
    NonFiniteValue(f64),
    TimestampOutOfRange(i64),
}

impl fmt::Display for PointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointError::MissingField(field) => write!(f, "record is missing {field}"),
            PointError::UnknownMeasurement(name) => write!(f, "Unknown measurement type: {name}"),
            PointError::NonFiniteValue(value) => write!(f, "value {value} is not finite"),
            PointError::TimestampOutOfRange(ts) => write!(f, "timestamp {ts} is out of range"),
        }
    }
}

impl std::error::Error for PointError {}

pub fn build_point(record: &HealthRecord) -> Result<WritePoint, PointError> {
    let name = record
        .measurement
        .as_deref()
        .ok_or(PointError::MissingField("measurement"))?;
    let value = record.value.ok_or(PointError::MissingField("value"))?;
    let timestamp = record
        .timestamp
        .ok_or(PointError::MissingField("timestamp"))?;

    let measurement: Measurement = name
        .parse()
        .map_err(|_| PointError::UnknownMeasurement(name.to_string()))?;
    if !value.is_finite() {
        return Err(PointError::NonFiniteValue(value));
    }
    let timestamp_nanos = timestamp
        .checked_mul(NANOS_PER_SECOND)
        .ok_or(PointError::TimestampOutOfRange(timestamp))?;

    let mut tags = BTreeMap::new();
    let mut fields = BTreeMap::new();
    tags.insert("unit", measurement.unit().to_string());

    match measurement {
        Measurement::Steps => {
            fields.insert("value", FieldValue::Integer(value as i64));
        }
        Measurement::Calories
        | Measurement::Distance
        | Measurement::Weight
        | Measurement::HeartRate => {
            fields.insert("value", FieldValue::Float(value));
        }
        Measurement::Sleep => {
            let code = record.sleep_type.unwrap_or(0);
            tags.insert("sleep_type", sleep_type_name(code).to_string());
            fields.insert("value", FieldValue::Float(value));
            fields.insert("sleep_type_code", FieldValue::Integer(code));
            fields.insert("duration_minutes", FieldValue::Float(value / 60.0));
            fields.insert("duration_hours", FieldValue::Float(value / 3600.0));
        }
    }

    Ok(WritePoint {
        measurement,
        tags,
        fields,
        timestamp_nanos,
    })
}

/// Transport for the two InfluxDB v2 endpoints the writer needs.
pub trait InfluxApi {
    /// POST a newline-separated line protocol batch to the configured bucket.
    fn write_lines(&self, body: String) -> impl Future<Output = CommonResult<()>>;

    /// Run a Flux query and return the raw CSV response.
    fn query_csv(&self, flux: String) -> impl Future<Output = CommonResult<String>>;

    fn bucket(&self) -> &str;
}

pub struct HttpInfluxApi {
    client: ClientWithMiddleware,
    config: InfluxConfig,
}

impl HttpInfluxApi {
    pub fn new(config: InfluxConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client, config }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.token)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url.trim_end_matches('/'))
    }
}

impl InfluxApi for HttpInfluxApi {
    async fn write_lines(&self, body: String) -> CommonResult<()> {
        let response = self
            .client
            .post(self.endpoint("/api/v2/write"))
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", self.auth_header())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CommonError::Http(status, text));
        }
        Ok(())
    }

    async fn query_csv(&self, flux: String) -> CommonResult<String> {
        let request = serde_json::json!({
            "query": flux,
            "type": "flux",
            "dialect": { "header": true, "annotations": [] },
        });

        let response = self
            .client
            .post(self.endpoint("/api/v2/query"))
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", self.auth_header())
            .header("Accept", "application/csv")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CommonError::Http(status, text));
        }
        Ok(text)
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

/// A bare `(value, timestamp)` sample for the per-measurement write helpers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepSample {
    pub duration_seconds: f64,
    pub timestamp: i64,
    pub sleep_type: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LatestPoint {
    #[serde(rename = "_time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "_value")]
    pub value: f64,
    #[serde(rename = "_measurement")]
    pub measurement: String,
}

pub struct InfluxWriter<A = HttpInfluxApi> {
    api: A,
}

impl InfluxWriter<HttpInfluxApi> {
    pub fn new(config: InfluxConfig) -> Self {
        info!("InfluxDB connection initialized: {}", config.url);
        Self::with_api(HttpInfluxApi::new(config))
    }

    pub fn from_env() -> CommonResult<Self> {
        Ok(Self::new(InfluxConfig::from_env()?))
    }
}

impl<A: InfluxApi> InfluxWriter<A> {
    pub fn with_api(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Build points for every valid record and send them in one write. Returns the number of
    /// points written; invalid records are dropped with a warning.
    pub async fn write_health_data(&self, records: &[HealthRecord]) -> CommonResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut points = Vec::with_capacity(records.len());
        for record in records {
            match build_point(record) {
                Ok(point) => points.push(point),
                Err(e) => {
                    warn!("Skipping record ({e}): {:?}", record);
                    metrics::increment_records_skipped(1);
                }
            }
        }

        if points.is_empty() {
            return Ok(0);
        }

        let body = points
            .iter()
            .map(WritePoint::to_line)
            .collect::<Vec<_>>()
            .join("\n");

        match self.api.write_lines(body).await {
            Ok(()) => {
                metrics::increment_influx_write_success();
                for point in &points {
                    metrics::increment_points_written(point.measurement().as_str(), 1);
                }
                info!("Successfully wrote {} data points to InfluxDB", points.len());
                Ok(points.len())
            }
            Err(e) => {
                metrics::increment_influx_write_failure();
                error!("InfluxDB write error: {e}");
                Err(e)
            }
        }
    }

    async fn write_samples(&self, measurement: Measurement, samples: &[Sample]) -> CommonResult<usize> {
        let records: Vec<HealthRecord> = samples
            .iter()
            .map(|s| HealthRecord::new(measurement, s.value, s.timestamp))
            .collect();
        self.write_health_data(&records).await
    }

    pub async fn write_steps_data(&self, samples: &[Sample]) -> CommonResult<usize> {
        self.write_samples(Measurement::Steps, samples).await
    }

    pub async fn write_calories_data(&self, samples: &[Sample]) -> CommonResult<usize> {
        self.write_samples(Measurement::Calories, samples).await
    }

    pub async fn write_weight_data(&self, samples: &[Sample]) -> CommonResult<usize> {
        self.write_samples(Measurement::Weight, samples).await
    }

    pub async fn write_heart_rate_data(&self, samples: &[Sample]) -> CommonResult<usize> {
        self.write_samples(Measurement::HeartRate, samples).await
    }

    pub async fn write_sleep_data(&self, samples: &[SleepSample]) -> CommonResult<usize> {
        let records: Vec<HealthRecord> = samples
            .iter()
            .map(|s| HealthRecord {
                sleep_type: Some(s.sleep_type.unwrap_or(0)),
                ..HealthRecord::new(Measurement::Sleep, s.duration_seconds, s.timestamp)
            })
            .collect();
        self.write_health_data(&records).await
    }

    pub async fn test_connection(&self) -> bool {
        let flux = format!(
            "from(bucket: \"{}\") |> range(start: -1m) |> limit(n: 1)",
            self.api.bucket()
        );
        match self.api.query_csv(flux).await {
            Ok(_) => true,
            Err(e) => {
                error!("InfluxDB connection test error: {e}");
                false
            }
        }
    }

    /// Newest `value` rows for a measurement over the last 30 days. Errors are logged and
    /// produce an empty list.
    pub async fn get_latest_data(&self, measurement: Measurement, limit: usize) -> Vec<LatestPoint> {
        let flux = format!(
            "from(bucket: \"{}\")\n  |> range(start: -30d)\n  |> filter(fn: (r) => r._measurement == \"{}\" and r._field == \"value\")\n  |> group()\n  |> sort(columns: [\"_time\"], desc: true)\n  |> limit(n: {limit})",
            self.api.bucket(),
            measurement.as_str()
        );

        match self.api.query_csv(flux).await.and_then(|csv| parse_query_csv(&csv)) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Data retrieval error: {e}");
                Vec::new()
            }
        }
    }
}

/// Flux CSV responses hold one block per result table, separated by blank lines, each with
/// its own header row.
pub fn parse_query_csv(body: &str) -> CommonResult<Vec<LatestPoint>> {
    let mut rows = Vec::new();
    let mut block = String::new();

    let mut flush = |block: &mut String| -> CommonResult<()> {
        if !block.is_empty() {
            let mut rdr = csv::Reader::from_reader(block.as_bytes());
            for result in rdr.deserialize() {
                let row: LatestPoint = result?;
                rows.push(row);
            }
            block.clear();
        }
        Ok(())
    };

    for line in body.lines() {
        if line.trim().is_empty() {
            flush(&mut block)?;
        } else {
            block.push_str(line);
            block.push('\n');
        }
    }
    flush(&mut block)?;

    Ok(rows)
}
