use crate::common::influx_writer::{InfluxApi, InfluxWriter};
use crate::common::measurement::{HealthRecord, Measurement};
use crate::common::metrics;
use crate::common::normalize::{RawPoint, normalize_points};
use crate::common::time_range::TimeRange;
use crate::common::types::CommonResult;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{error, info};

/// Records per measurement type, ordered by measurement.
pub type HealthData = BTreeMap<Measurement, Vec<HealthRecord>>;

/// Anything that can return raw dataset points for a data source over a time range.
pub trait DatasetSource {
    fn fetch_points(
        &self,
        data_source: &str,
        range: &TimeRange,
    ) -> impl Future<Output = anyhow::Result<Vec<RawPoint>>>;
}

async fn fetch_measurement<S: DatasetSource>(
    source: &S,
    measurement: Measurement,
    range: &TimeRange,
) -> anyhow::Result<Vec<HealthRecord>> {
    let points = source
        .fetch_points(measurement.data_source_id(), range)
        .await?;
    Ok(normalize_points(measurement, &points)?)
}

/// Fetch and normalize every fetched measurement type. A type that fails is logged and comes
/// back empty; the others are unaffected.
pub async fn fetch_all_data<S: DatasetSource>(source: &S, range: &TimeRange) -> HealthData {
    info!(
        "Starting data fetch: from {} to {}",
        range.start.to_rfc3339(),
        range.end.to_rfc3339()
    );

    let mut all_data = HealthData::new();
    for measurement in Measurement::FETCHED {
        let records = match fetch_measurement(source, measurement, range).await {
            Ok(records) => {
                info!("{}: fetched {} data points", measurement, records.len());
                records
            }
            Err(e) => {
                error!("{} data fetch error: {:#}", measurement, e);
                metrics::increment_data_type_failures(measurement.as_str());
                Vec::new()
            }
        };
        all_data.insert(measurement, records);
    }

    all_data
}

/// Write each non-empty measurement batch and return the total written. The first write
/// failure stops the run.
pub async fn write_all_data<A: InfluxApi>(
    writer: &InfluxWriter<A>,
    all_data: &HealthData,
) -> CommonResult<usize> {
    let mut total_points = 0;
    for (measurement, records) in all_data {
        if records.is_empty() {
            continue;
        }
        let written = writer.write_health_data(records).await?;
        total_points += written;
        info!("{}: wrote {} items to InfluxDB", measurement, written);
    }

    info!("Processing completed for total {} data points", total_points);
    Ok(total_points)
}

pub fn log_dry_run(all_data: &HealthData) {
    info!("Dry run mode: will not write to database");
    for (measurement, records) in all_data {
        info!("{}: {} items", measurement, records.len());
    }
}

/// Store phase of a run. Without a writer (dry run) only the per-type counts are logged and
/// nothing is written.
pub async fn store_all_data<A: InfluxApi>(
    writer: Option<&InfluxWriter<A>>,
    all_data: &HealthData,
) -> CommonResult<usize> {
    match writer {
        Some(writer) => write_all_data(writer, all_data).await,
        None => {
            log_dry_run(all_data);
            Ok(0)
        }
    }
}
