use metrics::counter;

/// Error/Reliability Metrics - Success/Failure pairs
pub fn increment_google_fit_api_success() {
    counter!("google_fit_api_total", "result" => "success").increment(1);
}

pub fn increment_google_fit_api_failure() {
    counter!("google_fit_api_total", "result" => "failure").increment(1);
}

pub fn increment_influx_write_success() {
    counter!("influx_write_total", "result" => "success").increment(1);
}

pub fn increment_influx_write_failure() {
    counter!("influx_write_total", "result" => "failure").increment(1);
}

/// Business Logic Metrics
pub fn increment_points_written(measurement: &str, count: u64) {
    counter!("points_written", "measurement" => measurement.to_string()).increment(count);
}

pub fn increment_records_skipped(count: u64) {
    counter!("records_skipped").increment(count);
}

pub fn increment_data_type_failures(measurement: &str) {
    counter!("data_type_failures", "measurement" => measurement.to_string()).increment(1);
}
