pub mod config;
pub mod google_fit_client;
pub mod influx_writer;
pub mod measurement;
pub mod metrics;
pub mod mock_data;
pub mod normalize;
pub mod sync;
pub mod telemetry;
pub mod time_range;
pub mod types;
