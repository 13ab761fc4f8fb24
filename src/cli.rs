use clap::{Parser, Subcommand};
use function_timer::time;
use tracing::{error, info};

use fitlog::common::config::FitConfig;
use fitlog::common::google_fit_client::GoogleFitClient;
use fitlog::common::influx_writer::InfluxWriter;
use fitlog::common::measurement::Measurement;
use fitlog::common::mock_data::MockDataGenerator;
use fitlog::common::sync::{fetch_all_data, store_all_data};
use fitlog::common::telemetry;
use fitlog::common::time_range::{MAX_DAYS_BACK, TimeRange};

#[derive(Parser)]
#[command(about = "Sync Google Fit health data into InfluxDB")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch data from Google Fit and store it in InfluxDB
    Fetch {
        /// Number of days to fetch (how many days back)
        #[arg(long, default_value_t = 1, value_parser = days_parser())]
        days: u32,
        /// Execute without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate mock health data for demonstration purposes
    MockData {
        /// Number of days of mock data to generate
        #[arg(long, default_value_t = 7, value_parser = days_parser())]
        days: u32,
        /// Show generated data without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Check the InfluxDB connection and print the latest points
    Check {
        #[arg(short, long, default_value = "steps")]
        measurement: Measurement,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
}

fn days_parser() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(..=i64::from(MAX_DAYS_BACK))
}

#[time("fetch_command_duration")]
async fn fetch(days: u32, dry_run: bool) -> anyhow::Result<()> {
    let fit_config = FitConfig::from_env()?;
    // Fail on missing InfluxDB settings before the OAuth round trip.
    let writer = if dry_run {
        None
    } else {
        Some(InfluxWriter::from_env()?)
    };

    let mut client = GoogleFitClient::new(&fit_config);
    client.authenticate().await?;

    let range = TimeRange::days_back(days, fit_config.timezone)?;
    info!("Fetching {} days back", days);
    let all_data = fetch_all_data(&client, &range).await;

    store_all_data(writer.as_ref(), &all_data).await?;
    Ok(())
}

#[time("mock_data_command_duration")]
async fn mock_data(days: u32, dry_run: bool) -> anyhow::Result<()> {
    let fit_config = FitConfig::from_env()?;
    let writer = if dry_run {
        None
    } else {
        Some(InfluxWriter::from_env()?)
    };

    let all_data = MockDataGenerator::new(fit_config.timezone).generate_all_mock_data(days);

    let total = store_all_data(writer.as_ref(), &all_data).await?;
    if !dry_run {
        info!("Successfully wrote {} mock data points to InfluxDB", total);
        info!("Mock data generation completed! You can now view dashboards in Grafana.");
    }
    Ok(())
}

async fn check(measurement: Measurement, limit: usize) -> anyhow::Result<()> {
    let writer = InfluxWriter::from_env()?;

    if !writer.test_connection().await {
        anyhow::bail!("InfluxDB connection failed");
    }
    println!("InfluxDB connection successful");

    let latest = writer.get_latest_data(measurement, limit).await;
    println!("Latest {measurement} data: {} items", latest.len());
    for point in latest {
        println!("{}  {}", point.time.to_rfc3339(), point.value);
    }
    Ok(())
}

pub async fn cli_main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing();
    let args = Cli::parse();

    let result = match args.command {
        Commands::Fetch { days, dry_run } => fetch(days, dry_run).await,
        Commands::MockData { days, dry_run } => mock_data(days, dry_run).await,
        Commands::Check { measurement, limit } => check(measurement, limit).await,
    };

    result.inspect_err(|e| error!("Execution error: {e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fetch_defaults() {
        let cli = Cli::try_parse_from(["fitlog", "fetch"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { days: 1, dry_run: false }));

        let cli = Cli::try_parse_from(["fitlog", "fetch", "--days", "3", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { days: 3, dry_run: true }));
    }

    #[test]
    fn test_days_is_bounded() {
        let cli = Cli::try_parse_from(["fitlog", "fetch", "--days", "36500"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { days: 36_500, .. }));

        assert!(Cli::try_parse_from(["fitlog", "fetch", "--days", "40000"]).is_err());
        assert!(Cli::try_parse_from(["fitlog", "fetch", "--days", "4294967295"]).is_err());
        assert!(Cli::try_parse_from(["fitlog", "mock-data", "--days", "100000"]).is_err());
    }

    #[test]
    fn test_mock_data_defaults() {
        let cli = Cli::try_parse_from(["fitlog", "mock-data"]).unwrap();
        assert!(matches!(cli.command, Commands::MockData { days: 7, dry_run: false }));
    }

    #[test]
    fn test_check_parses_measurement() {
        let cli = Cli::try_parse_from(["fitlog", "check", "-m", "heart_rate", "-l", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Check {
                measurement: Measurement::HeartRate,
                limit: 3
            }
        ));
        assert!(Cli::try_parse_from(["fitlog", "check", "-m", "blood_pressure"]).is_err());
    }
}
