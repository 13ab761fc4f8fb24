use crate::common::types::{CommonError, CommonResult};
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_INFLUXDB_URL: &str = "http://localhost:8086";
pub const DEFAULT_INFLUXDB_ORG: &str = "fitlog";
pub const DEFAULT_INFLUXDB_BUCKET: &str = "health_data";
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";
pub const DEFAULT_CREDENTIALS_PATH: &str = "auth/client_secret.json";
pub const DEFAULT_TOKEN_PATH: &str = "auth/token.json";

/// Connection settings for the InfluxDB v2 write/query API.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl InfluxConfig {
    pub fn from_env() -> CommonResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. `INFLUXDB_ADMIN_TOKEN` is the only
    /// required key.
    pub fn from_lookup<F>(lookup: F) -> CommonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("INFLUXDB_ADMIN_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CommonError::Configuration(
                    "INFLUXDB_ADMIN_TOKEN environment variable is not set".to_string(),
                )
            })?;

        Ok(Self {
            url: lookup("INFLUXDB_URL").unwrap_or_else(|| DEFAULT_INFLUXDB_URL.to_string()),
            token,
            org: lookup("INFLUXDB_ORG").unwrap_or_else(|| DEFAULT_INFLUXDB_ORG.to_string()),
            bucket: lookup("INFLUXDB_BUCKET")
                .unwrap_or_else(|| DEFAULT_INFLUXDB_BUCKET.to_string()),
        })
    }
}

/// Google Fit side of the run: where OAuth files live and which zone defines "a day".
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub timezone: Tz,
}

impl FitConfig {
    pub fn from_env() -> CommonResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> CommonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            credentials_path: lookup("GOOGLE_FIT_CREDENTIALS")
                .unwrap_or_else(|| DEFAULT_CREDENTIALS_PATH.to_string())
                .into(),
            token_path: lookup("GOOGLE_FIT_TOKEN")
                .unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string())
                .into(),
            timezone: parse_timezone(lookup("TIMEZONE").as_deref())?,
        })
    }
}

pub fn parse_timezone(name: Option<&str>) -> CommonResult<Tz> {
    let name = name.unwrap_or(DEFAULT_TIMEZONE);
    name.parse::<Tz>()
        .map_err(|_| CommonError::Configuration(format!("TIMEZONE is not a valid IANA zone: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_influx_config_defaults() {
        let config = InfluxConfig::from_lookup(lookup_from(&[("INFLUXDB_ADMIN_TOKEN", "test_token")]))
            .unwrap();

        assert_eq!(config.url, "http://localhost:8086");
        assert_eq!(config.token, "test_token");
        assert_eq!(config.org, "fitlog");
        assert_eq!(config.bucket, "health_data");
    }

    #[test]
    fn test_influx_config_overrides() {
        let config = InfluxConfig::from_lookup(lookup_from(&[
            ("INFLUXDB_URL", "http://influx:8086"),
            ("INFLUXDB_ADMIN_TOKEN", "test_token"),
            ("INFLUXDB_ORG", "test_org"),
            ("INFLUXDB_BUCKET", "test_bucket"),
        ]))
        .unwrap();

        assert_eq!(config.url, "http://influx:8086");
        assert_eq!(config.org, "test_org");
        assert_eq!(config.bucket, "test_bucket");
    }

    #[test]
    fn test_missing_token_names_variable() {
        let err = InfluxConfig::from_lookup(lookup_from(&[])).unwrap_err();

        assert!(matches!(err, CommonError::Configuration(_)));
        assert!(err.to_string().contains("INFLUXDB_ADMIN_TOKEN"));
    }

    #[test]
    fn test_empty_token_is_missing() {
        let err =
            InfluxConfig::from_lookup(lookup_from(&[("INFLUXDB_ADMIN_TOKEN", "")])).unwrap_err();
        assert!(err.to_string().contains("INFLUXDB_ADMIN_TOKEN"));
    }

    #[test]
    fn test_fit_config_defaults_and_timezone() {
        let config = FitConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.credentials_path, PathBuf::from("auth/client_secret.json"));
        assert_eq!(config.token_path, PathBuf::from("auth/token.json"));
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);

        let config = FitConfig::from_lookup(lookup_from(&[("TIMEZONE", "Europe/Berlin")])).unwrap();
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_invalid_timezone_is_configuration_error() {
        let err = FitConfig::from_lookup(lookup_from(&[("TIMEZONE", "Mars/Olympus")])).unwrap_err();
        assert!(matches!(err, CommonError::Configuration(_)));
        assert!(err.to_string().contains("Mars/Olympus"));
    }
}
