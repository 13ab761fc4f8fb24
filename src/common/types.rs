use std::fmt;

#[derive(Debug)]
pub enum CommonError {
    Http(reqwest::StatusCode, String),
    Network(String),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Csv(csv::Error),
    Configuration(String),
    Authentication(String),
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommonError::Http(status, body) if body.is_empty() => write!(f, "HTTP {status}"),
            CommonError::Http(status, body) => write!(f, "HTTP {status}: {body}"),
            CommonError::Network(msg) => write!(f, "Network error: {msg}"),
            CommonError::Io(err) => write!(f, "IO error: {err}"),
            CommonError::Serialization(err) => write!(f, "Serialization error: {err}"),
            CommonError::Csv(err) => write!(f, "CSV error: {err}"),
            CommonError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            CommonError::Authentication(msg) => write!(f, "Authentication error: {msg}"),
        }
    }
}

impl std::error::Error for CommonError {}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        CommonError::Io(err)
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        CommonError::Serialization(err)
    }
}

impl From<csv::Error> for CommonError {
    fn from(err: csv::Error) -> Self {
        CommonError::Csv(err)
    }
}

impl From<reqwest::Error> for CommonError {
    fn from(err: reqwest::Error) -> Self {
        CommonError::Network(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for CommonError {
    fn from(err: reqwest_middleware::Error) -> Self {
        CommonError::Network(err.to_string())
    }
}

// Common result type alias
pub type CommonResult<T> = Result<T, CommonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_includes_body() {
        let err = CommonError::Http(reqwest::StatusCode::UNAUTHORIZED, "bad token".to_string());
        assert_eq!(err.to_string(), "HTTP 401 Unauthorized: bad token");

        let err = CommonError::Http(reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert_eq!(err.to_string(), "HTTP 502 Bad Gateway");
    }

    #[test]
    fn test_configuration_error_display() {
        let err = CommonError::Configuration("INFLUXDB_ADMIN_TOKEN is not set".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: INFLUXDB_ADMIN_TOKEN is not set"
        );
    }
}
