use crate::common::config::FitConfig;
use crate::common::metrics;
use crate::common::normalize::RawPoint;
use crate::common::sync::DatasetSource;
use crate::common::time_range::TimeRange;
use crate::common::types::{CommonError, CommonResult};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

const FITNESS_ENDPOINT: &str = "https://www.googleapis.com/fitness/v1/users/me";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";

pub const SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/fitness.activity.read",
    "https://www.googleapis.com/auth/fitness.body.read",
    "https://www.googleapis.com/auth/fitness.sleep.read",
    "https://www.googleapis.com/auth/fitness.heart_rate.read",
];

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// client_secret.json as downloaded from the Google Cloud console
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl ClientSecret {
    fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }
}

/// Token cache in the authorized-user JSON layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizedUser {
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl AuthorizedUser {
    /// Usable if it does not expire within the next minute. No expiry means no known limit.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty()
            && self
                .expiry
                .is_none_or(|expiry| now + Duration::seconds(60) < expiry)
    }

    pub fn load(path: &Path) -> CommonResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> CommonResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Serialize)]
struct AuthorizationCodeRequest<'a> {
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(default)]
    point: Vec<RawPoint>,
}

/// PKCE verifier/challenge pair (S256).
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

pub fn authorization_url(secret: &ClientSecret, state: &str, pkce: &Pkce) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
        secret.auth_uri,
        urlencoding::encode(&secret.client_id),
        urlencoding::encode(secret.redirect_uri()),
        urlencoding::encode(&SCOPES.join(" ")),
        urlencoding::encode(state),
        pkce.challenge,
    )
}

/// Accepts either the bare code or the full redirect URL pasted from the browser.
pub fn extract_authorization_code(input: &str, expected_state: &str) -> CommonResult<String> {
    let input = input.trim();
    let Some((_, query)) = input.split_once('?') else {
        if input.is_empty() {
            return Err(CommonError::Authentication(
                "No authorization code entered".to_string(),
            ));
        }
        return Ok(input.to_string());
    };

    let mut code = None;
    let mut state = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map_err(|e| CommonError::Authentication(format!("Malformed redirect URL: {e}")))?
            .into_owned();
        match key {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => {
                return Err(CommonError::Authentication(format!(
                    "Authorization denied: {value}"
                )));
            }
            _ => {}
        }
    }

    if state.as_deref().is_some_and(|s| s != expected_state) {
        return Err(CommonError::Authentication(
            "OAuth state mismatch".to_string(),
        ));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| CommonError::Authentication("Redirect URL has no code".to_string()))
}

pub struct GoogleFitClient {
    client: ClientWithMiddleware,
    credentials_path: PathBuf,
    token_path: PathBuf,
    auth_header: Option<String>,
}

impl GoogleFitClient {
    pub fn new(config: &FitConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            credentials_path: config.credentials_path.clone(),
            token_path: config.token_path.clone(),
            auth_header: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_header.is_some()
    }

    pub fn set_access_token(&mut self, access_token: &str) {
        self.auth_header = Some(format!("Bearer {access_token}"));
    }

    /// Cached token, then refresh, then the interactive consent flow. The cache is rewritten
    /// whenever a new token is obtained.
    pub async fn authenticate(&mut self) -> CommonResult<()> {
        let cached = AuthorizedUser::load(&self.token_path)?;

        let user = match cached {
            Some(user) if user.is_valid_at(Utc::now()) => user,
            Some(user) if user.refresh_token.is_some() => {
                info!("Refreshing expired Google Fit token");
                let refreshed = self.refresh(&user).await?;
                refreshed.save(&self.token_path)?;
                refreshed
            }
            _ => {
                let user = self.interactive_flow().await?;
                user.save(&self.token_path)?;
                user
            }
        };

        self.set_access_token(&user.token);
        info!("Google Fit API authentication completed");
        Ok(())
    }

    fn load_client_secret(&self) -> CommonResult<ClientSecret> {
        if !self.credentials_path.exists() {
            return Err(CommonError::Configuration(format!(
                "Authentication file not found: {}",
                self.credentials_path.display()
            )));
        }
        let file: ClientSecretFile =
            serde_json::from_str(&fs::read_to_string(&self.credentials_path)?)?;
        file.installed.or(file.web).ok_or_else(|| {
            CommonError::Configuration(format!(
                "{} has no \"installed\" or \"web\" client",
                self.credentials_path.display()
            ))
        })
    }

    async fn interactive_flow(&self) -> CommonResult<AuthorizedUser> {
        let secret = self.load_client_secret()?;
        let pkce = Pkce::generate();
        let state = uuid::Uuid::new_v4().to_string();

        eprintln!("Open this URL in a browser to authorize access to Google Fit:\n");
        eprintln!("{}\n", authorization_url(&secret, &state, &pkce));
        eprint!("Paste the authorization code or the full redirect URL: ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        let code = extract_authorization_code(&input, &state)?;

        let request = AuthorizationCodeRequest {
            grant_type: "authorization_code",
            code: &code,
            redirect_uri: secret.redirect_uri(),
            client_id: &secret.client_id,
            client_secret: &secret.client_secret,
            code_verifier: &pkce.verifier,
        };
        let response = self.post_token(&secret.token_uri, &request).await?;

        Ok(AuthorizedUser {
            token: response.access_token,
            refresh_token: response.refresh_token,
            token_uri: secret.token_uri,
            client_id: secret.client_id,
            client_secret: secret.client_secret,
            scopes: scopes_from(response.scope.as_deref()),
            expiry: expiry_from(response.expires_in),
        })
    }

    async fn refresh(&self, user: &AuthorizedUser) -> CommonResult<AuthorizedUser> {
        let refresh_token = user.refresh_token.as_deref().ok_or_else(|| {
            CommonError::Authentication("No refresh token available".to_string())
        })?;

        let request = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &user.client_id,
            client_secret: &user.client_secret,
        };
        let response = self.post_token(&user.token_uri, &request).await?;

        Ok(AuthorizedUser {
            token: response.access_token,
            refresh_token: response.refresh_token.or_else(|| user.refresh_token.clone()),
            scopes: match response.scope {
                Some(scope) => scopes_from(Some(&scope)),
                None => user.scopes.clone(),
            },
            expiry: expiry_from(response.expires_in),
            ..user.clone()
        })
    }

    async fn post_token<T: Serialize>(
        &self,
        token_uri: &str,
        request: &T,
    ) -> CommonResult<OAuthTokenResponse> {
        let response = self
            .client
            .post(token_uri)
            .form(request)
            .send()
            .await
            .inspect_err(|_e| metrics::increment_google_fit_api_failure())?;

        let status = response.status();
        let body = response
            .text()
            .await
            .inspect_err(|_e| metrics::increment_google_fit_api_failure())?;

        if !status.is_success() {
            metrics::increment_google_fit_api_failure();
            return Err(CommonError::Authentication(format!(
                "OAuth token request failed with status {status}: {body}"
            )));
        }

        metrics::increment_google_fit_api_success();
        serde_json::from_str(&body).map_err(|e| {
            CommonError::Authentication(format!("Failed to parse OAuth token response: {e}"))
        })
    }

    pub async fn fetch_dataset(
        &self,
        data_source: &str,
        range: &TimeRange,
    ) -> CommonResult<Vec<RawPoint>> {
        let auth_header = self
            .auth_header
            .as_ref()
            .ok_or_else(|| CommonError::Authentication("No access token set".to_string()))?;

        let path = format!(
            "{FITNESS_ENDPOINT}/dataSources/{}/datasets/{}",
            urlencoding::encode(data_source),
            range.dataset_id()
        );

        let response = self
            .client
            .get(path)
            .header("Authorization", auth_header)
            .send()
            .await
            .inspect_err(|_e| metrics::increment_google_fit_api_failure())?;

        let status = response.status();
        let body = response
            .text()
            .await
            .inspect_err(|_e| metrics::increment_google_fit_api_failure())?;

        if !status.is_success() {
            metrics::increment_google_fit_api_failure();
            error!("Data fetch error ({data_source}): HTTP {status}");
            return Err(CommonError::Http(status, body));
        }

        metrics::increment_google_fit_api_success();
        let dataset: Dataset = serde_json::from_str(&body)?;
        Ok(dataset.point)
    }
}

impl DatasetSource for GoogleFitClient {
    async fn fetch_points(&self, data_source: &str, range: &TimeRange) -> anyhow::Result<Vec<RawPoint>> {
        Ok(self.fetch_dataset(data_source, range).await?)
    }
}

fn scopes_from(scope: Option<&str>) -> Vec<String> {
    match scope {
        Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
        None => SCOPES.iter().map(|s| s.to_string()).collect(),
    }
}

fn expiry_from(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + Duration::seconds(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempdir::TempDir;

    fn user(expiry: Option<DateTime<Utc>>) -> AuthorizedUser {
        AuthorizedUser {
            token: "ya29.token".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: "client.apps.googleusercontent.com".to_string(),
            client_secret: "secret".to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            expiry,
        }
    }

    #[test]
    fn test_token_validity_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert!(user(None).is_valid_at(now));
        assert!(user(Some(now + Duration::minutes(10))).is_valid_at(now));
        assert!(!user(Some(now + Duration::seconds(30))).is_valid_at(now));
        assert!(!user(Some(now - Duration::minutes(1))).is_valid_at(now));
    }

    #[test]
    fn test_token_cache_reads_authorized_user_json() {
        let json = r#"{"token": "ya29.a0", "refresh_token": "1//0g", "token_uri": "https://oauth2.googleapis.com/token",
                       "client_id": "id", "client_secret": "s", "scopes": ["a"], "expiry": "2024-05-01T12:00:00.123456Z"}"#;
        let parsed: AuthorizedUser = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.token, "ya29.a0");
        assert_eq!(
            parsed.expiry.unwrap().timestamp(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_token_cache_save_and_load() {
        let dir = TempDir::new("fitlog_token").unwrap();
        let path = dir.path().join("auth").join("token.json");

        assert_eq!(AuthorizedUser::load(&path).unwrap(), None);

        let original = user(Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
        original.save(&path).unwrap();
        assert_eq!(AuthorizedUser::load(&path).unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_missing_credentials_file_is_configuration_error() {
        let dir = TempDir::new("fitlog_auth").unwrap();
        let config = FitConfig {
            credentials_path: dir.path().join("client_secret.json"),
            token_path: dir.path().join("token.json"),
            timezone: chrono_tz::Asia::Tokyo,
        };
        let mut client = GoogleFitClient::new(&config);

        let err = client.authenticate().await.unwrap_err();

        assert!(matches!(err, CommonError::Configuration(_)));
        assert!(err.to_string().contains("client_secret.json"));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_valid_cached_token_skips_network() {
        let dir = TempDir::new("fitlog_auth").unwrap();
        let config = FitConfig {
            credentials_path: dir.path().join("client_secret.json"),
            token_path: dir.path().join("token.json"),
            timezone: chrono_tz::Asia::Tokyo,
        };
        user(Some(Utc::now() + Duration::hours(1)))
            .save(&config.token_path)
            .unwrap();
        let mut client = GoogleFitClient::new(&config);

        client.authenticate().await.unwrap();

        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn test_fetch_requires_authentication() {
        let config = FitConfig {
            credentials_path: "missing.json".into(),
            token_path: "missing-token.json".into(),
            timezone: chrono_tz::Asia::Tokyo,
        };
        let client = GoogleFitClient::new(&config);
        let range = TimeRange::days_back(1, chrono_tz::Asia::Tokyo).unwrap();

        let err = client.fetch_dataset("derived:x", &range).await.unwrap_err();
        assert!(matches!(err, CommonError::Authentication(_)));
    }

    #[test]
    fn test_client_secret_defaults() {
        let file: ClientSecretFile = serde_json::from_str(
            r#"{"installed": {"client_id": "id", "client_secret": "s"}}"#,
        )
        .unwrap();
        let secret = file.installed.unwrap();

        assert_eq!(secret.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(secret.redirect_uri(), "http://localhost");
    }

    #[test]
    fn test_pkce_challenge() {
        // RFC 7636 appendix B
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");

        let generated = Pkce::generate();
        assert_eq!(generated.verifier.len(), 64);
    }

    #[test]
    fn test_authorization_url() {
        let secret = ClientSecret {
            client_id: "abc.apps.googleusercontent.com".to_string(),
            client_secret: "s".to_string(),
            auth_uri: DEFAULT_AUTH_URI.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            redirect_uris: vec!["http://localhost".to_string()],
        };
        let pkce = Pkce::from_verifier("v".repeat(64));
        let url = authorization_url(&secret, "state-1", &pkce);

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?response_type=code"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost"));
        assert!(url.contains("fitness.sleep.read"));
        assert!(url.contains(&format!("code_challenge={}", pkce.challenge)));
        assert!(url.contains("state=state-1"));
    }

    #[test]
    fn test_extract_authorization_code() {
        assert_eq!(extract_authorization_code(" 4/0Abc \n", "s").unwrap(), "4/0Abc");
        assert_eq!(
            extract_authorization_code("http://localhost/?state=s&code=4%2F0Abc&scope=x", "s")
                .unwrap(),
            "4/0Abc"
        );
        assert!(extract_authorization_code("http://localhost/?state=other&code=c", "s").is_err());
        assert!(extract_authorization_code("http://localhost/?error=access_denied", "s").is_err());
        assert!(extract_authorization_code("", "s").is_err());
    }
}
