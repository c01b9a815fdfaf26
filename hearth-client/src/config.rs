//! Configuration for the client surface, the stream engine, and the
//! upload engine.
//!
//! Every knob has a documented default; `HEARTH_*` environment variables
//! can stand in for explicit values when building a [`ClientConfig`] with
//! [`ClientConfig::from_env`].

use std::env;
use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};

/// Default User-Agent header sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("hearth/", env!("CARGO_PKG_VERSION"));

/// Host template for account API endpoints.
const ACCOUNT_URL_TEMPLATE: &str = "https://{account}.campfirenow.com/";

/// Shared host for live message streams.
const STREAMING_URL: &str = "https://streaming.campfirenow.com/";

/// Credentials used for HTTP basic authentication against the service.
///
/// Token authentication sends the API token as the username with the
/// fixed password `"x"`. Login authentication sends real credentials and
/// is normally exchanged for a token during
/// [`crate::campfire::Campfire::connect`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// An API auth token.
    Token(String),
    /// A username/password pair.
    Login {
        /// Account username, usually an email address.
        username: String,
        /// Account password.
        password: String,
    },
}

impl Credentials {
    /// Token credentials.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    /// Username/password credentials.
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Login {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `(username, password)` pair to send as HTTP basic auth.
    pub(crate) fn basic_auth(&self) -> (&str, &str) {
        match self {
            Self::Token(token) => (token.as_str(), "x"),
            Self::Login { username, password } => (username.as_str(), password.as_str()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Exponential backoff schedule with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any computed delay.
    pub max: Duration,
}

impl BackoffPolicy {
    /// A policy with the given base delay and cap.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    ///
    /// Doubles per attempt, clamped to [`BackoffPolicy::max`].
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(20);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    /// 1 second base, capped at 120 seconds.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(120))
    }
}

/// Tunables for one room stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Pause between transcript requests in polling mode. Default 1 s.
    pub poll_interval: Duration,
    /// Capacity of the fetcher → dispatcher queue; a full queue blocks
    /// the fetcher rather than dropping messages. Default 64, floored
    /// at 1.
    pub queue_capacity: usize,
    /// Reconnect schedule after a live connection drops. Default 1 s
    /// doubling up to 120 s.
    pub reconnect: BackoffPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            queue_capacity: 64,
            reconnect: BackoffPolicy::default(),
        }
    }
}

/// Tunables for one file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Size of each transmitted chunk; progress is reported per chunk.
    /// Default 64 KiB, floored at 1.
    pub chunk_size: usize,
    /// Transport failures tolerated before the upload turns terminal.
    /// Default 2.
    pub max_retries: u32,
    /// Pause schedule between retries. Default 1 s doubling up to 30 s.
    pub retry_backoff: BackoffPolicy,
    /// MIME type sent with the file. Default `application/octet-stream`.
    pub content_type: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_retries: 2,
            retry_backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30)),
            content_type: "application/octet-stream".to_string(),
        }
    }
}

/// Connection settings for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Account subdomain, e.g. `acme` for `acme.campfirenow.com`.
    pub account: String,
    /// Authentication credentials.
    pub credentials: Credentials,
    /// Full API base URL, overriding the account-derived one.
    pub base_url: Option<Url>,
    /// Live-stream host, overriding the shared streaming host.
    pub streaming_url: Option<Url>,
    /// User-Agent header value. Default [`DEFAULT_USER_AGENT`].
    pub user_agent: String,
    /// Stream defaults handed to rooms created from this client.
    pub stream: StreamConfig,
    /// Upload defaults handed to rooms created from this client.
    pub upload: UploadConfig,
}

impl ClientConfig {
    /// A configuration with the given identity and all other knobs at
    /// their defaults.
    pub fn new(account: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            account: account.into(),
            credentials,
            base_url: None,
            streaming_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            stream: StreamConfig::default(),
            upload: UploadConfig::default(),
        }
    }

    /// Builds a configuration from `HEARTH_*` environment variables.
    ///
    /// `HEARTH_ACCOUNT` plus either `HEARTH_TOKEN` or
    /// `HEARTH_USERNAME`/`HEARTH_PASSWORD` are required; `HEARTH_TOKEN`
    /// wins when both are set. `HEARTH_BASE_URL`, `HEARTH_STREAMING_URL`
    /// and `HEARTH_USER_AGENT` are optional overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when required variables are
    /// missing or a URL override does not parse.
    pub fn from_env() -> ClientResult<Self> {
        let account = env::var("HEARTH_ACCOUNT")
            .map_err(|_| ClientError::Config("HEARTH_ACCOUNT is not set".to_string()))?;

        let credentials = if let Ok(token) = env::var("HEARTH_TOKEN") {
            Credentials::Token(token)
        } else {
            match (env::var("HEARTH_USERNAME"), env::var("HEARTH_PASSWORD")) {
                (Ok(username), Ok(password)) => Credentials::Login { username, password },
                _ => {
                    return Err(ClientError::Config(
                        "set HEARTH_TOKEN, or HEARTH_USERNAME and HEARTH_PASSWORD".to_string(),
                    ));
                }
            }
        };

        let mut config = Self::new(account, credentials);
        config.base_url = env_url("HEARTH_BASE_URL")?;
        config.streaming_url = env_url("HEARTH_STREAMING_URL")?;
        if let Ok(user_agent) = env::var("HEARTH_USER_AGENT") {
            config.user_agent = user_agent;
        }
        Ok(config)
    }

    /// The resolved API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the account name does not
    /// form a valid URL.
    pub fn resolved_base_url(&self) -> ClientResult<Url> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let raw = ACCOUNT_URL_TEMPLATE.replace("{account}", &self.account);
        Url::parse(&raw)
            .map_err(|err| ClientError::Config(format!("invalid account {:?}: {err}", self.account)))
    }

    /// The resolved live-stream base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when an override does not parse;
    /// the built-in default always parses.
    pub fn resolved_streaming_url(&self) -> ClientResult<Url> {
        if let Some(url) = &self.streaming_url {
            return Ok(url.clone());
        }
        Url::parse(STREAMING_URL)
            .map_err(|err| ClientError::Config(format!("invalid streaming host: {err}")))
    }

    /// Checks the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns every validation failure found, one message per problem.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.account.is_empty() && self.base_url.is_none() {
            errors.push("Account is required when no base URL override is set.".to_string());
        } else if self.base_url.is_none() && self.resolved_base_url().is_err() {
            errors.push(format!(
                "Account {:?} does not form a valid service URL.",
                self.account
            ));
        }

        match &self.credentials {
            Credentials::Token(token) if token.is_empty() => {
                errors.push("API token must not be empty.".to_string());
            }
            Credentials::Login { username, password }
                if username.is_empty() || password.is_empty() =>
            {
                errors.push("Username and password must not be empty.".to_string());
            }
            _ => {}
        }

        if self.stream.poll_interval.is_zero() {
            errors.push("Poll interval must be greater than zero.".to_string());
        }

        if self.upload.chunk_size == 0 {
            errors.push("Upload chunk size must be greater than zero.".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn env_url(name: &str) -> ClientResult<Option<Url>> {
    match env::var(name) {
        Ok(value) => Url::parse(&value)
            .map(Some)
            .map_err(|err| ClientError::Config(format!("{name}: {err}"))),
        Err(_) => Ok(None),
    }
}
