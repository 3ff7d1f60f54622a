//! Configuration for the sync engine
//!
//! `EngineConfig` carries everything the engine needs to run: the device
//! list, upstream credentials, and the cadence of both background loops.

use std::fmt;
use std::time::Duration;

use state_store::Position;
use thiserror::Error;

/// Upstream used when no base URL is configured
pub const DEFAULT_BASE_URL: &str = "http://fleet.lagaam.in";

/// Configuration problems detected before the engine starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no devices configured")]
    NoDevices,

    #[error("device {0} is listed more than once")]
    DuplicateDevice(String),

    #[error("upstream account and password are required")]
    MissingCredentials,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the FleetEngine
#[derive(Clone)]
pub struct EngineConfig {
    /// Devices to track, in display order
    pub device_ids: Vec<String>,

    /// Upstream account name
    pub account: String,

    /// Upstream account password
    pub password: String,

    /// Upstream API base URL
    /// Default: http://fleet.lagaam.in
    pub base_url: String,

    /// Timeout applied to every upstream request
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Pause between polling passes
    /// Default: 5 seconds
    pub poll_interval: Duration,

    /// Pause between snapshot broadcasts
    /// Default: 5 seconds
    pub broadcast_interval: Duration,

    /// Upper bound on a single push to one subscriber
    /// Default: 5 seconds
    pub send_timeout: Duration,

    /// Data older than this marks the engine degraded
    /// Default: 60 seconds
    pub stale_after: Duration,

    /// Data younger than this counts as fresh
    /// Default: 30 seconds
    pub fresh_within: Duration,

    /// Position reported before a device's first fix
    pub default_position: Position,

    /// Deployment name reported by health checks
    /// Default: "development"
    pub environment: String,

    /// Browser origins allowed to call the HTTP routes; `*` allows any
    /// Default: ["*"]
    pub allowed_origins: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_ids: Vec::new(),
            account: String::new(),
            password: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            broadcast_interval: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(60),
            fresh_within: Duration::from_secs(30),
            default_position: Position::default(),
            environment: "development".to_string(),
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration, rejecting anything that would stop the
    /// engine from doing useful work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_ids.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        for (index, id) in self.device_ids.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("device ids must not be blank".to_string()));
            }
            if self.device_ids[..index].contains(id) {
                return Err(ConfigError::DuplicateDevice(id.clone()));
            }
        }

        if self.account.trim().is_empty() || self.password.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base url must be http(s): {}",
                self.base_url
            )));
        }

        for (name, value) in [
            ("request timeout", self.request_timeout),
            ("poll interval", self.poll_interval),
            ("broadcast interval", self.broadcast_interval),
            ("send timeout", self.send_timeout),
        ] {
            if value == Duration::ZERO {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.fresh_within > self.stale_after {
            return Err(ConfigError::Invalid(
                "fresh window must not exceed the stale threshold".to_string(),
            ));
        }

        if self.allowed_origins.is_empty() {
            return Err(ConfigError::Invalid("at least one allowed origin is required".to_string()));
        }
        if let Some(origin) = self.allowed_origins.iter().find(|o| !is_valid_origin(o)) {
            return Err(ConfigError::Invalid(format!("invalid allowed origin: {origin}")));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_devices<I, S>(mut self, device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.device_ids = device_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credentials(mut self, account: impl Into<String>, password: impl Into<String>) -> Self {
        self.account = account.into();
        self.password = password.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_freshness(mut self, fresh_within: Duration, stale_after: Duration) -> Self {
        self.fresh_within = fresh_within;
        self.stale_after = stale_after;
        self
    }

    pub fn with_default_position(mut self, position: Position) -> Self {
        self.default_position = position;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Whether any browser origin may call the HTTP routes
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("device_ids", &self.device_ids)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("broadcast_interval", &self.broadcast_interval)
            .field("send_timeout", &self.send_timeout)
            .field("stale_after", &self.stale_after)
            .field("fresh_within", &self.fresh_within)
            .field("default_position", &self.default_position)
            .field("environment", &self.environment)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

/// Split a comma separated device list, trimming entries and dropping blanks.
pub fn parse_device_list(raw: &str) -> Vec<String> {
    split_list(raw)
}

/// Split a comma separated origin list such as `ALLOWED_ORIGINS`.
pub fn parse_origin_list(raw: &str) -> Vec<String> {
    split_list(raw)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// `*`, or `scheme://host[:port]` with an http(s) scheme and no path
fn is_valid_origin(origin: &str) -> bool {
    if origin == "*" {
        return true;
    }
    let authority = match origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    !authority.is_empty()
        && !authority.contains(['/', '*', '?', '#'])
        && !authority.chars().any(char::is_whitespace)
}
