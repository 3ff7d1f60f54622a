//! Command line and environment configuration for the daemon.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fleet_sync::{parse_device_list, parse_origin_list, EngineConfig};
use tracing::info;

/// Fleet live-state daemon
///
/// Polls the fleet provider for every configured device and pushes the
/// aggregated state to WebSocket viewers.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetd")]
#[command(about = "Fleet live-state daemon")]
#[command(version)]
pub struct Args {
    /// Comma separated device ids to track
    #[arg(long, default_value = "")]
    pub device_ids: String,

    /// Upstream account name
    #[arg(long, default_value = "")]
    pub username: String,

    /// Upstream account password
    #[arg(long, default_value = "", hide_default_value = true)]
    pub password: String,

    /// Upstream API base URL
    #[arg(long, default_value = fleet_sync::config::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Address to serve on
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to serve on
    #[arg(short, long, default_value = "8000")]
    pub port: u16,

    /// Seconds between polling passes
    #[arg(long, default_value = "5")]
    pub poll_interval: u64,

    /// Seconds between snapshot broadcasts
    #[arg(long, default_value = "5")]
    pub broadcast_interval: u64,

    /// Upstream request timeout in seconds
    #[arg(long, default_value = "10")]
    pub request_timeout: u64,

    /// Deployment name reported by the health endpoint
    #[arg(long, default_value = "development")]
    pub environment: String,

    /// Comma separated browser origins allowed by CORS, or `*`
    #[arg(long, default_value = "*")]
    pub allowed_origins: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Override arguments from environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ids) = lookup("DEVICE_IDS") {
            self.device_ids = ids;
        }
        if let Some(username) = lookup("FLEET_USERNAME") {
            self.username = username;
        }
        if let Some(password) = lookup("FLEET_PASSWORD") {
            self.password = password;
        }
        if let Some(base_url) = lookup("BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(host) = lookup("API_HOST") {
            self.host = host
                .parse()
                .context("Invalid API_HOST environment variable")?;
        }
        if let Some(port) = lookup("API_PORT") {
            self.port = port
                .parse()
                .context("Invalid API_PORT environment variable")?;
        }
        if let Some(environment) = lookup("ENVIRONMENT") {
            self.environment = environment;
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            self.allowed_origins = origins;
        }
        if let Some(log_level) = lookup("FLEET_LOG_LEVEL") {
            self.log_level = log_level;
        }
        Ok(())
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval == 0 || self.broadcast_interval == 0 {
            return Err(anyhow!("Poll and broadcast intervals must be positive"));
        }

        if self.request_timeout == 0 {
            return Err(anyhow!("Request timeout must be positive"));
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(anyhow!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                ));
            }
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub listen: SocketAddr,
    pub log_level: String,
}

impl Config {
    /// Parse arguments, apply environment overrides and validate everything.
    pub fn from_env() -> Result<Self> {
        let mut args = Args::parse();
        args.apply_env(|key| std::env::var(key).ok())?;
        Self::from_args(args)
    }

    pub fn from_args(args: Args) -> Result<Self> {
        args.validate()?;

        let engine = EngineConfig::new()
            .with_devices(parse_device_list(&args.device_ids))
            .with_credentials(args.username, args.password)
            .with_base_url(args.base_url)
            .with_request_timeout(Duration::from_secs(args.request_timeout))
            .with_poll_interval(Duration::from_secs(args.poll_interval))
            .with_broadcast_interval(Duration::from_secs(args.broadcast_interval))
            .with_environment(args.environment)
            .with_allowed_origins(parse_origin_list(&args.allowed_origins));

        engine
            .validate()
            .context("Invalid configuration (check DEVICE_IDS, FLEET_USERNAME, FLEET_PASSWORD, ALLOWED_ORIGINS)")?;

        Ok(Self {
            engine,
            listen: SocketAddr::new(args.host, args.port),
            log_level: args.log_level,
        })
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  Devices: {}", self.engine.device_ids.join(", "));
        info!("  Upstream: {}", self.engine.base_url);
        info!("  Account: {}", self.engine.account);
        info!("  Listen: {}", self.listen);
        info!("  Poll interval: {}s", self.engine.poll_interval.as_secs());
        info!("  Broadcast interval: {}s", self.engine.broadcast_interval.as_secs());
        info!("  Environment: {}", self.engine.environment);
        info!("  CORS allowed origins: {}", self.engine.allowed_origins.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["fleetd"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]);
        assert_eq!(args.port, 8000);
        assert_eq!(args.host.to_string(), "0.0.0.0");
        assert_eq!(args.base_url, "http://fleet.lagaam.in");
        assert_eq!(args.environment, "development");
        assert_eq!(args.allowed_origins, "*");
    }

    #[test]
    fn test_env_overrides_args() {
        let mut args = args(&["--port", "9000"]);
        args.apply_env(env(&[
            ("DEVICE_IDS", " D1, D2 ,, "),
            ("FLEET_USERNAME", "ops"),
            ("FLEET_PASSWORD", "secret"),
            ("API_HOST", "127.0.0.1"),
            ("API_PORT", "8100"),
            ("ENVIRONMENT", "production"),
            ("ALLOWED_ORIGINS", "https://dashboard.example.com, http://localhost:3000"),
        ]))
        .unwrap();

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.engine.device_ids, vec!["D1", "D2"]);
        assert_eq!(config.engine.account, "ops");
        assert_eq!(config.listen, "127.0.0.1:8100".parse::<SocketAddr>().unwrap());
        assert_eq!(config.engine.environment, "production");
        assert_eq!(
            config.engine.allowed_origins,
            vec!["https://dashboard.example.com", "http://localhost:3000"]
        );
    }

    #[test]
    fn test_invalid_allowed_origin() {
        let mut args = args(&["--allowed-origins", "dashboard.example.com"]);
        args.apply_env(env(&[
            ("DEVICE_IDS", "D1"),
            ("FLEET_USERNAME", "ops"),
            ("FLEET_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert!(Config::from_args(args).is_err());
    }

    #[rstest]
    #[case("API_PORT", "eighty")]
    #[case("API_HOST", "not-an-ip")]
    fn test_invalid_env_values(#[case] key: &str, #[case] value: &str) {
        let mut args = args(&[]);
        assert!(args.apply_env(env(&[(key, value)])).is_err());
    }

    #[rstest]
    #[case(&[("FLEET_USERNAME", "ops"), ("FLEET_PASSWORD", "secret")])]
    #[case(&[("DEVICE_IDS", "D1"), ("FLEET_PASSWORD", "secret")])]
    #[case(&[("DEVICE_IDS", " , "), ("FLEET_USERNAME", "ops"), ("FLEET_PASSWORD", "secret")])]
    fn test_missing_required_configuration(#[case] pairs: &[(&str, &str)]) {
        let mut args = args(&[]);
        args.apply_env(env(pairs)).unwrap();
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut args = args(&["--log-level", "loud"]);
        args.apply_env(env(&[
            ("DEVICE_IDS", "D1"),
            ("FLEET_USERNAME", "ops"),
            ("FLEET_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert!(Config::from_args(args).is_err());
    }
}
