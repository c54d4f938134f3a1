use clap::Parser;
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::service::CollabConfig;

/// Team collaboration session server
///
/// Every setting is optional here so that only flags actually given on the
/// command line (or through their env var) override the lower layers.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "collab-server", version, about = "Team collaboration session server")]
pub struct Cli {
    /// Port to listen on [default: 8787]
    #[arg(long, env = "COLLAB_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "COLLAB_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./collab.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COLLAB_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for the SQLite database [default: ./data]
    #[arg(long, env = "COLLAB_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Seconds a new connection has to authenticate [default: 30]
    #[arg(long, env = "COLLAB_AUTH_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_timeout_secs: Option<u64>,

    /// Chat messages kept per session for late joiners [default: 200]
    #[arg(long, env = "COLLAB_CHAT_HISTORY_CAPACITY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_history_capacity: Option<usize>,

    /// Activity entries kept per session for late joiners [default: 100]
    #[arg(long, env = "COLLAB_ACTIVITY_HISTORY_CAPACITY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_history_capacity: Option<usize>,

    /// Seconds between server WebSocket pings [default: 30]
    #[arg(long, env = "COLLAB_HEARTBEAT_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection [default: 10]
    #[arg(long, env = "COLLAB_HEARTBEAT_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_secs: Option<u64>,
}

/// Resolved server settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    pub auth_timeout_secs: u64,
    pub chat_history_capacity: usize,
    pub activity_history_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            auth_timeout_secs: 30,
            chat_history_capacity: 200,
            activity_history_capacity: 100,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COLLAB_*) < CLI args
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::layered(cli, Toml::file(&cli.config))
    }

    fn layered(cli: &Cli, toml: Data<Toml>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed("COLLAB_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Tunables handed to the collaboration service.
    pub fn collab_config(&self) -> CollabConfig {
        CollabConfig {
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            chat_capacity: self.chat_history_capacity.max(1),
            activity_capacity: self.activity_history_capacity.max(1),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Team Collaboration Server Configuration
# Place this file at ./collab.toml or specify with --config <path>
# All settings can be overridden via environment variables (COLLAB_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8787)
# port = 8787

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Sessions ----

# Seconds a new connection has to send `authenticate` (default: 30)
# auth_timeout_secs = 30

# Recent chat messages replayed to joiners (default: 200)
# chat_history_capacity = 200

# Recent activity entries replayed to joiners (default: 100)
# activity_history_capacity = 100

# ---- Heartbeat ----

# Seconds between server pings (default: 30)
# heartbeat_interval_secs = 30

# Seconds to wait for a pong before closing (default: 10)
# heartbeat_timeout_secs = 10
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const TOML: &str = "port = 9000\nauth_timeout_secs = 5";

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("collab-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_service_defaults() {
        let collab = Config::default().collab_config();
        let defaults = CollabConfig::default();
        assert_eq!(collab.auth_timeout, defaults.auth_timeout);
        assert_eq!(collab.chat_capacity, defaults.chat_capacity);
        assert_eq!(collab.activity_capacity, defaults.activity_capacity);
        assert_eq!(collab.heartbeat_interval, defaults.heartbeat_interval);
        assert_eq!(collab.heartbeat_timeout, defaults.heartbeat_timeout);
    }

    // Env-reading tests run inside a jail so they never see each other's vars.
    #[test]
    fn toml_survives_when_no_flags_are_given() {
        Jail::expect_with(|_| {
            let config = Config::layered(&cli(&[]), Toml::string(TOML))?;
            assert_eq!(config.port, 9000);
            assert_eq!(config.collab_config().auth_timeout, Duration::from_secs(5));
            assert_eq!(config.chat_history_capacity, 200);
            assert_eq!(config.bind_address, "0.0.0.0");
            Ok(())
        });
    }

    #[test]
    fn explicit_flag_overrides_toml() {
        Jail::expect_with(|_| {
            let config = Config::layered(&cli(&["--port", "9100"]), Toml::string(TOML))?;
            assert_eq!(config.port, 9100);
            assert_eq!(config.auth_timeout_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn env_sits_between_toml_and_flags() {
        Jail::expect_with(|jail| {
            jail.create_file("collab.toml", TOML)?;
            jail.set_env("COLLAB_AUTH_TIMEOUT_SECS", 7);
            jail.set_env("COLLAB_PORT", 9200);

            let config = Config::load(&cli(&[]))?;
            assert_eq!(config.auth_timeout_secs, 7);
            assert_eq!(config.port, 9200);

            let config = Config::load(&cli(&["--port", "9300"]))?;
            assert_eq!(config.port, 9300);
            Ok(())
        });
    }

    #[test]
    fn template_mentions_every_key() {
        let template = generate_config_template();
        for key in [
            "port",
            "bind_address",
            "json_logs",
            "data_dir",
            "auth_timeout_secs",
            "chat_history_capacity",
            "activity_history_capacity",
            "heartbeat_interval_secs",
            "heartbeat_timeout_secs",
        ] {
            assert!(template.contains(key), "missing {key}");
        }
    }
}
