//! Environment-based Configuration for farcasterd
//!
//! All settings come from `FARCASTERD_*` environment variables with
//! per-network defaults. Addresses of the external chain daemons and
//! syncers are carried here for the wallet/watcher services that connect
//! to them; the daemon itself never dials a chain directly.
//!
//! # Environment Variables
//!
//! ## Network Configuration
//! - `FARCASTERD_NETWORK` - "mainnet", "testnet", or "local" (default: "testnet")
//! - `FARCASTERD_CTL_BIND` - control bus bind address (default: "127.0.0.1")
//! - `FARCASTERD_CTL_PORT` - control bus port (default: 9981)
//! - `FARCASTERD_PEER_PORT` - p2p negotiation port, reported via `info` (default: 9735)
//!
//! ## External Services
//! - `FARCASTERD_ARB_DAEMON` / `FARCASTERD_ARB_SYNCER` - arbitrating chain daemon + syncer
//! - `FARCASTERD_ACC_DAEMON` / `FARCASTERD_ACC_SYNCER` - accordant chain daemon + syncer
//!
//! ## Engine Settings
//! - `FARCASTERD_BUS_TIMEOUT_SECS` - bounded wait on bus requests (default: 10)
//! - `FARCASTERD_RETRY_COUNT` - retries before a swap stalls (default: 3)
//!
//! ## Logging
//! - `FARCASTERD_LOG_LEVEL` - trace/debug/info/warn/error (default: "info")
//! - `FARCASTERD_LOG_JSON` - "1" for JSON output (default on mainnet)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Mainnet,
    Testnet,
    Local,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "local" | "regtest" => Ok(Network::Local),
            _ => Err(ConfigError::InvalidValue(
                "FARCASTERD_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Local => "local",
        };
        write!(f, "{}", s)
    }
}

impl Network {
    /// Default arbitrating chain daemon RPC for this network
    pub fn default_arb_daemon(&self) -> &'static str {
        match self {
            Network::Mainnet => "http://127.0.0.1:8332",
            Network::Testnet => "http://127.0.0.1:18332",
            Network::Local => "http://127.0.0.1:18443",
        }
    }

    /// Default accordant chain wallet RPC for this network
    pub fn default_acc_daemon(&self) -> &'static str {
        match self {
            Network::Mainnet => "http://127.0.0.1:18081",
            Network::Testnet => "http://127.0.0.1:28081",
            Network::Local => "http://127.0.0.1:38081",
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct FarcasterConfig {
    /// Network environment
    pub network: Network,

    /// Control bus bind address. Loopback by default: the control port
    /// is unsafe to expose publicly.
    pub ctl_bind: String,

    /// Control bus port
    pub ctl_port: u16,

    /// Peer-to-peer negotiation port, reported via `info`
    pub peer_port: u16,

    /// Arbitrating chain daemon RPC address
    pub arb_daemon: String,

    /// Arbitrating chain syncer address
    pub arb_syncer: String,

    /// Accordant chain daemon/wallet RPC address
    pub acc_daemon: String,

    /// Accordant chain syncer address
    pub acc_syncer: String,

    /// Bounded wait on bus requests, in seconds
    pub bus_timeout_secs: u64,

    /// Retries against wallet/watcher before a swap stalls
    pub retry_count: u32,

    /// Log level
    pub log_level: String,

    /// JSON log output
    pub log_json: bool,
}

impl FarcasterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("FARCASTERD_NETWORK")
            .unwrap_or_else(|_| "testnet".to_string())
            .parse()?;

        let ctl_bind =
            env::var("FARCASTERD_CTL_BIND").unwrap_or_else(|_| "127.0.0.1".to_string());
        let ctl_port = parse_port("FARCASTERD_CTL_PORT", 9981)?;
        let peer_port = parse_port("FARCASTERD_PEER_PORT", 9735)?;

        let arb_daemon = env::var("FARCASTERD_ARB_DAEMON")
            .unwrap_or_else(|_| network.default_arb_daemon().to_string());
        let arb_syncer = env::var("FARCASTERD_ARB_SYNCER")
            .unwrap_or_else(|_| "127.0.0.1:9777".to_string());
        let acc_daemon = env::var("FARCASTERD_ACC_DAEMON")
            .unwrap_or_else(|_| network.default_acc_daemon().to_string());
        let acc_syncer = env::var("FARCASTERD_ACC_SYNCER")
            .unwrap_or_else(|_| "127.0.0.1:9778".to_string());

        let bus_timeout_secs = parse_number("FARCASTERD_BUS_TIMEOUT_SECS", 10)?;
        let retry_count = parse_number("FARCASTERD_RETRY_COUNT", 3)?;

        let log_level = env::var("FARCASTERD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("FARCASTERD_LOG_JSON")
            .map(|v| v == "1")
            .unwrap_or(network == Network::Mainnet);

        let config = Self {
            network,
            ctl_bind,
            ctl_port,
            peer_port,
            arb_daemon,
            arb_syncer,
            acc_daemon,
            acc_syncer,
            bus_timeout_secs,
            retry_count,
            log_level,
            log_json,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate loaded values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "FARCASTERD_BUS_TIMEOUT_SECS".to_string(),
                "indefinite blocking waits are disallowed; timeout must be non-zero".to_string(),
            ));
        }
        if self.ctl_port == self.peer_port {
            return Err(ConfigError::InvalidValue(
                "FARCASTERD_CTL_PORT".to_string(),
                "control and peer ports must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address string of the control endpoint
    pub fn ctl_addr(&self) -> String {
        format!("{}:{}", self.ctl_bind, self.ctl_port)
    }

    /// Bounded wait for bus requests
    pub fn bus_timeout(&self) -> Duration {
        Duration::from_secs(self.bus_timeout_secs)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== farcasterd Configuration ===");
        println!("Network: {}", self.network);
        println!("Control endpoint: {}", self.ctl_addr());
        println!("Peer port: {}", self.peer_port);
        println!("Arbitrating daemon: {}", self.arb_daemon);
        println!("Arbitrating syncer: {}", self.arb_syncer);
        println!("Accordant daemon: {}", self.acc_daemon);
        println!("Accordant syncer: {}", self.acc_syncer);
        println!("Bus timeout: {}s", self.bus_timeout_secs);
        println!("Retry count: {}", self.retry_count);
        println!("Log level: {}", self.log_level);
        println!("================================");
    }
}

impl Default for FarcasterConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            ctl_bind: "127.0.0.1".to_string(),
            ctl_port: 9981,
            peer_port: 9735,
            arb_daemon: Network::Testnet.default_arb_daemon().to_string(),
            arb_syncer: "127.0.0.1:9777".to_string(),
            acc_daemon: Network::Testnet.default_acc_daemon().to_string(),
            acc_syncer: "127.0.0.1:9778".to_string(),
            bus_timeout_secs: 10,
            retry_count: 3,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

fn parse_port(var_name: &str, default: u16) -> Result<u16, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var_name.to_string(), value)),
        Err(_) => Ok(default),
    }
}

fn parse_number<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var_name.to_string(), value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert!(matches!("mainnet".parse::<Network>(), Ok(Network::Mainnet)));
        assert!(matches!("testnet".parse::<Network>(), Ok(Network::Testnet)));
        assert!(matches!("regtest".parse::<Network>(), Ok(Network::Local)));
        assert!("invalid".parse::<Network>().is_err());
    }

    #[test]
    fn test_default_config_valid() {
        let config = FarcasterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ctl_addr(), "127.0.0.1:9981");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = FarcasterConfig::default();
        config.bus_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_collision_rejected() {
        let mut config = FarcasterConfig::default();
        config.peer_port = config.ctl_port;
        assert!(config.validate().is_err());
    }
}
