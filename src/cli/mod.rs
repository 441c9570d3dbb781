//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for the dashboard engine and the
//! conversion into validated domain configuration.

pub mod config;

pub use config::{ConfigError, FeedConfig};

use std::path::PathBuf;

use clap::Parser;
use rust_decimal::Decimal;

use crate::types::Mode;

/// Tradedesk - trading state reconciliation engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Terminal host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Terminal port
    #[arg(long, default_value_t = 11099)]
    pub port: u16,

    /// Logon username
    #[arg(long, env = "FEED_USERNAME", default_value = "")]
    pub username: String,

    /// Logon password
    #[arg(long, env = "FEED_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Trade account to prefer before the first recovery pass
    #[arg(long)]
    pub account: Option<String>,

    /// Starting mode: sim, live or debug
    #[arg(long, default_value = "sim")]
    pub mode: Mode,

    /// Directory for session and equity documents
    #[arg(long, default_value = "state")]
    pub state_dir: PathBuf,

    /// Append closed trades to this CSV file
    #[arg(long)]
    pub trade_log: Option<PathBuf>,

    /// Currency value of one point per contract
    #[arg(long, default_value = "5")]
    pub point_value: Decimal,

    /// Flat commission per contract per side
    #[arg(long, default_value = "0.62")]
    pub commission: Decimal,

    /// Bounded wait for background work at shutdown, seconds
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub verbose: String,
}

impl Cli {
    /// Convert parsed arguments into validated configuration.
    pub fn into_config(self) -> Result<FeedConfig, ConfigError> {
        let config = FeedConfig {
            host: self.host,
            port: self.port,
            username: self.username,
            password: self.password,
            account: self.account,
            initial_mode: self.mode,
            state_dir: self.state_dir,
            trade_log: self.trade_log,
            point_value: self.point_value,
            commission_per_contract: self.commission,
            shutdown_grace_secs: self.shutdown_grace_secs,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cli_defaults_into_config() {
        let cli = Cli::parse_from(["tradedesk"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.port, 11099);
        assert_eq!(config.initial_mode, Mode::Sim);
        assert_eq!(config.point_value, dec!(5));
    }

    #[test]
    fn test_cli_mode_parsing() {
        let cli = Cli::parse_from(["tradedesk", "--mode", "live", "--account", "APEX-1"]);
        assert_eq!(cli.mode, Mode::Live);
        assert_eq!(cli.account.as_deref(), Some("APEX-1"));
    }
}
