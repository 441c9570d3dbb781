//! CLI configuration structs bridging CLI arguments to domain types.
//!
//! These structs decouple the CLI parsing layer from the engine,
//! allowing the session runner to work with validated, typed
//! configuration.

use std::path::PathBuf;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::position::InstrumentSpec;
use crate::types::Mode;

/// Errors that can occur when validating feed configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Point value must be positive, got {0}")]
    InvalidPointValue(Decimal),

    #[error("Commission cannot be negative, got {0}")]
    InvalidCommission(Decimal),
}

/// Validated configuration for a feed session.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Terminal host
    pub host: String,
    /// Terminal port
    pub port: u16,
    /// Logon credentials
    pub username: String,
    pub password: String,
    /// Preferred trade account, if known up front
    pub account: Option<String>,
    /// Mode to start in before the first recovery pass
    pub initial_mode: Mode,
    /// Directory for session and equity documents
    pub state_dir: PathBuf,
    /// Optional CSV trade log path
    pub trade_log: Option<PathBuf>,
    /// Contract spec for P&L conversion
    pub point_value: Decimal,
    pub commission_per_contract: Decimal,
    /// Bounded wait for background work at shutdown, seconds
    pub shutdown_grace_secs: u64,
}

impl FeedConfig {
    /// Validate the numeric parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.point_value <= Decimal::ZERO {
            return Err(ConfigError::InvalidPointValue(self.point_value));
        }
        if self.commission_per_contract < Decimal::ZERO {
            return Err(ConfigError::InvalidCommission(self.commission_per_contract));
        }
        Ok(())
    }

    pub fn instrument_spec(&self) -> InstrumentSpec {
        InstrumentSpec {
            point_value: self.point_value,
            commission_per_contract: self.commission_per_contract,
        }
    }
}
