//! Common Types Module
//!
//! Shared types used across the codebase to avoid circular dependencies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading mode. Exactly one mode is current at any time.
///
/// Precedence: `Live` > `Sim` > `Debug`. LIVE is real money, SIM is the
/// terminal's simulated environment, DEBUG is a development mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Sim,
    Live,
    Debug,
}

impl Mode {
    /// Resolve the mode owning a trade account.
    ///
    /// The terminal names simulated accounts with a `Sim` prefix and
    /// development accounts with a `Debug` prefix; everything else is a
    /// real-money account.
    #[must_use]
    pub fn from_account(account: &str) -> Self {
        let lower = account.trim().to_ascii_lowercase();
        if lower.starts_with("sim") {
            Mode::Sim
        } else if lower.starts_with("debug") {
            Mode::Debug
        } else {
            Mode::Live
        }
    }

    /// Precedence rank used for display ordering (LIVE highest).
    #[must_use]
    pub fn precedence(&self) -> u8 {
        match self {
            Mode::Live => 2,
            Mode::Sim => 1,
            Mode::Debug => 0,
        }
    }

    /// Returns true for the real-money mode.
    pub fn is_live(&self) -> bool {
        matches!(self, Mode::Live)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Sim => write!(f, "SIM"),
            Mode::Live => write!(f, "LIVE"),
            Mode::Debug => write!(f, "DEBUG"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" => Ok(Mode::Sim),
            "live" => Ok(Mode::Live),
            "debug" => Ok(Mode::Debug),
            _ => Err(format!("Unknown mode: '{}'. Use 'sim', 'live' or 'debug'", s)),
        }
    }
}

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Represents a market data update (price tick).
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    /// The trading symbol (e.g., "MES", "NQ").
    pub symbol: String,
    /// The current price.
    pub price: Decimal,
    /// The timestamp of the update (unix millis).
    pub timestamp: i64,
}
