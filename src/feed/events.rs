//! Normalized terminal feed messages.
//!
//! The terminal speaks a null-delimited JSON protocol; these are the
//! decoded message shapes the engine consumes. Field sets follow what
//! the core actually reads; unknown wire fields are ignored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::OrderSide;

/// Order status codes reported by the terminal.
///
/// The terminal reports completed fills under two distinct codes
/// depending on whether the fill arrived live (`Filled`) or was
/// confirmed out-of-band (`FillConfirmed`); both mean the order
/// executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Open,
    PartiallyFilled,
    Filled,
    FillConfirmed,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// True for either of the terminal's filled variants.
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled | Self::FillConfirmed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::FillConfirmed => "fill_confirmed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// An order state change from the terminal.
///
/// Everything except the status is optional on the wire; the interpreter
/// decides what is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    #[serde(default)]
    pub side: Option<OrderSide>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub filled_qty: Option<Decimal>,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub last_fill_price: Option<Decimal>,
    /// Primary (limit/stop) price of the order itself
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Event timestamp, unix millis
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A position report from the terminal. The position feed is
/// authoritative for symbol identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub symbol: String,
    /// Signed quantity; zero means flat
    pub quantity: Decimal,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub account: Option<String>,
}

/// Account balance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub balance: f64,
    pub account: String,
}

/// A trade print used for last-known-price tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: Decimal,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// All messages exchanged with the terminal, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Outbound session open
    LogonRequest {
        protocol_version: u32,
        username: String,
        password: String,
    },
    /// Terminal's answer to a logon
    LogonResponse {
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
    Heartbeat,
    OrderUpdate(OrderUpdate),
    PositionUpdate(PositionUpdate),
    AccountBalance(AccountBalance),
    MarketTick(MarketTick),
}
