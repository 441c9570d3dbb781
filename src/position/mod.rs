//! Position snapshot and trade-extremes tracking.
//!
//! A `PositionSnapshot` captures one position-in-time. It is replaced
//! wholesale on open/close; the only in-place mutation while open is the
//! trade min/max widening used for MAE/MFE.

pub mod closed;

pub use closed::{ClosedTrade, InstrumentSpec};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Mode;

/// Absolute quantity tolerance for duplicate-open suppression.
pub const QTY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4); // 0.0001
/// Absolute price tolerance for duplicate-open suppression.
pub const PRICE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Market conditions captured at entry time.
///
/// Used by the statistics collaborators to contextualize a trade; the
/// engine itself only stores these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Venue volume-weighted average price at entry
    pub vwap: Option<Decimal>,
    /// Volume point of control at entry
    pub point_of_control: Option<Decimal>,
    /// Cumulative delta at entry
    pub cumulative_delta: Option<i64>,
}

/// One open position, captured at a point in time.
///
/// Signed quantity: positive = long, negative = short. The trade extremes
/// start at the entry price and only widen while the position is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Trading symbol (e.g., "MES")
    pub symbol: String,
    /// Signed quantity (positive = long, negative = short)
    pub quantity: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// When the position was opened. `None` when the position was
    /// recovered from the server without a timestamp.
    pub entry_time: Option<DateTime<Utc>>,
    /// Set when the snapshot was rebuilt from a server query after a
    /// reconnect rather than observed live.
    pub recovered: bool,
    /// Mode that owns this position
    pub mode: Mode,
    /// Trade account that owns this position
    pub account: String,
    /// Inferred profit target, if one was observed
    pub target_price: Option<Decimal>,
    /// Inferred protective stop, if one was observed
    pub stop_price: Option<Decimal>,
    /// Market conditions at entry, if available
    pub entry_context: Option<MarketContext>,
    /// Lowest price observed since entry
    pub trade_min: Decimal,
    /// Highest price observed since entry
    pub trade_max: Decimal,
}

impl PositionSnapshot {
    /// Create a snapshot for a freshly opened position.
    ///
    /// Extremes are initialized to the entry price. `entry_time = None`
    /// marks the snapshot as recovered (timestamp unavailable).
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        quantity: Decimal,
        entry_price: Decimal,
        entry_time: Option<DateTime<Utc>>,
        mode: Mode,
        account: impl Into<String>,
    ) -> Self {
        let recovered = entry_time.is_none();
        Self {
            symbol: symbol.into(),
            quantity,
            entry_price,
            entry_time,
            recovered,
            mode,
            account: account.into(),
            target_price: None,
            stop_price: None,
            entry_context: None,
            trade_min: entry_price,
            trade_max: entry_price,
        }
    }

    /// Attach the entry-time market context.
    #[must_use]
    pub fn with_context(mut self, context: MarketContext) -> Self {
        self.entry_context = Some(context);
        self
    }

    /// True for a long position.
    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// True for a short position.
    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Direction multiplier: +1 for long, -1 for short.
    #[must_use]
    pub fn direction(&self) -> Decimal {
        if self.is_short() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        }
    }

    /// Widen the trade extremes with an observed price.
    ///
    /// Extremes only move outward; a price inside the current range is a
    /// no-op. Returns true if either extreme widened.
    pub fn track_price(&mut self, price: Decimal) -> bool {
        let mut widened = false;
        if price < self.trade_min {
            self.trade_min = price;
            widened = true;
        }
        if price > self.trade_max {
            self.trade_max = price;
            widened = true;
        }
        widened
    }

    /// Unrealized P&L at the given price, in currency.
    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal, spec: &InstrumentSpec) -> Decimal {
        (price - self.entry_price) * self.direction() * self.quantity.abs() * spec.point_value
    }

    /// Duplicate-suppression check against a requested open.
    ///
    /// Matches when symbol and mode are equal, quantity is within
    /// `QTY_TOLERANCE`, and price is within `PRICE_TOLERANCE`. Protects
    /// against duplicate protocol re-delivery.
    #[must_use]
    pub fn matches(&self, symbol: &str, quantity: Decimal, price: Decimal, mode: Mode) -> bool {
        self.symbol == symbol
            && self.mode == mode
            && (self.quantity - quantity).abs() <= QTY_TOLERANCE
            && (self.entry_price - price).abs() <= PRICE_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(qty: Decimal, entry: Decimal) -> PositionSnapshot {
        PositionSnapshot::new("MES", qty, entry, Some(Utc::now()), Mode::Sim, "Sim1")
    }

    #[test]
    fn test_extremes_start_at_entry() {
        let pos = snapshot(dec!(2), dec!(5000));
        assert_eq!(pos.trade_min, dec!(5000));
        assert_eq!(pos.trade_max, dec!(5000));
    }

    #[test]
    fn test_extremes_widen_monotonically() {
        let mut pos = snapshot(dec!(2), dec!(5000));

        assert!(pos.track_price(dec!(4995)));
        assert!(pos.track_price(dec!(5012)));
        assert_eq!(pos.trade_min, dec!(4995));
        assert_eq!(pos.trade_max, dec!(5012));

        // Inside the range: no-op
        assert!(!pos.track_price(dec!(5001)));
        assert_eq!(pos.trade_min, dec!(4995));
        assert_eq!(pos.trade_max, dec!(5012));
    }

    #[test]
    fn test_direction() {
        assert_eq!(snapshot(dec!(2), dec!(5000)).direction(), dec!(1));
        assert_eq!(snapshot(dec!(-2), dec!(5000)).direction(), dec!(-1));
    }

    #[test]
    fn test_recovered_flag() {
        let pos = PositionSnapshot::new("MES", dec!(1), dec!(5000), None, Mode::Live, "APEX-1");
        assert!(pos.recovered);
        assert!(pos.entry_time.is_none());

        let live = snapshot(dec!(1), dec!(5000));
        assert!(!live.recovered);
    }

    #[test]
    fn test_entry_context_attached() {
        let pos = snapshot(dec!(1), dec!(5000)).with_context(MarketContext {
            vwap: Some(dec!(4998.75)),
            point_of_control: Some(dec!(4999.00)),
            cumulative_delta: Some(-1250),
        });

        let context = pos.entry_context.as_ref().unwrap();
        assert_eq!(context.vwap, Some(dec!(4998.75)));
        assert_eq!(context.cumulative_delta, Some(-1250));
    }

    #[test]
    fn test_duplicate_match_tolerances() {
        let pos = snapshot(dec!(2), dec!(5000.00));

        assert!(pos.matches("MES", dec!(2), dec!(5000.00), Mode::Sim));
        assert!(pos.matches("MES", dec!(2.00005), dec!(5000.005), Mode::Sim));
        assert!(!pos.matches("MES", dec!(2.001), dec!(5000.00), Mode::Sim));
        assert!(!pos.matches("MES", dec!(2), dec!(5000.02), Mode::Sim));
        assert!(!pos.matches("NQ", dec!(2), dec!(5000.00), Mode::Sim));
        assert!(!pos.matches("MES", dec!(2), dec!(5000.00), Mode::Live));
    }

    #[test]
    fn test_unrealized_pnl() {
        let spec = InstrumentSpec {
            point_value: dec!(5),
            commission_per_contract: dec!(0.62),
        };
        let long = snapshot(dec!(2), dec!(5000));
        assert_eq!(long.unrealized_pnl(dec!(5010), &spec), dec!(100));

        let short = snapshot(dec!(-2), dec!(5000));
        assert_eq!(short.unrealized_pnl(dec!(5010), &spec), dec!(-100));
    }
}
