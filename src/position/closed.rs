//! Closed-trade records and derived trade metrics.
//!
//! A `ClosedTrade` is produced exactly once per closure and never mutated
//! afterwards. Consumers are the persistence and statistics collaborators.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::PositionSnapshot;
use crate::types::{Mode, OrderSide};

/// Contract parameters used for P&L conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Currency value of one point of price movement per contract
    pub point_value: Decimal,
    /// Flat commission per contract per side
    pub commission_per_contract: Decimal,
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            point_value: Decimal::ONE,
            commission_per_contract: Decimal::ZERO,
        }
    }
}

/// Immutable record of one completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Unique trade identifier
    pub trade_id: String,
    /// Trading symbol
    pub symbol: String,
    /// Entry side of the round trip
    pub side: OrderSide,
    /// Absolute quantity
    pub quantity: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Resolved exit price
    pub exit_price: Decimal,
    /// When the position was opened (absent for recovered positions)
    pub entry_time: Option<DateTime<Utc>>,
    /// When the closure was observed
    pub exit_time: DateTime<Utc>,
    /// Realized P&L in currency, gross of commission
    pub pnl: Decimal,
    /// Round-trip commission
    pub commission: Decimal,
    /// Maximum adverse excursion in currency (always <= 0)
    pub mae: Decimal,
    /// Maximum favorable excursion in currency (always >= 0)
    pub mfe: Decimal,
    /// Realized gain as a share of peak MFE, clamped to [0, 1.5].
    /// `None` when the trade never moved favorably.
    pub efficiency: Option<Decimal>,
    /// Realized gain as a multiple of the initial stop distance.
    /// `None` when no stop was ever recorded.
    pub r_multiple: Option<Decimal>,
    /// Mode that owned the position
    pub mode: Mode,
    /// Account that owned the position
    pub account: String,
}

const EFFICIENCY_CEILING: Decimal = Decimal::from_parts(15, 0, 0, false, 1); // 1.5

impl ClosedTrade {
    /// Build the closure record from the outgoing snapshot.
    ///
    /// Derivations:
    /// - P&L = (exit - entry) x direction x |qty| x point value
    /// - commission = per-contract fee x |qty| x 2 (round trip)
    /// - MAE/MFE from the tracked extremes, in currency
    /// - efficiency = P&L / MFE, clamped to [0, 1.5]; the ceiling above
    ///   1.0 is reachable when price receded after MFE peaked past the
    ///   exit
    /// - R-multiple = gain in points / |entry - stop|, omitted without a
    ///   recorded stop
    #[must_use]
    pub fn from_snapshot(
        snapshot: &PositionSnapshot,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        spec: &InstrumentSpec,
    ) -> Self {
        let qty = snapshot.quantity.abs();
        let direction = snapshot.direction();
        let gain_points = (exit_price - snapshot.entry_price) * direction;
        let pnl = gain_points * qty * spec.point_value;
        let commission = spec.commission_per_contract * qty * dec!(2);

        // Extremes are seeded at entry, so the adverse leg is <= 0 and the
        // favorable leg is >= 0 by construction.
        let (adverse_points, favorable_points) = if snapshot.is_short() {
            (
                snapshot.entry_price - snapshot.trade_max,
                snapshot.entry_price - snapshot.trade_min,
            )
        } else {
            (
                snapshot.trade_min - snapshot.entry_price,
                snapshot.trade_max - snapshot.entry_price,
            )
        };
        let mae = adverse_points.min(Decimal::ZERO) * qty * spec.point_value;
        let mfe = favorable_points.max(Decimal::ZERO) * qty * spec.point_value;

        let efficiency = if mfe > Decimal::ZERO {
            Some((pnl / mfe).clamp(Decimal::ZERO, EFFICIENCY_CEILING))
        } else {
            None
        };

        let r_multiple = snapshot.stop_price.and_then(|stop| {
            let risk = (snapshot.entry_price - stop).abs();
            if risk > Decimal::ZERO {
                Some(gain_points / risk)
            } else {
                None
            }
        });

        Self {
            trade_id: uuid::Uuid::new_v4().to_string(),
            symbol: snapshot.symbol.clone(),
            side: if snapshot.is_short() {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            quantity: qty,
            entry_price: snapshot.entry_price,
            exit_price,
            entry_time: snapshot.entry_time,
            exit_time,
            pnl,
            commission,
            mae,
            mfe,
            efficiency,
            r_multiple,
            mode: snapshot.mode,
            account: snapshot.account.clone(),
        }
    }

    /// Net P&L after the round-trip commission.
    #[must_use]
    pub fn net_pnl(&self) -> Decimal {
        self.pnl - self.commission
    }
}
