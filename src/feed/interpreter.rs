//! Order-flow interpretation.
//!
//! Turns normalized order/position updates into coordinator transitions:
//! open, update, close, or ignore. This is where the terminal's quirks
//! live: in SIM the server never reports a non-zero position, only
//! order fills, so fills have to seed positions directly.

use chrono::Utc;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::events::{OrderUpdate, PositionUpdate};
use crate::logging::LogThrottle;
use crate::state::StateCoordinator;
use crate::types::{Mode, OrderSide};

/// Counters for dropped/ignored events, surfaced in diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrderFlowStats {
    /// Positions seeded directly from fills (SIM workaround)
    pub seeded_opens: u64,
    /// Closures applied
    pub closures: u64,
    /// Filled updates ignored as adding-to/maintaining
    pub ignored_fills: u64,
    /// Position updates rejected for missing price
    pub rejected_position_updates: u64,
    /// Closures abandoned with no resolvable exit price
    pub abandoned_closures: u64,
}

/// Interprets the terminal's order and position feeds.
pub struct OrderFlow {
    stats: OrderFlowStats,
    reject_throttle: LogThrottle,
}

impl Default for OrderFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFlow {
    pub fn new() -> Self {
        Self {
            stats: OrderFlowStats::default(),
            reject_throttle: LogThrottle::new(Duration::from_secs(10)),
        }
    }

    pub fn stats(&self) -> OrderFlowStats {
        self.stats
    }

    /// Process one order update.
    pub fn handle_order_update(&mut self, state: &mut StateCoordinator, update: &OrderUpdate) {
        self.infer_bracket(state, update);

        if !update.status.is_filled() {
            return;
        }
        let filled_qty = update.filled_qty.unwrap_or(Decimal::ZERO);

        let open = state
            .position()
            .map(|p| (p.symbol.clone(), p.quantity.abs()));

        match open {
            None => self.seed_from_fill(state, update, filled_qty),
            Some((symbol, held_qty)) => {
                // Equal-or-greater filled quantity is adding to or
                // maintaining the position, never a closure.
                if filled_qty >= held_qty {
                    debug!(
                        symbol = %symbol,
                        filled = %filled_qty,
                        held = %held_qty,
                        "Filled order ignored (not a reduction)"
                    );
                    self.stats.ignored_fills += 1;
                    return;
                }

                let exit_price = update
                    .last_fill_price
                    .or(update.avg_fill_price)
                    .or(update.price)
                    .or_else(|| state.last_price(&symbol));
                let Some(exit_price) = exit_price else {
                    warn!(symbol = %symbol, "Abandoning closure: no resolvable exit price");
                    self.stats.abandoned_closures += 1;
                    return;
                };

                if state.close_position(exit_price, Utc::now()).is_some() {
                    self.stats.closures += 1;
                }
            }
        }
    }

    /// Process one position update. The payload's symbol is
    /// authoritative; quantity without a price is untrustworthy and is
    /// rejected outright.
    pub fn handle_position_update(
        &mut self,
        state: &mut StateCoordinator,
        update: &PositionUpdate,
    ) {
        if update.quantity.is_zero() {
            let open = state
                .position()
                .map(|p| (p.symbol.clone(), p.entry_price));
            let Some((symbol, entry_price)) = open else {
                return;
            };

            // The server supplies no fill price on flat transitions;
            // fall back to the last known market price.
            let exit_price = state
                .last_price(&symbol)
                .or(update.avg_price)
                .unwrap_or_else(|| {
                    warn!(symbol = %symbol, "Flat transition with no market price; exiting at entry");
                    entry_price
                });

            if state.close_position(exit_price, Utc::now()).is_some() {
                self.stats.closures += 1;
            }
            return;
        }

        let Some(price) = update.avg_price else {
            self.stats.rejected_position_updates += 1;
            if let Some(suppressed) = self.reject_throttle.allow() {
                warn!(
                    symbol = %update.symbol,
                    quantity = %update.quantity,
                    suppressed,
                    "Rejecting position update with quantity but no price"
                );
            }
            return;
        };

        let account = update
            .account
            .clone()
            .or_else(|| state.account().map(String::from))
            .unwrap_or_default();
        let mode = match &update.account {
            Some(account) => Mode::from_account(account),
            None => state.current_mode(),
        };

        state.open_position(
            &update.symbol,
            update.quantity,
            price,
            Some(Utc::now()),
            mode,
            &account,
        );
    }

    /// SIM workaround: a filled order with positive quantity while flat
    /// seeds the position directly from the fill. The same event must not
    /// also be processed as a closure.
    fn seed_from_fill(
        &mut self,
        state: &mut StateCoordinator,
        update: &OrderUpdate,
        filled_qty: Decimal,
    ) {
        if filled_qty <= Decimal::ZERO {
            return;
        }
        let Some(symbol) = update.symbol.as_deref() else {
            warn!("Cannot seed position from fill without a symbol");
            return;
        };
        let Some(side) = update.side else {
            warn!(symbol, "Cannot seed position from fill without a side");
            return;
        };
        let price = update
            .last_fill_price
            .or(update.avg_fill_price)
            .or(update.price);
        let Some(price) = price else {
            warn!(symbol, "Cannot seed position from fill without a price");
            return;
        };

        let signed_qty = match side {
            OrderSide::Buy => filled_qty,
            OrderSide::Sell => -filled_qty,
        };
        let account = update
            .account
            .clone()
            .or_else(|| state.account().map(String::from))
            .unwrap_or_default();
        let mode = match &update.account {
            Some(account) => Mode::from_account(account),
            None => state.current_mode(),
        };

        info!(symbol, qty = %signed_qty, price = %price, "Seeding position from fill");
        state.open_position(symbol, signed_qty, price, Some(Utc::now()), mode, &account);
        self.stats.seeded_opens += 1;
    }

    /// Bracket inference: a sell-side order price below the entry is the
    /// stop, above it the target. Applies regardless of fill status.
    fn infer_bracket(&mut self, state: &mut StateCoordinator, update: &OrderUpdate) {
        if update.side != Some(OrderSide::Sell) {
            return;
        }
        let Some(entry_price) = state.position().map(|p| p.entry_price) else {
            return;
        };
        let Some(order_price) = update.price else {
            return;
        };

        if order_price < entry_price {
            debug!(stop = %order_price, "Inferred stop from sell order");
            state.set_bracket(Some(order_price), None);
        } else if order_price > entry_price {
            debug!(target = %order_price, "Inferred target from sell order");
            state.set_bracket(None, Some(order_price));
        }
    }
}
