//! Single authority for trading state.
//!
//! The coordinator owns {mode, position, balances} and is the only place
//! they change. It is driven from one owner task; the only internal
//! synchronization is the atomic-update depth counter that buffers
//! notifications so observers never see a balance or position attributed
//! to a stale mode.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::history::{ModeHistory, ModeHistoryEntry};
use super::validator;
use crate::position::{ClosedTrade, InstrumentSpec, PositionSnapshot};
use crate::types::Mode;

/// State change notifications fanned out to UI and persistence
/// collaborators.
#[derive(Debug, Clone)]
pub enum StateNotification {
    /// The current mode changed
    ModeChanged {
        mode: Mode,
        account: Option<String>,
    },
    /// A mode-scoped balance changed
    BalanceChanged { mode: Mode, balance: Decimal },
    /// A position was opened (or replaced)
    PositionOpened { snapshot: PositionSnapshot },
    /// A position closed, producing its round-trip record
    PositionClosed { trade: ClosedTrade },
    /// A position was cleared without a closure record (recovery)
    PositionCleared { symbol: String, mode: Mode },
}

impl StateNotification {
    /// Flush rank: mode before balance before position.
    fn channel_rank(&self) -> u8 {
        match self {
            StateNotification::ModeChanged { .. } => 0,
            StateNotification::BalanceChanged { .. } => 1,
            StateNotification::PositionOpened { .. }
            | StateNotification::PositionClosed { .. }
            | StateNotification::PositionCleared { .. } => 2,
        }
    }
}

/// The trading state coordinator.
///
/// Mutating methods must be called from a single owner task; see the
/// module docs. All transitions are validated, logged, and surfaced as
/// boolean/`Option` results rather than errors.
pub struct StateCoordinator {
    mode: Mode,
    account: Option<String>,
    position: Option<PositionSnapshot>,
    balances: HashMap<Mode, Decimal>,
    /// Last observed market price per symbol, for exit-price fallbacks
    last_prices: HashMap<String, Decimal>,
    history: ModeHistory,
    spec: InstrumentSpec,
    subscribers: Vec<UnboundedSender<StateNotification>>,
    atomic_depth: u32,
    buffered: Vec<StateNotification>,
}

impl StateCoordinator {
    pub fn new(initial_mode: Mode, spec: InstrumentSpec) -> Self {
        Self {
            mode: initial_mode,
            account: None,
            position: None,
            balances: HashMap::new(),
            last_prices: HashMap::new(),
            history: ModeHistory::new(),
            spec,
            subscribers: Vec::new(),
            atomic_depth: 0,
            buffered: Vec::new(),
        }
    }

    /// Register a notification subscriber.
    pub fn subscribe(&mut self) -> UnboundedReceiver<StateNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn current_mode(&self) -> Mode {
        self.mode
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn position(&self) -> Option<&PositionSnapshot> {
        self.position.as_ref()
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    /// Owning mode of the open position; `None` when flat.
    pub fn position_mode(&self) -> Option<Mode> {
        self.position.as_ref().map(|p| p.mode)
    }

    pub fn balance(&self, mode: Mode) -> Option<Decimal> {
        self.balances.get(&mode).copied()
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).copied()
    }

    pub fn instrument_spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    pub fn mode_history(&self) -> impl Iterator<Item = &ModeHistoryEntry> {
        self.history.entries()
    }

    /// Enter an atomic-update scope. Nestable; notifications are buffered
    /// until the outermost scope exits.
    pub fn begin_atomic_update(&mut self) {
        self.atomic_depth += 1;
    }

    /// Leave an atomic-update scope. At depth zero, buffered
    /// notifications flush in the fixed order mode -> balance ->
    /// position, regardless of buffering order.
    pub fn end_atomic_update(&mut self) {
        if self.atomic_depth == 0 {
            warn!("end_atomic_update without matching begin");
            return;
        }
        self.atomic_depth -= 1;
        if self.atomic_depth == 0 && !self.buffered.is_empty() {
            let mut pending = std::mem::take(&mut self.buffered);
            // Stable sort: notifications on the same channel keep their
            // buffering order.
            pending.sort_by_key(StateNotification::channel_rank);
            for notification in pending {
                self.dispatch(notification);
            }
        }
    }

    /// The only sanctioned way to change mode.
    ///
    /// Returns false (no state changes, no notifications) on an invalid
    /// transition. Returns true without notifications when the requested
    /// mode is already current. A position owned by another mode is
    /// implicitly closed before the switch commits.
    pub fn request_mode_change(&mut self, new_mode: Mode, account: Option<&str>) -> bool {
        if new_mode == self.mode {
            return true;
        }

        let decision = validator::validate(self.mode, new_mode, self.position_mode());
        if !decision.allowed {
            warn!(
                current = %self.mode,
                requested = %new_mode,
                reason = decision.reason.as_deref().unwrap_or("unspecified"),
                "Mode change rejected"
            );
            return false;
        }

        self.begin_atomic_update();

        if decision.requires_close {
            let exit_price = self.implicit_exit_price();
            if let Some(trade) = self.close_position(exit_price, Utc::now()) {
                info!(
                    symbol = %trade.symbol,
                    mode = %trade.mode,
                    pnl = %trade.pnl,
                    "Position implicitly closed by mode change"
                );
            }
        }

        self.mode = new_mode;
        if let Some(account) = account {
            self.account = Some(account.to_string());
        }
        self.history.record(new_mode, account.map(String::from));
        info!(mode = %new_mode, account = account.unwrap_or("-"), "Mode changed");
        self.notify(StateNotification::ModeChanged {
            mode: new_mode,
            account: account.map(String::from),
        });

        self.end_atomic_update();
        true
    }

    /// Open (or replace) the position, enforcing the single-mode
    /// invariant by committing the owning mode in the same atomic scope.
    ///
    /// Idempotent: a request matching the open position within the
    /// duplicate-suppression tolerances is a no-op. `entry_time = None`
    /// marks the snapshot as recovered rather than failing.
    pub fn open_position(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        entry_price: Decimal,
        entry_time: Option<DateTime<Utc>>,
        mode: Mode,
        account: &str,
    ) {
        if let Some(existing) = &self.position {
            if existing.matches(symbol, quantity, entry_price, mode) {
                debug!(symbol, "Duplicate position open suppressed");
                return;
            }
        }

        self.begin_atomic_update();

        if mode != self.mode {
            self.mode = mode;
            self.history.record(mode, Some(account.to_string()));
            self.notify(StateNotification::ModeChanged {
                mode,
                account: Some(account.to_string()),
            });
        }
        self.account = Some(account.to_string());

        let snapshot =
            PositionSnapshot::new(symbol, quantity, entry_price, entry_time, mode, account);
        info!(
            symbol,
            quantity = %quantity,
            entry_price = %entry_price,
            mode = %mode,
            recovered = snapshot.recovered,
            "Position opened"
        );
        self.position = Some(snapshot.clone());
        self.notify(StateNotification::PositionOpened { snapshot });

        self.end_atomic_update();
    }

    /// Close the open position, producing its round-trip record.
    ///
    /// Idempotent: returns `None` and emits nothing when already flat.
    pub fn close_position(
        &mut self,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let snapshot = self.position.take()?;
        let trade = ClosedTrade::from_snapshot(&snapshot, exit_price, exit_time, &self.spec);
        info!(
            symbol = %trade.symbol,
            exit_price = %exit_price,
            pnl = %trade.pnl,
            mode = %trade.mode,
            "Position closed"
        );
        self.notify(StateNotification::PositionClosed {
            trade: trade.clone(),
        });
        Some(trade)
    }

    /// Clear the open position without producing a closure record.
    ///
    /// Used by recovery when the server reports flat and no downstream
    /// bookkeeping is owed. Returns false when already flat.
    pub fn clear_position(&mut self) -> bool {
        match self.position.take() {
            Some(snapshot) => {
                warn!(symbol = %snapshot.symbol, "Position cleared without closure record");
                self.notify(StateNotification::PositionCleared {
                    symbol: snapshot.symbol,
                    mode: snapshot.mode,
                });
                true
            }
            None => false,
        }
    }

    /// Record a market tick: updates the exit-price fallback and widens
    /// the open position's extremes.
    pub fn observe_price(&mut self, symbol: &str, price: Decimal) {
        self.last_prices.insert(symbol.to_string(), price);
        if let Some(position) = &mut self.position {
            if position.symbol == symbol {
                position.track_price(price);
            }
        }
    }

    /// Record inferred bracket prices on the open position. No-op when
    /// flat.
    pub fn set_bracket(&mut self, stop: Option<Decimal>, target: Option<Decimal>) {
        if let Some(position) = &mut self.position {
            if stop.is_some() {
                position.stop_price = stop;
            }
            if target.is_some() {
                position.target_price = target;
            }
        }
    }

    /// Update the balance for a mode from a raw wire value.
    ///
    /// NaN/infinite values are dropped with a warning, leaving the
    /// balance unchanged.
    pub fn update_balance_for_mode(&mut self, mode: Mode, value: f64) -> bool {
        let Some(balance) = Decimal::from_f64(value) else {
            warn!(mode = %mode, value, "Discarding non-finite balance update");
            return false;
        };
        self.balances.insert(mode, balance);
        debug!(mode = %mode, balance = %balance, "Balance updated");
        self.notify(StateNotification::BalanceChanged { mode, balance });
        true
    }

    /// Update the LIVE balance from a server report. Rejected when the
    /// supplied account does not resolve to LIVE.
    pub fn update_live_balance_from_server(&mut self, value: f64, account: &str) -> bool {
        if Mode::from_account(account) != Mode::Live {
            warn!(account, "Ignoring live balance update for non-live account");
            return false;
        }
        self.update_balance_for_mode(Mode::Live, value)
    }

    /// Exit price for an implicit close: last observed market price for
    /// the symbol, else the entry price.
    fn implicit_exit_price(&self) -> Decimal {
        match &self.position {
            Some(position) => self
                .last_prices
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.entry_price),
            None => Decimal::ZERO,
        }
    }

    fn notify(&mut self, notification: StateNotification) {
        if self.atomic_depth > 0 {
            self.buffered.push(notification);
        } else {
            self.dispatch(notification);
        }
    }

    fn dispatch(&mut self, notification: StateNotification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}
