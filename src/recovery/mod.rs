//! Post-reconnect state reconciliation.
//!
//! Runs once per (re)connection: local state is reconciled against a
//! freshly queried server snapshot, and every conflict is resolved in
//! favor of the server. Observers see a single consistent post-recovery
//! state because the whole pass runs inside one atomic-update scope.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::state::StateCoordinator;
use crate::types::Mode;

/// One open position as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerPosition {
    pub symbol: String,
    /// Signed quantity
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub account: Option<String>,
}

/// Server-side state gathered after a (re)connection.
#[derive(Debug, Clone, Default)]
pub struct RecoverySnapshot {
    pub positions: Vec<ServerPosition>,
    pub balance: Option<f64>,
    pub account: Option<String>,
}

/// A local/server disagreement found during recovery. Always resolved by
/// trusting the server; recorded for observability.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryConflict {
    /// Local held a position the server does not know about
    PhantomPosition { symbol: String, mode: Mode },
    /// Local and server both held (different) positions
    PositionMismatch {
        local_symbol: String,
        local_quantity: Decimal,
        server_symbol: String,
        server_quantity: Decimal,
    },
}

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub conflicts: Vec<RecoveryConflict>,
    pub mode_changed: bool,
    pub position_restored: bool,
    pub balance_applied: bool,
}

impl RecoveryReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Reconciles local state against the server after a (re)connection.
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    /// Run one recovery pass. The server wins every conflict.
    pub fn reconcile(state: &mut StateCoordinator, snapshot: &RecoverySnapshot) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        state.begin_atomic_update();

        // 1. Route a mode change through the sanctioned path first so
        //    the position below lands in the right mode.
        if let Some(account) = snapshot.account.as_deref() {
            let target = Mode::from_account(account);
            if target != state.current_mode() {
                report.mode_changed = state.request_mode_change(target, Some(account));
                if !report.mode_changed {
                    warn!(account, requested = %target, "Recovery mode change rejected");
                }
            }
        }

        // 2/3/4. Position reconciliation: server wins.
        let local = state
            .position()
            .map(|p| (p.symbol.clone(), p.quantity, p.mode));
        let server = snapshot.positions.first();
        if snapshot.positions.len() > 1 {
            warn!(
                count = snapshot.positions.len(),
                "Server reported multiple open positions; applying the first"
            );
        }

        match (local, server) {
            (Some((symbol, _, mode)), None) => {
                warn!(symbol = %symbol, "Phantom position: server reports flat");
                report
                    .conflicts
                    .push(RecoveryConflict::PhantomPosition { symbol, mode });
                state.clear_position();
            }
            (local, Some(server)) => {
                if let Some((local_symbol, local_quantity, _)) = local {
                    let matches = local_symbol == server.symbol && local_quantity == server.quantity;
                    if !matches {
                        warn!(
                            local = %local_symbol,
                            server = %server.symbol,
                            "Position mismatch: applying server version"
                        );
                        report.conflicts.push(RecoveryConflict::PositionMismatch {
                            local_symbol,
                            local_quantity,
                            server_symbol: server.symbol.clone(),
                            server_quantity: server.quantity,
                        });
                    }
                }

                let account = server
                    .account
                    .clone()
                    .or_else(|| snapshot.account.clone())
                    .unwrap_or_default();
                let mode = if account.is_empty() {
                    state.current_mode()
                } else {
                    Mode::from_account(&account)
                };
                // Timestamp recovery is not available post-reconnect:
                // entry_time = None marks the snapshot as recovered.
                state.open_position(
                    &server.symbol,
                    server.quantity,
                    server.avg_price,
                    None,
                    mode,
                    &account,
                );
                report.position_restored = true;
            }
            (None, None) => {}
        }

        // 5. Balance through the guarded LIVE path.
        if let Some(balance) = snapshot.balance {
            if let Some(account) = snapshot.account.as_deref() {
                report.balance_applied = if Mode::from_account(account) == Mode::Live {
                    state.update_live_balance_from_server(balance, account)
                } else {
                    state.update_balance_for_mode(Mode::from_account(account), balance)
                };
            }
        }

        state.end_atomic_update();

        info!(
            conflicts = report.conflicts.len(),
            mode_changed = report.mode_changed,
            position_restored = report.position_restored,
            "Recovery pass complete"
        );
        report
    }
}
