//! End-to-end scenarios for the reconciliation engine.
//!
//! Drives normalized feed events through the interpreter into the
//! coordinator and checks the resulting state, notifications, and
//! closure records.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use mockall::predicate::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use tradedesk::feed::{OrderFlow, OrderStatus, OrderUpdate, PositionUpdate};
use tradedesk::position::InstrumentSpec;
use tradedesk::recovery::{RecoveryConflict, RecoveryCoordinator, RecoverySnapshot, ServerPosition};
use tradedesk::state::{
    EquityCurveCache, EquityCurveEvent, EquityPoint, EquityStore, StateCoordinator,
    StateNotification, StoreError,
};
use tradedesk::types::{Mode, OrderSide};

// --- Helpers ---

fn mes_spec() -> InstrumentSpec {
    InstrumentSpec {
        point_value: dec!(5),
        commission_per_contract: dec!(0.62),
    }
}

fn coordinator() -> StateCoordinator {
    StateCoordinator::new(Mode::Sim, mes_spec())
}

fn filled_order(side: OrderSide, filled_qty: Decimal) -> OrderUpdate {
    OrderUpdate {
        status: OrderStatus::Filled,
        side: Some(side),
        symbol: Some("MES".to_string()),
        account: Some("Sim1".to_string()),
        filled_qty: Some(filled_qty),
        avg_fill_price: None,
        last_fill_price: None,
        price: None,
        timestamp: None,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StateNotification>) -> Vec<StateNotification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

// --- Scenarios ---

/// The SIM workaround end to end: the server never reports a non-zero
/// position in SIM, so a buy fill seeds the position and a later partial
/// sell fill closes it.
#[test]
fn test_sim_round_trip_from_fills_only() {
    let mut state = coordinator();
    let mut flow = OrderFlow::new();
    let mut rx = state.subscribe();

    let mut entry = filled_order(OrderSide::Buy, dec!(2));
    entry.last_fill_price = Some(dec!(5000.00));
    flow.handle_order_update(&mut state, &entry);

    assert!(state.has_open_position());
    assert_eq!(state.position().unwrap().quantity, dec!(2));

    // Filled sell with zero filled quantity and only an average fill
    // price closes the whole position.
    let mut exit = filled_order(OrderSide::Sell, dec!(0));
    exit.avg_fill_price = Some(dec!(5010.00));
    flow.handle_order_update(&mut state, &exit);

    assert!(!state.has_open_position());

    let closed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|n| match n {
            StateNotification::PositionClosed { trade } => Some(trade),
            _ => None,
        })
        .collect();
    assert_eq!(closed.len(), 1);
    let trade = &closed[0];
    assert_eq!(trade.quantity, dec!(2));
    assert_eq!(trade.mode, Mode::Sim);
    // 2 x (5010 - 5000) x $5
    assert_eq!(trade.pnl, dec!(100));
    assert_eq!(trade.commission, dec!(2.48));
}

/// Exit-price fallback: no last-fill price, average-fill price wins.
#[test]
fn test_closure_falls_back_to_average_fill_price() {
    let mut state = coordinator();
    let mut flow = OrderFlow::new();
    state.open_position("MES", dec!(2), dec!(5000), Some(Utc::now()), Mode::Sim, "Sim1");
    let mut rx = state.subscribe();

    let mut exit = filled_order(OrderSide::Sell, dec!(1));
    exit.avg_fill_price = Some(dec!(5004.50));
    exit.price = Some(dec!(5003.00));
    flow.handle_order_update(&mut state, &exit);

    let closed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|n| match n {
            StateNotification::PositionClosed { trade } => Some(trade),
            _ => None,
        })
        .collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_price, dec!(5004.50));
}

/// Duplicate protocol re-delivery produces exactly one opened
/// notification.
#[test]
fn test_duplicate_position_updates_suppressed() {
    let mut state = coordinator();
    let mut flow = OrderFlow::new();
    let mut rx = state.subscribe();

    let update = PositionUpdate {
        symbol: "MES".to_string(),
        quantity: dec!(2),
        avg_price: Some(dec!(5000.00)),
        account: Some("Sim1".to_string()),
    };
    flow.handle_position_update(&mut state, &update);
    flow.handle_position_update(&mut state, &update);

    let opened = drain(&mut rx)
        .into_iter()
        .filter(|n| matches!(n, StateNotification::PositionOpened { .. }))
        .count();
    assert_eq!(opened, 1);
}

/// Mode gate: an open LIVE position blocks the switch to SIM entirely.
#[test]
fn test_live_position_blocks_sim_switch() {
    let mut state = coordinator();
    let mut flow = OrderFlow::new();

    let update = PositionUpdate {
        symbol: "MES".to_string(),
        quantity: dec!(1),
        avg_price: Some(dec!(5000)),
        account: Some("APEX-1".to_string()),
    };
    flow.handle_position_update(&mut state, &update);
    assert_eq!(state.current_mode(), Mode::Live);

    let mut rx = state.subscribe();
    assert!(!state.request_mode_change(Mode::Sim, Some("Sim1")));
    assert_eq!(state.current_mode(), Mode::Live);
    assert!(state.has_open_position());
    assert!(drain(&mut rx).is_empty());
}

/// Mode gate: switching to LIVE over an open SIM position closes it
/// first, producing exactly one closure record.
#[test]
fn test_sim_position_auto_closed_on_live_switch() {
    let mut state = coordinator();
    state.open_position("MES", dec!(2), dec!(5000), Some(Utc::now()), Mode::Sim, "Sim1");
    state.observe_price("MES", dec!(5003));
    let mut rx = state.subscribe();

    assert!(state.request_mode_change(Mode::Live, Some("APEX-1")));
    assert_eq!(state.current_mode(), Mode::Live);
    assert!(!state.has_open_position());

    let notifications = drain(&mut rx);
    let closed: Vec<_> = notifications
        .iter()
        .filter_map(|n| match n {
            StateNotification::PositionClosed { trade } => Some(trade),
            _ => None,
        })
        .collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].mode, Mode::Sim);
    // Implicit close exits at the last observed market price
    assert_eq!(closed[0].exit_price, dec!(5003));

    // The mode notification precedes the position notification
    assert!(matches!(
        notifications[0],
        StateNotification::ModeChanged { mode: Mode::Live, .. }
    ));
}

/// Recovery against an empty server: the local position is a phantom.
#[test]
fn test_recovery_clears_phantom_position() {
    let mut state = coordinator();
    state.open_position("MES", dec!(2), dec!(5000), Some(Utc::now()), Mode::Sim, "Sim1");

    let report = RecoveryCoordinator::reconcile(&mut state, &RecoverySnapshot::default());

    assert!(!state.has_open_position());
    assert_eq!(report.conflicts.len(), 1);
    assert!(matches!(
        report.conflicts[0],
        RecoveryConflict::PhantomPosition { .. }
    ));
}

/// Recovery applies the server's position as recovered-without-timestamp
/// and flushes everything as one consistent snapshot.
#[test]
fn test_recovery_restores_server_position_atomically() {
    let mut state = coordinator();
    let mut rx = state.subscribe();

    let snapshot = RecoverySnapshot {
        positions: vec![ServerPosition {
            symbol: "MES".to_string(),
            quantity: dec!(3),
            avg_price: dec!(5001.25),
            account: Some("APEX-1".to_string()),
        }],
        balance: Some(52_340.50),
        account: Some("APEX-1".to_string()),
    };
    let report = RecoveryCoordinator::reconcile(&mut state, &snapshot);

    assert!(report.position_restored);
    assert!(report.mode_changed);
    assert!(report.balance_applied);

    let position = state.position().unwrap();
    assert!(position.recovered);
    assert!(position.entry_time.is_none());
    assert_eq!(state.current_mode(), Mode::Live);

    // Single flush in mode -> balance -> position order
    let notifications = drain(&mut rx);
    let kinds: Vec<u8> = notifications
        .iter()
        .map(|n| match n {
            StateNotification::ModeChanged { .. } => 0,
            StateNotification::BalanceChanged { .. } => 1,
            _ => 2,
        })
        .collect();
    let mut sorted = kinds.clone();
    sorted.sort();
    assert_eq!(kinds, sorted);
    assert_eq!(kinds, vec![0, 1, 2]);
}

/// The single-mode invariant holds through a full session of events.
#[test]
fn test_single_mode_invariant_held_throughout() {
    let mut state = coordinator();
    let mut flow = OrderFlow::new();

    let events: Vec<PositionUpdate> = vec![
        PositionUpdate {
            symbol: "MES".to_string(),
            quantity: dec!(2),
            avg_price: Some(dec!(5000)),
            account: Some("Sim1".to_string()),
        },
        PositionUpdate {
            symbol: "MES".to_string(),
            quantity: Decimal::ZERO,
            avg_price: None,
            account: Some("Sim1".to_string()),
        },
        PositionUpdate {
            symbol: "NQ".to_string(),
            quantity: dec!(-1),
            avg_price: Some(dec!(18000)),
            account: Some("APEX-1".to_string()),
        },
    ];

    for event in &events {
        flow.handle_position_update(&mut state, event);
        match state.position_mode() {
            Some(owning) => assert_eq!(owning, state.current_mode()),
            None => assert!(!state.has_open_position()),
        }
    }
}

// --- Equity store mock ---
//
// Adapter pattern for mocking async_trait methods: the mock exposes a
// sync method returning a boxed future, and the trait impl delegates.

mock! {
    pub EquityStoreImpl {
        fn load_curve_mock(
            &self,
            mode: Mode,
            account: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<EquityPoint>, StoreError>> + Send + 'static>>;
    }
}

#[async_trait]
impl EquityStore for MockEquityStoreImpl {
    async fn load_curve(&self, mode: Mode, account: &str) -> Result<Vec<EquityPoint>, StoreError> {
        self.load_curve_mock(mode, account).await
    }
}

/// Pending-load de-duplication: one scope, one backend load.
#[tokio::test]
async fn test_equity_cache_hits_store_once_per_scope() {
    let mut mock_store = MockEquityStoreImpl::new();
    mock_store
        .expect_load_curve_mock()
        .with(eq(Mode::Sim), eq("Sim1"))
        .times(1)
        .returning(|_, _| {
            Box::pin(async {
                Ok(vec![EquityPoint {
                    time: Utc::now(),
                    equity: dec!(25000),
                }])
            })
        });

    let store = Arc::new(mock_store);
    let cache = EquityCurveCache::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    assert!(cache.request_load(Mode::Sim, "Sim1", store.clone(), tx.clone()));

    match rx.recv().await.unwrap() {
        EquityCurveEvent::Loaded { points, .. } => assert_eq!(points.len(), 1),
        other => panic!("unexpected event: {:?}", other),
    }

    // Cached now: the store must not be hit again
    assert!(!cache.request_load(Mode::Sim, "Sim1", store, tx));
}
