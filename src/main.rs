use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tradedesk::background::BackgroundTasks;
use tradedesk::cli::{Cli, FeedConfig};
use tradedesk::feed::{FeedConnection, FeedError, FeedMessage, OrderFlow};
use tradedesk::logging::{CsvRecorder, MultiRecorder, TracingRecorder, TradeRecorder};
use tradedesk::persist::{JsonEquityStore, SessionState, SessionStore, SCHEMA_VERSION};
use tradedesk::recovery::{RecoveryCoordinator, RecoverySnapshot, ServerPosition};
use tradedesk::state::{
    EquityCurveCache, EquityCurveEvent, EquityPoint, StateCoordinator, StateNotification,
};
use tradedesk::types::Mode;

/// Feed protocol version sent at logon
const PROTOCOL_VERSION: u32 = 8;
/// Quiet period that ends the post-logon recovery query
const RECOVERY_QUIET_WINDOW: Duration = Duration::from_millis(750);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from the .env file
    dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.verbose)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.into_config()?;
    run(config).await
}

/// Persistence and recording collaborators fed by state notifications.
struct Collaborators {
    session_store: SessionStore,
    equity_cache: EquityCurveCache,
    equity_store: Arc<JsonEquityStore>,
    equity_tx: UnboundedSender<EquityCurveEvent>,
    recorder: Arc<MultiRecorder>,
}

async fn run(config: FeedConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = StateCoordinator::new(config.initial_mode, config.instrument_spec());
    let mut notifications = state.subscribe();
    let mut flow = OrderFlow::new();
    let mut tasks = BackgroundTasks::new();

    let (equity_tx, mut equity_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut recorder = MultiRecorder::new(vec![Box::new(TracingRecorder)]);
    if let Some(path) = &config.trade_log {
        recorder.add(Box::new(CsvRecorder::new(path.clone())));
    }
    let collab = Collaborators {
        session_store: SessionStore::new(&config.state_dir),
        equity_cache: EquityCurveCache::new(),
        equity_store: Arc::new(JsonEquityStore::new(&config.state_dir)),
        equity_tx,
        recorder: Arc::new(recorder),
    };

    // Warm the equity cache for the starting scope
    if let Some(account) = &config.account {
        collab.equity_cache.request_load(
            config.initial_mode,
            account,
            collab.equity_store.clone(),
            collab.equity_tx.clone(),
        );
    }

    let mut backoff = Duration::from_secs(1);
    'sessions: loop {
        let mut conn = match FeedConnection::connect(&config.host, config.port).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "Feed connect failed; retrying");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break 'sessions,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        backoff = Duration::from_secs(1);

        let logon = FeedMessage::LogonRequest {
            protocol_version: PROTOCOL_VERSION,
            username: config.username.clone(),
            password: config.password.clone(),
        };
        if let Err(e) = conn.send(&logon).await {
            warn!(error = %e, "Logon send failed; reconnecting");
            continue;
        }

        // Reconcile against the server before consuming live events.
        match gather_recovery_snapshot(&mut conn, config.account.as_deref()).await {
            Ok(snapshot) => {
                let report = RecoveryCoordinator::reconcile(&mut state, &snapshot);
                if report.has_conflicts() {
                    warn!(conflicts = ?report.conflicts, "Recovery resolved conflicts in favor of the server");
                }
                restore_session_extremes(&mut state, &collab.session_store);
            }
            Err(e) => {
                warn!(error = %e, "Recovery query failed; reconnecting");
                continue;
            }
        }
        drain_notifications(&mut notifications, &state, &mut tasks, &collab);

        info!("Session live");
        loop {
            // Drain equity-load completions without blocking the feed
            while let Ok(event) = equity_rx.try_recv() {
                log_equity_event(event);
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break 'sessions;
                }
                message = conn.next_message() => match message {
                    Ok(Some(message)) => {
                        dispatch(&mut state, &mut flow, &message);
                        drain_notifications(&mut notifications, &state, &mut tasks, &collab);
                    }
                    Ok(None) => {
                        warn!("Feed closed by terminal; reconnecting");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Feed error; reconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!(
        stats = ?flow.stats(),
        outstanding = tasks.outstanding(),
        "Draining background work"
    );
    if !tasks
        .shutdown(Duration::from_secs(config.shutdown_grace_secs))
        .await
    {
        warn!("Some background work did not finish before shutdown");
    }
    if let Err(e) = collab.recorder.flush().await {
        warn!(error = %e, "Recorder flush failed at shutdown");
    }
    Ok(())
}

/// Re-apply persisted trade extremes to a position restored by
/// recovery; the server snapshot carries none.
fn restore_session_extremes(state: &mut StateCoordinator, store: &SessionStore) {
    let Some((symbol, mode, account, recovered)) = state
        .position()
        .map(|p| (p.symbol.clone(), p.mode, p.account.clone(), p.recovered))
    else {
        return;
    };
    if !recovered {
        return;
    }
    let doc = store.load(mode, &account);
    for price in [doc.trade_min, doc.trade_max].into_iter().flatten() {
        state.observe_price(&symbol, price);
    }
}

/// Route one decoded message into the engine.
fn dispatch(state: &mut StateCoordinator, flow: &mut OrderFlow, message: &FeedMessage) {
    match message {
        FeedMessage::OrderUpdate(update) => flow.handle_order_update(state, update),
        FeedMessage::PositionUpdate(update) => flow.handle_position_update(state, update),
        FeedMessage::AccountBalance(balance) => {
            let mode = Mode::from_account(&balance.account);
            if mode == Mode::Live {
                state.update_live_balance_from_server(balance.balance, &balance.account);
            } else {
                state.update_balance_for_mode(mode, balance.balance);
            }
        }
        FeedMessage::MarketTick(tick) => state.observe_price(&tick.symbol, tick.price),
        FeedMessage::Heartbeat
        | FeedMessage::LogonRequest { .. }
        | FeedMessage::LogonResponse { .. } => {}
    }
}

/// Collect the server's initial position/balance burst after logon.
///
/// The snapshot is considered complete after a quiet period on the wire.
async fn gather_recovery_snapshot(
    conn: &mut FeedConnection,
    default_account: Option<&str>,
) -> Result<RecoverySnapshot, FeedError> {
    let mut snapshot = RecoverySnapshot {
        positions: Vec::new(),
        balance: None,
        account: default_account.map(String::from),
    };

    loop {
        match tokio::time::timeout(RECOVERY_QUIET_WINDOW, conn.next_message()).await {
            // Quiet period: the burst is over
            Err(_) => break,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Some(message))) => match message {
                FeedMessage::LogonResponse { success, message } => {
                    if success {
                        info!("Logon accepted");
                    } else {
                        warn!(
                            message = message.as_deref().unwrap_or("-"),
                            "Logon rejected by terminal"
                        );
                    }
                }
                FeedMessage::PositionUpdate(update) if !update.quantity.is_zero() => {
                    match update.avg_price {
                        Some(avg_price) => snapshot.positions.push(ServerPosition {
                            symbol: update.symbol,
                            quantity: update.quantity,
                            avg_price,
                            account: update.account,
                        }),
                        None => {
                            warn!(symbol = %update.symbol, "Recovery position without price ignored")
                        }
                    }
                }
                FeedMessage::AccountBalance(balance) => {
                    snapshot.balance = Some(balance.balance);
                    snapshot.account = Some(balance.account);
                }
                _ => {}
            },
        }
    }

    Ok(snapshot)
}

/// Feed buffered state notifications to the persistence and recording
/// collaborators. Slow work is spawned fire-and-forget.
fn drain_notifications(
    notifications: &mut UnboundedReceiver<StateNotification>,
    state: &StateCoordinator,
    tasks: &mut BackgroundTasks,
    collab: &Collaborators,
) {
    while let Ok(notification) = notifications.try_recv() {
        match notification {
            StateNotification::ModeChanged { mode, account } => {
                if let Some(account) = account {
                    collab.equity_cache.request_load(
                        mode,
                        &account,
                        collab.equity_store.clone(),
                        collab.equity_tx.clone(),
                    );
                }
            }
            StateNotification::BalanceChanged { mode, balance } => {
                debug!(mode = %mode, balance = %balance, "Balance changed");
            }
            StateNotification::PositionOpened { snapshot } => {
                let doc = SessionState {
                    schema_version: SCHEMA_VERSION,
                    entry_time: snapshot.entry_time,
                    heat_started: snapshot.entry_time,
                    trade_min: Some(snapshot.trade_min),
                    trade_max: Some(snapshot.trade_max),
                };
                let store = collab.session_store.clone();
                tasks.spawn(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        store.save(snapshot.mode, &snapshot.account, &doc)
                    })
                    .await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "Session save failed"),
                        Err(e) => warn!(error = %e, "Session save task failed"),
                    }
                });
            }
            StateNotification::PositionClosed { trade } => {
                let start = collab
                    .equity_cache
                    .get(trade.mode, &trade.account)
                    .and_then(|curve| curve.last().map(|p| p.equity))
                    .or_else(|| state.balance(trade.mode))
                    .unwrap_or_default();
                collab.equity_cache.push(
                    trade.mode,
                    &trade.account,
                    EquityPoint {
                        time: trade.exit_time,
                        equity: start + trade.net_pnl(),
                    },
                );

                let store = collab.session_store.clone();
                let recorder = collab.recorder.clone();
                tasks.spawn(async move {
                    if let Err(e) = recorder.record(&trade).await {
                        error!(error = %e, trade_id = %trade.trade_id, "Trade recording failed");
                    }
                    let mode = trade.mode;
                    let account = trade.account.clone();
                    let result =
                        tokio::task::spawn_blocking(move || store.clear(mode, &account)).await;
                    if let Ok(Err(e)) = result {
                        warn!(error = %e, "Session clear failed");
                    }
                });
            }
            StateNotification::PositionCleared { symbol, mode } => {
                debug!(symbol = %symbol, mode = %mode, "Position cleared by recovery");
                let account = state.account().unwrap_or_default().to_string();
                let store = collab.session_store.clone();
                tasks.spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || store.clear(mode, &account)).await;
                    if let Ok(Err(e)) = result {
                        warn!(error = %e, "Session clear failed");
                    }
                });
            }
        }
    }
}

fn log_equity_event(event: EquityCurveEvent) {
    match event {
        EquityCurveEvent::Loaded {
            mode,
            account,
            points,
        } => info!(mode = %mode, account = %account, points = points.len(), "Equity curve ready"),
        EquityCurveEvent::LoadFailed {
            mode,
            account,
            error,
        } => warn!(mode = %mode, account = %account, error = %error, "Equity curve load failed"),
    }
}
