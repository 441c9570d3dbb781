//! Equity-curve cache scoped by (mode, account).
//!
//! The one piece of coordinator-adjacent state touched from multiple
//! threads: reads come from the owner task, loads complete on background
//! workers. Every read/check/write of the map goes through the mutex,
//! and pending-load de-duplication prevents redundant concurrent loads
//! of the same scope.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

use crate::types::Mode;

/// Error type for equity storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One point on an account's equity curve.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: Decimal,
}

/// Storage seam for historical equity curves.
///
/// Implementations load from durable storage (SQLite in the dashboard);
/// loads are expected to be slow and run off the owner task.
#[async_trait]
pub trait EquityStore: Send + Sync {
    async fn load_curve(&self, mode: Mode, account: &str) -> Result<Vec<EquityPoint>, StoreError>;
}

/// Completion notification posted back to the owner task.
#[derive(Debug, Clone)]
pub enum EquityCurveEvent {
    Loaded {
        mode: Mode,
        account: String,
        points: Arc<Vec<EquityPoint>>,
    },
    LoadFailed {
        mode: Mode,
        account: String,
        error: String,
    },
}

/// Thread-safe equity-curve cache.
#[derive(Clone, Default)]
pub struct EquityCurveCache {
    curves: Arc<Mutex<HashMap<(Mode, String), Arc<Vec<EquityPoint>>>>>,
    pending: Arc<Mutex<HashSet<(Mode, String)>>>,
}

impl EquityCurveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached curve for a scope, if loaded.
    pub fn get(&self, mode: Mode, account: &str) -> Option<Arc<Vec<EquityPoint>>> {
        let curves = self.curves.lock().unwrap_or_else(|e| e.into_inner());
        curves.get(&(mode, account.to_string())).cloned()
    }

    /// Replace the cached curve for a scope.
    pub fn insert(&self, mode: Mode, account: &str, points: Vec<EquityPoint>) {
        let mut curves = self.curves.lock().unwrap_or_else(|e| e.into_inner());
        curves.insert((mode, account.to_string()), Arc::new(points));
    }

    /// Append a point to a scope's curve, creating it if absent.
    pub fn push(&self, mode: Mode, account: &str, point: EquityPoint) {
        let mut curves = self.curves.lock().unwrap_or_else(|e| e.into_inner());
        let entry = curves
            .entry((mode, account.to_string()))
            .or_insert_with(|| Arc::new(Vec::new()));
        Arc::make_mut(entry).push(point);
    }

    /// Kick off a background load for a scope.
    ///
    /// Returns false without spawning when the scope is already cached or
    /// a load is already pending. The completion (success or failure)
    /// arrives on `tx`; failures leave the cache untouched.
    pub fn request_load(
        &self,
        mode: Mode,
        account: &str,
        store: Arc<dyn EquityStore>,
        tx: UnboundedSender<EquityCurveEvent>,
    ) -> bool {
        let key = (mode, account.to_string());

        {
            let curves = self.curves.lock().unwrap_or_else(|e| e.into_inner());
            if curves.contains_key(&key) {
                return false;
            }
        }
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.insert(key.clone()) {
                debug!(mode = %mode, account, "Equity curve load already pending");
                return false;
            }
        }

        let cache = self.clone();
        let account = account.to_string();
        tokio::spawn(async move {
            let result = store.load_curve(mode, &account).await;
            {
                let mut pending = cache.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.remove(&(mode, account.clone()));
            }
            let event = match result {
                Ok(points) => {
                    let points = Arc::new(points);
                    {
                        let mut curves = cache.curves.lock().unwrap_or_else(|e| e.into_inner());
                        curves.insert((mode, account.clone()), Arc::clone(&points));
                    }
                    debug!(mode = %mode, account = %account, points = points.len(), "Equity curve loaded");
                    EquityCurveEvent::Loaded {
                        mode,
                        account,
                        points,
                    }
                }
                Err(e) => {
                    error!(mode = %mode, account = %account, error = %e, "Equity curve load failed");
                    EquityCurveEvent::LoadFailed {
                        mode,
                        account,
                        error: e.to_string(),
                    }
                }
            };
            let _ = tx.send(event);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct CountingStore {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl EquityStore for CountingStore {
        async fn load_curve(
            &self,
            _mode: Mode,
            _account: &str,
        ) -> Result<Vec<EquityPoint>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Stay pending long enough for the dedup check to observe it
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(vec![EquityPoint {
                time: Utc::now(),
                equity: dec!(25000),
            }])
        }
    }

    #[tokio::test]
    async fn test_load_and_cache() {
        let cache = EquityCurveCache::new();
        let store = Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(cache.request_load(Mode::Sim, "Sim1", store.clone(), tx.clone()));

        match rx.recv().await.unwrap() {
            EquityCurveEvent::Loaded { points, .. } => assert_eq!(points.len(), 1),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(cache.get(Mode::Sim, "Sim1").is_some());

        // Cached now: no second load
        assert!(!cache.request_load(Mode::Sim, "Sim1", store.clone(), tx));
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_load_deduplicated() {
        let cache = EquityCurveCache::new();
        let store = Arc::new(CountingStore {
            loads: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(cache.request_load(Mode::Live, "APEX-1", store.clone(), tx.clone()));
        assert!(!cache.request_load(Mode::Live, "APEX-1", store.clone(), tx));

        rx.recv().await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_appends() {
        let cache = EquityCurveCache::new();
        cache.push(
            Mode::Sim,
            "Sim1",
            EquityPoint {
                time: Utc::now(),
                equity: dec!(25000),
            },
        );
        cache.push(
            Mode::Sim,
            "Sim1",
            EquityPoint {
                time: Utc::now(),
                equity: dec!(25100),
            },
        );
        assert_eq!(cache.get(Mode::Sim, "Sim1").unwrap().len(), 2);
    }
}
