//! Session state persistence with atomic file writes.
//!
//! One JSON document per (mode, account) scope holds the entry/heat
//! timers and trade extremes that would otherwise be lost across
//! restarts. Absence of the file is a valid "no prior session" state.
//!
//! # Safety
//! - Uses atomic file writes (write to temp, fsync, rename) for durability
//! - A document written by a newer schema is loaded best-effort; the
//!   `schema_version` tag makes the mismatch visible

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::Mode;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Errors from session persistence.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-scope session document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Schema version tag for forward-compat checks
    pub schema_version: u32,
    /// When the open position was entered
    pub entry_time: Option<DateTime<Utc>>,
    /// When the current heat (consecutive-loss) window started
    pub heat_started: Option<DateTime<Utc>>,
    /// Lowest price observed for the open position
    pub trade_min: Option<Decimal>,
    /// Highest price observed for the open position
    pub trade_max: Option<Decimal>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entry_time: None,
            heat_started: None,
            trade_min: None,
            trade_max: None,
        }
    }
}

/// File-backed session store, one document per (mode, account) scope.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, mode: Mode, account: &str) -> PathBuf {
        // Account ids can contain path-hostile characters
        let safe: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("session_{}_{}.json", mode, safe))
    }

    /// Load the document for a scope. A missing or unreadable file loads
    /// as the default ("no prior session").
    pub fn load(&self, mode: Mode, account: &str) -> SessionState {
        let path = self.path_for(mode, account);
        match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt session file; starting fresh");
                SessionState::default()
            }),
            Err(_) => SessionState::default(),
        }
    }

    /// Persist a scope's document atomically.
    ///
    /// Write-to-temp, fsync, rename: a crash leaves either the old file
    /// or the new file, never a partial one.
    pub fn save(
        &self,
        mode: Mode,
        account: &str,
        state: &SessionState,
    ) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(mode, account);
        let json = serde_json::to_string_pretty(state)?;
        let temp_path = temp_path_for(&path);

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;

        // Sync data to disk before rename so the write is fully committed
        // before it becomes visible
        file.sync_all()?;

        // POSIX guarantees rename is atomic on the same filesystem
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Remove a scope's document (session closed cleanly).
    pub fn clear(&self, mode: Mode, account: &str) -> Result<(), PersistError> {
        let path = self.path_for(mode, account);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Flat-file equity curve storage, one JSON array per (mode, account)
/// scope. Stands in for the dashboard's SQLite store.
#[derive(Debug, Clone)]
pub struct JsonEquityStore {
    dir: PathBuf,
}

impl JsonEquityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, mode: Mode, account: &str) -> PathBuf {
        let safe: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("equity_{}_{}.json", mode, safe))
    }
}

#[async_trait::async_trait]
impl crate::state::EquityStore for JsonEquityStore {
    async fn load_curve(
        &self,
        mode: Mode,
        account: &str,
    ) -> Result<Vec<crate::state::EquityPoint>, crate::state::StoreError> {
        let path = self.path_for(mode, account);
        let result = tokio::task::spawn_blocking(move || -> Result<_, crate::state::StoreError> {
            match fs::read_to_string(&path) {
                Ok(data) => serde_json::from_str(&data)
                    .map_err(|e| crate::state::StoreError::Backend(e.to_string())),
                // No prior curve is an empty curve, not an error
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| crate::state::StoreError::Backend(e.to_string()))?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let state = store.load(Mode::Sim, "Sim1");
        assert_eq!(state, SessionState::default());
        assert_eq!(state.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let state = SessionState {
            schema_version: SCHEMA_VERSION,
            entry_time: Some(Utc::now()),
            heat_started: None,
            trade_min: Some(dec!(4990.25)),
            trade_max: Some(dec!(5012.75)),
        };
        store.save(Mode::Sim, "Sim1", &state).unwrap();

        let loaded = store.load(Mode::Sim, "Sim1");
        assert_eq!(loaded.trade_min, state.trade_min);
        assert_eq!(loaded.trade_max, state.trade_max);
        assert_eq!(loaded.entry_time, state.entry_time);

        // No temp file left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_scopes_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let mut sim = SessionState::default();
        sim.trade_min = Some(dec!(1));
        store.save(Mode::Sim, "Sim1", &sim).unwrap();

        let live = store.load(Mode::Live, "APEX-1");
        assert_eq!(live, SessionState::default());
        assert_eq!(store.load(Mode::Sim, "Sim1").trade_min, Some(dec!(1)));
    }

    #[test]
    fn test_corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(Mode::Sim, "Sim1", &SessionState::default()).unwrap();
        let path = dir.path().join("session_SIM_Sim1.json");
        fs::write(&path, "{not valid json").unwrap();

        assert_eq!(store.load(Mode::Sim, "Sim1"), SessionState::default());
    }

    #[tokio::test]
    async fn test_equity_store_missing_file_is_empty() {
        use crate::state::EquityStore;

        let dir = tempfile::tempdir().unwrap();
        let store = JsonEquityStore::new(dir.path());

        let curve = store.load_curve(Mode::Sim, "Sim1").await.unwrap();
        assert!(curve.is_empty());
    }

    #[tokio::test]
    async fn test_equity_store_reads_scope_file() {
        use crate::state::{EquityPoint, EquityStore};

        let dir = tempfile::tempdir().unwrap();
        let store = JsonEquityStore::new(dir.path());

        let points = vec![EquityPoint {
            time: Utc::now(),
            equity: dec!(25000),
        }];
        fs::write(
            dir.path().join("equity_SIM_Sim1.json"),
            serde_json::to_string(&points).unwrap(),
        )
        .unwrap();

        let curve = store.load_curve(Mode::Sim, "Sim1").await.unwrap();
        assert_eq!(curve, points);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(Mode::Sim, "Sim1", &SessionState::default()).unwrap();
        store.clear(Mode::Sim, "Sim1").unwrap();
        store.clear(Mode::Sim, "Sim1").unwrap();
        assert_eq!(store.load(Mode::Sim, "Sim1"), SessionState::default());
    }
}
