//! Mode change audit log.
//!
//! Ring-buffered record of recent mode transitions, used to diagnose
//! mode thrashing. Capped at the last 100 entries.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Mode;

const HISTORY_CAP: usize = 100;

/// One committed mode transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeHistoryEntry {
    /// When the transition was committed
    pub timestamp: DateTime<Utc>,
    /// Mode entered
    pub mode: Mode,
    /// Account associated with the transition, if known
    pub account: Option<String>,
}

/// Append-only mode history with ring-buffer semantics.
#[derive(Debug, Default)]
pub struct ModeHistory {
    entries: VecDeque<ModeHistoryEntry>,
}

impl ModeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed transition, evicting the oldest entry once the
    /// cap is reached.
    pub fn record(&mut self, mode: Mode, account: Option<String>) {
        if self.entries.len() == HISTORY_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(ModeHistoryEntry {
            timestamp: Utc::now(),
            mode,
            account,
        });
    }

    /// Entries oldest-first.
    pub fn entries(&self) -> impl Iterator<Item = &ModeHistoryEntry> {
        self.entries.iter()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&ModeHistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
