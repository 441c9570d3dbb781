//! Trading state authority.
//!
//! `StateCoordinator` is the single owner of {mode, position, balances};
//! `validator` gates mode transitions, `history` keeps the mode audit
//! log, and `equity` holds the cross-thread equity-curve cache.

pub mod coordinator;
pub mod equity;
pub mod history;
pub mod validator;

pub use coordinator::{StateCoordinator, StateNotification};
pub use equity::{EquityCurveCache, EquityCurveEvent, EquityPoint, EquityStore, StoreError};
pub use history::{ModeHistory, ModeHistoryEntry};
pub use validator::{validate, TransitionDecision};
