//! Mode transition validation.
//!
//! Pure decision logic with no side effects; the coordinator owns the
//! resulting state changes and the implicit close.

use crate::types::Mode;

/// Outcome of a mode-transition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDecision {
    /// Whether the transition may proceed
    pub allowed: bool,
    /// Denial reason, for logging
    pub reason: Option<String>,
    /// Whether committing the transition requires closing the open
    /// position first (position owned by a different mode)
    pub requires_close: bool,
}

impl TransitionDecision {
    fn allow(requires_close: bool) -> Self {
        Self {
            allowed: true,
            reason: None,
            requires_close,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            requires_close: false,
        }
    }
}

/// Validate a requested mode transition.
///
/// `open_position_mode` is the owning mode of the open position, or
/// `None` when flat. Rules, in order:
///
/// 1. `requested == current` is always allowed (no-op).
/// 2. LIVE is always allowed; a position owned by another mode will be
///    auto-closed by the caller.
/// 3. SIM is allowed unless the open position is owned by LIVE.
/// 4. DEBUG is always allowed.
#[must_use]
pub fn validate(current: Mode, requested: Mode, open_position_mode: Option<Mode>) -> TransitionDecision {
    if requested == current {
        return TransitionDecision::allow(false);
    }

    let requires_close = open_position_mode.is_some_and(|owning| owning != requested);

    match requested {
        Mode::Live => TransitionDecision::allow(requires_close),
        Mode::Sim => {
            if open_position_mode == Some(Mode::Live) {
                TransitionDecision::deny(
                    "cannot switch to SIM while a LIVE position is open",
                )
            } else {
                TransitionDecision::allow(requires_close)
            }
        }
        Mode::Debug => TransitionDecision::allow(requires_close),
    }
}
