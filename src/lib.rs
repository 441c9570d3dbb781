//! Trading state reconciliation engine.
//!
//! Turns the terminal's unordered, occasionally duplicated event stream
//! into one consistent view of {mode, position, balances}, surviving
//! reconnects, mode switches, and partial messages.

pub mod background;
pub mod cli;
pub mod feed;
pub mod logging;
pub mod persist;
pub mod position;
pub mod recovery;
pub mod state;
pub mod types;
