//! Terminal feed: message types, framing, and interpretation.

pub mod codec;
pub mod events;
pub mod interpreter;

pub use codec::{FeedConnection, FeedError};
pub use events::{AccountBalance, FeedMessage, MarketTick, OrderStatus, OrderUpdate, PositionUpdate};
pub use interpreter::{OrderFlow, OrderFlowStats};
