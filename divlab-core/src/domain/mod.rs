//! Domain types for divlab

pub mod game;
pub mod snapshot;
pub mod trade;

pub use game::{GameFeed, GameId};
pub use snapshot::{validate_probability, MarketSide, Quote, SkipReason, Snapshot};
pub use trade::{sort_canonical, ExitReason, Side, Trade};
