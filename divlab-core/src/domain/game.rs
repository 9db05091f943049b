//! GameFeed — the ordered snapshot sequence of a single game.

use super::snapshot::Snapshot;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Game identifier as provided by the upstream feed.
pub type GameId = String;

/// All aligned snapshots for one game, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameFeed {
    pub game_id: GameId,
    pub game_date: NaiveDate,
    pub snapshots: Vec<Snapshot>,
}

impl GameFeed {
    pub fn new(game_id: impl Into<GameId>, game_date: NaiveDate, snapshots: Vec<Snapshot>) -> Self {
        Self {
            game_id: game_id.into(),
            game_date,
            snapshots,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Index of the first snapshot whose timestamp goes backwards, if any.
    pub fn first_out_of_order(&self) -> Option<usize> {
        self.snapshots
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
            .map(|i| i + 1)
    }
}
