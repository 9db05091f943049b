//! Backtest runner — one game, one threshold pair.
//!
//! Wires the engine loop to per-game metrics. Everything here is pure and
//! deterministic: same feed, source, and parameters give the same result on
//! any thread.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use divlab_core::domain::{GameFeed, Trade};
use divlab_core::engine::{run_game, EngineError, GameRun, StrategyParams};
use divlab_core::probability::ProbabilitySource;

use crate::metrics::{
    avg_hold_seconds, equity_curve, max_drawdown, net_profit, total_fees, win_rate,
};

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from a single game's run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Game-level aggregates for one threshold pair.
///
/// Zero trades give a zero-valued record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMetrics {
    pub game_id: String,
    pub game_date: NaiveDate,
    pub net_profit_dollars: f64,
    pub num_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_hold_seconds: f64,
    /// Peak-to-trough on the game's running cumulative PnL, in dollars.
    pub max_drawdown: f64,
    pub total_fees: f64,
    pub valid_snapshots: usize,
    pub skipped_snapshots: usize,
}

impl GameMetrics {
    pub fn compute(run: &GameRun) -> Self {
        // Trades within one game are produced in time order already.
        let trades = &run.trades;
        Self {
            game_id: run.game_id.clone(),
            game_date: run.game_date,
            net_profit_dollars: net_profit(trades),
            num_trades: trades.len(),
            wins: trades.iter().filter(|t| t.pnl_dollars > 0.0).count(),
            losses: trades.iter().filter(|t| t.pnl_dollars < 0.0).count(),
            win_rate: win_rate(trades),
            avg_hold_seconds: avg_hold_seconds(trades),
            max_drawdown: max_drawdown(&equity_curve(trades)),
            total_fees: total_fees(trades),
            valid_snapshots: run.valid_snapshots,
            skipped_snapshots: run.skipped_snapshots,
        }
    }
}

/// Trades plus metrics for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameBacktest {
    pub metrics: GameMetrics,
    pub trades: Vec<Trade>,
}

/// Run one game with one threshold pair.
///
/// The probability source is an explicit argument so a baseline forecast and a
/// calibrated model can be compared over the same feed.
pub fn run_game_backtest(
    feed: &GameFeed,
    source: &dyn ProbabilitySource,
    params: &StrategyParams,
) -> Result<GameBacktest, RunError> {
    let run = run_game(feed, source, params)?;
    let metrics = GameMetrics::compute(&run);
    Ok(GameBacktest {
        metrics,
        trades: run.trades,
    })
}
