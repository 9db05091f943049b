//! Performance metrics — pure functions over trade lists.
//!
//! Every metric is a pure function: trades (or a PnL curve) in, scalar out.
//! Order-sensitive metrics (equity curve, drawdown) expect trades already in
//! canonical order; [`SplitMetrics::compute`] sorts before deriving them.

use serde::{Deserialize, Serialize};

use divlab_core::domain::{sort_canonical, Trade};

/// Cap for profit factor when there are no losing trades.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Aggregated metrics of one grid cell on one split.
///
/// A split with no trades yields all-zero metrics, never missing values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub net_profit_dollars: f64,
    pub num_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Largest peak-to-trough fall of cumulative PnL, in dollars (>= 0).
    pub max_drawdown: f64,
    pub total_fees: f64,
    /// Mean holding time in seconds.
    pub avg_hold_time: f64,
    pub is_valid: bool,
    pub games: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// (game, combination) runs that failed and were left out.
    pub excluded_runs: usize,
}

impl SplitMetrics {
    /// Aggregate a split's trades.
    ///
    /// `trades` may arrive in any order (e.g. worker completion order); they are
    /// sorted canonically before the equity curve is built, so the result does
    /// not depend on scheduling.
    pub fn compute(
        mut trades: Vec<Trade>,
        games: usize,
        excluded_runs: usize,
        min_trades: usize,
    ) -> Self {
        sort_canonical(&mut trades);
        let curve = equity_curve(&trades);
        Self {
            net_profit_dollars: net_profit(&trades),
            num_trades: trades.len(),
            win_rate: win_rate(&trades),
            profit_factor: profit_factor(&trades),
            max_drawdown: max_drawdown(&curve),
            total_fees: total_fees(&trades),
            avg_hold_time: avg_hold_seconds(&trades),
            is_valid: !trades.is_empty() && trades.len() >= min_trades,
            games,
            gross_profit: gross_profit(&trades),
            gross_loss: gross_loss(&trades),
            excluded_runs,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

pub fn net_profit(trades: &[Trade]) -> f64 {
    trades.iter().map(|t| t.pnl_dollars).sum()
}

/// Fraction of trades with positive PnL; 0.0 when there are no trades.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64
}

pub fn gross_profit(trades: &[Trade]) -> f64 {
    trades
        .iter()
        .filter(|t| t.pnl_dollars > 0.0)
        .map(|t| t.pnl_dollars)
        .sum()
}

/// Sum of losing trades as a positive number.
pub fn gross_loss(trades: &[Trade]) -> f64 {
    trades
        .iter()
        .filter(|t| t.pnl_dollars < 0.0)
        .map(|t| -t.pnl_dollars)
        .sum()
}

/// Gross profit / gross loss.
///
/// Capped at [`PROFIT_FACTOR_CAP`] for edge cases (all winners, zero losses).
pub fn profit_factor(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let profit = gross_profit(trades);
    let loss = gross_loss(trades);
    if loss < 1e-10 {
        return if profit > 0.0 { PROFIT_FACTOR_CAP } else { 0.0 };
    }
    (profit / loss).min(PROFIT_FACTOR_CAP)
}

pub fn total_fees(trades: &[Trade]) -> f64 {
    trades.iter().map(|t| t.fees).sum()
}

pub fn avg_hold_seconds(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.hold_seconds as f64).sum::<f64>() / trades.len() as f64
}

/// Cumulative PnL after each trade, starting from an implicit 0.
pub fn equity_curve(trades: &[Trade]) -> Vec<f64> {
    trades
        .iter()
        .scan(0.0, |acc, t| {
            *acc += t.pnl_dollars;
            Some(*acc)
        })
        .collect()
}

/// Largest peak-to-trough decline of a cumulative PnL curve, in dollars.
///
/// The running peak starts at 0 (flat before the first trade), so a curve
/// that only goes down still reports its full loss.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for &value in curve {
        if value > peak {
            peak = value;
        }
        max_dd = max_dd.max(peak - value);
    }
    max_dd
}
