//! Trade — a completed round-trip on the home-win contract.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Bought the home contract: forecast above market.
    Long,
    /// Sold the home contract: forecast below market.
    Short,
}

impl Side {
    /// Divergence measured in this side's favour (positive = edge).
    pub fn directional(self, divergence: f64) -> f64 {
        match self {
            Side::Long => divergence,
            Side::Short => -divergence,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Divergence fell below the exit threshold.
    DivergenceDecayed,
    /// Forced close on the game's last valid snapshot.
    GameEnd,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::DivergenceDecayed => "divergence_decayed",
            ExitReason::GameEnd => "game_end",
        }
    }
}

/// An immutable round-trip record: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    // ── Identification ──
    pub game_id: String,
    pub game_date: NaiveDate,
    pub side: Side,

    // ── Entry ──
    pub entry_time: i64,
    pub entry_price: f64,
    pub entry_prob: f64,
    pub entry_divergence: f64,

    // ── Exit ──
    pub exit_time: i64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size / PnL ──
    pub contracts: f64,
    pub gross_pnl: f64,
    pub fees: f64,
    pub pnl_dollars: f64,

    // ── Duration ──
    pub hold_seconds: i64,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.pnl_dollars > 0.0
    }

    /// Timestamp at which the trade's PnL is realised.
    pub fn settle_time(&self) -> i64 {
        self.exit_time
    }

    /// Canonical ordering used before any equity-curve computation.
    ///
    /// Primary key is `(game_date, settle_time)`; the remaining fields only
    /// break ties so the order is total and independent of input order.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.game_date
            .cmp(&other.game_date)
            .then_with(|| self.settle_time().cmp(&other.settle_time()))
            .then_with(|| self.game_id.cmp(&other.game_id))
            .then_with(|| self.entry_time.cmp(&other.entry_time))
            .then_with(|| self.side.cmp(&other.side))
    }
}

/// Sort trades into canonical order (stable, idempotent).
pub fn sort_canonical(trades: &mut [Trade]) {
    trades.sort_by(Trade::canonical_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(game_id: &str, day: u32, exit_time: i64, pnl: f64) -> Trade {
        Trade {
            game_id: game_id.into(),
            game_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            side: Side::Long,
            entry_time: exit_time - 60,
            entry_price: 0.51,
            entry_prob: 0.60,
            entry_divergence: 0.10,
            exit_time,
            exit_price: 0.54,
            exit_reason: ExitReason::DivergenceDecayed,
            contracts: 1.0,
            gross_pnl: pnl,
            fees: 0.0,
            pnl_dollars: pnl,
            hold_seconds: 60,
        }
    }

    #[test]
    fn directional_divergence() {
        assert_eq!(Side::Long.directional(0.07), 0.07);
        assert_eq!(Side::Short.directional(-0.07), 0.07);
    }

    #[test]
    fn winner_requires_positive_pnl() {
        assert!(trade("a", 1, 100, 0.03).is_winner());
        assert!(!trade("a", 1, 100, 0.0).is_winner());
        assert!(!trade("a", 1, 100, -0.01).is_winner());
    }

    #[test]
    fn canonical_sort_orders_by_date_then_time() {
        let mut trades = vec![
            trade("b", 2, 50, 0.01),
            trade("a", 1, 500, 0.01),
            trade("c", 1, 100, 0.01),
        ];
        sort_canonical(&mut trades);
        let ids: Vec<_> = trades.iter().map(|t| t.game_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn canonical_sort_is_idempotent() {
        let mut trades = vec![
            trade("b", 2, 50, 0.01),
            trade("a", 2, 50, -0.02),
            trade("c", 1, 100, 0.01),
        ];
        sort_canonical(&mut trades);
        let once = trades.clone();
        sort_canonical(&mut trades);
        assert_eq!(once, trades);
    }

    #[test]
    fn trade_serialization_roundtrip() {
        let t = trade("g1", 3, 1_000, 0.03);
        let json = serde_json::to_string(&t).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
