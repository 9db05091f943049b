//! Position state machine — turns a divergence stream into trades.
//!
//! One machine per (game, threshold pair). Each call to [`PositionStateMachine::step`]
//! consumes one snapshot and performs at most one action:
//!
//! - flat → open when |divergence| crosses the entry threshold and the edge is
//!   not already shrinking
//! - open → close when the directional divergence drops below the exit
//!   threshold and the minimum hold has elapsed
//! - [`PositionStateMachine::finish`] force-closes anything still open at the
//!   game's last valid quote
//!
//! Longs buy at the ask and sell at the bid; shorts sell at the bid and buy
//! back at the ask. The mid is only used to measure divergence.

use chrono::NaiveDate;

use crate::domain::{validate_probability, ExitReason, Quote, Side, SkipReason, Snapshot, Trade};
use crate::engine::state::{elapsed_seconds, OpenPosition, PositionState, StrategyParams};

/// What happened on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Tick unusable; nothing evaluated.
    Skipped(SkipReason),
    /// No position and no entry.
    Flat,
    /// Entry signal present but the divergence is shrinking.
    EntryBlocked(Side),
    Opened(Side),
    Holding,
    /// Exit signal present but the minimum hold has not elapsed.
    ExitBlocked { elapsed: i64 },
    Closed(ExitReason),
}

/// Last usable quote, kept for the forced close at game end.
#[derive(Debug, Clone, Copy)]
struct LastTick {
    timestamp: i64,
    quote: Quote,
}

/// Everything a finished game produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRun {
    pub game_id: String,
    pub game_date: NaiveDate,
    pub trades: Vec<Trade>,
    pub valid_snapshots: usize,
    pub skipped_snapshots: usize,
}

/// Per-game state machine. Owns its [`PositionState`] and discards it on finish.
pub struct PositionStateMachine<'a> {
    game_id: String,
    game_date: NaiveDate,
    params: &'a StrategyParams,
    state: PositionState,
    last_tick: Option<LastTick>,
    trades: Vec<Trade>,
    valid: usize,
    skipped: usize,
}

impl<'a> PositionStateMachine<'a> {
    pub fn new(game_id: impl Into<String>, game_date: NaiveDate, params: &'a StrategyParams) -> Self {
        Self {
            game_id: game_id.into(),
            game_date,
            params,
            state: PositionState::default(),
            last_tick: None,
            trades: Vec::new(),
            valid: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Process one snapshot with the probability the caller's source produced for it.
    pub fn step(&mut self, snapshot: &Snapshot, probability: Option<f64>) -> StepOutcome {
        let (prob, quote, mid) = match evaluate(snapshot, probability) {
            Ok(v) => v,
            Err(reason) => {
                self.skipped += 1;
                return StepOutcome::Skipped(reason);
            }
        };
        self.valid += 1;
        self.last_tick = Some(LastTick {
            timestamp: snapshot.timestamp,
            quote,
        });

        let divergence = prob - mid;
        let outcome = match self.state.open.clone() {
            Some(open) => self.manage_open(&open, snapshot.timestamp, divergence, &quote),
            None => self.try_enter(snapshot.timestamp, prob, divergence, &quote),
        };
        self.state.prev_divergence = Some(divergence);
        outcome
    }

    fn try_enter(&mut self, timestamp: i64, prob: f64, divergence: f64, quote: &Quote) -> StepOutcome {
        let e = self.params.entry_threshold;
        let side = if divergence >= e {
            Side::Long
        } else if divergence <= -e {
            Side::Short
        } else {
            return StepOutcome::Flat;
        };

        if self.is_shrinking(side, divergence) {
            return StepOutcome::EntryBlocked(side);
        }

        let entry_price = match side {
            Side::Long => quote.ask,
            Side::Short => quote.bid,
        };
        self.state.open = Some(OpenPosition {
            side,
            entry_price,
            entry_timestamp: timestamp,
            entry_prob: prob,
            entry_divergence: divergence,
        });
        StepOutcome::Opened(side)
    }

    fn is_shrinking(&self, side: Side, divergence: f64) -> bool {
        match self.state.prev_divergence {
            None => false,
            Some(prev) => {
                side.directional(divergence) < side.directional(prev) - self.params.shrink_tolerance
            }
        }
    }

    fn manage_open(
        &mut self,
        open: &OpenPosition,
        timestamp: i64,
        divergence: f64,
        quote: &Quote,
    ) -> StepOutcome {
        if open.side.directional(divergence) >= self.params.exit_threshold {
            return StepOutcome::Holding;
        }
        let elapsed = elapsed_seconds(open.entry_timestamp, timestamp);
        if elapsed < self.params.min_hold_seconds {
            return StepOutcome::ExitBlocked { elapsed };
        }
        self.close(open, timestamp, quote, ExitReason::DivergenceDecayed);
        StepOutcome::Closed(ExitReason::DivergenceDecayed)
    }

    fn close(&mut self, open: &OpenPosition, timestamp: i64, quote: &Quote, reason: ExitReason) {
        let contracts = self.params.contracts;
        let exit_price = match open.side {
            Side::Long => quote.bid,
            Side::Short => quote.ask,
        };
        let gross_pnl = match open.side {
            Side::Long => (exit_price - open.entry_price) * contracts,
            Side::Short => (open.entry_price - exit_price) * contracts,
        };
        let fees = self
            .params
            .fees
            .round_trip(open.entry_price, exit_price, contracts);

        self.trades.push(Trade {
            game_id: self.game_id.clone(),
            game_date: self.game_date,
            side: open.side,
            entry_time: open.entry_timestamp,
            entry_price: open.entry_price,
            entry_prob: open.entry_prob,
            entry_divergence: open.entry_divergence,
            exit_time: timestamp,
            exit_price,
            exit_reason: reason,
            contracts,
            gross_pnl,
            fees,
            pnl_dollars: gross_pnl - fees,
            hold_seconds: elapsed_seconds(open.entry_timestamp, timestamp),
        });
        self.state.open = None;
    }

    /// End of game: force-close any open position at the last valid quote.
    ///
    /// The minimum hold does not apply to the forced close.
    pub fn finish(mut self) -> GameRun {
        if let (Some(open), Some(last)) = (self.state.open.clone(), self.last_tick) {
            self.close(&open, last.timestamp, &last.quote, ExitReason::GameEnd);
        }
        GameRun {
            game_id: self.game_id,
            game_date: self.game_date,
            trades: self.trades,
            valid_snapshots: self.valid,
            skipped_snapshots: self.skipped,
        }
    }
}

fn evaluate(snapshot: &Snapshot, probability: Option<f64>) -> Result<(f64, Quote, f64), SkipReason> {
    let prob = validate_probability(probability)?;
    let quote = snapshot.quote()?;
    let mid = snapshot.mid(&quote)?;
    Ok((prob, quote, mid))
}
