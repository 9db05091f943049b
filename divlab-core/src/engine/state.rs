//! Strategy parameters and per-game mutable position state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Side;
use crate::fees::FeeModel;

/// Default tolerance for the "divergence is shrinking" entry filter.
///
/// Entry is blocked when the directional divergence dropped by more than this
/// amount since the previous valid tick. Zero blocks any strict decrease.
pub const DEFAULT_SHRINK_TOLERANCE: f64 = 0.0;

/// Parameters for one threshold combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Minimum |divergence| that opens a position.
    pub entry_threshold: f64,
    /// Directional divergence below which an open position is closed.
    pub exit_threshold: f64,
    /// Exits before this many seconds since entry are blocked.
    pub min_hold_seconds: i64,
    pub shrink_tolerance: f64,
    /// Position size per trade.
    pub contracts: f64,
    pub fees: FeeModel,
}

/// Rejected strategy parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("entry threshold must be finite and > 0, got {0}")]
    EntryThreshold(f64),
    #[error("exit threshold must be finite and >= 0, got {0}")]
    ExitThreshold(f64),
    #[error("min hold seconds must be >= 0, got {0}")]
    MinHold(i64),
    #[error("shrink tolerance must be finite and >= 0, got {0}")]
    ShrinkTolerance(f64),
    #[error("contracts must be finite and > 0, got {0}")]
    Contracts(f64),
}

impl StrategyParams {
    pub fn new(entry_threshold: f64, exit_threshold: f64) -> Self {
        Self {
            entry_threshold,
            exit_threshold,
            min_hold_seconds: 0,
            shrink_tolerance: DEFAULT_SHRINK_TOLERANCE,
            contracts: 1.0,
            fees: FeeModel::None,
        }
    }

    pub fn with_min_hold(mut self, seconds: i64) -> Self {
        self.min_hold_seconds = seconds;
        self
    }

    pub fn with_fees(mut self, fees: FeeModel) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_contracts(mut self, contracts: f64) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn with_shrink_tolerance(mut self, tolerance: f64) -> Self {
        self.shrink_tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if !self.entry_threshold.is_finite() || self.entry_threshold <= 0.0 {
            return Err(ParamsError::EntryThreshold(self.entry_threshold));
        }
        if !self.exit_threshold.is_finite() || self.exit_threshold < 0.0 {
            return Err(ParamsError::ExitThreshold(self.exit_threshold));
        }
        if self.min_hold_seconds < 0 {
            return Err(ParamsError::MinHold(self.min_hold_seconds));
        }
        if !self.shrink_tolerance.is_finite() || self.shrink_tolerance < 0.0 {
            return Err(ParamsError::ShrinkTolerance(self.shrink_tolerance));
        }
        if !self.contracts.is_finite() || self.contracts <= 0.0 {
            return Err(ParamsError::Contracts(self.contracts));
        }
        Ok(())
    }
}

/// Side of the current position, including flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Flat,
    Long,
    Short,
}

/// The single open position of a game.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub side: Side,
    pub entry_price: f64,
    /// Point in time (seconds), never a duration.
    pub entry_timestamp: i64,
    pub entry_prob: f64,
    pub entry_divergence: f64,
}

/// Mutable per-game state owned by one state machine for one run.
///
/// `open` being an `Option` makes "at most one open position" a property of
/// the type rather than a runtime check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionState {
    pub open: Option<OpenPosition>,
    pub prev_divergence: Option<f64>,
}

impl PositionState {
    pub fn side(&self) -> PositionSide {
        match self.open.as_ref().map(|p| p.side) {
            None => PositionSide::Flat,
            Some(Side::Long) => PositionSide::Long,
            Some(Side::Short) => PositionSide::Short,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.open.is_none()
    }
}

/// Seconds elapsed between two timestamps in the same unit.
///
/// Plain integer subtraction: both arguments are points in time, so the
/// difference is already in seconds.
pub fn elapsed_seconds(entry_timestamp: i64, current_timestamp: i64) -> i64 {
    current_timestamp - entry_timestamp
}
