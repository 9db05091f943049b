//! Backtesting engine — per-game position state machine and its driver loop.
//!
//! The engine consumes one game's aligned snapshots plus a probability source
//! and produces round-trip trades. It knows nothing about grids, splits, or
//! threads; the runner crate builds those on top.

pub mod loop_runner;
pub mod machine;
pub mod state;

pub use loop_runner::{run_game, EngineError};
pub use machine::{GameRun, PositionStateMachine, StepOutcome};
pub use state::{
    elapsed_seconds, OpenPosition, ParamsError, PositionSide, PositionState, StrategyParams,
    DEFAULT_SHRINK_TOLERANCE,
};
