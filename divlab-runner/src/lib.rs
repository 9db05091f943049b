//! divlab runner — grid search, game splits, selection, stability, artifacts.
//!
//! This crate builds on `divlab-core` to provide:
//! - TOML configuration with validation and fingerprinting
//! - Snapshot and model-probability CSV loading
//! - Train / valid / test game splits with a persisted manifest
//! - Single-game backtests with per-game and per-split metrics
//! - Threshold grid search on a fixed-size worker pool
//! - Train → top-N → valid selection protocol
//! - Profit-surface stability analysis
//! - Shared result cache and JSON / CSV / Markdown export

pub mod cache;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod grid;
pub mod metrics;
pub mod runner;
pub mod search;
pub mod selection;
pub mod split;
pub mod stability;

pub use cache::{cache_key, CacheError, ResultCache};
pub use config::{ConfigError, GridSearchConfig, ThresholdRange};
pub use data_loader::{load_probabilities, load_snapshots, LoadError, LoadedSnapshots};
pub use grid::{collect_trades, ExcludedRun, GridAxes, GridCell, GridResults, GridSearch, SearchError};
pub use metrics::SplitMetrics;
pub use runner::{run_game_backtest, GameBacktest, GameMetrics, RunError, SCHEMA_VERSION};
pub use search::{run_search, SearchOutcome};
pub use selection::{select, SelectionOutcome, SelectionResult, ValidMetric};
pub use split::{SplitError, SplitManifest, SplitMethod, SplitName};
pub use stability::{Monotonicity, PeakShape, StabilityReport};
