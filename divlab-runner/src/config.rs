//! Grid-search configuration.
//!
//! Loaded from TOML, overridden by CLI flags, and validated before any worker
//! is spawned. Every section has defaults so a partial file (or no file) is a
//! complete configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use divlab_core::engine::{ParamsError, StrategyParams, DEFAULT_SHRINK_TOLERANCE};
use divlab_core::fees::FeeModel;
use divlab_core::fingerprint::json_hash;

use crate::selection::ValidMetric;
use crate::split::{SplitMethod, SplitName};

/// Upper bound on grid cells; larger grids are almost always a step typo.
pub const MAX_GRID_CELLS: usize = 250_000;

/// Thresholds are snapped to this many decimals to keep float steps exact.
const THRESHOLD_DECIMALS: i32 = 9;

/// Finest accepted threshold step.
pub const MIN_THRESHOLD_STEP: f64 = 1e-6;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {axis} range: {reason}")]
    InvalidRange { axis: &'static str, reason: String },
    #[error("grid has {cells} cells, more than the limit of {limit}")]
    GridTooLarge { cells: usize, limit: usize },
    #[error("invalid split fractions: train={train}, valid={valid} (each must be > 0 and sum < 1)")]
    InvalidFractions { train: f64, valid: f64 },
    #[error("invalid strategy parameters: {0}")]
    Strategy(#[from] ParamsError),
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("failed to fingerprint config: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

// ─── Threshold ranges ────────────────────────────────────────────────

/// Inclusive `[min, max]` sweep with a fixed step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ThresholdRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// A single-value range.
    pub fn single(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            step: 1.0,
        }
    }

    /// Swept values, ascending, including `max` when it lies on the step grid.
    pub fn values(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| snap(self.min + i as f64 * self.step))
            .collect()
    }

    /// Number of swept values, computed without materialising them.
    /// Saturates at `usize::MAX` for absurdly fine steps.
    pub fn len(&self) -> usize {
        if !self.is_well_formed() {
            return 0;
        }
        // Float-to-int `as` saturates.
        let steps = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        steps.saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_well_formed(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.step.is_finite()
            && self.step > 0.0
            && self.min <= self.max
    }

    fn validate(&self, axis: &'static str, lower_bound_exclusive: bool) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::InvalidRange { axis, reason });
        if !self.min.is_finite() || !self.max.is_finite() || !self.step.is_finite() {
            return fail("bounds and step must be finite".into());
        }
        if self.step <= 0.0 {
            return fail(format!("step must be > 0, got {}", self.step));
        }
        if self.step < MIN_THRESHOLD_STEP && self.min < self.max {
            return fail(format!(
                "step {} is finer than the minimum of {MIN_THRESHOLD_STEP}",
                self.step
            ));
        }
        if self.min > self.max {
            return fail(format!("min {} is above max {}", self.min, self.max));
        }
        if lower_bound_exclusive && self.min <= 0.0 {
            return fail(format!("min must be > 0, got {}", self.min));
        }
        if self.min < 0.0 {
            return fail(format!("min must be >= 0, got {}", self.min));
        }
        if self.max > 1.0 {
            return fail(format!("max must be <= 1, got {}", self.max));
        }
        Ok(())
    }
}

fn snap(v: f64) -> f64 {
    let scale = 10f64.powi(THRESHOLD_DECIMALS);
    (v * scale).round() / scale
}

// ─── Sections ────────────────────────────────────────────────────────

/// `[grid]`: the 2-D threshold space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub entry: ThresholdRange,
    pub exit: ThresholdRange,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            entry: ThresholdRange::new(0.02, 0.15, 0.01),
            exit: ThresholdRange::new(0.0, 0.05, 0.01),
        }
    }
}

impl GridConfig {
    pub fn cell_count(&self) -> usize {
        self.entry.len().saturating_mul(self.exit.len())
    }
}

/// `[strategy]`: everything except the two thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub min_hold_seconds: i64,
    pub shrink_tolerance: f64,
    pub contracts: f64,
    pub fees: FeeModel,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_hold_seconds: 0,
            shrink_tolerance: DEFAULT_SHRINK_TOLERANCE,
            contracts: 1.0,
            fees: FeeModel::default(),
        }
    }
}

impl StrategyConfig {
    /// Full engine parameters for one grid cell.
    pub fn params(&self, entry_threshold: f64, exit_threshold: f64) -> StrategyParams {
        StrategyParams::new(entry_threshold, exit_threshold)
            .with_min_hold(self.min_hold_seconds)
            .with_shrink_tolerance(self.shrink_tolerance)
            .with_contracts(self.contracts)
            .with_fees(self.fees)
    }
}

/// `[split]`: how games are partitioned when no manifest is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub seed: u64,
    pub method: SplitMethod,
    pub train_fraction: f64,
    pub valid_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            method: SplitMethod::Random,
            train_fraction: 0.6,
            valid_fraction: 0.2,
        }
    }
}

/// `[selection]`: the train → valid protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// How many train-ranked cells advance to the valid comparison.
    pub top_n: usize,
    /// Cells with fewer trades than this on a split are invalid on that split.
    pub min_trades: usize,
    pub valid_metric: ValidMetric,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            min_trades: 10,
            valid_metric: ValidMetric::NetProfit,
        }
    }
}

/// `[stability]`: post-hoc grid diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Split whose profit surface is analysed.
    pub split: SplitName,
    /// Cells within this fraction of peak profit belong to the plateau.
    pub plateau_tolerance: f64,
    /// Plateau size at or above which the peak is called broad.
    pub min_plateau_size: usize,
    /// Number of train-ranked cells compared against valid.
    pub top_k: usize,
    /// Spearman correlation at or above which the selection is called stable.
    pub stable_correlation: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            split: SplitName::Train,
            plateau_tolerance: 0.10,
            min_plateau_size: 5,
            top_k: 10,
            stable_correlation: 0.5,
        }
    }
}

/// `[run]`: execution settings that never change results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub workers: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

// ─── Top-level config ────────────────────────────────────────────────

/// Complete grid-search configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSearchConfig {
    pub grid: GridConfig,
    pub strategy: StrategyConfig,
    pub split: SplitConfig,
    pub selection: SelectionConfig,
    pub stability: StabilityConfig,
    pub run: RunSettings,
}

/// The result-determining part of a config, hashed for cache keys.
#[derive(Serialize)]
struct FingerprintView<'a> {
    grid: &'a GridConfig,
    strategy: &'a StrategyConfig,
    selection: &'a SelectionConfig,
    stability: &'a StabilityConfig,
}

impl GridSearchConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check everything that would otherwise fail inside a worker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.entry.validate("entry", true)?;
        self.grid.exit.validate("exit", false)?;
        let cells = self.grid.cell_count();
        if cells > MAX_GRID_CELLS {
            return Err(ConfigError::GridTooLarge {
                cells,
                limit: MAX_GRID_CELLS,
            });
        }

        // Any representative cell exercises the non-threshold parameters.
        self.strategy
            .params(self.grid.entry.min, self.grid.exit.min)
            .validate()?;

        let (train, valid) = (self.split.train_fraction, self.split.valid_fraction);
        let fractions_ok = train.is_finite()
            && valid.is_finite()
            && train > 0.0
            && valid > 0.0
            && train + valid < 1.0;
        if !fractions_ok {
            return Err(ConfigError::InvalidFractions { train, valid });
        }

        if self.selection.top_n == 0 {
            return Err(ConfigError::Zero {
                field: "selection.top_n",
            });
        }
        if self.stability.top_k == 0 {
            return Err(ConfigError::Zero {
                field: "stability.top_k",
            });
        }
        if self.run.workers == 0 {
            return Err(ConfigError::Zero {
                field: "run.workers",
            });
        }
        let tol = self.stability.plateau_tolerance;
        if !(0.0..=1.0).contains(&tol) {
            return Err(ConfigError::OutOfUnitRange {
                field: "stability.plateau_tolerance",
                value: tol,
            });
        }
        Ok(())
    }

    /// BLAKE3 fingerprint of every setting that can change results.
    ///
    /// `[run]` and `[split]` are excluded: worker count never changes results,
    /// and the split is identified separately by its manifest hash.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let view = FingerprintView {
            grid: &self.grid,
            strategy: &self.strategy,
            selection: &self.selection,
            stability: &self.stability,
        };
        Ok(json_hash(&view)?)
    }
}
