//! Grid-search optimizer.
//!
//! Enumerates every (entry, exit) threshold pair, runs each pair over every
//! game on a fixed-size rayon pool, and folds the per-game results into one
//! [`GridCell`] per pair with train / valid / test metrics.
//!
//! Units of work are (cell, game). Each unit reads the shared, immutable feeds
//! and writes only its own result slot. The merge is single-threaded and
//! sorts trades canonically before any order-sensitive metric is derived.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use divlab_core::domain::{sort_canonical, GameFeed, Trade};
use divlab_core::probability::ProbabilitySource;

use crate::cache::CacheError;
use crate::config::{ConfigError, GridSearchConfig};
use crate::metrics::SplitMetrics;
use crate::runner::{run_game_backtest, GameBacktest, RunError};
use crate::split::{SplitError, SplitManifest, SplitName};

/// Errors that stop a search before (or instead of) producing results.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("split error: {0}")]
    Split(#[from] SplitError),
    #[error("result cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("no (game, combination) run succeeded; {excluded} run(s) excluded")]
    NothingAttempted { excluded: usize },
}

/// The two swept axes, ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAxes {
    pub entry: Vec<f64>,
    pub exit: Vec<f64>,
}

impl GridAxes {
    pub fn from_config(config: &GridSearchConfig) -> Self {
        Self {
            entry: config.grid.entry.values(),
            exit: config.grid.exit.values(),
        }
    }

    pub fn len(&self) -> usize {
        self.entry.len() * self.exit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index: entry varies slowest.
    pub fn index(&self, entry_idx: usize, exit_idx: usize) -> usize {
        entry_idx * self.exit.len() + exit_idx
    }

    /// Inverse of [`GridAxes::index`].
    pub fn coords(&self, index: usize) -> (usize, usize) {
        (index / self.exit.len(), index % self.exit.len())
    }
}

/// One threshold combination with its aggregated metrics per split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub train: SplitMetrics,
    pub valid: SplitMetrics,
    pub test: SplitMetrics,
}

impl GridCell {
    pub fn metrics(&self, split: SplitName) -> &SplitMetrics {
        match split {
            SplitName::Train => &self.train,
            SplitName::Valid => &self.valid,
            SplitName::Test => &self.test,
        }
    }
}

/// A (game, combination) run that failed and was left out of aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedRun {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub game_id: String,
    pub split: SplitName,
    pub reason: String,
}

/// Full grid table plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridResults {
    pub axes: GridAxes,
    /// Row-major over [`GridAxes`].
    pub cells: Vec<GridCell>,
    pub units: usize,
    pub excluded: Vec<ExcludedRun>,
}

impl GridResults {
    pub fn excluded_runs(&self) -> usize {
        self.excluded.len()
    }

    pub fn cell(&self, entry_idx: usize, exit_idx: usize) -> Option<&GridCell> {
        self.cells.get(self.axes.index(entry_idx, exit_idx))
    }

    pub fn find(&self, entry_threshold: f64, exit_threshold: f64) -> Option<&GridCell> {
        self.cells.iter().find(|c| {
            (c.entry_threshold - entry_threshold).abs() < 1e-12
                && (c.exit_threshold - exit_threshold).abs() < 1e-12
        })
    }
}

/// One unit of work: a grid cell over one game.
#[derive(Debug, Clone, Copy)]
struct Unit {
    cell: usize,
    game: usize,
    split: SplitName,
}

/// Grid search over pre-loaded feeds with an explicit probability source.
pub struct GridSearch<'a> {
    config: &'a GridSearchConfig,
    feeds: &'a [GameFeed],
    source: &'a dyn ProbabilitySource,
    manifest: &'a SplitManifest,
}

impl<'a> GridSearch<'a> {
    pub fn new(
        config: &'a GridSearchConfig,
        feeds: &'a [GameFeed],
        source: &'a dyn ProbabilitySource,
        manifest: &'a SplitManifest,
    ) -> Self {
        Self {
            config,
            feeds,
            source,
            manifest,
        }
    }

    /// Run the full grid.
    ///
    /// Configuration and split problems fail here, before the pool is built.
    /// Per-game failures are recorded in [`GridResults::excluded`].
    pub fn run(&self) -> Result<GridResults, SearchError> {
        self.config.validate()?;
        self.manifest.validate_against(self.feeds)?;

        let axes = GridAxes::from_config(self.config);
        let units = self.units(&axes);
        info!(
            cells = axes.len(),
            entries = axes.entry.len(),
            exits = axes.exit.len(),
            units = units.len(),
            workers = self.config.run.workers,
            "starting grid search"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.run.workers)
            .build()?;

        let outcomes: Vec<(Unit, Result<GameBacktest, RunError>)> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| (*unit, self.run_unit(&axes, unit)))
                .collect()
        });

        let results = self.merge(axes, outcomes)?;
        info!(
            cells = results.cells.len(),
            excluded = results.excluded_runs(),
            "grid search complete"
        );
        Ok(results)
    }

    fn units(&self, axes: &GridAxes) -> Vec<Unit> {
        let assignments = self.manifest.assignments();
        let assigned: Vec<(usize, SplitName)> = self
            .feeds
            .iter()
            .enumerate()
            .filter_map(|(i, f)| assignments.get(f.game_id.as_str()).map(|&s| (i, s)))
            .collect();

        let unassigned = self.feeds.len() - assigned.len();
        if unassigned > 0 {
            warn!(unassigned, "games not listed in the split manifest are ignored");
        }

        (0..axes.len())
            .flat_map(|cell| {
                assigned
                    .iter()
                    .map(move |&(game, split)| Unit { cell, game, split })
            })
            .collect()
    }

    fn run_unit(&self, axes: &GridAxes, unit: &Unit) -> Result<GameBacktest, RunError> {
        let (ei, xi) = axes.coords(unit.cell);
        let params = self.config.strategy.params(axes.entry[ei], axes.exit[xi]);
        run_game_backtest(&self.feeds[unit.game], self.source, &params)
    }

    /// Fold unit outcomes into cells. Single-threaded; independent of the
    /// order in which `outcomes` were produced.
    fn merge(
        &self,
        axes: GridAxes,
        outcomes: Vec<(Unit, Result<GameBacktest, RunError>)>,
    ) -> Result<GridResults, SearchError> {
        let total = outcomes.len();
        let mut buckets: HashMap<(usize, SplitName), Bucket> = HashMap::new();
        let mut excluded = Vec::new();

        for (unit, outcome) in outcomes {
            let bucket = buckets.entry((unit.cell, unit.split)).or_default();
            bucket.games += 1;
            match outcome {
                Ok(backtest) => bucket.trades.extend(backtest.trades),
                Err(e) => {
                    bucket.excluded += 1;
                    let (ei, xi) = axes.coords(unit.cell);
                    let game_id = self.feeds[unit.game].game_id.clone();
                    debug!(game_id = %game_id, error = %e, "excluding run");
                    excluded.push(ExcludedRun {
                        entry_threshold: axes.entry[ei],
                        exit_threshold: axes.exit[xi],
                        game_id,
                        split: unit.split,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if total > 0 && excluded.len() == total {
            return Err(SearchError::NothingAttempted {
                excluded: excluded.len(),
            });
        }
        if !excluded.is_empty() {
            warn!(
                excluded = excluded.len(),
                "some (game, combination) runs failed and were excluded"
            );
        }

        excluded.sort_by(|a, b| {
            a.game_id
                .cmp(&b.game_id)
                .then(a.entry_threshold.total_cmp(&b.entry_threshold))
                .then(a.exit_threshold.total_cmp(&b.exit_threshold))
        });

        let min_trades = self.config.selection.min_trades;
        let cells = (0..axes.len())
            .map(|idx| {
                let (ei, xi) = axes.coords(idx);
                let mut take = |split| {
                    let b = buckets.remove(&(idx, split)).unwrap_or_default();
                    SplitMetrics::compute(b.trades, b.games, b.excluded, min_trades)
                };
                GridCell {
                    entry_threshold: axes.entry[ei],
                    exit_threshold: axes.exit[xi],
                    train: take(SplitName::Train),
                    valid: take(SplitName::Valid),
                    test: take(SplitName::Test),
                }
            })
            .collect();

        Ok(GridResults {
            axes,
            cells,
            units: total,
            excluded,
        })
    }
}

#[derive(Debug, Default)]
struct Bucket {
    trades: Vec<Trade>,
    games: usize,
    excluded: usize,
}

/// Canonically sorted trades of one threshold pair over one split.
///
/// Used to export the selected configuration's trade tape. Games that fail
/// are skipped, matching their exclusion from the grid.
pub fn collect_trades(
    config: &GridSearchConfig,
    feeds: &[GameFeed],
    source: &dyn ProbabilitySource,
    manifest: &SplitManifest,
    split: SplitName,
    entry_threshold: f64,
    exit_threshold: f64,
) -> Vec<Trade> {
    let params = config.strategy.params(entry_threshold, exit_threshold);
    let wanted: std::collections::HashSet<&str> =
        manifest.ids(split).iter().map(String::as_str).collect();
    let mut trades: Vec<Trade> = feeds
        .iter()
        .filter(|f| wanted.contains(f.game_id.as_str()))
        .filter_map(|f| run_game_backtest(f, source, &params).ok())
        .flat_map(|b| b.trades)
        .collect();
    sort_canonical(&mut trades);
    trades
}
