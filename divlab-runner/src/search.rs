//! End-to-end search: grid → selection → stability, with optional caching.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use divlab_core::domain::GameFeed;
use divlab_core::fingerprint::dataset_hash;
use divlab_core::probability::ProbabilitySource;

use crate::cache::{cache_key, ResultCache};
use crate::config::GridSearchConfig;
use crate::grid::{ExcludedRun, GridAxes, GridCell, GridSearch, SearchError};
use crate::runner::SCHEMA_VERSION;
use crate::selection::{select, SelectionOutcome};
use crate::split::SplitManifest;
use crate::stability::StabilityReport;

/// Everything a search produces, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub schema_version: u32,
    pub cache_key: String,
    pub dataset_hash: String,
    pub config_fingerprint: String,
    pub manifest_hash: String,
    pub source_name: String,
    pub axes: GridAxes,
    pub cells: Vec<GridCell>,
    pub units: usize,
    pub excluded: Vec<ExcludedRun>,
    pub selection: SelectionOutcome,
    pub stability: StabilityReport,
}

impl SearchOutcome {
    pub fn excluded_runs(&self) -> usize {
        self.excluded.len()
    }
}

/// Run (or fetch from `cache`) a full search.
///
/// The same feeds, source, manifest, and result-determining config always
/// give the same outcome; worker count is not part of the key.
pub fn run_search(
    config: &GridSearchConfig,
    feeds: &[GameFeed],
    source: &dyn ProbabilitySource,
    manifest: &SplitManifest,
    cache: Option<&ResultCache>,
) -> Result<Arc<SearchOutcome>, SearchError> {
    config.validate()?;
    manifest.validate_against(feeds)?;

    let dataset = dataset_hash(feeds);
    let fingerprint = config.fingerprint()?;
    let manifest_hash = manifest.hash()?;
    let key = cache_key(&dataset, &fingerprint, &manifest_hash, &source.fingerprint());

    if let Some(cache) = cache {
        match cache.get(&key) {
            Ok(Some(hit)) => {
                info!(key = %key, "using cached search outcome");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "ignoring unreadable cache entry"),
        }
    }

    let grid = GridSearch::new(config, feeds, source, manifest).run()?;
    let selection = select(&grid.cells, &config.selection);
    match &selection {
        SelectionOutcome::Selected(r) => info!(
            entry = r.entry_threshold,
            exit = r.exit_threshold,
            train_rank = r.train_rank,
            valid_profit = r.valid.net_profit_dollars,
            method = %r.method,
            "selected thresholds"
        ),
        SelectionOutcome::NoValidSelection { reason, .. } => {
            warn!(reason = %reason, "no valid selection")
        }
    }
    let stability = StabilityReport::analyze(&grid.axes, &grid.cells, &config.stability);
    info!(
        plateau = ?stability.plateau.shape,
        spearman = ?stability.rank_stability.spearman,
        "stability analysis complete"
    );

    let outcome = SearchOutcome {
        schema_version: SCHEMA_VERSION,
        cache_key: key,
        dataset_hash: dataset,
        config_fingerprint: fingerprint,
        manifest_hash,
        source_name: source.name().to_string(),
        axes: grid.axes,
        cells: grid.cells,
        units: grid.units,
        excluded: grid.excluded,
        selection,
        stability,
    };

    match cache {
        Some(cache) => Ok(cache.put(outcome)?),
        None => Ok(Arc::new(outcome)),
    }
}
