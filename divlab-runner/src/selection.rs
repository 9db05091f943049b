//! Selection protocol: rank on train, shortlist the top N, pick on valid.
//!
//! Test metrics are carried into the result for reporting only; nothing in
//! this module reads them when choosing.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::SelectionConfig;
use crate::grid::GridCell;
use crate::metrics::SplitMetrics;
use crate::runner::SCHEMA_VERSION;

/// Metric compared on the valid split among the train shortlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidMetric {
    #[default]
    NetProfit,
    ProfitFactor,
    WinRate,
}

impl ValidMetric {
    pub fn value(self, metrics: &SplitMetrics) -> f64 {
        match self {
            ValidMetric::NetProfit => metrics.net_profit_dollars,
            ValidMetric::ProfitFactor => metrics.profit_factor,
            ValidMetric::WinRate => metrics.win_rate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidMetric::NetProfit => "net_profit",
            ValidMetric::ProfitFactor => "profit_factor",
            ValidMetric::WinRate => "win_rate",
        }
    }
}

/// Name recorded with every selection, e.g. `best_on_valid_among_top_10_train`.
pub fn method_name(config: &SelectionConfig) -> String {
    match config.valid_metric {
        ValidMetric::NetProfit => format!("best_on_valid_among_top_{}_train", config.top_n),
        other => format!(
            "best_{}_on_valid_among_top_{}_train",
            other.as_str(),
            config.top_n
        ),
    }
}

/// The chosen threshold pair with its metrics on every split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub method: String,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    /// 1-based position of the chosen cell in the train ranking.
    pub train_rank: usize,
    pub train: SplitMetrics,
    pub valid: SplitMetrics,
    pub test: SplitMetrics,
}

/// Outcome of the protocol. A grid with no usable cell reports why instead of
/// silently choosing an invalid one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SelectionOutcome {
    Selected(SelectionResult),
    NoValidSelection {
        method: String,
        reason: String,
        /// Cells valid on train that made the shortlist.
        candidates_considered: usize,
    },
}

impl SelectionOutcome {
    pub fn selected(&self) -> Option<&SelectionResult> {
        match self {
            SelectionOutcome::Selected(r) => Some(r),
            SelectionOutcome::NoValidSelection { .. } => None,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            SelectionOutcome::Selected(r) => &r.method,
            SelectionOutcome::NoValidSelection { method, .. } => method,
        }
    }
}

/// Persisted selection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub schema_version: u32,
    #[serde(flatten)]
    pub outcome: SelectionOutcome,
}

impl SelectionRecord {
    pub fn new(outcome: SelectionOutcome) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            outcome,
        }
    }
}

/// Cells valid on train, ordered best first.
///
/// Net profit descending; ties broken by (entry, exit) ascending so the order
/// is total and independent of grid layout.
pub fn train_ranking(cells: &[GridCell]) -> Vec<&GridCell> {
    let mut ranked: Vec<&GridCell> = cells.iter().filter(|c| c.train.is_valid).collect();
    ranked.sort_by(|a, b| {
        b.train
            .net_profit_dollars
            .total_cmp(&a.train.net_profit_dollars)
            .then_with(|| threshold_order(a, b))
    });
    ranked
}

fn threshold_order(a: &GridCell, b: &GridCell) -> Ordering {
    a.entry_threshold
        .total_cmp(&b.entry_threshold)
        .then(a.exit_threshold.total_cmp(&b.exit_threshold))
}

/// Run the protocol over a finished grid.
pub fn select(cells: &[GridCell], config: &SelectionConfig) -> SelectionOutcome {
    let method = method_name(config);
    let ranked = train_ranking(cells);
    if ranked.is_empty() {
        return SelectionOutcome::NoValidSelection {
            method,
            reason: format!(
                "no combination has at least {} trade(s) on the train split",
                config.min_trades.max(1)
            ),
            candidates_considered: 0,
        };
    }

    let shortlist = &ranked[..ranked.len().min(config.top_n)];
    let metric = config.valid_metric;

    // Earlier shortlist position wins ties, so iterate in rank order and only
    // replace on a strictly better valid score.
    let mut best: Option<(usize, &GridCell)> = None;
    for (i, cell) in shortlist.iter().enumerate() {
        if !cell.valid.is_valid {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, current)) => metric.value(&cell.valid) > metric.value(&current.valid),
        };
        if better {
            best = Some((i, cell));
        }
    }

    match best {
        Some((i, cell)) => SelectionOutcome::Selected(SelectionResult {
            method,
            entry_threshold: cell.entry_threshold,
            exit_threshold: cell.exit_threshold,
            train_rank: i + 1,
            train: cell.train.clone(),
            valid: cell.valid.clone(),
            test: cell.test.clone(),
        }),
        None => SelectionOutcome::NoValidSelection {
            method,
            reason: format!(
                "none of the top {} train combination(s) has at least {} trade(s) on the valid split",
                shortlist.len(),
                config.min_trades.max(1)
            ),
            candidates_considered: shortlist.len(),
        },
    }
}
