//! Stability analysis of the profit surface.
//!
//! Post-processes a finished grid:
//! - where the profitable region lies on each axis
//! - whether profit is monotonic along each axis through the optimum
//! - whether the optimum sits on a broad plateau or a sharp peak
//! - whether the train ranking agrees with the valid ranking (Spearman)

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::StabilityConfig;
use crate::grid::{GridAxes, GridCell};
use crate::runner::SCHEMA_VERSION;
use crate::selection::train_ranking;
use crate::split::SplitName;

/// Inclusive range of axis values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// Bounding box of the profitable cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitBoundary {
    pub profitable_cells: usize,
    pub entry: Option<AxisRange>,
    pub exit: Option<AxisRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monotonicity {
    MonotonicIncreasing,
    MonotonicDecreasing,
    NonMonotonic,
}

/// Profit along one axis with the other held at the optimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisProfile {
    /// Value of the other axis the profile was taken at.
    pub held_at: f64,
    pub values: Vec<f64>,
    pub profits: Vec<f64>,
    pub classification: Monotonicity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakShape {
    BroadPlateau,
    SharpPeak,
    NoProfitablePeak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plateau {
    pub peak_entry: f64,
    pub peak_exit: f64,
    pub peak_profit: f64,
    /// Profit floor for membership.
    pub floor: f64,
    pub size: usize,
    pub entry: Option<AxisRange>,
    pub exit: Option<AxisRange>,
    pub shape: PeakShape,
}

/// Train-vs-valid agreement over the top-K train cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankStability {
    pub top_k: usize,
    /// Cells actually compared (fewer than `top_k` on small grids).
    pub compared: usize,
    /// `None` when fewer than two cells are compared or ranks are constant.
    pub spearman: Option<f64>,
    pub stable: bool,
    /// Cells present in both the train and the valid top-K lists.
    pub top_k_overlap: usize,
}

/// Persisted stability report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub schema_version: u32,
    pub split: SplitName,
    pub boundary: ProfitBoundary,
    /// `None` when the grid is empty.
    pub entry_profile: Option<AxisProfile>,
    pub exit_profile: Option<AxisProfile>,
    pub plateau: Plateau,
    pub rank_stability: RankStability,
}

impl StabilityReport {
    /// Analyse `cells` (row-major over `axes`).
    pub fn analyze(axes: &GridAxes, cells: &[GridCell], config: &StabilityConfig) -> Self {
        let split = config.split;
        let profits: Vec<f64> = cells
            .iter()
            .map(|c| c.metrics(split).net_profit_dollars)
            .collect();
        let eligible = eligible_mask(cells, split);
        let peak = peak_index(&profits, &eligible);

        Self {
            schema_version: SCHEMA_VERSION,
            split,
            boundary: profit_boundary(axes, &profits),
            entry_profile: peak.map(|p| entry_profile(axes, &profits, p)),
            exit_profile: peak.map(|p| exit_profile(axes, &profits, p)),
            plateau: plateau(axes, &profits, &eligible, peak, config),
            rank_stability: rank_stability(cells, config),
        }
    }

    pub fn is_stable(&self) -> bool {
        self.rank_stability.stable
    }
}

/// Cells valid on `split`; every cell when none is.
fn eligible_mask(cells: &[GridCell], split: SplitName) -> Vec<bool> {
    let mask: Vec<bool> = cells.iter().map(|c| c.metrics(split).is_valid).collect();
    if mask.iter().any(|&v| v) {
        mask
    } else {
        vec![true; cells.len()]
    }
}

/// Highest-profit eligible cell; ties go to the lowest index.
fn peak_index(profits: &[f64], eligible: &[bool]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &p) in profits.iter().enumerate() {
        if !eligible[i] {
            continue;
        }
        if best.map_or(true, |b| p > profits[b]) {
            best = Some(i);
        }
    }
    best
}

// ─── Profit boundary ─────────────────────────────────────────────────

pub fn profit_boundary(axes: &GridAxes, profits: &[f64]) -> ProfitBoundary {
    let mut entries = Vec::new();
    let mut exits = Vec::new();
    for (i, &p) in profits.iter().enumerate() {
        if p > 0.0 {
            let (ei, xi) = axes.coords(i);
            entries.push(axes.entry[ei]);
            exits.push(axes.exit[xi]);
        }
    }
    ProfitBoundary {
        profitable_cells: entries.len(),
        entry: axis_range(&entries),
        exit: axis_range(&exits),
    }
}

fn axis_range(values: &[f64]) -> Option<AxisRange> {
    let min = values.iter().copied().reduce(f64::min)?;
    let max = values.iter().copied().reduce(f64::max)?;
    Some(AxisRange { min, max })
}

// ─── Monotonicity ────────────────────────────────────────────────────

/// A constant (or single-point) series counts as increasing.
pub fn classify_monotonicity(series: &[f64]) -> Monotonicity {
    let non_decreasing = series.windows(2).all(|w| w[1] >= w[0]);
    if non_decreasing {
        return Monotonicity::MonotonicIncreasing;
    }
    let non_increasing = series.windows(2).all(|w| w[1] <= w[0]);
    if non_increasing {
        Monotonicity::MonotonicDecreasing
    } else {
        Monotonicity::NonMonotonic
    }
}

fn entry_profile(axes: &GridAxes, profits: &[f64], peak: usize) -> AxisProfile {
    let (_, xi) = axes.coords(peak);
    let series: Vec<f64> = (0..axes.entry.len())
        .map(|ei| profits[axes.index(ei, xi)])
        .collect();
    AxisProfile {
        held_at: axes.exit[xi],
        values: axes.entry.clone(),
        classification: classify_monotonicity(&series),
        profits: series,
    }
}

fn exit_profile(axes: &GridAxes, profits: &[f64], peak: usize) -> AxisProfile {
    let (ei, _) = axes.coords(peak);
    let series: Vec<f64> = (0..axes.exit.len())
        .map(|xi| profits[axes.index(ei, xi)])
        .collect();
    AxisProfile {
        held_at: axes.entry[ei],
        values: axes.exit.clone(),
        classification: classify_monotonicity(&series),
        profits: series,
    }
}

// ─── Plateau ─────────────────────────────────────────────────────────

fn plateau(
    axes: &GridAxes,
    profits: &[f64],
    eligible: &[bool],
    peak: Option<usize>,
    config: &StabilityConfig,
) -> Plateau {
    let Some(peak) = peak else {
        return Plateau {
            peak_entry: 0.0,
            peak_exit: 0.0,
            peak_profit: 0.0,
            floor: 0.0,
            size: 0,
            entry: None,
            exit: None,
            shape: PeakShape::NoProfitablePeak,
        };
    };
    let (pe, px) = axes.coords(peak);
    let peak_profit = profits[peak];
    let floor = peak_profit - config.plateau_tolerance * peak_profit.abs();

    let mut plateau = Plateau {
        peak_entry: axes.entry[pe],
        peak_exit: axes.exit[px],
        peak_profit,
        floor,
        size: 0,
        entry: None,
        exit: None,
        shape: PeakShape::NoProfitablePeak,
    };
    if peak_profit <= 0.0 {
        return plateau;
    }

    let members = flood_fill(axes, peak, |i| eligible[i] && profits[i] >= floor);
    let (entries, exits): (Vec<f64>, Vec<f64>) = members
        .iter()
        .map(|&i| {
            let (ei, xi) = axes.coords(i);
            (axes.entry[ei], axes.exit[xi])
        })
        .unzip();

    plateau.size = members.len();
    plateau.entry = axis_range(&entries);
    plateau.exit = axis_range(&exits);
    plateau.shape = if members.len() >= config.min_plateau_size {
        PeakShape::BroadPlateau
    } else {
        PeakShape::SharpPeak
    };
    plateau
}

/// 4-connected region around `start` of cells satisfying `member`.
fn flood_fill(axes: &GridAxes, start: usize, member: impl Fn(usize) -> bool) -> Vec<usize> {
    let rows = axes.entry.len();
    let cols = axes.exit.len();
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    let mut out = Vec::new();

    while let Some(i) = queue.pop_front() {
        out.push(i);
        let (r, c) = axes.coords(i);
        let mut neighbours = Vec::with_capacity(4);
        if r > 0 {
            neighbours.push(axes.index(r - 1, c));
        }
        if r + 1 < rows {
            neighbours.push(axes.index(r + 1, c));
        }
        if c > 0 {
            neighbours.push(axes.index(r, c - 1));
        }
        if c + 1 < cols {
            neighbours.push(axes.index(r, c + 1));
        }
        for n in neighbours {
            if member(n) && seen.insert(n) {
                queue.push_back(n);
            }
        }
    }
    out.sort_unstable();
    out
}

// ─── Rank stability ──────────────────────────────────────────────────

fn rank_stability(cells: &[GridCell], config: &StabilityConfig) -> RankStability {
    let top: Vec<&GridCell> = train_ranking(cells).into_iter().take(config.top_k).collect();
    let train: Vec<f64> = top.iter().map(|c| c.train.net_profit_dollars).collect();
    let valid: Vec<f64> = top.iter().map(|c| c.valid.net_profit_dollars).collect();
    let spearman = spearman(&train, &valid);

    let key = |c: &GridCell| (c.entry_threshold.to_bits(), c.exit_threshold.to_bits());
    let train_top: HashSet<_> = top.iter().map(|c| key(c)).collect();
    let mut by_valid: Vec<&GridCell> = cells.iter().filter(|c| c.valid.is_valid).collect();
    by_valid.sort_by(|a, b| {
        b.valid
            .net_profit_dollars
            .total_cmp(&a.valid.net_profit_dollars)
            .then(a.entry_threshold.total_cmp(&b.entry_threshold))
            .then(a.exit_threshold.total_cmp(&b.exit_threshold))
    });
    let top_k_overlap = by_valid
        .iter()
        .take(config.top_k)
        .filter(|c| train_top.contains(&key(c)))
        .count();

    RankStability {
        top_k: config.top_k,
        compared: top.len(),
        spearman,
        stable: spearman.is_some_and(|rho| rho >= config.stable_correlation),
        top_k_overlap,
    }
}

/// Spearman rank correlation with average ranks for ties.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Positions i..=j share the mean of ranks i+1..=j+1.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx < 1e-15 || syy < 1e-15 {
        return None;
    }
    Some(sxy / (sxx.sqrt() * syy.sqrt()))
}
