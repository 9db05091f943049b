//! Reporting and export — JSON, CSV, and Markdown artifacts of a search.
//!
//! A search writes one directory:
//! - `grid_train.csv`, `grid_valid.csv`, `grid_test.csv`: one row per cell
//! - `split_manifest.json`: the game partition, reusable on re-runs
//! - `selection.json`: chosen thresholds with per-split metrics
//! - `stability.json`: profit-surface diagnostics
//! - `trades_selected.csv`: trade tape of the selected cell on every split
//! - `summary.md`: human-readable report
//!
//! All persisted JSON carries a `schema_version`. Newer versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use divlab_core::domain::Trade;

use crate::grid::GridCell;
use crate::runner::{GameMetrics, SCHEMA_VERSION};
use crate::search::SearchOutcome;
use crate::selection::{SelectionOutcome, SelectionRecord};
use crate::split::{SplitManifest, SplitName};
use crate::stability::StabilityReport;

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_selection_json(selection: &SelectionOutcome) -> Result<String> {
    let record = SelectionRecord::new(selection.clone());
    serde_json::to_string_pretty(&record).context("failed to serialize selection to JSON")
}

/// Parse a selection record, rejecting unknown schema versions.
pub fn import_selection_json(json: &str) -> Result<SelectionOutcome> {
    let record: SelectionRecord =
        serde_json::from_str(json).context("failed to deserialize selection from JSON")?;
    check_schema(record.schema_version)?;
    Ok(record.outcome)
}

pub fn export_stability_json(report: &StabilityReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize stability report to JSON")
}

pub fn import_stability_json(json: &str) -> Result<StabilityReport> {
    let report: StabilityReport =
        serde_json::from_str(json).context("failed to deserialize stability report from JSON")?;
    check_schema(report.schema_version)?;
    Ok(report)
}

fn check_schema(found: u32) -> Result<()> {
    if found > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            found,
            SCHEMA_VERSION
        );
    }
    Ok(())
}

// ─── CSV export ─────────────────────────────────────────────────────

/// One row per grid cell with that cell's metrics on `split`.
pub fn export_grid_csv(cells: &[GridCell], split: SplitName) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "entry_threshold",
        "exit_threshold",
        "net_profit_dollars",
        "num_trades",
        "win_rate",
        "profit_factor",
        "max_drawdown",
        "total_fees",
        "avg_hold_time",
        "is_valid",
        "games",
        "excluded_runs",
    ])?;

    for cell in cells {
        let m = cell.metrics(split);
        wtr.write_record([
            &format!("{:.4}", cell.entry_threshold),
            &format!("{:.4}", cell.exit_threshold),
            &format!("{:.4}", m.net_profit_dollars),
            &m.num_trades.to_string(),
            &format!("{:.4}", m.win_rate),
            &format!("{:.4}", m.profit_factor),
            &format!("{:.4}", m.max_drawdown),
            &format!("{:.4}", m.total_fees),
            &format!("{:.1}", m.avg_hold_time),
            &m.is_valid.to_string(),
            &m.games.to_string(),
            &m.excluded_runs.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Trade tape in the order given.
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "game_id",
        "game_date",
        "side",
        "entry_time",
        "entry_price",
        "entry_prob",
        "entry_divergence",
        "exit_time",
        "exit_price",
        "exit_reason",
        "contracts",
        "gross_pnl",
        "fees",
        "pnl_dollars",
        "hold_seconds",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.game_id,
            &t.game_date.to_string(),
            t.side.as_str(),
            &t.entry_time.to_string(),
            &format!("{:.4}", t.entry_price),
            &format!("{:.4}", t.entry_prob),
            &format!("{:.4}", t.entry_divergence),
            &t.exit_time.to_string(),
            &format!("{:.4}", t.exit_price),
            t.exit_reason.as_str(),
            &format!("{:.2}", t.contracts),
            &format!("{:.4}", t.gross_pnl),
            &format!("{:.4}", t.fees),
            &format!("{:.4}", t.pnl_dollars),
            &t.hold_seconds.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Per-game results of a single threshold pair.
pub fn export_game_metrics_csv(games: &[GameMetrics]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "game_id",
        "game_date",
        "net_profit_dollars",
        "num_trades",
        "wins",
        "losses",
        "win_rate",
        "avg_hold_seconds",
        "max_drawdown",
        "total_fees",
        "valid_snapshots",
        "skipped_snapshots",
    ])?;
    for g in games {
        wtr.write_record([
            &g.game_id,
            &g.game_date.to_string(),
            &format!("{:.4}", g.net_profit_dollars),
            &g.num_trades.to_string(),
            &g.wins.to_string(),
            &g.losses.to_string(),
            &format!("{:.4}", g.win_rate),
            &format!("{:.1}", g.avg_hold_seconds),
            &format!("{:.4}", g.max_drawdown),
            &format!("{:.4}", g.total_fees),
            &g.valid_snapshots.to_string(),
            &g.skipped_snapshots.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write the full artifact set of a search into `output_dir`.
///
/// `trades` is the selected cell's trade tape (empty when nothing was
/// selected). Returns `output_dir`.
pub fn save_artifacts(
    outcome: &SearchOutcome,
    manifest: &SplitManifest,
    trades: &[Trade],
    output_dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;

    for split in SplitName::ALL {
        let csv = export_grid_csv(&outcome.cells, split)?;
        write(output_dir, &format!("grid_{split}.csv"), &csv)?;
    }

    let manifest_json = manifest
        .to_json()
        .context("failed to serialize split manifest")?;
    write(output_dir, "split_manifest.json", &manifest_json)?;
    write(
        output_dir,
        "selection.json",
        &export_selection_json(&outcome.selection)?,
    )?;
    write(
        output_dir,
        "stability.json",
        &export_stability_json(&outcome.stability)?,
    )?;
    write(output_dir, "trades_selected.csv", &export_trades_csv(trades)?)?;
    write(output_dir, "summary.md", &generate_summary(outcome, manifest))?;

    Ok(output_dir.to_path_buf())
}

fn write(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
}

// ─── Markdown summary ───────────────────────────────────────────────

pub fn generate_summary(outcome: &SearchOutcome, manifest: &SplitManifest) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Threshold Grid Search\n\n");

    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Probability Source | {} |\n", outcome.source_name));
    md.push_str(&format!(
        "| Grid | {} entry x {} exit = {} cells |\n",
        outcome.axes.entry.len(),
        outcome.axes.exit.len(),
        outcome.cells.len()
    ));
    md.push_str(&format!(
        "| Games | {} train / {} valid / {} test |\n",
        manifest.train.len(),
        manifest.valid.len(),
        manifest.test.len()
    ));
    md.push_str(&format!(
        "| Excluded Runs | {} of {} |\n",
        outcome.excluded_runs(),
        outcome.units
    ));
    md.push_str(&format!("| Dataset Hash | {} |\n", outcome.dataset_hash));
    md.push_str(&format!("| Split Manifest Hash | {} |\n", outcome.manifest_hash));
    md.push('\n');

    md.push_str("## Selection\n\n");
    match &outcome.selection {
        SelectionOutcome::Selected(r) => {
            md.push_str(&format!(
                "Method `{}` chose entry **{:.4}**, exit **{:.4}** (train rank {}).\n\n",
                r.method, r.entry_threshold, r.exit_threshold, r.train_rank
            ));
            md.push_str("| Split | Net Profit | Trades | Win Rate | Profit Factor | Max DD | Fees |\n");
            md.push_str("| --- | --- | --- | --- | --- | --- | --- |\n");
            for (name, m) in [("train", &r.train), ("valid", &r.valid), ("test", &r.test)] {
                md.push_str(&format!(
                    "| {} | ${:.2} | {} | {:.1}% | {:.2} | ${:.2} | ${:.2} |\n",
                    name,
                    m.net_profit_dollars,
                    m.num_trades,
                    m.win_rate * 100.0,
                    m.profit_factor,
                    m.max_drawdown,
                    m.total_fees
                ));
            }
        }
        SelectionOutcome::NoValidSelection { method, reason, .. } => {
            md.push_str(&format!("**No valid selection** (`{method}`): {reason}\n"));
        }
    }
    md.push('\n');

    let s = &outcome.stability;
    md.push_str("## Stability\n\n");
    md.push_str(&format!("Analysed split: {}\n\n", s.split));
    md.push_str("| Check | Result |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!(
        "| Profitable Cells | {} |\n",
        s.boundary.profitable_cells
    ));
    if let (Some(e), Some(x)) = (&s.boundary.entry, &s.boundary.exit) {
        md.push_str(&format!(
            "| Profitable Region | entry {:.4}-{:.4}, exit {:.4}-{:.4} |\n",
            e.min, e.max, x.min, x.max
        ));
    }
    if let Some(p) = &s.entry_profile {
        md.push_str(&format!(
            "| Entry Axis | {:?} (exit held at {:.4}) |\n",
            p.classification, p.held_at
        ));
    }
    if let Some(p) = &s.exit_profile {
        md.push_str(&format!(
            "| Exit Axis | {:?} (entry held at {:.4}) |\n",
            p.classification, p.held_at
        ));
    }
    md.push_str(&format!(
        "| Peak | {:?}, {} cell(s) within tolerance |\n",
        s.plateau.shape, s.plateau.size
    ));
    let rho = s
        .rank_stability
        .spearman
        .map_or_else(|| "n/a".to_string(), |r| format!("{r:.3}"));
    md.push_str(&format!(
        "| Train/Valid Spearman (top {}) | {} ({}) |\n",
        s.rank_stability.compared,
        rho,
        if s.rank_stability.stable {
            "stable"
        } else {
            "overfitting risk"
        }
    ));
    md.push_str(&format!(
        "| Top-K Overlap | {} |\n",
        s.rank_stability.top_k_overlap
    ));
    md.push('\n');

    if !outcome.excluded.is_empty() {
        md.push_str("## Excluded Runs\n\n");
        let mut games: Vec<&str> = outcome.excluded.iter().map(|x| x.game_id.as_str()).collect();
        games.dedup();
        for g in games {
            md.push_str(&format!("- {g}\n"));
        }
        md.push('\n');
    }

    md
}
