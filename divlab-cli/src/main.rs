//! divlab CLI — threshold grid search, single backtests, and game splits.
//!
//! Commands:
//! - `search`: full grid search with train/valid/test selection and artifacts
//! - `backtest`: one threshold pair over every (or one) game
//! - `split`: write a reusable game-split manifest

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use divlab_core::domain::Trade;
use divlab_core::fees::FeeModel;
use divlab_core::probability::{FeedProbability, PlattCalibrated, ProbabilitySource};
use divlab_runner::export::{export_game_metrics_csv, export_trades_csv, save_artifacts};
use divlab_runner::{
    collect_trades, load_probabilities, load_snapshots, run_game_backtest, run_search,
    GridSearchConfig, LoadedSnapshots, ResultCache, SearchOutcome, SelectionOutcome,
    SplitManifest, SplitMethod, SplitMetrics, SplitName,
};

#[derive(Parser)]
#[command(
    name = "divlab",
    about = "divlab: divergence backtester and threshold grid search"
)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grid-search entry/exit thresholds and select on train → valid.
    Search(SearchArgs),
    /// Backtest one threshold pair.
    Backtest(BacktestArgs),
    /// Generate and save a game-split manifest.
    Split(SplitArgs),
}

/// Where snapshots and forecasts come from.
#[derive(Args)]
struct DataArgs {
    /// Aligned snapshot CSV.
    #[arg(long)]
    snapshots: PathBuf,

    /// Model probability CSV (game_id, timestamp, probability). Defaults to
    /// the snapshot's own home_prob.
    #[arg(long)]
    probabilities: Option<PathBuf>,

    /// Platt slope applied to the probability source.
    #[arg(long, requires = "platt_b")]
    platt_a: Option<f64>,

    /// Platt intercept applied to the probability source.
    #[arg(long, requires = "platt_a")]
    platt_b: Option<f64>,
}

/// Strategy settings shared by `search` and `backtest`.
#[derive(Args)]
struct StrategyArgs {
    /// TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable fees.
    #[arg(long, default_value_t = false)]
    no_fees: bool,

    /// Minimum seconds a position is held before a divergence exit.
    #[arg(long)]
    min_hold_seconds: Option<i64>,

    /// Contracts per trade.
    #[arg(long)]
    contracts: Option<f64>,
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    strategy: StrategyArgs,

    #[arg(long)]
    entry_min: Option<f64>,
    #[arg(long)]
    entry_max: Option<f64>,
    #[arg(long)]
    entry_step: Option<f64>,
    #[arg(long)]
    exit_min: Option<f64>,
    #[arg(long)]
    exit_max: Option<f64>,
    #[arg(long)]
    exit_step: Option<f64>,

    /// Worker threads. Defaults to available cores.
    #[arg(long)]
    workers: Option<usize>,

    /// Split seed (ignored with --split-manifest).
    #[arg(long)]
    seed: Option<u64>,

    /// Reuse an existing split manifest for a reproducible partition.
    #[arg(long)]
    split_manifest: Option<PathBuf>,

    /// Directory for cached search outcomes.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Output directory for artifacts.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,
}

#[derive(Args)]
struct BacktestArgs {
    #[command(flatten)]
    data: DataArgs,

    #[command(flatten)]
    strategy: StrategyArgs,

    /// Entry threshold.
    #[arg(long)]
    entry: f64,

    /// Exit threshold.
    #[arg(long)]
    exit: f64,

    /// Run only this game.
    #[arg(long)]
    game: Option<String>,

    /// Write trades.csv and games.csv here.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct SplitArgs {
    /// Aligned snapshot CSV.
    #[arg(long)]
    snapshots: PathBuf,

    /// TOML config file; its [split] section supplies defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// random or chronological.
    #[arg(long)]
    method: Option<String>,

    /// Manifest path to write.
    #[arg(long, default_value = "split_manifest.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Search(args) => run_search_cmd(args),
        Commands::Backtest(args) => run_backtest_cmd(args),
        Commands::Split(args) => run_split_cmd(args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        "info,divlab_runner=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ─── Shared setup ────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<GridSearchConfig> {
    match path {
        Some(p) => GridSearchConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(GridSearchConfig::default()),
    }
}

fn apply_strategy_overrides(cfg: &mut GridSearchConfig, args: &StrategyArgs) {
    if args.no_fees {
        cfg.strategy.fees = FeeModel::None;
    }
    if let Some(h) = args.min_hold_seconds {
        cfg.strategy.min_hold_seconds = h;
    }
    if let Some(c) = args.contracts {
        cfg.strategy.contracts = c;
    }
}

fn load_feeds(path: &Path) -> Result<LoadedSnapshots> {
    let loaded = load_snapshots(path)
        .with_context(|| format!("failed to load snapshots from {}", path.display()))?;
    if loaded.feeds.is_empty() {
        bail!("no games found in {}", path.display());
    }
    info!(
        games = loaded.feeds.len(),
        snapshots = loaded.total_snapshots(),
        malformed = loaded.malformed_rows,
        away_rows = loaded.away_rows,
        "loaded snapshots"
    );
    Ok(loaded)
}

fn build_source(data: &DataArgs) -> Result<Box<dyn ProbabilitySource>> {
    let platt = data.platt_a.zip(data.platt_b);
    let source: Box<dyn ProbabilitySource> = match (&data.probabilities, platt) {
        (None, None) => Box::new(FeedProbability),
        (None, Some((a, b))) => Box::new(PlattCalibrated::new(FeedProbability, a, b)),
        (Some(path), platt) => {
            let model = load_probabilities(path)
                .with_context(|| format!("failed to load probabilities from {}", path.display()))?;
            match platt {
                Some((a, b)) => Box::new(PlattCalibrated::new(model, a, b)),
                None => Box::new(model),
            }
        }
    };
    info!(source = source.name(), "probability source");
    Ok(source)
}

// ─── search ──────────────────────────────────────────────────────────

fn run_search_cmd(args: SearchArgs) -> Result<()> {
    let mut cfg = load_config(args.strategy.config.as_deref())?;
    apply_strategy_overrides(&mut cfg, &args.strategy);
    let grid = &mut cfg.grid;
    for (slot, value) in [
        (&mut grid.entry.min, args.entry_min),
        (&mut grid.entry.max, args.entry_max),
        (&mut grid.entry.step, args.entry_step),
        (&mut grid.exit.min, args.exit_min),
        (&mut grid.exit.max, args.exit_max),
        (&mut grid.exit.step, args.exit_step),
    ] {
        if let Some(v) = value {
            *slot = v;
        }
    }
    if let Some(w) = args.workers {
        cfg.run.workers = w;
    }
    if let Some(s) = args.seed {
        cfg.split.seed = s;
    }
    cfg.validate().context("invalid configuration")?;

    let loaded = load_feeds(&args.data.snapshots)?;
    let source = build_source(&args.data)?;

    let manifest = match &args.split_manifest {
        Some(path) => {
            let m = SplitManifest::load(path)
                .with_context(|| format!("failed to load split manifest {}", path.display()))?;
            if !m.dataset_hash.is_empty() && m.dataset_hash != loaded.dataset_hash {
                warn!("split manifest was generated from a different dataset");
            }
            m
        }
        None => SplitManifest::generate(&loaded.feeds, &cfg.split, &loaded.dataset_hash)
            .context("failed to split games")?,
    };

    let cache = args
        .cache_dir
        .as_deref()
        .map(ResultCache::with_dir)
        .transpose()
        .context("failed to open result cache")?;

    let outcome = run_search(&cfg, &loaded.feeds, source.as_ref(), &manifest, cache.as_ref())?;

    let trades: Vec<Trade> = match outcome.selection.selected() {
        Some(sel) => SplitName::ALL
            .iter()
            .flat_map(|&split| {
                collect_trades(
                    &cfg,
                    &loaded.feeds,
                    source.as_ref(),
                    &manifest,
                    split,
                    sel.entry_threshold,
                    sel.exit_threshold,
                )
            })
            .collect(),
        None => Vec::new(),
    };

    print_summary(&outcome, &manifest);

    let dir = save_artifacts(&outcome, &manifest, &trades, &args.output_dir)?;
    println!("Artifacts saved to: {}", dir.display());
    Ok(())
}

fn print_summary(outcome: &SearchOutcome, manifest: &SplitManifest) {
    println!();
    println!("=== Grid Search ===");
    println!("Source:         {}", outcome.source_name);
    println!(
        "Grid:           {} x {} = {} cells",
        outcome.axes.entry.len(),
        outcome.axes.exit.len(),
        outcome.cells.len()
    );
    println!(
        "Games:          {} train / {} valid / {} test",
        manifest.train.len(),
        manifest.valid.len(),
        manifest.test.len()
    );
    println!(
        "Excluded runs:  {} of {}",
        outcome.excluded_runs(),
        outcome.units
    );
    println!();

    match &outcome.selection {
        SelectionOutcome::Selected(r) => {
            println!("--- Selection ({}) ---", r.method);
            println!("Entry:          {:.4}", r.entry_threshold);
            println!("Exit:           {:.4}", r.exit_threshold);
            println!("Train rank:     {}", r.train_rank);
            println!();
            println!(
                "{:<6} {:>12} {:>7} {:>9} {:>8} {:>10}",
                "Split", "Net $", "Trades", "Win Rate", "PF", "Max DD $"
            );
            println!("{}", "-".repeat(57));
            for (name, m) in [("train", &r.train), ("valid", &r.valid), ("test", &r.test)] {
                print_metrics_row(name, m);
            }
        }
        SelectionOutcome::NoValidSelection { method, reason, .. } => {
            println!("--- Selection ({method}) ---");
            println!("No valid selection: {reason}");
        }
    }

    let s = &outcome.stability;
    println!();
    println!("--- Stability ({} split) ---", s.split);
    println!("Profitable:     {} cell(s)", s.boundary.profitable_cells);
    println!(
        "Peak:           {:?} ({} cell(s))",
        s.plateau.shape, s.plateau.size
    );
    match s.rank_stability.spearman {
        Some(rho) => println!(
            "Spearman:       {rho:.3} over top {} ({})",
            s.rank_stability.compared,
            if s.is_stable() { "stable" } else { "overfitting risk" }
        ),
        None => println!("Spearman:       n/a"),
    }
    println!();
}

fn print_metrics_row(name: &str, m: &SplitMetrics) {
    println!(
        "{:<6} {:>12.2} {:>7} {:>8.1}% {:>8.2} {:>10.2}",
        name,
        m.net_profit_dollars,
        m.num_trades,
        m.win_rate * 100.0,
        m.profit_factor,
        m.max_drawdown
    );
}

// ─── backtest ────────────────────────────────────────────────────────

fn run_backtest_cmd(args: BacktestArgs) -> Result<()> {
    let mut cfg = load_config(args.strategy.config.as_deref())?;
    apply_strategy_overrides(&mut cfg, &args.strategy);
    let params = cfg.strategy.params(args.entry, args.exit);
    params.validate().context("invalid strategy parameters")?;

    let loaded = load_feeds(&args.data.snapshots)?;
    let source = build_source(&args.data)?;

    let feeds: Vec<_> = match &args.game {
        Some(id) => {
            let selected: Vec<_> = loaded.feeds.iter().filter(|f| &f.game_id == id).collect();
            if selected.is_empty() {
                bail!("game '{id}' not found");
            }
            selected
        }
        None => loaded.feeds.iter().collect(),
    };

    let mut games = Vec::with_capacity(feeds.len());
    let mut trades = Vec::new();
    let mut excluded = 0usize;
    for feed in &feeds {
        match run_game_backtest(feed, source.as_ref(), &params) {
            Ok(bt) => {
                games.push(bt.metrics);
                trades.extend(bt.trades);
            }
            Err(e) => {
                excluded += 1;
                warn!(game_id = %feed.game_id, error = %e, "game excluded");
            }
        }
    }

    let total = SplitMetrics::compute(trades.clone(), feeds.len(), excluded, cfg.selection.min_trades);

    println!();
    println!("=== Backtest (entry {:.4}, exit {:.4}) ===", args.entry, args.exit);
    println!(
        "{:<16} {:>10} {:>7} {:>9} {:>10} {:>8}",
        "Game", "Net $", "Trades", "Win Rate", "Max DD $", "Skipped"
    );
    println!("{}", "-".repeat(65));
    for g in &games {
        println!(
            "{:<16} {:>10.2} {:>7} {:>8.1}% {:>10.2} {:>8}",
            g.game_id,
            g.net_profit_dollars,
            g.num_trades,
            g.win_rate * 100.0,
            g.max_drawdown,
            g.skipped_snapshots
        );
    }
    println!();
    println!("Games:          {} ({} excluded)", total.games, total.excluded_runs);
    println!("Trades:         {}", total.num_trades);
    println!("Net Profit:     ${:.2}", total.net_profit_dollars);
    println!("Fees:           ${:.2}", total.total_fees);
    println!("Win Rate:       {:.1}%", total.win_rate * 100.0);
    println!("Profit Factor:  {:.2}", total.profit_factor);
    println!("Max Drawdown:   ${:.2}", total.max_drawdown);
    println!("Avg Hold:       {:.0}s", total.avg_hold_time);
    println!();

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
        let mut sorted = trades;
        divlab_core::domain::sort_canonical(&mut sorted);
        std::fs::write(dir.join("trades.csv"), export_trades_csv(&sorted)?)?;
        std::fs::write(dir.join("games.csv"), export_game_metrics_csv(&games)?)?;
        println!("Artifacts saved to: {}", dir.display());
    }
    Ok(())
}

// ─── split ───────────────────────────────────────────────────────────

fn run_split_cmd(args: SplitArgs) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let mut split = cfg.split;
    if let Some(seed) = args.seed {
        split.seed = seed;
    }
    if let Some(method) = &args.method {
        split.method = match method.as_str() {
            "random" => SplitMethod::Random,
            "chronological" => SplitMethod::Chronological,
            other => bail!("unknown split method '{other}'. Valid: random, chronological"),
        };
    }

    let loaded = load_feeds(&args.snapshots)?;
    let manifest = SplitManifest::generate(&loaded.feeds, &split, &loaded.dataset_hash)
        .context("failed to split games")?;
    manifest
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!(
        "Split {} games: {} train / {} valid / {} test",
        manifest.total_games(),
        manifest.train.len(),
        manifest.valid.len(),
        manifest.test.len()
    );
    println!("Manifest saved to: {}", args.output.display());
    Ok(())
}
