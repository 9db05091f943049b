//! Criterion benchmarks for the grid-search hot paths.
//!
//! Run with: `cargo bench -p divlab-runner`
//!
//! - Full grid over a synthetic dataset at 1 and N workers
//! - Split aggregation (canonical sort + metrics) over a large trade list
//! - Stability analysis over a dense grid

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::NaiveDate;
use divlab_core::domain::{ExitReason, GameFeed, Side, Snapshot, Trade};
use divlab_core::probability::FeedProbability;
use divlab_runner::config::{SplitConfig, StabilityConfig};
use divlab_runner::grid::{GridAxes, GridCell};
use divlab_runner::{GridSearch, GridSearchConfig, SplitManifest, SplitMetrics, StabilityReport, ThresholdRange};

fn make_feeds(games: usize, ticks: usize) -> Vec<GameFeed> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..games)
        .map(|g| {
            let snapshots = (0..ticks)
                .map(|i| {
                    let t = (i + g * 7) as f64;
                    let mid = 0.5 + (t * 0.01).sin() * 0.3;
                    let prob = (mid + (t * 0.13).sin() * 0.12).clamp(0.0, 1.0);
                    Snapshot {
                        timestamp: i as i64 * 10,
                        home_prob: Some(prob),
                        market_bid: Some(mid - 0.01),
                        market_ask: Some(mid + 0.01),
                        market_mid: None,
                    }
                })
                .collect();
            GameFeed::new(format!("g{g:03}"), start + chrono::Duration::days(g as i64), snapshots)
        })
        .collect()
}

fn bench_grid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_search");
    group.sample_size(10);

    let feeds = make_feeds(40, 1_000);
    let manifest = SplitManifest::generate(&feeds, &SplitConfig::default(), "bench").unwrap();
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    for workers in [1, cores] {
        let mut cfg = GridSearchConfig::default();
        cfg.grid.entry = ThresholdRange::new(0.02, 0.10, 0.01);
        cfg.grid.exit = ThresholdRange::new(0.0, 0.03, 0.01);
        cfg.run.workers = workers;

        group.bench_with_input(BenchmarkId::new("workers", workers), &cfg, |b, cfg| {
            b.iter(|| {
                GridSearch::new(black_box(cfg), &feeds, &FeedProbability, &manifest)
                    .run()
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_split_metrics(c: &mut Criterion) {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    // Reverse order so the canonical sort does real work.
    let trades: Vec<Trade> = (0..20_000)
        .rev()
        .map(|i| Trade {
            game_id: format!("g{:04}", i / 10),
            game_date: start + chrono::Duration::days((i / 10) as i64),
            side: if i % 2 == 0 { Side::Long } else { Side::Short },
            entry_time: (i % 10) as i64 * 100,
            entry_price: 0.5,
            entry_prob: 0.6,
            entry_divergence: 0.1,
            exit_time: (i % 10) as i64 * 100 + 50,
            exit_price: 0.5 + ((i % 7) as f64 - 3.0) * 0.01,
            exit_reason: ExitReason::DivergenceDecayed,
            contracts: 1.0,
            gross_pnl: ((i % 7) as f64 - 3.0) * 0.01,
            fees: 0.0,
            pnl_dollars: ((i % 7) as f64 - 3.0) * 0.01,
            hold_seconds: 50,
        })
        .collect();

    c.bench_function("split_metrics_20k_trades", |b| {
        b.iter(|| SplitMetrics::compute(black_box(trades.clone()), 2_000, 0, 10));
    });
}

fn bench_stability(c: &mut Criterion) {
    let axes = GridAxes {
        entry: (1..=50).map(|i| i as f64 * 0.002).collect(),
        exit: (0..30).map(|i| i as f64 * 0.001).collect(),
    };
    let cells: Vec<GridCell> = (0..axes.len())
        .map(|idx| {
            let (ei, xi) = axes.coords(idx);
            let profit = 10.0 - ((ei as f64 - 20.0).powi(2) + (xi as f64 - 10.0).powi(2)) * 0.01;
            let m = SplitMetrics {
                net_profit_dollars: profit,
                num_trades: 50,
                is_valid: true,
                ..SplitMetrics::default()
            };
            GridCell {
                entry_threshold: axes.entry[ei],
                exit_threshold: axes.exit[xi],
                train: m.clone(),
                valid: SplitMetrics {
                    net_profit_dollars: profit * 0.8,
                    ..m.clone()
                },
                test: m,
            }
        })
        .collect();
    let cfg = StabilityConfig::default();

    c.bench_function("stability_1500_cells", |b| {
        b.iter(|| StabilityReport::analyze(black_box(&axes), black_box(&cells), &cfg));
    });
}

criterion_group!(benches, bench_grid_search, bench_split_metrics, bench_stability);
criterion_main!(benches);
