use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;

use divlab_core::domain::{GameFeed, Snapshot};
use divlab_core::fees::FeeModel;
use divlab_core::probability::{FeedProbability, PrecomputedProbability};
use divlab_runner::config::SplitConfig;
use divlab_runner::{
    run_search, ConfigError, GridSearchConfig, ResultCache, SearchError, SelectionOutcome,
    SplitError, SplitManifest, SplitName, ThresholdRange,
};

// ── Fixtures ──

const PATTERN: [f64; 8] = [0.0, 1.0, 0.8, 0.5, 0.2, 0.0, -0.3, 0.0];

fn quote_tick(ts: i64, prob: f64, mid: f64) -> Snapshot {
    Snapshot {
        timestamp: ts,
        home_prob: Some(prob),
        market_bid: Some(mid - 0.01),
        market_ask: Some(mid + 0.01),
        market_mid: Some(mid),
    }
}

/// Forecast swings away from the market and back; amplitude and direction
/// depend on the game index.
fn synthetic_game(i: usize) -> GameFeed {
    let amp = 0.03 + 0.01 * (i % 8) as f64;
    let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
    let snapshots = (0..40)
        .map(|t| {
            let mid = 0.45 + 0.01 * ((t + i) % 5) as f64;
            let prob = mid + sign * amp * PATTERN[t % PATTERN.len()];
            quote_tick(t as i64 * 30, prob, mid)
        })
        .collect();
    GameFeed::new(
        format!("game{i:02}"),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Duration::days(i as i64),
        snapshots,
    )
}

fn flat_game(i: usize) -> GameFeed {
    let snapshots = (0..20).map(|t| quote_tick(t * 30, 0.5, 0.5)).collect();
    GameFeed::new(
        format!("flat{i:02}"),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Duration::days(i as i64),
        snapshots,
    )
}

fn feeds(n: usize) -> Vec<GameFeed> {
    (0..n).map(synthetic_game).collect()
}

fn config(workers: usize) -> GridSearchConfig {
    let mut cfg = GridSearchConfig::default();
    cfg.grid.entry = ThresholdRange::new(0.03, 0.08, 0.01);
    cfg.grid.exit = ThresholdRange::new(0.0, 0.02, 0.01);
    cfg.strategy.fees = FeeModel::None;
    cfg.selection.min_trades = 2;
    cfg.selection.top_n = 5;
    cfg.run.workers = workers;
    cfg
}

fn manifest_for(feeds: &[GameFeed]) -> SplitManifest {
    SplitManifest::generate(feeds, &SplitConfig::default(), "test").unwrap()
}

// ── Scenario: zero trades everywhere ──

#[test]
fn single_combination_without_trades_is_zero_valued_and_invalid() {
    let games: Vec<GameFeed> = (0..5).map(flat_game).collect();
    let manifest = manifest_for(&games);
    let mut cfg = config(2);
    cfg.grid.entry = ThresholdRange::single(0.05);
    cfg.grid.exit = ThresholdRange::single(0.01);

    let outcome = run_search(&cfg, &games, &FeedProbability, &manifest, None).unwrap();
    assert_eq!(outcome.cells.len(), 1);
    for split in SplitName::ALL {
        let m = outcome.cells[0].metrics(split);
        assert!(!m.is_valid);
        assert_eq!(m.num_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.net_profit_dollars, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }
    assert!(matches!(
        outcome.selection,
        SelectionOutcome::NoValidSelection { .. }
    ));
}

// ── Determinism ──

#[test]
fn worker_count_does_not_change_results() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let serial = run_search(&config(1), &games, &FeedProbability, &manifest, None).unwrap();
    let parallel = run_search(&config(8), &games, &FeedProbability, &manifest, None).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn input_game_order_does_not_change_results() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let mut reversed = games.clone();
    reversed.reverse();
    let a = run_search(&config(4), &games, &FeedProbability, &manifest, None).unwrap();
    let b = run_search(&config(4), &reversed, &FeedProbability, &manifest, None).unwrap();
    assert_eq!(a.cells, b.cells);
    assert_eq!(a.selection, b.selection);
}

#[test]
fn same_manifest_reproduces_the_run() {
    let games = feeds(12);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("split_manifest.json");
    manifest_for(&games).save(&path).unwrap();

    let first = run_search(
        &config(3),
        &games,
        &FeedProbability,
        &SplitManifest::load(&path).unwrap(),
        None,
    )
    .unwrap();

    // A different split seed in the config is irrelevant once a manifest is given.
    let mut cfg = config(3);
    cfg.split.seed = 999;
    let second = run_search(
        &cfg,
        &games,
        &FeedProbability,
        &SplitManifest::load(&path).unwrap(),
        None,
    )
    .unwrap();
    assert_eq!(first, second);
}

#[test]
fn search_finds_a_selection() {
    let games = feeds(16);
    let manifest = manifest_for(&games);
    let outcome = run_search(&config(4), &games, &FeedProbability, &manifest, None).unwrap();
    assert_eq!(outcome.cells.len(), 18);
    let selected = outcome.selection.selected().expect("a valid selection");
    assert!(selected.train.is_valid);
    assert!(selected.valid.is_valid);
    assert!(selected.train_rank >= 1 && selected.train_rank <= 5);
    assert_eq!(selected.method, "best_on_valid_among_top_5_train");
}

// ── Failure handling ──

#[test]
fn out_of_order_game_is_excluded_not_fatal() {
    let mut games = feeds(12);
    let manifest = manifest_for(&games);
    let bad_id = manifest.train[0].clone();
    let bad = games.iter_mut().find(|g| g.game_id == bad_id).unwrap();
    bad.snapshots.swap(3, 4);

    let outcome = run_search(&config(4), &games, &FeedProbability, &manifest, None).unwrap();
    assert_eq!(outcome.excluded_runs(), outcome.cells.len());
    assert!(outcome.excluded.iter().all(|x| x.game_id == bad_id));
    assert!(outcome.excluded.iter().all(|x| x.split == SplitName::Train));
    assert!(outcome.cells.iter().all(|c| c.train.excluded_runs == 1));
    assert!(outcome.cells.iter().all(|c| c.valid.excluded_runs == 0));
}

#[test]
fn invalid_range_fails_before_running() {
    let games = feeds(6);
    let manifest = manifest_for(&games);
    let mut cfg = config(2);
    cfg.grid.exit = ThresholdRange::new(0.02, 0.01, 0.01);
    let err = run_search(&cfg, &games, &FeedProbability, &manifest, None).unwrap_err();
    assert!(matches!(
        err,
        SearchError::Config(ConfigError::InvalidRange { axis: "exit", .. })
    ));
}

#[test]
fn empty_split_is_fatal() {
    let games = feeds(6);
    let mut manifest = manifest_for(&games);
    manifest.valid.clear();
    let err = run_search(&config(2), &games, &FeedProbability, &manifest, None).unwrap_err();
    assert!(matches!(
        err,
        SearchError::Split(SplitError::EmptySplit(SplitName::Valid))
    ));
}

#[test]
fn manifest_for_another_dataset_is_fatal() {
    let games = feeds(10);
    let manifest = manifest_for(&games);
    let err = run_search(&config(2), &games[..5], &FeedProbability, &manifest, None).unwrap_err();
    assert!(matches!(
        err,
        SearchError::Split(SplitError::UnknownGames { .. })
    ));
}

#[test]
fn unreachable_trade_minimum_gives_no_selection() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let mut cfg = config(2);
    cfg.selection.min_trades = 10_000;
    let outcome = run_search(&cfg, &games, &FeedProbability, &manifest, None).unwrap();
    assert!(outcome.cells.iter().all(|c| !c.train.is_valid));
    match &outcome.selection {
        SelectionOutcome::NoValidSelection {
            candidates_considered,
            reason,
            ..
        } => {
            assert_eq!(*candidates_considered, 0);
            assert!(reason.contains("10000"));
        }
        other => panic!("expected no selection, got {other:?}"),
    }
}

// ── Cache ──

#[test]
fn cached_outcome_is_shared_not_recomputed() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let cache = ResultCache::in_memory();
    let a = run_search(&config(2), &games, &FeedProbability, &manifest, Some(&cache)).unwrap();
    // Worker count is not part of the key.
    let b = run_search(&config(6), &games, &FeedProbability, &manifest, Some(&cache)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 1);
}

#[test]
fn changed_strategy_misses_the_cache() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let cache = ResultCache::in_memory();
    let a = run_search(&config(2), &games, &FeedProbability, &manifest, Some(&cache)).unwrap();
    let mut cfg = config(2);
    cfg.strategy.min_hold_seconds = 60;
    let b = run_search(&cfg, &games, &FeedProbability, &manifest, Some(&cache)).unwrap();
    assert_ne!(a.cache_key, b.cache_key);
    assert_eq!(cache.len(), 2);
}

#[test]
fn per_request_copy_leaves_cache_untouched() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let cache = ResultCache::in_memory();
    let shared = run_search(&config(2), &games, &FeedProbability, &manifest, Some(&cache)).unwrap();

    let mut mine = cache.get_owned(&shared.cache_key).unwrap().unwrap();
    for cell in &mut mine.cells {
        cell.test.net_profit_dollars = 0.0;
    }
    mine.excluded.clear();

    let again = cache.get(&shared.cache_key).unwrap().unwrap();
    assert_eq!(*again, *shared);
}

#[test]
fn disk_cache_serves_a_fresh_process() {
    let games = feeds(12);
    let manifest = manifest_for(&games);
    let dir = tempfile::tempdir().unwrap();
    let first = {
        let cache = ResultCache::with_dir(dir.path()).unwrap();
        run_search(&config(2), &games, &FeedProbability, &manifest, Some(&cache)).unwrap()
    };
    let cache = ResultCache::with_dir(dir.path()).unwrap();
    assert!(cache.contains(&first.cache_key));
    let second = run_search(&config(2), &games, &FeedProbability, &manifest, Some(&cache)).unwrap();
    assert_eq!(*first, *second);
}

#[test]
fn same_named_models_with_different_values_do_not_share_an_entry() {
    let games: Vec<GameFeed> = (0..12).map(flat_game).collect();
    let manifest = manifest_for(&games);
    let model = |edge: f64| {
        let mut source = PrecomputedProbability::new("model");
        for game in &games {
            for s in &game.snapshots {
                let p = if s.timestamp == 300 { 0.5 + edge } else { 0.5 };
                source.insert(game.game_id.clone(), s.timestamp, p);
            }
        }
        source
    };
    let (flat, edged) = (model(0.0), model(0.2));
    let train_trades = |outcome: &divlab_runner::SearchOutcome| -> usize {
        outcome.cells.iter().map(|c| c.train.num_trades).sum()
    };

    let cache = ResultCache::in_memory();
    let first = run_search(&config(2), &games, &flat, &manifest, Some(&cache)).unwrap();
    let second = run_search(&config(2), &games, &edged, &manifest, Some(&cache)).unwrap();
    let uncached = run_search(&config(2), &games, &edged, &manifest, None).unwrap();

    assert_eq!(train_trades(&first), 0);
    assert!(train_trades(&uncached) > 0);
    assert_ne!(first.cache_key, second.cache_key);
    assert_eq!(second.cells, uncached.cells);
    assert_eq!(cache.len(), 2);
}

// ── Selection never reads test ──

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn perturbing_test_games_keeps_selection(noise in prop::collection::vec(-0.2f64..0.2, 40)) {
        let games = feeds(12);
        let manifest = manifest_for(&games);
        let base = run_search(&config(2), &games, &FeedProbability, &manifest, None).unwrap();

        let test_ids: Vec<&String> = manifest.ids(SplitName::Test).iter().collect();
        let perturbed: Vec<GameFeed> = games
            .iter()
            .cloned()
            .map(|mut g| {
                if test_ids.contains(&&g.game_id) {
                    for (s, n) in g.snapshots.iter_mut().zip(&noise) {
                        s.home_prob = s.home_prob.map(|p| (p + n).clamp(0.0, 1.0));
                    }
                }
                g
            })
            .collect();
        let other = run_search(&config(2), &perturbed, &FeedProbability, &manifest, None).unwrap();

        match (&base.selection, &other.selection) {
            (SelectionOutcome::Selected(a), SelectionOutcome::Selected(b)) => {
                prop_assert_eq!(a.entry_threshold, b.entry_threshold);
                prop_assert_eq!(a.exit_threshold, b.exit_threshold);
                prop_assert_eq!(a.train_rank, b.train_rank);
                prop_assert_eq!(&a.train, &b.train);
                prop_assert_eq!(&a.valid, &b.valid);
            }
            (a, b) => prop_assert_eq!(a, b),
        }
    }
}
