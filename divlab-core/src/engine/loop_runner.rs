//! Per-game loop: feed → probability source → state machine → trades.

use thiserror::Error;

use crate::domain::GameFeed;
use crate::engine::machine::{GameRun, PositionStateMachine};
use crate::engine::state::{ParamsError, StrategyParams};
use crate::probability::ProbabilitySource;

/// Errors that make a single game's run unusable.
///
/// These exclude one (game, combination) result; they never abort a search.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("game {game_id}: snapshot {index} at t={timestamp} precedes t={previous}")]
    OutOfOrder {
        game_id: String,
        index: usize,
        timestamp: i64,
        previous: i64,
    },
    #[error("invalid strategy parameters: {0}")]
    Params(#[from] ParamsError),
}

/// Run the state machine over one game's full snapshot sequence.
///
/// The feed and the probability source are explicit inputs; nothing is
/// resolved from global state. Deterministic for identical inputs.
pub fn run_game(
    feed: &GameFeed,
    source: &dyn ProbabilitySource,
    params: &StrategyParams,
) -> Result<GameRun, EngineError> {
    params.validate()?;
    if let Some(index) = feed.first_out_of_order() {
        return Err(EngineError::OutOfOrder {
            game_id: feed.game_id.clone(),
            index,
            timestamp: feed.snapshots[index].timestamp,
            previous: feed.snapshots[index - 1].timestamp,
        });
    }

    let mut machine = PositionStateMachine::new(feed.game_id.clone(), feed.game_date, params);
    for snapshot in &feed.snapshots {
        let probability = source.probability(&feed.game_id, snapshot);
        machine.step(snapshot, probability);
    }
    Ok(machine.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Snapshot;
    use crate::probability::{FeedProbability, PrecomputedProbability};
    use chrono::NaiveDate;

    fn tick(ts: i64, prob: f64, bid: f64, ask: f64) -> Snapshot {
        Snapshot {
            timestamp: ts,
            home_prob: Some(prob),
            market_bid: Some(bid),
            market_ask: Some(ask),
            market_mid: None,
        }
    }

    fn feed(snapshots: Vec<Snapshot>) -> GameFeed {
        GameFeed::new("g1", NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(), snapshots)
    }

    #[test]
    fn runs_full_game() {
        let f = feed(vec![
            tick(0, 0.50, 0.49, 0.51),
            tick(10, 0.60, 0.49, 0.51),
            tick(20, 0.55, 0.54, 0.55),
        ]);
        let run = run_game(&f, &FeedProbability, &StrategyParams::new(0.05, 0.01)).unwrap();
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.valid_snapshots, 3);
    }

    #[test]
    fn out_of_order_feed_is_an_error() {
        let f = feed(vec![tick(10, 0.5, 0.49, 0.51), tick(5, 0.5, 0.49, 0.51)]);
        let err = run_game(&f, &FeedProbability, &StrategyParams::new(0.05, 0.01)).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { index: 1, .. }));
    }

    #[test]
    fn invalid_params_rejected() {
        let f = feed(vec![]);
        let err = run_game(&f, &FeedProbability, &StrategyParams::new(-0.1, 0.01)).unwrap_err();
        assert!(matches!(err, EngineError::Params(_)));
    }

    #[test]
    fn swapping_the_source_changes_only_the_forecast() {
        let f = feed(vec![tick(0, 0.50, 0.49, 0.51), tick(10, 0.50, 0.49, 0.51)]);
        let params = StrategyParams::new(0.05, 0.01);

        let baseline = run_game(&f, &FeedProbability, &params).unwrap();
        assert!(baseline.trades.is_empty());

        let mut model = PrecomputedProbability::new("model");
        model.insert("g1", 0, 0.70);
        model.insert("g1", 10, 0.50);
        let with_model = run_game(&f, &model, &params).unwrap();
        assert_eq!(with_model.trades.len(), 1);
    }

    #[test]
    fn game_without_valid_snapshots_has_no_trades() {
        let mut bad = tick(0, 0.5, 0.49, 0.51);
        bad.market_bid = None;
        let run = run_game(&feed(vec![bad]), &FeedProbability, &StrategyParams::new(0.05, 0.01))
            .unwrap();
        assert!(run.trades.is_empty());
        assert_eq!(run.skipped_snapshots, 1);
    }
}
