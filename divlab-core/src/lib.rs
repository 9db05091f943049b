//! divlab core — snapshot domain, probability sources, fees, per-game state machine.
//!
//! This crate contains the heart of the divergence backtester:
//! - Domain types (snapshots, home-space quotes, game feeds, trades)
//! - Probability sources (feed forecast, precomputed model output, Platt calibration)
//! - Fee model (disabled, notional rate, exchange taker schedule)
//! - Position state machine with entry/exit thresholds and minimum hold
//! - Deterministic RNG hierarchy and content fingerprints

pub mod domain;
pub mod engine;
pub mod fees;
pub mod fingerprint;
pub mod probability;
pub mod rng;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared across the worker pool are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Snapshot>();
        require_sync::<domain::Snapshot>();
        require_send::<domain::GameFeed>();
        require_sync::<domain::GameFeed>();
        require_send::<domain::Trade>();
        require_sync::<domain::Trade>();
        require_send::<domain::Quote>();
        require_sync::<domain::Quote>();

        require_send::<engine::StrategyParams>();
        require_sync::<engine::StrategyParams>();
        require_send::<engine::GameRun>();
        require_sync::<engine::GameRun>();
        require_send::<engine::EngineError>();
        require_sync::<engine::EngineError>();

        require_send::<fees::FeeModel>();
        require_sync::<fees::FeeModel>();

        require_send::<probability::FeedProbability>();
        require_sync::<probability::FeedProbability>();
        require_send::<probability::PrecomputedProbability>();
        require_sync::<probability::PrecomputedProbability>();

        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
    }

    /// Architecture contract: the engine receives its probability source explicitly.
    #[test]
    fn engine_takes_source_as_parameter() {
        fn _check(
            feed: &domain::GameFeed,
            source: &dyn probability::ProbabilitySource,
            params: &engine::StrategyParams,
        ) -> Result<engine::GameRun, engine::EngineError> {
            engine::run_game(feed, source, params)
        }
    }
}
