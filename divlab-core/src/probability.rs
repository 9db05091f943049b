//! Probability sources — where the home-win forecast for a tick comes from.
//!
//! The engine never looks a source up by name; callers pass one in explicitly.
//! Swapping the baseline feed forecast for a calibrated model output changes
//! nothing else in the pipeline.

use std::collections::HashMap;

use crate::domain::Snapshot;

/// Yields a home-win probability for a snapshot of a given game.
///
/// `None` means "no forecast for this tick"; the engine skips the tick.
/// Values outside `[0, 1]` are rejected by the engine, not clamped.
pub trait ProbabilitySource: Send + Sync {
    fn probability(&self, game_id: &str, snapshot: &Snapshot) -> Option<f64>;

    /// Short identifier recorded in run outputs.
    fn name(&self) -> &str;

    /// Identifies the forecasts this source yields; two sources with equal
    /// fingerprints must produce identical runs. Cache keys are built from it.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }
}

/// Baseline: the forecast carried on the snapshot itself (`home_prob`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedProbability;

impl ProbabilitySource for FeedProbability {
    fn probability(&self, _game_id: &str, snapshot: &Snapshot) -> Option<f64> {
        snapshot.home_prob
    }

    fn name(&self) -> &str {
        "feed"
    }
}

/// Model outputs computed offline, keyed by `(game_id, timestamp)`.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedProbability {
    name: String,
    values: HashMap<(String, i64), f64>,
}

impl PrecomputedProbability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, game_id: impl Into<String>, timestamp: i64, probability: f64) {
        self.values.insert((game_id.into(), timestamp), probability);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// BLAKE3 over the entries in `(game_id, timestamp)` order.
    fn content_hash(&self) -> String {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut hasher = blake3::Hasher::new();
        for ((game_id, ts), p) in entries {
            hasher.update(game_id.as_bytes());
            hasher.update(&[0]);
            hasher.update(&ts.to_le_bytes());
            hasher.update(&p.to_bits().to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl FromIterator<(String, i64, f64)> for PrecomputedProbability {
    fn from_iter<I: IntoIterator<Item = (String, i64, f64)>>(iter: I) -> Self {
        let mut source = PrecomputedProbability::new("precomputed");
        for (game_id, ts, p) in iter {
            source.insert(game_id, ts, p);
        }
        source
    }
}

impl ProbabilitySource for PrecomputedProbability {
    fn probability(&self, game_id: &str, snapshot: &Snapshot) -> Option<f64> {
        self.values
            .get(&(game_id.to_string(), snapshot.timestamp))
            .copied()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> String {
        format!("{}:{}", self.name, self.content_hash())
    }
}

/// Applies pre-fitted Platt coefficients to an inner source:
/// `p' = sigmoid(a * logit(p) + b)`.
///
/// Fitting `a` and `b` happens upstream; this only applies them.
#[derive(Debug, Clone)]
pub struct PlattCalibrated<S> {
    inner: S,
    a: f64,
    b: f64,
    name: String,
}

/// Probabilities are pulled this far away from 0 and 1 before taking the logit.
const LOGIT_EPS: f64 = 1e-9;

impl<S: ProbabilitySource> PlattCalibrated<S> {
    pub fn new(inner: S, a: f64, b: f64) -> Self {
        // Coefficients are part of the name: run outputs and cache keys use it.
        let name = format!("platt({}, a={a}, b={b})", inner.name());
        Self { inner, a, b, name }
    }
}

impl<S: ProbabilitySource> ProbabilitySource for PlattCalibrated<S> {
    fn probability(&self, game_id: &str, snapshot: &Snapshot) -> Option<f64> {
        let p = self.inner.probability(game_id, snapshot)?;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return None;
        }
        let p = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
        let logit = (p / (1.0 - p)).ln();
        Some(sigmoid(self.a * logit + self.b))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> String {
        format!("platt({}, a={}, b={})", self.inner.fingerprint(), self.a, self.b)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
