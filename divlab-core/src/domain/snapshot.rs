//! Snapshot — one aligned tick of a game: forecast probability plus market quote.
//!
//! Every price and probability in this module is in home-probability space.
//! Quotes on the away-team contract must go through [`Quote::from_away`] before
//! they reach a [`Snapshot`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a snapshot could not take part in a decision.
///
/// Skipped snapshots are never fatal: they are counted and the tick is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    #[error("probability is missing")]
    MissingProbability,
    #[error("probability is outside [0, 1]")]
    ProbabilityOutOfRange,
    #[error("bid or ask is missing")]
    MissingPrice,
    #[error("price is outside [0, 1]")]
    PriceOutOfRange,
    #[error("bid is above ask")]
    CrossedQuote,
    #[error("mid is outside the bid/ask range")]
    MidOutsideQuote,
}

/// Which contract a raw market quote refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSide {
    #[default]
    Home,
    Away,
}

/// A validated bid/ask pair in home-probability space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Build a quote, enforcing `0 <= bid <= ask <= 1`.
    pub fn new(bid: f64, ask: f64) -> Result<Self, SkipReason> {
        if !is_unit_interval(bid) || !is_unit_interval(ask) {
            return Err(SkipReason::PriceOutOfRange);
        }
        if bid > ask {
            return Err(SkipReason::CrossedQuote);
        }
        Ok(Self { bid, ask })
    }

    /// Convert an away-contract quote into home space.
    ///
    /// Inversion swaps the sides: the home bid comes from the away ask and the
    /// home ask from the away bid. Complementing each side in place would
    /// produce a crossed quote.
    pub fn from_away(away_bid: f64, away_ask: f64) -> Result<Self, SkipReason> {
        Quote::new(away_bid, away_ask)?;
        Quote::new(1.0 - away_ask, 1.0 - away_bid)
    }

    /// Inverse of [`Quote::from_away`]: `(away_bid, away_ask)`.
    pub fn to_away(&self) -> (f64, f64) {
        (1.0 - self.ask, 1.0 - self.bid)
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// One aligned row of a game's snapshot feed.
///
/// Fields are optional because the upstream join can leave gaps; a gap makes
/// the tick unusable but never aborts the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Seconds since the Unix epoch (or since tip-off; any consistent origin).
    pub timestamp: i64,
    pub home_prob: Option<f64>,
    pub market_bid: Option<f64>,
    pub market_ask: Option<f64>,
    pub market_mid: Option<f64>,
}

impl Snapshot {
    /// Validated quote for this tick.
    pub fn quote(&self) -> Result<Quote, SkipReason> {
        match (self.market_bid, self.market_ask) {
            (Some(bid), Some(ask)) => Quote::new(bid, ask),
            _ => Err(SkipReason::MissingPrice),
        }
    }

    /// Mid price for this tick.
    ///
    /// Uses the feed's `market_mid` when present, otherwise the quote midpoint.
    /// A reported mid outside the quote is rejected rather than clamped.
    pub fn mid(&self, quote: &Quote) -> Result<f64, SkipReason> {
        match self.market_mid {
            None => Ok(quote.mid()),
            Some(mid) if !is_unit_interval(mid) => Err(SkipReason::PriceOutOfRange),
            Some(mid) if mid < quote.bid || mid > quote.ask => Err(SkipReason::MidOutsideQuote),
            Some(mid) => Ok(mid),
        }
    }
}

/// A probability accepted by the engine: finite and within `[0, 1]`.
pub fn validate_probability(prob: Option<f64>) -> Result<f64, SkipReason> {
    match prob {
        None => Err(SkipReason::MissingProbability),
        Some(p) if is_unit_interval(p) => Ok(p),
        Some(_) => Err(SkipReason::ProbabilityOutOfRange),
    }
}

fn is_unit_interval(x: f64) -> bool {
    x.is_finite() && (0.0..=1.0).contains(&x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bid: Option<f64>, ask: Option<f64>, mid: Option<f64>) -> Snapshot {
        Snapshot {
            timestamp: 0,
            home_prob: Some(0.5),
            market_bid: bid,
            market_ask: ask,
            market_mid: mid,
        }
    }

    #[test]
    fn away_quote_is_inverted_and_swapped() {
        let home = Quote::from_away(0.65, 0.75).unwrap();
        assert!((home.bid - 0.25).abs() < 1e-12);
        assert!((home.ask - 0.35).abs() < 1e-12);
        assert!(home.bid <= home.ask);
    }

    #[test]
    fn away_round_trip_recovers_quote() {
        let home = Quote::from_away(0.65, 0.75).unwrap();
        let (bid, ask) = home.to_away();
        assert!((bid - 0.65).abs() < 1e-12);
        assert!((ask - 0.75).abs() < 1e-12);
    }

    #[test]
    fn crossed_quote_rejected() {
        assert_eq!(Quote::new(0.6, 0.5), Err(SkipReason::CrossedQuote));
    }

    #[test]
    fn out_of_range_price_rejected() {
        assert_eq!(Quote::new(-0.01, 0.5), Err(SkipReason::PriceOutOfRange));
        assert_eq!(Quote::new(0.5, 1.01), Err(SkipReason::PriceOutOfRange));
        assert_eq!(Quote::new(f64::NAN, 0.5), Err(SkipReason::PriceOutOfRange));
    }

    #[test]
    fn away_quote_validated_before_conversion() {
        assert_eq!(Quote::from_away(0.8, 0.7), Err(SkipReason::CrossedQuote));
    }

    #[test]
    fn missing_side_is_missing_price() {
        assert_eq!(
            snapshot(Some(0.4), None, None).quote(),
            Err(SkipReason::MissingPrice)
        );
    }

    #[test]
    fn mid_defaults_to_quote_midpoint() {
        let s = snapshot(Some(0.40), Some(0.50), None);
        let q = s.quote().unwrap();
        assert!((s.mid(&q).unwrap() - 0.45).abs() < 1e-12);
    }

    #[test]
    fn reported_mid_is_used_when_inside_quote() {
        let s = snapshot(Some(0.49), Some(0.51), Some(0.50));
        let q = s.quote().unwrap();
        assert_eq!(s.mid(&q).unwrap(), 0.50);
    }

    #[test]
    fn reported_mid_outside_quote_rejected() {
        let s = snapshot(Some(0.49), Some(0.51), Some(0.60));
        let q = s.quote().unwrap();
        assert_eq!(s.mid(&q), Err(SkipReason::MidOutsideQuote));
    }

    #[test]
    fn probability_validation() {
        assert_eq!(validate_probability(Some(0.3)), Ok(0.3));
        assert_eq!(validate_probability(None), Err(SkipReason::MissingProbability));
        assert_eq!(
            validate_probability(Some(1.2)),
            Err(SkipReason::ProbabilityOutOfRange)
        );
        assert_eq!(
            validate_probability(Some(f64::INFINITY)),
            Err(SkipReason::ProbabilityOutOfRange)
        );
    }
}
