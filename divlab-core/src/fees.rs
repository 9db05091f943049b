//! Fee model — per-leg trading costs in dollars.

use serde::{Deserialize, Serialize};

/// How fees are charged on each leg of a round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeModel {
    /// Fee mode disabled.
    None,
    /// `rate × price × contracts` on every leg.
    NotionalRate { rate: f64 },
    /// Exchange taker schedule: `ceil(rate × C × P × (1 − P) × 100)` cents per leg.
    KalshiTaker { rate: f64 },
}

/// Taker rate applied by the exchange schedule.
pub const DEFAULT_TAKER_RATE: f64 = 0.07;

impl Default for FeeModel {
    fn default() -> Self {
        FeeModel::KalshiTaker {
            rate: DEFAULT_TAKER_RATE,
        }
    }
}

impl FeeModel {
    /// Fee for one leg executed at `price` for `contracts` contracts.
    pub fn leg_fee(&self, price: f64, contracts: f64) -> f64 {
        match *self {
            FeeModel::None => 0.0,
            FeeModel::NotionalRate { rate } => rate * price * contracts,
            FeeModel::KalshiTaker { rate } => {
                let cents = rate * contracts * price * (1.0 - price) * 100.0;
                // Guard against 1.0000000002 rounding up to a whole extra cent.
                (cents - 1e-9).ceil().max(0.0) / 100.0
            }
        }
    }

    /// Total fees for an entry leg plus an exit leg.
    pub fn round_trip(&self, entry_price: f64, exit_price: f64, contracts: f64) -> f64 {
        self.leg_fee(entry_price, contracts) + self.leg_fee(exit_price, contracts)
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, FeeModel::None)
    }
}
