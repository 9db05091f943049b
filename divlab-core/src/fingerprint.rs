//! Content fingerprints — deterministic identification of datasets and configs.
//!
//! Hashes are BLAKE3 over a canonical byte encoding, rendered as hex. They key
//! the result cache and are recorded in run outputs so two runs can be checked
//! for identical inputs.

use serde::Serialize;

use crate::domain::GameFeed;

/// Hash an entire dataset: every game, every snapshot, in feed order.
///
/// Feeds are hashed in ascending `game_id` order so the hash does not depend on
/// how the caller collected them.
pub fn dataset_hash(feeds: &[GameFeed]) -> String {
    let mut ordered: Vec<&GameFeed> = feeds.iter().collect();
    ordered.sort_by(|a, b| a.game_id.cmp(&b.game_id));

    let mut hasher = blake3::Hasher::new();
    for feed in ordered {
        hasher.update(feed.game_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(feed.game_date.to_string().as_bytes());
        for s in &feed.snapshots {
            hasher.update(&s.timestamp.to_le_bytes());
            for field in [s.home_prob, s.market_bid, s.market_ask, s.market_mid] {
                match field {
                    Some(v) => {
                        hasher.update(&[1]);
                        hasher.update(&v.to_bits().to_le_bytes());
                    }
                    None => {
                        hasher.update(&[0]);
                    }
                }
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Hash any serializable value through its canonical JSON form.
///
/// Callers should use `BTreeMap` (not `HashMap`) inside `value` so key order
/// is stable.
pub fn json_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}
