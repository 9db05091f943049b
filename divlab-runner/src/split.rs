//! Game splits — the train / valid / test partition and its persisted manifest.
//!
//! A manifest is generated once per search and written next to the results.
//! Re-runs that pass the same manifest get the identical partition regardless
//! of seed or fractions in their config.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use divlab_core::domain::GameFeed;
use divlab_core::fingerprint::json_hash;
use divlab_core::rng::RngHierarchy;

use crate::config::SplitConfig;
use crate::runner::SCHEMA_VERSION;

/// Errors from building, loading, or applying a split.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("need at least 3 games to split, got {0}")]
    TooFewGames(usize),
    #[error("split '{0}' has no games")]
    EmptySplit(SplitName),
    #[error("game '{game_id}' is assigned to both {first} and {second}")]
    Overlap {
        game_id: String,
        first: SplitName,
        second: SplitName,
    },
    #[error("manifest references {count} game(s) missing from the dataset (first: '{first}')")]
    UnknownGames { count: usize, first: String },
    #[error("unsupported manifest schema version {found} (max supported: {supported})")]
    SchemaVersion { found: u32, supported: u32 },
    #[error("manifest I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One of the three partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitName {
    Train,
    Valid,
    Test,
}

impl SplitName {
    pub const ALL: [SplitName; 3] = [SplitName::Train, SplitName::Valid, SplitName::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            SplitName::Train => "train",
            SplitName::Valid => "valid",
            SplitName::Test => "test",
        }
    }
}

impl std::fmt::Display for SplitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How games are assigned to splits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMethod {
    /// Seeded shuffle of game ids.
    #[default]
    Random,
    /// Earliest games train, latest games test.
    Chronological,
}

/// Persisted game partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub method: SplitMethod,
    pub seed: u64,
    pub train_fraction: f64,
    pub valid_fraction: f64,
    /// Dataset the split was generated from (informational).
    #[serde(default)]
    pub dataset_hash: String,
    pub train: Vec<String>,
    pub valid: Vec<String>,
    pub test: Vec<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl SplitManifest {
    /// Partition the games in `feeds` according to `config`.
    pub fn generate(
        feeds: &[GameFeed],
        config: &SplitConfig,
        dataset_hash: &str,
    ) -> Result<Self, SplitError> {
        let n = feeds.len();
        if n < 3 {
            return Err(SplitError::TooFewGames(n));
        }

        let ordered: Vec<String> = match config.method {
            SplitMethod::Random => {
                // Start from a sorted list so the shuffle depends only on the seed.
                let mut ids: Vec<String> = feeds.iter().map(|f| f.game_id.clone()).collect();
                ids.sort();
                let mut rng = RngHierarchy::new(config.seed).rng_for("game_split", 0);
                ids.shuffle(&mut rng);
                ids
            }
            SplitMethod::Chronological => {
                let mut games: Vec<&GameFeed> = feeds.iter().collect();
                games.sort_by(|a, b| {
                    a.game_date
                        .cmp(&b.game_date)
                        .then_with(|| a.game_id.cmp(&b.game_id))
                });
                games.into_iter().map(|f| f.game_id.clone()).collect()
            }
        };

        let n_train = ((n as f64 * config.train_fraction).floor() as usize).max(1);
        let n_valid = ((n as f64 * config.valid_fraction).floor() as usize).max(1);
        if n_train + n_valid >= n {
            return Err(SplitError::TooFewGames(n));
        }

        let mut train = ordered[..n_train].to_vec();
        let mut valid = ordered[n_train..n_train + n_valid].to_vec();
        let mut test = ordered[n_train + n_valid..].to_vec();
        if config.method == SplitMethod::Random {
            train.sort();
            valid.sort();
            test.sort();
        }

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            method: config.method,
            seed: config.seed,
            train_fraction: config.train_fraction,
            valid_fraction: config.valid_fraction,
            dataset_hash: dataset_hash.to_string(),
            train,
            valid,
            test,
        })
    }

    pub fn ids(&self, split: SplitName) -> &[String] {
        match split {
            SplitName::Train => &self.train,
            SplitName::Valid => &self.valid,
            SplitName::Test => &self.test,
        }
    }

    pub fn total_games(&self) -> usize {
        self.train.len() + self.valid.len() + self.test.len()
    }

    /// Map from game id to its split.
    pub fn assignments(&self) -> HashMap<&str, SplitName> {
        SplitName::ALL
            .iter()
            .flat_map(|&split| self.ids(split).iter().map(move |id| (id.as_str(), split)))
            .collect()
    }

    /// Structural checks plus a check that every listed game exists in `feeds`.
    ///
    /// Games present in `feeds` but absent from the manifest are ignored by the
    /// search; the caller may log them.
    pub fn validate_against(&self, feeds: &[GameFeed]) -> Result<(), SplitError> {
        self.validate()?;
        let known: BTreeSet<&str> = feeds.iter().map(|f| f.game_id.as_str()).collect();
        let missing: Vec<&String> = SplitName::ALL
            .iter()
            .flat_map(|&s| self.ids(s))
            .filter(|id| !known.contains(id.as_str()))
            .collect();
        if let Some(first) = missing.first() {
            return Err(SplitError::UnknownGames {
                count: missing.len(),
                first: (*first).clone(),
            });
        }
        Ok(())
    }

    /// Schema, non-empty splits, and disjointness.
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(SplitError::SchemaVersion {
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        for split in SplitName::ALL {
            if self.ids(split).is_empty() {
                return Err(SplitError::EmptySplit(split));
            }
        }
        let mut seen: HashMap<&str, SplitName> = HashMap::new();
        for split in SplitName::ALL {
            for id in self.ids(split) {
                if let Some(&first) = seen.get(id.as_str()) {
                    return Err(SplitError::Overlap {
                        game_id: id.clone(),
                        first,
                        second: split,
                    });
                }
                seen.insert(id.as_str(), split);
            }
        }
        Ok(())
    }

    /// Content hash; identical manifests give identical partitions.
    pub fn hash(&self) -> Result<String, SplitError> {
        Ok(json_hash(self)?)
    }

    pub fn to_json(&self) -> Result<String, SplitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SplitError> {
        let manifest: SplitManifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<(), SplitError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| SplitError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SplitError> {
        let json = std::fs::read_to_string(path).map_err(|source| SplitError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn feeds(n: usize) -> Vec<GameFeed> {
        (0..n)
            .map(|i| {
                GameFeed::new(
                    format!("game{i:03}"),
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64),
                    Vec::new(),
                )
            })
            .collect()
    }

    #[test]
    fn random_split_is_seed_deterministic() {
        let f = feeds(20);
        let cfg = SplitConfig::default();
        let a = SplitManifest::generate(&f, &cfg, "h").unwrap();
        let b = SplitManifest::generate(&f, &cfg, "h").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.train.len(), 12);
        assert_eq!(a.valid.len(), 4);
        assert_eq!(a.test.len(), 4);
    }

    #[test]
    fn random_split_ignores_input_order() {
        let f = feeds(20);
        let mut reversed = f.clone();
        reversed.reverse();
        let cfg = SplitConfig::default();
        assert_eq!(
            SplitManifest::generate(&f, &cfg, "h").unwrap(),
            SplitManifest::generate(&reversed, &cfg, "h").unwrap()
        );
    }

    #[test]
    fn different_seed_changes_split() {
        let f = feeds(30);
        let a = SplitManifest::generate(&f, &SplitConfig::default(), "h").unwrap();
        let cfg = SplitConfig {
            seed: 7,
            ..SplitConfig::default()
        };
        let b = SplitManifest::generate(&f, &cfg, "h").unwrap();
        assert_ne!(a.train, b.train);
    }

    #[test]
    fn chronological_split_puts_latest_games_in_test() {
        let f = feeds(10);
        let cfg = SplitConfig {
            method: SplitMethod::Chronological,
            ..SplitConfig::default()
        };
        let m = SplitManifest::generate(&f, &cfg, "h").unwrap();
        assert_eq!(m.train.first().map(String::as_str), Some("game000"));
        assert_eq!(m.test.last().map(String::as_str), Some("game009"));
    }

    #[test]
    fn splits_are_disjoint_and_complete() {
        let f = feeds(17);
        let m = SplitManifest::generate(&f, &SplitConfig::default(), "h").unwrap();
        assert!(m.validate().is_ok());
        assert_eq!(m.total_games(), 17);
        assert_eq!(m.assignments().len(), 17);
    }

    #[test]
    fn too_few_games_rejected() {
        assert!(matches!(
            SplitManifest::generate(&feeds(2), &SplitConfig::default(), "h"),
            Err(SplitError::TooFewGames(2))
        ));
    }

    #[test]
    fn overlap_detected() {
        let mut m = SplitManifest::generate(&feeds(10), &SplitConfig::default(), "h").unwrap();
        let dup = m.train[0].clone();
        m.test.push(dup);
        assert!(matches!(m.validate(), Err(SplitError::Overlap { .. })));
    }

    #[test]
    fn empty_split_detected() {
        let mut m = SplitManifest::generate(&feeds(10), &SplitConfig::default(), "h").unwrap();
        m.valid.clear();
        assert!(matches!(
            m.validate(),
            Err(SplitError::EmptySplit(SplitName::Valid))
        ));
    }

    #[test]
    fn unknown_games_detected() {
        let m = SplitManifest::generate(&feeds(10), &SplitConfig::default(), "h").unwrap();
        assert!(matches!(
            m.validate_against(&feeds(5)),
            Err(SplitError::UnknownGames { .. })
        ));
    }

    #[test]
    fn newer_schema_rejected() {
        let mut m = SplitManifest::generate(&feeds(10), &SplitConfig::default(), "h").unwrap();
        m.schema_version = SCHEMA_VERSION + 1;
        let json = serde_json::to_string(&m).unwrap();
        assert!(matches!(
            SplitManifest::from_json(&json),
            Err(SplitError::SchemaVersion { .. })
        ));
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split_manifest.json");
        let m = SplitManifest::generate(&feeds(12), &SplitConfig::default(), "abc").unwrap();
        m.save(&path).unwrap();
        let loaded = SplitManifest::load(&path).unwrap();
        assert_eq!(m, loaded);
        assert_eq!(m.hash().unwrap(), loaded.hash().unwrap());
    }
}
