//! Snapshot and probability loading.
//!
//! Reads the aligned snapshot CSV into per-game [`GameFeed`]s and the optional
//! model-probability CSV into a [`PrecomputedProbability`]. Away-quoted rows are
//! converted to home space here, so everything downstream sees one price space.
//!
//! Rows that cannot be parsed at all are counted and dropped. Rows that parse
//! but carry bad values are kept: the engine skips them tick by tick.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use divlab_core::domain::{GameFeed, MarketSide, Quote, Snapshot};
use divlab_core::fingerprint::dataset_hash;
use divlab_core::probability::PrecomputedProbability;

/// Columns every snapshot file must have.
pub const REQUIRED_SNAPSHOT_COLUMNS: [&str; 6] = [
    "game_id",
    "game_date",
    "timestamp",
    "home_prob",
    "market_bid",
    "market_ask",
];

pub const REQUIRED_PROBABILITY_COLUMNS: [&str; 3] = ["game_id", "timestamp", "probability"];

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("no usable rows")]
    Empty,
}

/// One raw CSV row of the snapshot file.
#[derive(Debug, Deserialize)]
struct SnapshotRow {
    game_id: String,
    game_date: NaiveDate,
    timestamp: i64,
    home_prob: Option<f64>,
    market_bid: Option<f64>,
    market_ask: Option<f64>,
    #[serde(default)]
    market_mid: Option<f64>,
    #[serde(default)]
    market_side: Option<MarketSide>,
}

#[derive(Debug, Deserialize)]
struct ProbabilityRow {
    game_id: String,
    timestamp: i64,
    probability: Option<f64>,
}

/// Loaded snapshot feeds plus load diagnostics.
#[derive(Debug, Clone)]
pub struct LoadedSnapshots {
    /// One feed per game, sorted by game id; rows keep file order within a game.
    pub feeds: Vec<GameFeed>,
    /// BLAKE3 over all loaded feeds.
    pub dataset_hash: String,
    pub rows: usize,
    pub malformed_rows: usize,
    pub away_rows: usize,
    /// Games whose rows disagreed on `game_date` (first date kept).
    pub conflicting_dates: usize,
}

impl LoadedSnapshots {
    pub fn total_snapshots(&self) -> usize {
        self.feeds.iter().map(GameFeed::len).sum()
    }
}

/// Load the snapshot CSV at `path`.
pub fn load_snapshots(path: &Path) -> Result<LoadedSnapshots, LoadError> {
    let file = open(path)?;
    let loaded = read_snapshots(file)?;
    debug!(
        path = %path.display(),
        games = loaded.feeds.len(),
        rows = loaded.rows,
        "loaded snapshots"
    );
    Ok(loaded)
}

/// Parse snapshot CSV from any reader.
pub fn read_snapshots<R: Read>(reader: R) -> Result<LoadedSnapshots, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    check_columns(rdr.headers()?, &REQUIRED_SNAPSHOT_COLUMNS)?;

    let mut games: BTreeMap<String, (NaiveDate, Vec<Snapshot>)> = BTreeMap::new();
    let mut conflicted: BTreeSet<String> = BTreeSet::new();
    let (mut rows, mut malformed, mut away) = (0usize, 0usize, 0usize);

    for (line, record) in rdr.deserialize::<SnapshotRow>().enumerate() {
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                malformed += 1;
                debug!(line = line + 2, error = %e, "skipping malformed snapshot row");
                continue;
            }
        };
        rows += 1;
        if row.market_side == Some(MarketSide::Away) {
            away += 1;
        }
        let snapshot = to_home_space(&row);
        let entry = games
            .entry(row.game_id.clone())
            .or_insert_with(|| (row.game_date, Vec::new()));
        if entry.0 != row.game_date {
            conflicted.insert(row.game_id.clone());
        }
        entry.1.push(snapshot);
    }

    if games.is_empty() {
        return Err(LoadError::Empty);
    }
    if malformed > 0 {
        warn!(malformed, "dropped snapshot rows that could not be parsed");
    }
    for game_id in &conflicted {
        warn!(game_id = %game_id, "rows disagree on game_date; keeping the first");
    }

    let feeds: Vec<GameFeed> = games
        .into_iter()
        .map(|(id, (date, snaps))| GameFeed::new(id, date, snaps))
        .collect();
    let hash = dataset_hash(&feeds);

    Ok(LoadedSnapshots {
        feeds,
        dataset_hash: hash,
        rows,
        malformed_rows: malformed,
        away_rows: away,
        conflicting_dates: conflicted.len(),
    })
}

/// Convert a raw row into a home-space snapshot.
///
/// Away quotes are inverted and swapped: `home_bid = 1 − away_ask`,
/// `home_ask = 1 − away_bid`. An away quote that fails validation is still
/// complemented arithmetically so the engine rejects it for the same reason
/// it would have rejected the raw quote.
fn to_home_space(row: &SnapshotRow) -> Snapshot {
    let (bid, ask, mid) = match row.market_side.unwrap_or_default() {
        MarketSide::Home => (row.market_bid, row.market_ask, row.market_mid),
        MarketSide::Away => {
            let (bid, ask) = match (row.market_bid, row.market_ask) {
                (Some(b), Some(a)) => match Quote::from_away(b, a) {
                    Ok(q) => (Some(q.bid), Some(q.ask)),
                    Err(_) => (Some(1.0 - a), Some(1.0 - b)),
                },
                (b, a) => (a.map(|a| 1.0 - a), b.map(|b| 1.0 - b)),
            };
            (bid, ask, row.market_mid.map(|m| 1.0 - m))
        }
    };
    Snapshot {
        timestamp: row.timestamp,
        home_prob: row.home_prob,
        market_bid: bid,
        market_ask: ask,
        market_mid: mid,
    }
}

/// Load model probabilities keyed by `(game_id, timestamp)`.
///
/// The source is named after the file stem so outputs record which model ran.
pub fn load_probabilities(path: &Path) -> Result<PrecomputedProbability, LoadError> {
    let file = open(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("precomputed")
        .to_string();
    read_probabilities(file, name)
}

pub fn read_probabilities<R: Read>(
    reader: R,
    name: impl Into<String>,
) -> Result<PrecomputedProbability, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    check_columns(rdr.headers()?, &REQUIRED_PROBABILITY_COLUMNS)?;

    let mut source = PrecomputedProbability::new(name);
    let mut malformed = 0usize;
    for record in rdr.deserialize::<ProbabilityRow>() {
        match record {
            Ok(ProbabilityRow {
                game_id,
                timestamp,
                probability: Some(p),
            }) => source.insert(game_id, timestamp, p),
            // Blank probability: leave the tick without a model value.
            Ok(_) => {}
            Err(_) => malformed += 1,
        }
    }
    if malformed > 0 {
        warn!(malformed, "dropped probability rows that could not be parsed");
    }
    if source.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(source)
}

fn open(path: &Path) -> Result<std::fs::File, LoadError> {
    std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn check_columns(headers: &csv::StringRecord, required: &[&str]) -> Result<(), LoadError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LoadError::MissingColumns(missing))
    }
}
