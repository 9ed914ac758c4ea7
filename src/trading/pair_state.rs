//! Per-pair lifecycle state: currently open and blacklisted pairs.
//!
//! A pair is in exactly one of three states:
//! - Fresh: in neither set
//! - Open: in `currently_open`
//! - Blacklisted: in `blacklist`
//!
//! Membership in both sets is a consistency error, checked on load and after
//! every mutation.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{error, info};

use crate::db::Database;
use crate::models::CurrencyPair;

use super::{EngineError, EngineResult};

/// Persisted key holding the currently-open set.
pub const CURRENTLY_OPEN_KEY: &str = "CURRENTLY_OPEN";
/// Persisted key holding the blacklist.
pub const BLACKLIST_KEY: &str = "BLACKLIST";

/// Lifecycle state of one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStatus {
    Fresh,
    Open,
    Blacklisted,
}

impl fmt::Display for PairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairStatus::Fresh => f.write_str("fresh"),
            PairStatus::Open => f.write_str("open"),
            PairStatus::Blacklisted => f.write_str("blacklisted"),
        }
    }
}

/// The two sets in their persisted, comma-joined form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedPairState {
    pub currently_open: String,
    pub blacklist: String,
}

/// In-memory pair sets owned by the engine.
#[derive(Debug, Clone, Default)]
pub struct PairStateStore {
    currently_open: BTreeSet<CurrencyPair>,
    blacklist: BTreeSet<CurrencyPair>,
}

fn parse_set(key: &str, raw: &str) -> EngineResult<BTreeSet<CurrencyPair>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            CurrencyPair::parse(entry)
                .map_err(|e| EngineError::CorruptState(format!("{} entry {:?}: {}", key, entry, e)))
        })
        .collect()
}

fn join_set(set: &BTreeSet<CurrencyPair>) -> String {
    set.iter().map(CurrencyPair::as_str).collect::<Vec<_>>().join(",")
}

impl PairStateStore {
    /// Validate and build the sets from their persisted form.
    pub fn from_persisted(persisted: &PersistedPairState) -> EngineResult<Self> {
        let currently_open = parse_set(CURRENTLY_OPEN_KEY, &persisted.currently_open)?;
        let blacklist = parse_set(BLACKLIST_KEY, &persisted.blacklist)?;

        if let Some(pair) = currently_open.intersection(&blacklist).next() {
            return Err(EngineError::CorruptState(format!(
                "{} is in both {} and {}",
                pair, CURRENTLY_OPEN_KEY, BLACKLIST_KEY
            )));
        }

        Ok(Self {
            currently_open,
            blacklist,
        })
    }

    pub fn to_persisted(&self) -> PersistedPairState {
        PersistedPairState {
            currently_open: join_set(&self.currently_open),
            blacklist: join_set(&self.blacklist),
        }
    }

    /// Load from the database. Any failure here must stop the process.
    pub async fn load(db: &Database) -> EngineResult<Self> {
        let persisted = db
            .load_pair_state()
            .await
            .map_err(EngineError::StateUnavailable)?;
        let store = Self::from_persisted(&persisted)?;

        info!(
            open = store.currently_open.len(),
            blacklisted = store.blacklist.len(),
            "Loaded pair state"
        );
        Ok(store)
    }

    /// Best-effort save. Failure is logged; the last good save stays on disk.
    pub async fn save(&self, db: &Database) -> bool {
        match db.save_pair_state(&self.to_persisted()).await {
            Ok(()) => {
                info!(
                    open = self.currently_open.len(),
                    blacklisted = self.blacklist.len(),
                    "Saved pair state"
                );
                true
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Unable to save pair state");
                false
            }
        }
    }

    pub fn status(&self, pair: &CurrencyPair) -> PairStatus {
        if self.currently_open.contains(pair) {
            PairStatus::Open
        } else if self.blacklist.contains(pair) {
            PairStatus::Blacklisted
        } else {
            PairStatus::Fresh
        }
    }

    pub fn is_open(&self, pair: &CurrencyPair) -> bool {
        self.currently_open.contains(pair)
    }

    pub fn is_blacklisted(&self, pair: &CurrencyPair) -> bool {
        self.blacklist.contains(pair)
    }

    /// Fresh -> Open.
    pub fn mark_open(&mut self, pair: &CurrencyPair) -> EngineResult<()> {
        if self.blacklist.contains(pair) {
            return Err(EngineError::Consistency(format!(
                "cannot open {}: it is blacklisted",
                pair
            )));
        }
        self.currently_open.insert(pair.clone());
        self.check(pair)
    }

    /// Open -> Blacklisted (or Fresh -> Blacklisted).
    pub fn mark_blacklisted(&mut self, pair: &CurrencyPair) -> EngineResult<()> {
        self.check(pair)?;
        self.currently_open.remove(pair);
        self.blacklist.insert(pair.clone());
        self.check(pair)
    }

    /// Any state -> Fresh. Returns the state the pair was in.
    pub fn clear(&mut self, pair: &CurrencyPair) -> EngineResult<PairStatus> {
        self.check(pair)?;
        let previous = self.status(pair);
        self.currently_open.remove(pair);
        self.blacklist.remove(pair);
        Ok(previous)
    }

    pub fn currently_open(&self) -> impl Iterator<Item = &CurrencyPair> {
        self.currently_open.iter()
    }

    pub fn blacklisted(&self) -> impl Iterator<Item = &CurrencyPair> {
        self.blacklist.iter()
    }

    fn check(&self, pair: &CurrencyPair) -> EngineResult<()> {
        if self.currently_open.contains(pair) && self.blacklist.contains(pair) {
            return Err(EngineError::Consistency(format!(
                "{} is both currently open and blacklisted",
                pair
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_both(&mut self, pair: &CurrencyPair) {
        self.currently_open.insert(pair.clone());
        self.blacklist.insert(pair.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(code: &str) -> CurrencyPair {
        CurrencyPair::parse(code).unwrap()
    }

    fn persisted(open: &str, blacklist: &str) -> PersistedPairState {
        PersistedPairState {
            currently_open: open.to_string(),
            blacklist: blacklist.to_string(),
        }
    }

    #[test]
    fn test_load_normalizes_entries() {
        let store = PairStateStore::from_persisted(&persisted(" eurusd ,GBPUSD,", "usdjpy")).unwrap();

        assert!(store.is_open(&pair("EURUSD")));
        assert!(store.is_open(&pair("GBPUSD")));
        assert!(store.is_blacklisted(&pair("USDJPY")));
        assert_eq!(store.status(&pair("AUDUSD")), PairStatus::Fresh);
    }

    #[test]
    fn test_empty_strings_are_empty_sets() {
        let store = PairStateStore::from_persisted(&persisted("", "")).unwrap();
        assert_eq!(store.currently_open().count(), 0);
        assert_eq!(store.blacklisted().count(), 0);
    }

    #[test]
    fn test_load_rejects_malformed_entry() {
        let err = PairStateStore::from_persisted(&persisted("EURUSD,EUR", "")).unwrap_err();
        assert!(matches!(err, EngineError::CorruptState(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_rejects_pair_in_both_sets() {
        let err = PairStateStore::from_persisted(&persisted("EURUSD", "eurusd")).unwrap_err();
        assert!(matches!(err, EngineError::CorruptState(_)));
    }

    #[test]
    fn test_persisted_roundtrip() {
        let original = PairStateStore::from_persisted(&persisted("gbpusd, EURUSD", " audusd")).unwrap();
        let saved = original.to_persisted();
        assert_eq!(saved, persisted("EURUSD,GBPUSD", "AUDUSD"));

        let reloaded = PairStateStore::from_persisted(&saved).unwrap();
        assert_eq!(
            reloaded.currently_open().collect::<Vec<_>>(),
            original.currently_open().collect::<Vec<_>>()
        );
        assert_eq!(
            reloaded.blacklisted().collect::<Vec<_>>(),
            original.blacklisted().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut store = PairStateStore::default();
        let eurusd = pair("EURUSD");

        store.mark_open(&eurusd).unwrap();
        assert_eq!(store.status(&eurusd), PairStatus::Open);

        store.mark_blacklisted(&eurusd).unwrap();
        assert_eq!(store.status(&eurusd), PairStatus::Blacklisted);
        assert!(!store.is_open(&eurusd));

        assert!(matches!(store.mark_open(&eurusd), Err(EngineError::Consistency(_))));

        assert_eq!(store.clear(&eurusd).unwrap(), PairStatus::Blacklisted);
        assert_eq!(store.status(&eurusd), PairStatus::Fresh);
        assert_eq!(store.clear(&eurusd).unwrap(), PairStatus::Fresh);
    }

    #[test]
    fn test_clear_detects_pair_in_both_sets() {
        let mut store = PairStateStore::default();
        let eurusd = pair("EURUSD");
        store.force_both(&eurusd);

        let err = store.clear(&eurusd).unwrap_err();
        assert!(matches!(err, EngineError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_save_then_load_through_database() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        // First run: nothing persisted yet.
        let mut store = PairStateStore::load(&db).await.unwrap();
        assert_eq!(store.currently_open().count(), 0);

        store.mark_open(&pair("EURUSD")).unwrap();
        store.mark_open(&pair("USDJPY")).unwrap();
        store.mark_blacklisted(&pair("USDJPY")).unwrap();
        assert!(store.save(&db).await);

        let reloaded = PairStateStore::load(&db).await.unwrap();
        assert_eq!(reloaded.status(&pair("EURUSD")), PairStatus::Open);
        assert_eq!(reloaded.status(&pair("USDJPY")), PairStatus::Blacklisted);
    }
}
