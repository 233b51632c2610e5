//! Snapshot persistence.
//!
//! The exchange persists its entire state as one value per exchange name in
//! a durable key-value store. The store is an external collaborator: the
//! engine only depends on the [`SnapshotStore`] trait, and the bundled
//! [`FileStore`] keeps one JSON document per name under a data directory.
//!
//! Market snapshots carry the complete bet records of each market (every
//! status) sorted by bet counter; restart rebuilds each order book by
//! re-inserting active bets with remaining stake in counter order, which
//! reproduces (odds, insertion) order exactly.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::{Account, Bet, MarketInfo, UserId};

/// Persistence adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Full exchange state as persisted under the exchange name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    pub users: BTreeMap<UserId, Account>,
    pub counter: u64,
    pub markets: Vec<MarketSnapshot>,
}

/// One market's persisted state: info plus every bet record, split by side
/// and sorted by bet counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub info: MarketInfo,
    pub backs: Vec<Bet>,
    pub lays: Vec<Bet>,
}

/// Durable key-value store interface, keyed by exchange name. Only touched
/// during `start` and `stop`.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<ExchangeSnapshot>, StoreError>;
    fn save(&self, name: &str, snapshot: &ExchangeSnapshot) -> Result<(), StoreError>;
    fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// File-backed store: `<data_dir>/<name>.json`, written via a temp file and
/// an atomic rename so a crash mid-save never truncates the previous
/// snapshot.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl SnapshotStore for FileStore {
    fn load(&self, name: &str) -> Result<Option<ExchangeSnapshot>, StoreError> {
        let path = self.path(name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&self, name: &str, snapshot: &ExchangeSnapshot) -> Result<(), StoreError> {
        let tmp = self.dir.join(format!("{name}.json.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, self.path(name))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BetId, BetSide, MarketStatus};

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!("betmatch-store-{}", uuid::Uuid::new_v4()));
        FileStore::open(dir).expect("open store")
    }

    fn sample_snapshot() -> ExchangeSnapshot {
        let mut users = BTreeMap::new();
        let mut account = Account::new("Alice");
        account.balance = 1000;
        let bet_id = BetId {
            user: "u1".to_string(),
            market: "m1".to_string(),
            counter: 1,
        };
        account.bets.push(bet_id.clone());
        users.insert("u1".to_string(), account);

        ExchangeSnapshot {
            users,
            counter: 1,
            markets: vec![MarketSnapshot {
                info: MarketInfo {
                    id: "m1".to_string(),
                    description: "sample".to_string(),
                    status: MarketStatus::Active,
                    created_at: 0,
                },
                backs: vec![crate::models::Bet::new(bet_id, BetSide::Back, 1000, 150)],
                lays: vec![],
            }],
        }
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let store = temp_store();
        assert!(store.load("nope").expect("load").is_none());
    }

    #[test]
    fn save_load_delete_round_trip() {
        let store = temp_store();
        let snapshot = sample_snapshot();

        store.save("test", &snapshot).expect("save");
        let loaded = store.load("test").expect("load").expect("present");
        assert_eq!(loaded.counter, 1);
        assert_eq!(loaded.users["u1"].balance, 1000);
        assert_eq!(loaded.markets.len(), 1);
        assert_eq!(loaded.markets[0].backs.len(), 1);

        store.delete("test").expect("delete");
        assert!(store.load("test").expect("load").is_none());
        // deleting again stays quiet
        store.delete("test").expect("second delete");
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let store = temp_store();
        let mut snapshot = sample_snapshot();
        store.save("test", &snapshot).expect("save");

        snapshot.counter = 7;
        store.save("test", &snapshot).expect("second save");
        assert_eq!(store.load("test").expect("load").expect("present").counter, 7);
    }
}
