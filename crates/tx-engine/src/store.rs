//! Durable engine state: reservations, tracked transactions, coin control.

use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chain_btc::utxo::CoinControl;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reservation::Reservation;
use crate::tracker::TrackedTransaction;
use crate::types::AccountKey;

pub const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported state version {found}, expected {STATE_VERSION}")]
    Version { found: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinControlEntry {
    pub account: AccountKey,
    pub control: CoinControl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub tracked: Vec<TrackedTransaction>,
    #[serde(default)]
    pub coin_control: Vec<CoinControlEntry>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            reservations: Vec::new(),
            tracked: Vec::new(),
            coin_control: Vec::new(),
        }
    }
}

pub trait StateStore: Send + Sync {
    /// Empty state when nothing was saved yet.
    fn load(&self) -> Result<PersistedState, StoreError>;

    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

/// Keeps state for the life of the process only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.clone().unwrap_or_default())
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }
}

/// One JSON document on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PersistedState::default()),
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_reader(BufReader::new(file))?;
        if state.version != STATE_VERSION {
            return Err(StoreError::Version {
                found: state.version,
            });
        }
        Ok(state)
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let temp = self.temp_path();
        let file = fs::File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::{ReservationState, Resource, ResourceKey};
    use crate::types::Chain;

    fn sample() -> PersistedState {
        let account = AccountKey::new(Chain::Ethereum, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        let mut control = CoinControl::default();
        control.freeze("aa:0");
        PersistedState {
            version: STATE_VERSION,
            reservations: vec![Reservation {
                key: ResourceKey {
                    chain: Chain::Ethereum,
                    account: account.address.clone(),
                    resource: Resource::Nonce(7),
                },
                holder: "h1".into(),
                state: ReservationState::InFlight,
                txids: vec!["0xabc".into()],
                created_at_ms: 1,
            }],
            tracked: Vec::new(),
            coin_control: vec![CoinControlEntry { account, control }],
        }
    }

    #[test]
    fn missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json")).unwrap();
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json")).unwrap();
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn unknown_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99}"#).unwrap();
        let err = JsonFileStore::new(&path).unwrap().load().unwrap_err();
        assert!(matches!(err, StoreError::Version { found: 99 }));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), PersistedState::default());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }
}
