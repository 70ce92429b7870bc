//! Shared state behind the [`crate::engine::Engine`] facade.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use chain_btc::utxo::{CoinControl, Utxo};

use crate::broadcaster::Broadcaster;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind, Result};
use crate::fees::{FeeEstimator, FeeSignal};
use crate::keystore::KeyStore;
use crate::provider::{query, ChainTip, ProviderSet};
use crate::registry::{ChainSpec, Registry};
use crate::reservation::ReservationTable;
use crate::store::{CoinControlEntry, PersistedState, StateStore, STATE_VERSION};
use crate::tracker::{Observation, Tracker};
use crate::types::{AccountKey, Chain, KeyRef};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Recover the guard of a poisoned lock; the tables stay consistent because
/// no method panics halfway through a mutation.
fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) struct EngineContext {
    pub config: EngineConfig,
    pub registry: Registry,
    pub keystore: Arc<dyn KeyStore>,
    pub providers: ProviderSet,
    pub fees: FeeEstimator,
    pub broadcaster: Broadcaster,
    store: Arc<dyn StateStore>,
    reservations: Mutex<ReservationTable>,
    tracker: Mutex<Tracker>,
    coin_control: Mutex<BTreeMap<AccountKey, CoinControl>>,
    account_locks: Mutex<HashMap<AccountKey, Arc<tokio::sync::Mutex<()>>>>,
    holders: AtomicU64,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        registry: Registry,
        keystore: Arc<dyn KeyStore>,
        providers: ProviderSet,
        store: Arc<dyn StateStore>,
        state: PersistedState,
    ) -> Self {
        let mut tracker = Tracker::new();
        tracker.restore(state.tracked);
        let coin_control = state
            .coin_control
            .into_iter()
            .map(|entry| (entry.account, entry.control))
            .collect();

        Self {
            fees: FeeEstimator::new(config.fees.clone()),
            broadcaster: Broadcaster::new(config.broadcast.clone()),
            config,
            registry,
            keystore,
            providers,
            store,
            reservations: Mutex::new(ReservationTable::restore(state.reservations)),
            tracker: Mutex::new(tracker),
            coin_control: Mutex::new(coin_control),
            account_locks: Mutex::new(HashMap::new()),
            holders: AtomicU64::new(0),
        }
    }

    pub fn reservations(&self) -> MutexGuard<'_, ReservationTable> {
        guard(&self.reservations)
    }

    pub fn tracker(&self) -> MutexGuard<'_, Tracker> {
        guard(&self.tracker)
    }

    pub fn coin_control(&self) -> MutexGuard<'_, BTreeMap<AccountKey, CoinControl>> {
        guard(&self.coin_control)
    }

    /// Serializes builds and replacements per account. Held across awaits,
    /// hence the async mutex.
    pub fn account_lock(&self, account: &AccountKey) -> Arc<tokio::sync::Mutex<()>> {
        guard(&self.account_locks)
            .entry(account.clone())
            .or_default()
            .clone()
    }

    /// Fresh reservation holder id.
    pub fn next_holder(&self, chain: Chain) -> String {
        let n = self.holders.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{n}", chain.symbol().to_lowercase(), now_ms())
    }

    pub fn spec(&self, chain: Chain) -> Result<&ChainSpec> {
        self.registry.get(chain)
    }

    /// The address `key` controls.
    pub fn account_for(&self, key: &KeyRef) -> Result<AccountKey> {
        let pubkey = self
            .keystore
            .public_key(key)
            .map_err(|e| EngineError::new(ErrorKind::KeyStore, key.chain, e.to_string()))?;
        let address = self.registry.derive_address(key.chain, &pubkey)?;
        Ok(AccountKey::new(key.chain, address))
    }

    pub async fn fetch_utxos(&self, account: &AccountKey) -> Result<Vec<Utxo>> {
        let providers = self.providers.for_chain(account.chain)?;
        let address = account.address.as_str();
        let mut utxos = query(account.chain, providers, self.config.broadcast.timeout(), "utxo lookup", |p| async move {
            p.get_utxos(address).await
        })
        .await?;
        if let Some(control) = self.coin_control().get(account) {
            control.apply(&mut utxos);
        }
        Ok(utxos)
    }

    pub async fn fetch_nonce(&self, account: &AccountKey) -> Result<u64> {
        let providers = self.providers.for_chain(account.chain)?;
        let address = account.address.as_str();
        query(account.chain, providers, self.config.broadcast.timeout(), "nonce lookup", |p| async move {
            p.get_nonce(address).await
        })
        .await
    }

    pub async fn fetch_tip(&self, chain: Chain) -> Result<ChainTip> {
        let providers = self.providers.for_chain(chain)?;
        query(chain, providers, self.config.broadcast.timeout(), "chain tip", |p| async move {
            p.get_chain_tip().await
        })
        .await
    }

    pub async fn fetch_fee_signal(&self, chain: Chain) -> Result<FeeSignal> {
        let providers = self.providers.for_chain(chain)?;
        query(chain, providers, self.config.broadcast.timeout(), "fee signal", |p| async move {
            p.get_fee_signal().await
        })
        .await
    }

    pub async fn fetch_status(&self, chain: Chain, txid: &str) -> Result<Observation> {
        let providers = self.providers.for_chain(chain)?;
        query(chain, providers, self.config.broadcast.timeout(), "status lookup", |p| async move {
            p.get_tx_status(txid).await
        })
        .await
    }

    pub fn snapshot(&self) -> PersistedState {
        let reservations = self.reservations().snapshot();
        let tracked = self.tracker().all();
        let coin_control = self
            .coin_control()
            .iter()
            .map(|(account, control)| CoinControlEntry {
                account: account.clone(),
                control: control.clone(),
            })
            .collect();
        PersistedState {
            version: STATE_VERSION,
            reservations,
            tracked,
            coin_control,
        }
    }

    /// Write the current state through the store.
    pub fn persist(&self) -> Result<()> {
        let state = self.snapshot();
        self.store.save(&state).map_err(|e| {
            log::error!("failed to persist engine state: {e}");
            EngineError::unscoped(ErrorKind::Persistence, e.to_string())
        })
    }
}
