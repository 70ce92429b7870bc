//! Public facade: build → sign → broadcast → track.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chain_btc::utxo::Utxo;
use tokio::sync::broadcast;

use crate::builder::{Relation, UnsignedTransaction};
use crate::config::EngineConfig;
use crate::context::{now_ms, EngineContext};
use crate::decode::{decode_transfer, DecodedTransfer};
use crate::error::{EngineError, ErrorKind, Result};
use crate::family::handler_for;
use crate::fees::FeeEstimate;
use crate::keystore::KeyStore;
use crate::nonce::detect_gaps;
use crate::provider::ProviderSet;
use crate::registry::{ChainSpec, Registry};
use crate::reservation::Reservation;
use crate::signer::{self, SignedTransaction};
use crate::store::{PersistedState, StateStore};
use crate::tracker::{Observation, TrackedTransaction, TrackerEvent, TransitionContext, TxStatus};
use crate::types::{AccountKey, Chain, KeyRef, TransactionIntent};

pub struct Engine {
    pub(crate) ctx: EngineContext,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("chains", &self.ctx.registry.chains().collect::<Vec<_>>())
            .field("providers", &self.ctx.providers)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Load persisted state and start from where the last process stopped.
    ///
    /// In-flight reservations and tracked transactions resume as they were.
    /// Held reservations of unsigned builds are kept until released.
    pub fn open(
        config: EngineConfig,
        registry: Registry,
        keystore: Arc<dyn KeyStore>,
        providers: ProviderSet,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::unscoped(ErrorKind::Validation, e.to_string()))?;
        let state = store
            .load()
            .map_err(|e| EngineError::unscoped(ErrorKind::Persistence, e.to_string()))?;
        log::info!(
            "engine opened with {} reservation(s), {} tracked transaction(s)",
            state.reservations.len(),
            state.tracked.len()
        );
        Ok(Self {
            ctx: EngineContext::new(config, registry, keystore, providers, store, state),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    /// Receiving address of `key`.
    pub fn address(&self, key: &KeyRef) -> Result<String> {
        self.ctx.spec(key.chain)?;
        Ok(self.ctx.account_for(key)?.address)
    }

    pub async fn estimate_fee(&self, chain: Chain) -> Result<FeeEstimate> {
        let spec = self.ctx.spec(chain)?;
        Ok(handler_for(spec).estimate_fee(&self.ctx, spec).await)
    }

    /// Assemble an unsigned transaction and reserve what it spends.
    ///
    /// Losing a reservation race to a concurrent build triggers a fresh
    /// selection, up to `reservation.conflict_retries` times.
    pub async fn build(&self, intent: &TransactionIntent) -> Result<UnsignedTransaction> {
        let chain = intent.chain();
        let spec = self.ctx.spec(chain)?;
        let account = self.ctx.account_for(&intent.from)?;
        let lock = self.ctx.account_lock(&account);
        let _guard = lock.lock().await;

        let handler = handler_for(spec);
        let estimate = handler.estimate_fee(&self.ctx, spec).await;
        let rate = estimate.tier(intent.priority).rate;

        let retries = self.ctx.config.reservation.conflict_retries;
        let mut attempt = 0;
        let unsigned = loop {
            let holder = self.ctx.next_holder(chain);
            match handler.build(&self.ctx, spec, intent, &account, &rate, &holder).await {
                Err(err) if err.kind == ErrorKind::Conflict && attempt < retries => {
                    attempt += 1;
                    log::warn!("{chain}: reservation conflict for {account}, reselecting ({attempt}/{retries}): {}", err.cause);
                }
                other => break other?,
            }
        };
        self.ctx.persist()?;
        Ok(unsigned)
    }

    /// Sign a built transaction. Refuses once its validity window has passed;
    /// any failure releases the build's reservations.
    pub async fn sign(&self, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
        let outcome = self.check_and_sign(unsigned).await;
        if let Err(err) = &outcome {
            log::warn!("{}: signing {} failed, releasing its reservations: {err}", unsigned.chain, unsigned.id);
            self.release(unsigned)?;
        }
        outcome
    }

    async fn check_and_sign(&self, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
        if unsigned.validity.is_some() {
            let tip = self.ctx.fetch_tip(unsigned.chain).await?;
            unsigned.ensure_fresh(tip.height)?;
        }
        signer::sign(self.ctx.keystore.as_ref(), &self.ctx.registry, unsigned)
    }

    /// Submit signed bytes and start tracking them. Broadcasting the same
    /// transaction again returns the same txid without duplicating anything.
    pub async fn broadcast(&self, signed: &SignedTransaction) -> Result<String> {
        let chain = signed.chain();
        let providers = self.ctx.providers.for_chain(chain)?;
        let txid = match self.ctx.broadcaster.submit(providers, signed).await {
            Ok(txid) => txid,
            Err(err) => {
                // Nothing references the claims if this transaction never
                // reached a node; already-broadcast ones are in flight and stay.
                let released = self.ctx.reservations().release_holder(&signed.holder);
                if released > 0 {
                    self.ctx.persist()?;
                }
                return Err(err);
            }
        };

        {
            let mut table = self.ctx.reservations();
            table.bind(&signed.holder, &txid);
            if let Some(Relation::Replaces(original)) = signed.relation() {
                table.attach(original, &txid);
            }
        }
        {
            let mut tracker = self.ctx.tracker();
            let mut tracked = TrackedTransaction::new(
                txid.clone(),
                signed.key,
                signed.from_address(),
                now_ms(),
                signed.details().clone(),
            );
            if let Some(Relation::Bumps(parent)) = signed.relation() {
                tracked.bumps = Some(parent.clone());
            }
            if tracker.insert(tracked) {
                if let Some(Relation::Replaces(original)) = signed.relation() {
                    tracker.link(original, &txid);
                }
            }
        }
        self.ctx.persist()?;
        Ok(txid)
    }

    /// Build, sign and broadcast in one call.
    pub async fn send(&self, intent: &TransactionIntent) -> Result<String> {
        let unsigned = self.build(intent).await?;
        let signed = self.sign(&unsigned).await?;
        self.broadcast(&signed).await
    }

    /// Give back the reservations of a build that will not be broadcast.
    pub fn release(&self, unsigned: &UnsignedTransaction) -> Result<()> {
        self.release_holder(&unsigned.id)
    }

    /// Release by holder id, for builds lost across a restart.
    pub fn release_holder(&self, holder: &str) -> Result<()> {
        if self.ctx.reservations().release_holder(holder) > 0 {
            self.ctx.persist()?;
        }
        Ok(())
    }

    pub fn decode(&self, chain: Chain, raw: &[u8]) -> Result<DecodedTransfer> {
        decode_transfer(self.ctx.spec(chain)?, raw)
    }

    fn utxo_account(&self, key: &KeyRef) -> Result<AccountKey> {
        let spec = self.ctx.spec(key.chain)?;
        if !spec.is_utxo() {
            return Err(EngineError::validation(key.chain, "coin control applies to UTXO chains only"));
        }
        self.ctx.account_for(key)
    }

    /// Exclude an outpoint from automatic selection.
    pub fn freeze(&self, key: &KeyRef, outpoint: &str) -> Result<()> {
        let account = self.utxo_account(key)?;
        self.ctx.coin_control().entry(account).or_default().freeze(outpoint);
        self.ctx.persist()
    }

    pub fn unfreeze(&self, key: &KeyRef, outpoint: &str) -> Result<()> {
        let account = self.utxo_account(key)?;
        if let Some(control) = self.ctx.coin_control().get_mut(&account) {
            control.unfreeze(outpoint);
        }
        self.ctx.persist()
    }

    pub fn set_label(&self, key: &KeyRef, outpoint: &str, label: Option<String>) -> Result<()> {
        let account = self.utxo_account(key)?;
        self.ctx.coin_control().entry(account).or_default().set_label(outpoint, label);
        self.ctx.persist()
    }

    /// Spendable outputs with freeze flags and labels applied.
    pub async fn utxos(&self, key: &KeyRef) -> Result<Vec<Utxo>> {
        let account = self.utxo_account(key)?;
        self.ctx.fetch_utxos(&account).await
    }

    /// Nonces that must be filled before the account's later pending
    /// transactions can confirm.
    pub async fn nonce_gaps(&self, key: &KeyRef) -> Result<Vec<u64>> {
        let spec = self.ctx.spec(key.chain)?;
        if spec.is_utxo() {
            return Err(EngineError::validation(key.chain, "UTXO chains have no nonces"));
        }
        let account = self.ctx.account_for(key)?;
        let network_nonce = self.ctx.fetch_nonce(&account).await?;
        let pending = self
            .ctx
            .reservations()
            .nonces(&account)
            .split_off(&network_nonce);
        let gaps = detect_gaps(network_nonce.checked_sub(1), &pending);
        if !gaps.is_empty() {
            log::warn!("{}: {account} has nonce gap(s) {gaps:?}", key.chain);
        }
        Ok(gaps)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.ctx.tracker().subscribe()
    }

    pub fn tracked(&self, txid: &str) -> Option<TrackedTransaction> {
        self.ctx.tracker().get(txid).cloned()
    }

    pub fn tracked_all(&self) -> Vec<TrackedTransaction> {
        self.ctx.tracker().all()
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.ctx.reservations().snapshot()
    }

    pub fn snapshot(&self) -> PersistedState {
        self.ctx.snapshot()
    }

    /// Poll every non-terminal transaction once.
    pub async fn poll_once(&self) -> Result<usize> {
        self.poll_at(now_ms(), None).await
    }

    /// Poll as of `now_ms`, optionally only one chain. Returns how many
    /// statuses changed.
    pub async fn poll_at(&self, now_ms: u64, only: Option<Chain>) -> Result<usize> {
        let pollable = self.ctx.tracker().pollable();
        let mut changed = 0;
        for (txid, chain) in pollable {
            if only.is_some_and(|c| c != chain) {
                continue;
            }
            let spec = match self.ctx.spec(chain) {
                Ok(spec) => spec,
                Err(err) => {
                    log::warn!("{txid}: {err}");
                    continue;
                }
            };
            let observation = match self.ctx.fetch_status(chain, &txid).await {
                Ok(observation) => observation,
                Err(err) => {
                    log::warn!("{chain}: status of {txid} unavailable: {err}");
                    continue;
                }
            };
            if self.observe(spec, &txid, &observation, now_ms).is_some() {
                changed += 1;
            }
        }
        if changed > 0 {
            self.ctx.persist()?;
        }
        Ok(changed)
    }

    /// Apply one observation and propagate its effect on reservations and
    /// linked transactions.
    fn observe(&self, spec: &ChainSpec, txid: &str, observation: &Observation, now_ms: u64) -> Option<TxStatus> {
        let mut tracker = self.ctx.tracker();
        let ctx = TransitionContext {
            now_ms,
            drop_grace_ms: self.ctx.config.tracker.drop_grace_ms(spec),
            required_confirmations: spec.required_confirmations,
            awaiting_replacement: tracker.has_live_replacement(txid),
        };
        let status = tracker.apply(txid, observation, &ctx)?;
        let replaces = tracker.get(txid).and_then(|tx| tx.replaces.clone());

        match &status {
            TxStatus::Confirmed { .. } => {
                self.ctx.reservations().settle(txid);
                // Nothing else spending the same inputs or nonce can confirm now.
                let conflict = Observation::ConflictConfirmed { by: txid.to_string() };
                for other in tracker.replacement_chain(txid) {
                    match tracker.apply(&other, &conflict, &ctx) {
                        Some(replaced) => log::info!("{}: {other} is {replaced:?}", spec.chain),
                        None => log::debug!("{}: {other} already settled", spec.chain),
                    }
                }
            }
            TxStatus::Replaced { .. } => {
                self.ctx.reservations().settle(txid);
            }
            TxStatus::Dropped => {
                self.ctx.reservations().abandon(txid);
                if let Some(original) = replaces {
                    tracker.unlink(&original);
                }
            }
            _ => {}
        }
        Some(status)
    }

    /// Poll forever, each chain at its own interval.
    pub async fn run_tracker(self: Arc<Self>) {
        let mut last_polled: HashMap<Chain, Instant> = HashMap::new();
        loop {
            let chains: HashSet<Chain> = self.ctx.tracker().pollable().into_iter().map(|(_, c)| c).collect();
            for chain in chains {
                let Ok(spec) = self.ctx.spec(chain) else {
                    continue;
                };
                let interval = self.ctx.config.tracker.poll_interval(spec);
                if last_polled.get(&chain).is_some_and(|t| t.elapsed() < interval) {
                    continue;
                }
                last_polled.insert(chain, Instant::now());
                if let Err(err) = self.poll_at(now_ms(), Some(chain)).await {
                    log::error!("{chain}: tracker poll failed: {err}");
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}
