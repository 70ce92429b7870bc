//! Confirmation tracking.
//!
//! [`transition`] is a pure function from `(state, observation)` to the next
//! state. [`Tracker`] owns the tracked set and publishes every change on a
//! broadcast channel; the polling loop that feeds it lives in the engine.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::builder::TxDetails;
use crate::types::{Chain, KeyRef};

/// Events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Submitted,
    Pending,
    Confirming { confirmations: u32, required: u32 },
    /// `success` is false when the chain included the transaction but its
    /// execution failed (EVM revert, XRP `tec` result).
    Confirmed { success: bool },
    Dropped,
    Replaced { by: String },
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed { .. } | TxStatus::Dropped | TxStatus::Replaced { .. }
        )
    }
}

/// What a provider reports about a transaction at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Observation {
    /// Neither in the mempool nor in a recent block.
    Unknown,
    InMempool,
    InBlock { confirmations: u32 },
    /// Another transaction spending the same input or nonce was included.
    ConflictConfirmed { by: String },
    Failed { reason: String },
}

impl Observation {
    /// The network knows about the transaction.
    pub fn is_sighting(&self) -> bool {
        matches!(
            self,
            Observation::InMempool | Observation::InBlock { .. } | Observation::Failed { .. }
        )
    }
}

/// The part of a tracked transaction the transition function reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackState {
    pub status: TxStatus,
    /// When the transaction was first missing from every source, reset on sighting.
    pub unseen_since_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub now_ms: u64,
    pub drop_grace_ms: u64,
    pub required_confirmations: u32,
    /// A replacement of this transaction is still live; its absence is
    /// expected and must not count as a drop.
    pub awaiting_replacement: bool,
}

/// Next state of a tracked transaction.
///
/// `Submitted` behaves as a `Pending` that has not been observed yet, so a
/// conflicting confirmation reported before the first sighting still ends
/// in `Replaced`. A `Confirming` transaction missing from every source for
/// a full grace window has been reorganized out and falls back to
/// `Pending`, where the same absence then drops it.
pub fn transition(state: &TrackState, observation: &Observation, ctx: &TransitionContext) -> TrackState {
    if state.status.is_terminal() {
        return state.clone();
    }
    let seen = |status| TrackState {
        status,
        unseen_since_ms: None,
    };

    match observation {
        Observation::Failed { .. } => seen(TxStatus::Confirmed { success: false }),
        Observation::ConflictConfirmed { by } => seen(TxStatus::Replaced { by: by.clone() }),
        Observation::InBlock { confirmations } if *confirmations > 0 => {
            let previous = match state.status {
                TxStatus::Confirming { confirmations, .. } => confirmations,
                _ => 0,
            };
            let confirmations = (*confirmations).max(previous);
            let required = ctx.required_confirmations.max(1);
            if confirmations >= required {
                seen(TxStatus::Confirmed { success: true })
            } else {
                seen(TxStatus::Confirming {
                    confirmations,
                    required,
                })
            }
        }
        Observation::InBlock { .. } | Observation::InMempool => match state.status {
            TxStatus::Confirming { .. } => seen(state.status.clone()),
            _ => seen(TxStatus::Pending),
        },
        Observation::Unknown => {
            let since = state.unseen_since_ms.unwrap_or(ctx.now_ms);
            let expired = ctx.now_ms.saturating_sub(since) >= ctx.drop_grace_ms;
            let status = match state.status {
                // Providers lag behind reorgs as well as blocks.
                TxStatus::Confirming { .. } if !expired => state.status.clone(),
                TxStatus::Pending if expired && !ctx.awaiting_replacement => TxStatus::Dropped,
                _ => TxStatus::Pending,
            };
            TrackState {
                status,
                unseen_since_ms: Some(since),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTransaction {
    pub txid: String,
    pub chain: Chain,
    /// Key that signed it; replacements are signed with the same key.
    pub key: KeyRef,
    /// Sending address.
    pub account: String,
    pub submitted_at_ms: u64,
    pub status: TxStatus,
    pub unseen_since_ms: Option<u64>,
    /// Transaction this one replaces (RBF, nonce replacement, cancel).
    pub replaces: Option<String>,
    pub replaced_by: Option<String>,
    /// Unconfirmed parent this CPFP child pays for.
    #[serde(default)]
    pub bumps: Option<String>,
    /// A sighting after `Dropped` was already reported.
    #[serde(default)]
    pub reappeared: bool,
    pub details: TxDetails,
}

impl TrackedTransaction {
    pub fn new(txid: impl Into<String>, key: KeyRef, account: impl Into<String>, submitted_at_ms: u64, details: TxDetails) -> Self {
        Self {
            txid: txid.into(),
            chain: key.chain,
            key,
            account: account.into(),
            submitted_at_ms,
            status: TxStatus::Submitted,
            unseen_since_ms: None,
            replaces: None,
            replaced_by: None,
            bumps: None,
            reappeared: false,
            details,
        }
    }

    fn state(&self) -> TrackState {
        TrackState {
            status: self.status.clone(),
            unseen_since_ms: self.unseen_since_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum TrackerEvent {
    Submitted {
        txid: String,
        chain: Chain,
    },
    StatusChanged {
        txid: String,
        chain: Chain,
        from: TxStatus,
        to: TxStatus,
    },
    /// Seen again after it was declared dropped. The status stays `Dropped`.
    Reappeared {
        txid: String,
        chain: Chain,
        observation: Observation,
    },
}

#[derive(Debug)]
pub struct Tracker {
    tracked: BTreeMap<String, TrackedTransaction>,
    events: broadcast::Sender<TrackerEvent>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tracked: BTreeMap::new(),
            events,
        }
    }

    /// Reload persisted transactions without publishing events.
    pub fn restore(&mut self, tracked: Vec<TrackedTransaction>) {
        for tx in tracked {
            self.tracked.insert(tx.txid.clone(), tx);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Start tracking a freshly broadcast transaction. Re-inserting a known
    /// txid (idempotent rebroadcast) is a no-op.
    pub fn insert(&mut self, tx: TrackedTransaction) -> bool {
        if self.tracked.contains_key(&tx.txid) {
            return false;
        }
        self.publish(TrackerEvent::Submitted {
            txid: tx.txid.clone(),
            chain: tx.chain,
        });
        self.tracked.insert(tx.txid.clone(), tx);
        true
    }

    /// Record that `replacement` replaces `original`.
    pub fn link(&mut self, original: &str, replacement: &str) {
        if let Some(tx) = self.tracked.get_mut(original) {
            tx.replaced_by = Some(replacement.to_string());
        }
        if let Some(tx) = self.tracked.get_mut(replacement) {
            tx.replaces = Some(original.to_string());
        }
    }

    /// Forget a dead replacement so the original may be dropped or replaced again.
    pub fn unlink(&mut self, original: &str) {
        if let Some(tx) = self.tracked.get_mut(original) {
            tx.replaced_by = None;
        }
    }

    pub fn get(&self, txid: &str) -> Option<&TrackedTransaction> {
        self.tracked.get(txid)
    }

    pub fn all(&self) -> Vec<TrackedTransaction> {
        self.tracked.values().cloned().collect()
    }

    /// Transactions that still need polling: not terminal, or dropped but
    /// not yet seen again.
    pub fn pollable(&self) -> Vec<(String, Chain)> {
        self.tracked
            .values()
            .filter(|tx| !tx.status.is_terminal() || (tx.status == TxStatus::Dropped && !tx.reappeared))
            .map(|tx| (tx.txid.clone(), tx.chain))
            .collect()
    }

    /// Some later transaction in the replacement chain of `txid` exists and
    /// has not died.
    pub fn has_live_replacement(&self, txid: &str) -> bool {
        let mut seen = BTreeSet::from([txid.to_string()]);
        let mut next = self.tracked.get(txid).and_then(|tx| tx.replaced_by.as_deref());
        while let Some(by) = next.filter(|by| seen.insert(by.to_string())) {
            let Some(tx) = self.tracked.get(by) else {
                return false;
            };
            if !matches!(tx.status, TxStatus::Dropped | TxStatus::Replaced { .. }) {
                return true;
            }
            next = tx.replaced_by.as_deref();
        }
        false
    }

    /// Every other transaction linked to `txid` through `replaces` or
    /// `replaced_by`, in either direction and at any distance.
    pub fn replacement_chain(&self, txid: &str) -> Vec<String> {
        let mut seen = BTreeSet::from([txid.to_string()]);
        let mut queue = vec![txid.to_string()];
        let mut chain = Vec::new();
        while let Some(current) = queue.pop() {
            let Some(tx) = self.tracked.get(&current) else {
                continue;
            };
            for linked in [&tx.replaces, &tx.replaced_by].into_iter().flatten() {
                if seen.insert(linked.clone()) {
                    chain.push(linked.clone());
                    queue.push(linked.clone());
                }
            }
        }
        chain
    }

    /// Feed one observation; returns the new status when it changed.
    pub fn apply(&mut self, txid: &str, observation: &Observation, ctx: &TransitionContext) -> Option<TxStatus> {
        let tx = self.tracked.get_mut(txid)?;

        if tx.status == TxStatus::Dropped {
            if observation.is_sighting() && !tx.reappeared {
                tx.reappeared = true;
                log::warn!("{}: dropped transaction {txid} seen again: {observation:?}", tx.chain);
                let event = TrackerEvent::Reappeared {
                    txid: txid.to_string(),
                    chain: tx.chain,
                    observation: observation.clone(),
                };
                self.publish(event);
            }
            return None;
        }

        let next = transition(&tx.state(), observation, ctx);
        tx.unseen_since_ms = next.unseen_since_ms;
        if next.status == tx.status {
            return None;
        }

        let from = std::mem::replace(&mut tx.status, next.status.clone());
        log::info!("{}: {txid} {from:?} -> {:?}", tx.chain, next.status);
        let event = TrackerEvent::StatusChanged {
            txid: txid.to_string(),
            chain: tx.chain,
            from,
            to: next.status.clone(),
        };
        self.publish(event);
        Some(next.status)
    }

    fn publish(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
