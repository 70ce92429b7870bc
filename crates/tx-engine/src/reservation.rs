//! Exclusive claims on spendable resources.
//!
//! Every UTXO or account nonce an unsigned transaction depends on is held
//! here from build until the transaction settles or dies. A resource has at
//! most one holder; replacements attach their txid to the original's claims
//! instead of taking new ones.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorKind, Result};
use crate::nonce::next_nonce;
use crate::types::{AccountKey, Chain};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resource {
    /// `txid:vout`
    Utxo(String),
    Nonce(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub chain: Chain,
    pub account: String,
    pub resource: Resource,
}

impl ResourceKey {
    pub fn utxo(account: &AccountKey, outpoint: impl Into<String>) -> Self {
        Self {
            chain: account.chain,
            account: account.address.clone(),
            resource: Resource::Utxo(outpoint.into()),
        }
    }

    pub fn nonce(account: &AccountKey, nonce: u64) -> Self {
        Self {
            chain: account.chain,
            account: account.address.clone(),
            resource: Resource::Nonce(nonce),
        }
    }

    fn belongs_to(&self, account: &AccountKey) -> bool {
        self.chain == account.chain && self.account == account.address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationState {
    /// Claimed by a build that has not been broadcast yet.
    Held,
    /// At least one broadcast transaction spends it.
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub key: ResourceKey,
    pub holder: String,
    pub state: ReservationState,
    /// Broadcast transactions spending this resource: the original and any replacements.
    pub txids: Vec<String>,
    pub created_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct ReservationTable {
    entries: BTreeMap<ResourceKey, Reservation>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(reservations: Vec<Reservation>) -> Self {
        let entries = reservations
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();
        Self { entries }
    }

    pub fn snapshot(&self) -> Vec<Reservation> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Reservation> {
        self.entries.get(key)
    }

    /// Claim every key for `holder`, or none of them.
    pub fn acquire(&mut self, keys: &[ResourceKey], holder: &str, now_ms: u64) -> Result<()> {
        if let Some(taken) = keys
            .iter()
            .find(|k| self.entries.get(k).is_some_and(|r| r.holder != holder))
        {
            let owner = &self.entries[taken].holder;
            return Err(EngineError::new(
                ErrorKind::Conflict,
                taken.chain,
                format!("{:?} of {} is reserved by {owner}", taken.resource, taken.account),
            ));
        }

        for key in keys {
            self.entries.entry(key.clone()).or_insert_with(|| Reservation {
                key: key.clone(),
                holder: holder.to_string(),
                state: ReservationState::Held,
                txids: Vec::new(),
                created_at_ms: now_ms,
            });
        }
        log::debug!("{holder} reserved {} resource(s)", keys.len());
        Ok(())
    }

    /// Reserve the lowest free nonce at or above `network_nonce`.
    pub fn acquire_next_nonce(&mut self, account: &AccountKey, network_nonce: u64, holder: &str, now_ms: u64) -> Result<u64> {
        let nonce = next_nonce(network_nonce, &self.nonces(account));
        self.acquire(&[ResourceKey::nonce(account, nonce)], holder, now_ms)?;
        Ok(nonce)
    }

    /// Every nonce reserved for the account, held or in flight.
    pub fn nonces(&self, account: &AccountKey) -> BTreeSet<u64> {
        self.entries
            .keys()
            .filter(|k| k.belongs_to(account))
            .filter_map(|k| match k.resource {
                Resource::Nonce(n) => Some(n),
                Resource::Utxo(_) => None,
            })
            .collect()
    }

    pub fn reserved_outpoints(&self, account: &AccountKey) -> BTreeSet<String> {
        self.entries
            .keys()
            .filter(|k| k.belongs_to(account))
            .filter_map(|k| match &k.resource {
                Resource::Utxo(outpoint) => Some(outpoint.clone()),
                Resource::Nonce(_) => None,
            })
            .collect()
    }

    /// Keys spent by a broadcast transaction.
    pub fn keys_of(&self, txid: &str) -> Vec<ResourceKey> {
        self.entries
            .values()
            .filter(|r| r.txids.iter().any(|t| t == txid))
            .map(|r| r.key.clone())
            .collect()
    }

    /// Mark the holder's claims as spent by `txid`.
    pub fn bind(&mut self, holder: &str, txid: &str) {
        for r in self.entries.values_mut().filter(|r| r.holder == holder) {
            r.state = ReservationState::InFlight;
            if !r.txids.iter().any(|t| t == txid) {
                r.txids.push(txid.to_string());
            }
        }
    }

    /// Record that a replacement spends the same resources as `original`.
    pub fn attach(&mut self, original: &str, replacement: &str) {
        for r in self
            .entries
            .values_mut()
            .filter(|r| r.txids.iter().any(|t| t == original))
        {
            if !r.txids.iter().any(|t| t == replacement) {
                r.txids.push(replacement.to_string());
            }
        }
    }

    /// Drop claims that never made it to the network.
    pub fn release_holder(&mut self, holder: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, r| !(r.holder == holder && r.state == ReservationState::Held));
        let released = before - self.entries.len();
        if released > 0 {
            log::debug!("{holder} released {released} resource(s)");
        }
        released
    }

    /// `txid` confirmed: everything it spent is gone for good, including the
    /// claims shared with its competing replacements.
    pub fn settle(&mut self, txid: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, r| !r.txids.iter().any(|t| t == txid));
        before - self.entries.len()
    }

    /// `txid` dropped: detach it, freeing resources no other transaction spends.
    pub fn abandon(&mut self, txid: &str) -> usize {
        let before = self.entries.len();
        for r in self.entries.values_mut() {
            r.txids.retain(|t| t != txid);
        }
        self.entries
            .retain(|_, r| !(r.state == ReservationState::InFlight && r.txids.is_empty()));
        before - self.entries.len()
    }
}
