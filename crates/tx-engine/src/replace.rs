//! Fee bumping of broadcast transactions.
//!
//! Replacements (Bitcoin RBF, EVM same-nonce) spend exactly what the
//! original spends, so they take no new reservations: on broadcast their
//! txid is attached to the original's claims. A CPFP child spends the
//! parent's change output, which it reserves like any new build.

use chain_btc::address::script_for_address;
use chain_btc::policy::INCREMENTAL_RELAY_FEE_RATE;
use chain_btc::replacement;
use chain_btc::utxo::Utxo;
use chain_eth::transaction::{build_transfer, TRANSFER_GAS_LIMIT};
use serde::{Deserialize, Serialize};

use crate::builder::{evm_fee, BitcoinPayload, BtcOutput, Payload, Relation, TxDetails, UnsignedTransaction};
use crate::context::now_ms;
use crate::engine::Engine;
use crate::error::{EngineError, ErrorKind, Result, ResultExt};
use crate::fees::FeeRate;
use crate::registry::ChainSpec;
use crate::reservation::ResourceKey;
use crate::tracker::{Observation, TrackedTransaction, TxStatus};
use crate::types::{AccountKey, Chain, Priority};

/// Fee for a replacement: a tier of the current estimate or an explicit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeBump {
    Tier(Priority),
    Rate(FeeRate),
}

fn unsupported(chain: Chain, what: &str) -> EngineError {
    EngineError::validation(chain, format!("{what} is not supported on {chain}"))
}

fn sat_per_vbyte(chain: Chain, rate: &FeeRate) -> Result<u64> {
    match rate {
        FeeRate::SatPerVbyte(r) => Ok(*r),
        other => Err(EngineError::validation(chain, format!("{other:?} is not a sat/vB rate"))),
    }
}

impl Engine {
    /// Rebroadcast `txid` paying more, same recipient and amount.
    pub async fn speed_up(&self, txid: &str, bump: FeeBump) -> Result<String> {
        let (tracked, spec) = self.replaceable(txid).await?;
        let chain = spec.chain;
        let lock = self.ctx.account_lock(&AccountKey::new(chain, tracked.account.clone()));
        let _guard = lock.lock().await;
        let rate = self.bump_rate(spec, bump).await?;

        let payload = match &tracked.details {
            TxDetails::Bitcoin {
                inputs,
                outputs,
                change_index,
                fee_sat,
                rbf,
                ..
            } => {
                if !rbf {
                    return Err(EngineError::validation(
                        chain,
                        format!("{txid} does not signal replace-by-fee; bump it with cpfp instead"),
                    ));
                }
                let txouts: Vec<_> = outputs.iter().map(BtcOutput::to_txout).collect();
                let rep = replacement::speed_up(
                    inputs,
                    &txouts,
                    *change_index,
                    *fee_sat,
                    sat_per_vbyte(chain, &rate)?,
                    INCREMENTAL_RELAY_FEE_RATE,
                )
                .on_chain(chain)?;
                // Change absorbed into the fee when it would have become dust.
                let change_index = change_index.filter(|_| rep.unsigned.tx.output.len() == outputs.len());
                Payload::Bitcoin(BitcoinPayload {
                    vsize: rep.unsigned.estimated_vsize(),
                    inputs: inputs.clone(),
                    change_index,
                    fee_sat: rep.fee_sat,
                    rbf: true,
                    unsigned: rep.unsigned,
                })
            }
            TxDetails::Evm { tx } => {
                let fee = evm_fee(spec, &rate)?.at_least_replacing(&tx.fee);
                Payload::Evm(build_transfer(tx.chain_id, tx.nonce, &tx.to, tx.value, fee, tx.gas_limit).on_chain(chain)?)
            }
            TxDetails::Solana { .. } | TxDetails::Xrp { .. } => return Err(unsupported(chain, "replacement")),
        };

        log::info!("{chain}: speeding up {txid}");
        self.submit_replacement(&tracked, payload, Relation::Replaces(txid.to_string()))
            .await
    }

    /// Replace `txid` with a transaction paying everything back to the sender.
    pub async fn cancel(&self, txid: &str, bump: FeeBump) -> Result<String> {
        let (tracked, spec) = self.replaceable(txid).await?;
        let chain = spec.chain;
        let lock = self.ctx.account_lock(&AccountKey::new(chain, tracked.account.clone()));
        let _guard = lock.lock().await;
        let rate = self.bump_rate(spec, bump).await?;

        let payload = match &tracked.details {
            TxDetails::Bitcoin {
                inputs,
                fee_sat,
                vsize,
                rbf,
                ..
            } => {
                if !rbf {
                    return Err(EngineError::validation(
                        chain,
                        format!("{txid} does not signal replace-by-fee and cannot be cancelled"),
                    ));
                }
                let destination = script_for_address(&tracked.account, spec.btc_network()?).on_chain(chain)?;
                let rep = replacement::cancel(
                    inputs,
                    destination,
                    *fee_sat,
                    *vsize,
                    sat_per_vbyte(chain, &rate)?,
                    INCREMENTAL_RELAY_FEE_RATE,
                )
                .on_chain(chain)?;
                Payload::Bitcoin(BitcoinPayload {
                    vsize: rep.unsigned.estimated_vsize(),
                    inputs: inputs.clone(),
                    change_index: Some(0),
                    fee_sat: rep.fee_sat,
                    rbf: true,
                    unsigned: rep.unsigned,
                })
            }
            TxDetails::Evm { tx } => {
                let fee = evm_fee(spec, &rate)?.at_least_replacing(&tx.fee);
                Payload::Evm(
                    build_transfer(tx.chain_id, tx.nonce, &tracked.account, 0, fee, TRANSFER_GAS_LIMIT)
                        .on_chain(chain)?,
                )
            }
            TxDetails::Solana { .. } | TxDetails::Xrp { .. } => return Err(unsupported(chain, "cancellation")),
        };

        log::info!("{chain}: cancelling {txid}");
        self.submit_replacement(&tracked, payload, Relation::Replaces(txid.to_string()))
            .await
    }

    /// Spend the parent's outputs back to the wallet with a fee that lifts
    /// the parent+child package to `target_rate` sat/vB.
    ///
    /// Every unreserved parent output paying the sender is spent. Confirmed
    /// wallet outputs are added when those alone cannot cover the fee.
    pub async fn cpfp(&self, txid: &str, target_rate: u64) -> Result<String> {
        let (tracked, spec) = self.replaceable(txid).await?;
        let chain = spec.chain;
        let TxDetails::Bitcoin {
            outputs,
            fee_sat,
            vsize,
            ..
        } = &tracked.details
        else {
            return Err(unsupported(chain, "child-pays-for-parent"));
        };
        let account = AccountKey::new(chain, tracked.account.clone());
        let lock = self.ctx.account_lock(&account);
        let _guard = lock.lock().await;

        let own_script = script_for_address(&tracked.account, spec.btc_network()?).on_chain(chain)?;
        let mut parent_outputs = Vec::new();
        for (index, output) in outputs.iter().enumerate() {
            if output.script_pubkey == own_script.as_bytes() {
                let vout = u32::try_from(index).map_err(|_| EngineError::validation(chain, "output index overflows"))?;
                parent_outputs.push(Utxo::new(txid, vout, output.value_sat, output.script_pubkey.clone()));
            }
        }
        let wallet: Vec<Utxo> = match self.ctx.fetch_utxos(&account).await {
            Ok(utxos) => utxos
                .into_iter()
                .filter(|u| u.confirmations > 0 && u.txid != txid)
                .collect(),
            Err(err) => {
                log::warn!("{chain}: no wallet outputs for the child of {txid}: {err}");
                Vec::new()
            }
        };

        let holder = self.ctx.next_holder(chain);
        let mut table = self.ctx.reservations();
        let reserved = table.reserved_outpoints(&account);
        parent_outputs.retain(|u| !reserved.contains(&u.outpoint()));
        if parent_outputs.is_empty() {
            return Err(EngineError::validation(
                chain,
                format!("{txid} has no unspent output paying {}", tracked.account),
            ));
        }
        let wallet: Vec<Utxo> = wallet.into_iter().filter(|u| !reserved.contains(&u.outpoint())).collect();

        let child = replacement::build_cpfp_child(&parent_outputs, &wallet, own_script, *vsize, *fee_sat, target_rate)
            .on_chain(chain)?;
        let keys: Vec<ResourceKey> = child
            .inputs
            .iter()
            .map(|u| ResourceKey::utxo(&account, u.outpoint()))
            .collect();
        table.acquire(&keys, &holder, now_ms())?;
        drop(table);

        log::info!(
            "{chain}: child of {txid} spends {} input(s) and pays {} sat",
            child.inputs.len(),
            child.fee_sat
        );
        let unsigned = UnsignedTransaction {
            id: holder,
            chain,
            key: tracked.key,
            from_address: tracked.account.clone(),
            payload: Payload::Bitcoin(BitcoinPayload {
                vsize: child.unsigned.estimated_vsize(),
                inputs: child.inputs,
                change_index: Some(0),
                fee_sat: child.fee_sat,
                rbf: true,
                unsigned: child.unsigned,
            }),
            validity: None,
            resources: keys,
            relation: Some(Relation::Bumps(txid.to_string())),
        };
        let signed = self.sign(&unsigned).await?;
        self.broadcast(&signed).await
    }

    /// The tracked transaction, if it can still be bumped.
    async fn replaceable(&self, txid: &str) -> Result<(TrackedTransaction, &ChainSpec)> {
        let tracked = self
            .ctx
            .tracker()
            .get(txid)
            .cloned()
            .ok_or_else(|| EngineError::unscoped(ErrorKind::StaleReference, format!("{txid} is not tracked")))?;
        let chain = tracked.chain;
        let spec = self.ctx.spec(chain)?;

        let stale = |cause: String| EngineError::new(ErrorKind::StaleReference, chain, cause);
        match &tracked.status {
            TxStatus::Confirmed { .. } => {
                return Err(EngineError::new(
                    ErrorKind::AlreadyConfirmed,
                    chain,
                    format!("{txid} is already confirmed"),
                ))
            }
            TxStatus::Dropped => return Err(stale(format!("{txid} was dropped"))),
            TxStatus::Replaced { by } => return Err(stale(format!("{txid} was replaced by {by}"))),
            _ => {}
        }
        if self.ctx.tracker().has_live_replacement(txid) {
            let by = tracked.replaced_by.as_deref().unwrap_or_default();
            return Err(stale(format!("{txid} is superseded by {by}; bump that instead")));
        }

        match self.ctx.fetch_status(chain, txid).await? {
            Observation::InBlock { confirmations } if confirmations > 0 => Err(EngineError::new(
                ErrorKind::AlreadyConfirmed,
                chain,
                format!("{txid} has {confirmations} confirmation(s)"),
            )),
            Observation::Failed { reason } => Err(EngineError::new(
                ErrorKind::AlreadyConfirmed,
                chain,
                format!("{txid} was included and failed: {reason}"),
            )),
            Observation::ConflictConfirmed { by } => Err(stale(format!("{by} confirmed in place of {txid}"))),
            _ => Ok((tracked, spec)),
        }
    }

    async fn bump_rate(&self, spec: &ChainSpec, bump: FeeBump) -> Result<FeeRate> {
        match bump {
            FeeBump::Rate(rate) => Ok(rate),
            FeeBump::Tier(priority) => Ok(self.estimate_fee(spec.chain).await?.tier(priority).rate),
        }
    }

    async fn submit_replacement(&self, original: &TrackedTransaction, payload: Payload, relation: Relation) -> Result<String> {
        let unsigned = UnsignedTransaction {
            id: self.ctx.next_holder(original.chain),
            chain: original.chain,
            key: original.key,
            from_address: original.account.clone(),
            payload,
            validity: None,
            resources: Vec::new(),
            relation: Some(relation),
        };
        let signed = self.sign(&unsigned).await?;
        self.broadcast(&signed).await
    }
}
