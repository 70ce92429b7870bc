//! Per-family build strategies.
//!
//! UTXO chains reserve outpoints picked by coin selection; account chains
//! reserve the next nonce or sequence. Everything after the build (signing,
//! broadcast, tracking) is shared.

use async_trait::async_trait;

use crate::builder::{plan_bitcoin, plan_evm, plan_solana, plan_xrp, Payload, UnsignedTransaction};
use crate::context::{now_ms, EngineContext};
use crate::error::{EngineError, ErrorKind, Result};
use crate::fees::{FeeEstimate, FeeRate};
use crate::registry::{ChainFamily, ChainSpec, Protocol};
use crate::reservation::ResourceKey;
use crate::types::{AccountKey, TransactionIntent};

#[async_trait]
pub(crate) trait FamilyHandler: Send + Sync {
    /// Tiered estimate from the first provider that answers; the static
    /// fallback, flagged degraded, when none does.
    async fn estimate_fee(&self, ctx: &EngineContext, spec: &ChainSpec) -> FeeEstimate {
        match ctx.fetch_fee_signal(spec.chain).await {
            Ok(signal) => ctx.fees.estimate(spec, Some(&signal)),
            Err(err) => {
                log::warn!("{}: no fee signal, using static fallback: {err}", spec.chain);
                ctx.fees.fallback(spec)
            }
        }
    }

    /// Resolve network state, reserve what the transaction spends and
    /// assemble it. Reservations are taken under `holder`.
    async fn build(
        &self,
        ctx: &EngineContext,
        spec: &ChainSpec,
        intent: &TransactionIntent,
        account: &AccountKey,
        rate: &FeeRate,
        holder: &str,
    ) -> Result<UnsignedTransaction>;
}

pub(crate) struct UtxoFamily;

pub(crate) struct AccountFamily;

static UTXO: UtxoFamily = UtxoFamily;
static ACCOUNT: AccountFamily = AccountFamily;

pub(crate) fn handler_for(spec: &ChainSpec) -> &'static dyn FamilyHandler {
    match spec.family {
        ChainFamily::Utxo => &UTXO,
        ChainFamily::Account => &ACCOUNT,
    }
}

fn unsigned(intent: &TransactionIntent, account: &AccountKey, holder: &str, payload: Payload) -> UnsignedTransaction {
    UnsignedTransaction {
        id: holder.to_string(),
        chain: account.chain,
        key: intent.from,
        from_address: account.address.clone(),
        payload,
        validity: None,
        resources: Vec::new(),
        relation: None,
    }
}

#[async_trait]
impl FamilyHandler for UtxoFamily {
    async fn build(
        &self,
        ctx: &EngineContext,
        spec: &ChainSpec,
        intent: &TransactionIntent,
        account: &AccountKey,
        rate: &FeeRate,
        holder: &str,
    ) -> Result<UnsignedTransaction> {
        let FeeRate::SatPerVbyte(sat_per_vb) = *rate else {
            return Err(EngineError::new(
                ErrorKind::Encoding,
                spec.chain,
                format!("{rate:?} is not a sat/vB rate"),
            ));
        };
        let utxos = ctx.fetch_utxos(account).await?;

        // Select and reserve under one lock so no concurrent build sees the
        // same outpoints as free.
        let mut table = ctx.reservations();
        let reserved = table.reserved_outpoints(account);
        let payload = plan_bitcoin(
            &ctx.registry,
            spec,
            intent,
            &account.address,
            sat_per_vb,
            &utxos,
            &reserved,
        )?;
        let keys: Vec<ResourceKey> = payload
            .inputs
            .iter()
            .map(|u| ResourceKey::utxo(account, u.outpoint()))
            .collect();
        table.acquire(&keys, holder, now_ms())?;
        drop(table);

        log::info!(
            "{}: built {holder} spending {} input(s), fee {} sat",
            spec.chain,
            keys.len(),
            payload.fee_sat
        );
        let mut tx = unsigned(intent, account, holder, Payload::Bitcoin(payload));
        tx.resources = keys;
        Ok(tx)
    }
}

#[async_trait]
impl FamilyHandler for AccountFamily {
    async fn build(
        &self,
        ctx: &EngineContext,
        spec: &ChainSpec,
        intent: &TransactionIntent,
        account: &AccountKey,
        rate: &FeeRate,
        holder: &str,
    ) -> Result<UnsignedTransaction> {
        let chain = spec.chain;
        let tx = match spec.protocol {
            Protocol::Evm => {
                let network_nonce = ctx.fetch_nonce(account).await?;
                let mut table = ctx.reservations();
                let nonce = table.acquire_next_nonce(account, network_nonce, holder, now_ms())?;
                let evm = plan_evm(&ctx.registry, spec, intent, nonce, rate).inspect_err(|_| {
                    table.release_holder(holder);
                })?;
                drop(table);

                log::info!("{chain}: built {holder} with nonce {nonce}");
                let mut tx = unsigned(intent, account, holder, Payload::Evm(evm));
                tx.resources = vec![ResourceKey::nonce(account, nonce)];
                tx
            }
            Protocol::Xrp => {
                let network_sequence = ctx.fetch_nonce(account).await?;
                let tip = ctx.fetch_tip(chain).await?;
                let mut table = ctx.reservations();
                let sequence = table.acquire_next_nonce(account, network_sequence, holder, now_ms())?;
                let (payment, validity) = plan_xrp(&ctx.registry, spec, intent, &account.address, sequence, &tip, rate)
                    .inspect_err(|_| {
                        table.release_holder(holder);
                    })?;
                drop(table);

                log::info!("{chain}: built {holder} with sequence {sequence}");
                let mut tx = unsigned(intent, account, holder, Payload::Xrp(payment));
                tx.resources = vec![ResourceKey::nonce(account, sequence)];
                tx.validity = validity;
                tx
            }
            // No account nonce; uniqueness comes from the blockhash and signature.
            Protocol::Solana => {
                let tip = ctx.fetch_tip(chain).await?;
                let (sol, fee_lamports, validity) =
                    plan_solana(&ctx.registry, spec, intent, &account.address, &tip, rate)?;
                log::info!("{chain}: built {holder} valid through slot {:?}", validity.map(|w| w.last_valid_height));
                let mut tx = unsigned(intent, account, holder, Payload::Solana { tx: sol, fee_lamports });
                tx.validity = validity;
                tx
            }
            Protocol::Bitcoin => {
                return Err(EngineError::new(
                    ErrorKind::UnsupportedChain,
                    chain,
                    "bitcoin is not an account chain",
                ))
            }
        };
        Ok(tx)
    }
}
