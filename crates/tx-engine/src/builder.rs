//! Unsigned transaction assembly.
//!
//! The `plan_*` functions are pure: the caller resolves network state
//! (UTXOs, nonce, chain tip, fee rate) and reservations first.

use std::collections::BTreeSet;

use bitcoin::{Amount, ScriptBuf, TxOut};
use chain_btc::transaction::{build_p2wpkh_transaction, UnsignedBtcTx};
use chain_btc::utxo::{select_manual, select_utxos, Utxo};
use chain_eth::transaction::{build_transfer, EthFee, EthTransaction, TRANSFER_GAS_LIMIT};
use chain_sol::transaction::{SolTransaction, TransferParams, DEFAULT_TRANSFER_COMPUTE_UNITS};
use chain_xrp::transaction::{XrpMemo, XrpPayment};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorKind, Result, ResultExt};
use crate::fees::FeeRate;
use crate::provider::ChainTip;
use crate::registry::{ChainSpec, Registry};
use crate::reservation::ResourceKey;
use crate::types::{Chain, KeyRef, TransactionIntent};

/// Last block, slot or ledger a transaction can still be included in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub last_valid_height: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitcoinPayload {
    pub unsigned: UnsignedBtcTx,
    pub inputs: Vec<Utxo>,
    pub change_index: Option<usize>,
    pub fee_sat: u64,
    pub vsize: u64,
    pub rbf: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bitcoin(BitcoinPayload),
    Evm(EthTransaction),
    Solana { tx: SolTransaction, fee_lamports: u64 },
    Xrp(XrpPayment),
}

/// How a transaction relates to one already broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    /// Spends the same inputs or nonce (RBF, nonce replacement, cancel).
    Replaces(String),
    /// Spends an output of the unconfirmed parent (CPFP).
    Bumps(String),
}

/// Built but not yet signed. Owns the reservations listed in `resources`
/// until it is broadcast or released.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    /// Reservation holder id.
    pub id: String,
    pub chain: Chain,
    pub key: KeyRef,
    pub from_address: String,
    pub payload: Payload,
    pub validity: Option<ValidityWindow>,
    pub resources: Vec<ResourceKey>,
    pub relation: Option<Relation>,
}

impl UnsignedTransaction {
    /// Absolute fee in the chain's smallest unit (upper bound on EVM).
    pub fn fee(&self) -> u128 {
        match &self.payload {
            Payload::Bitcoin(p) => p.fee_sat as u128,
            Payload::Evm(tx) => tx.gas_limit as u128 * tx.fee.max_price_per_gas(),
            Payload::Solana { fee_lamports, .. } => *fee_lamports as u128,
            Payload::Xrp(payment) => payment.fee_drops as u128,
        }
    }

    /// Refuse to sign once the chain has moved past the validity window.
    pub fn ensure_fresh(&self, tip_height: u64) -> Result<()> {
        match self.validity {
            Some(window) if tip_height >= window.last_valid_height => Err(EngineError::new(
                ErrorKind::StaleValidityWindow,
                self.chain,
                format!(
                    "{} built for height <= {}, chain is at {tip_height}",
                    self.id, window.last_valid_height
                ),
            )),
            _ => Ok(()),
        }
    }

    pub fn details(&self) -> Result<TxDetails> {
        Ok(match &self.payload {
            Payload::Bitcoin(p) => TxDetails::Bitcoin {
                inputs: p.inputs.clone(),
                outputs: p
                    .unsigned
                    .tx
                    .output
                    .iter()
                    .map(BtcOutput::from_txout)
                    .collect(),
                change_index: p.change_index,
                fee_sat: p.fee_sat,
                vsize: p.vsize,
                rbf: p.rbf,
            },
            Payload::Evm(tx) => TxDetails::Evm { tx: tx.clone() },
            Payload::Solana { tx, fee_lamports } => {
                let transfer = chain_sol::decode_transfer(tx).on_chain(self.chain)?;
                TxDetails::Solana {
                    recipient: chain_sol::pubkey_to_address(&transfer.to),
                    lamports: transfer.lamports,
                    fee_lamports: *fee_lamports,
                    last_valid_height: self.validity.map_or(0, |w| w.last_valid_height),
                }
            }
            Payload::Xrp(payment) => TxDetails::Xrp {
                payment: payment.clone(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcOutput {
    pub script_pubkey: Vec<u8>,
    pub value_sat: u64,
}

impl BtcOutput {
    fn from_txout(out: &TxOut) -> Self {
        Self {
            script_pubkey: out.script_pubkey.to_bytes(),
            value_sat: out.value.to_sat(),
        }
    }

    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.value_sat),
            script_pubkey: ScriptBuf::from(self.script_pubkey.clone()),
        }
    }
}

/// What the engine remembers about a broadcast transaction, enough to
/// rebuild it for a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxDetails {
    Bitcoin {
        inputs: Vec<Utxo>,
        outputs: Vec<BtcOutput>,
        change_index: Option<usize>,
        fee_sat: u64,
        vsize: u64,
        rbf: bool,
    },
    Evm {
        tx: EthTransaction,
    },
    Solana {
        recipient: String,
        lamports: u64,
        fee_lamports: u64,
        last_valid_height: u64,
    },
    Xrp {
        payment: XrpPayment,
    },
}

impl TxDetails {
    pub fn fee(&self) -> u128 {
        match self {
            TxDetails::Bitcoin { fee_sat, .. } => *fee_sat as u128,
            TxDetails::Evm { tx } => tx.gas_limit as u128 * tx.fee.max_price_per_gas(),
            TxDetails::Solana { fee_lamports, .. } => *fee_lamports as u128,
            TxDetails::Xrp { payment } => payment.fee_drops as u128,
        }
    }
}

fn amount_u64(chain: Chain, amount: u128) -> Result<u64> {
    if amount == 0 {
        return Err(EngineError::validation(chain, "amount must be greater than zero"));
    }
    u64::try_from(amount)
        .map_err(|_| EngineError::validation(chain, format!("amount {amount} exceeds the chain's range")))
}

fn refuse_memo(chain: Chain, intent: &TransactionIntent) -> Result<()> {
    if intent.memo.is_some() {
        return Err(EngineError::validation(chain, "memos are not supported on this chain"));
    }
    Ok(())
}

fn refuse_destination_tag(chain: Chain, intent: &TransactionIntent) -> Result<()> {
    if intent.destination_tag.is_some() {
        return Err(EngineError::validation(
            chain,
            "destination tags are not supported on this chain",
        ));
    }
    Ok(())
}

fn refuse_coin_control(chain: Chain, intent: &TransactionIntent) -> Result<()> {
    if intent.inputs.is_some() {
        return Err(EngineError::validation(chain, "coin control applies to UTXO chains only"));
    }
    Ok(())
}

/// Select inputs and assemble a P2WPKH payment with change back to `from_address`.
///
/// `available` already carries coin-control flags; outpoints in `reserved`
/// belong to other in-flight builds.
pub fn plan_bitcoin(
    registry: &Registry,
    spec: &ChainSpec,
    intent: &TransactionIntent,
    from_address: &str,
    fee_rate: u64,
    available: &[Utxo],
    reserved: &BTreeSet<String>,
) -> Result<BitcoinPayload> {
    let chain = spec.chain;
    registry.validate_address(chain, &intent.recipient)?;
    refuse_memo(chain, intent)?;
    refuse_destination_tag(chain, intent)?;
    let amount = amount_u64(chain, intent.amount)?;
    let network = spec.btc_network()?;

    let selection = match &intent.inputs {
        Some(outpoints) => {
            let mut chosen = Vec::with_capacity(outpoints.len());
            for outpoint in outpoints {
                if reserved.contains(outpoint) {
                    return Err(EngineError::new(
                        ErrorKind::Conflict,
                        chain,
                        format!("{outpoint} is reserved by another transaction"),
                    ));
                }
                let utxo = available
                    .iter()
                    .find(|u| &u.outpoint() == outpoint)
                    .ok_or_else(|| EngineError::validation(chain, format!("{outpoint} is not spendable")))?;
                chosen.push(utxo.clone());
            }
            select_manual(&chosen, amount, fee_rate, spec.dust_threshold).on_chain(chain)?
        }
        None => {
            let free: Vec<Utxo> = available
                .iter()
                .filter(|u| !reserved.contains(&u.outpoint()))
                .cloned()
                .collect();
            select_utxos(&free, amount, fee_rate, spec.dust_threshold).on_chain(chain)?
        }
    };

    let unsigned = build_p2wpkh_transaction(
        &selection,
        &intent.recipient,
        amount,
        from_address,
        network,
        intent.rbf,
    )
    .on_chain(chain)?;

    Ok(BitcoinPayload {
        vsize: unsigned.estimated_vsize(),
        change_index: selection.has_change().then_some(1),
        fee_sat: selection.fee_sat,
        inputs: selection.selected,
        rbf: intent.rbf,
        unsigned,
    })
}

/// The fee fields an EVM chain accepts for `rate`. Legacy-only chains
/// pay the EIP-1559 cap as a flat gas price.
pub fn evm_fee(spec: &ChainSpec, rate: &FeeRate) -> Result<EthFee> {
    let fee = rate.to_eth_fee().ok_or_else(|| {
        EngineError::new(
            ErrorKind::Encoding,
            spec.chain,
            format!("{rate:?} is not an EVM fee"),
        )
    })?;
    Ok(match fee {
        EthFee::Eip1559 {
            max_fee_per_gas, ..
        } if !spec.supports_eip1559 => EthFee::Legacy {
            gas_price: max_fee_per_gas,
        },
        fee => fee,
    })
}

pub fn plan_evm(registry: &Registry, spec: &ChainSpec, intent: &TransactionIntent, nonce: u64, rate: &FeeRate) -> Result<EthTransaction> {
    let chain = spec.chain;
    registry.validate_address(chain, &intent.recipient)?;
    refuse_memo(chain, intent)?;
    refuse_destination_tag(chain, intent)?;
    refuse_coin_control(chain, intent)?;
    if intent.amount == 0 {
        return Err(EngineError::validation(chain, "amount must be greater than zero"));
    }
    build_transfer(
        spec.evm_chain_id()?,
        nonce,
        &intent.recipient,
        intent.amount,
        evm_fee(spec, rate)?,
        TRANSFER_GAS_LIMIT,
    )
    .on_chain(chain)
}

fn per_operation(spec: &ChainSpec, rate: &FeeRate) -> Result<u64> {
    match rate {
        FeeRate::PerOperation(fee) => Ok(*fee),
        other => Err(EngineError::new(
            ErrorKind::Encoding,
            spec.chain,
            format!("{other:?} is not a per-operation fee"),
        )),
    }
}

fn window(spec: &ChainSpec, tip: &ChainTip) -> Option<ValidityWindow> {
    spec.validity_window.map(|len| ValidityWindow {
        last_valid_height: tip.height + len,
    })
}

/// Transfer with a compute-unit price; valid until the blockhash expires.
pub fn plan_solana(
    registry: &Registry,
    spec: &ChainSpec,
    intent: &TransactionIntent,
    from_address: &str,
    tip: &ChainTip,
    rate: &FeeRate,
) -> Result<(SolTransaction, u64, Option<ValidityWindow>)> {
    let chain = spec.chain;
    registry.validate_address(chain, &intent.recipient)?;
    refuse_destination_tag(chain, intent)?;
    refuse_coin_control(chain, intent)?;
    let lamports = amount_u64(chain, intent.amount)?;
    let recent_blockhash = tip.recent_blockhash.ok_or_else(|| {
        EngineError::new(ErrorKind::StaleData, chain, "provider reported no recent blockhash")
    })?;
    let price = per_operation(spec, rate)?;

    let tx = chain_sol::build_transfer(&TransferParams {
        from: chain_sol::address_to_bytes(from_address).on_chain(chain)?,
        to: chain_sol::address_to_bytes(&intent.recipient).on_chain(chain)?,
        lamports,
        recent_blockhash,
        compute_unit_limit: Some(DEFAULT_TRANSFER_COMPUTE_UNITS),
        compute_unit_price: Some(price),
        memo: intent.memo.clone(),
    })
    .on_chain(chain)?;
    let fee = chain_sol::estimate_fee(1, DEFAULT_TRANSFER_COMPUTE_UNITS, price);
    Ok((tx, fee, window(spec, tip)))
}

/// Payment with `LastLedgerSequence` set `validity_window` ledgers ahead.
pub fn plan_xrp(
    registry: &Registry,
    spec: &ChainSpec,
    intent: &TransactionIntent,
    from_address: &str,
    sequence: u64,
    tip: &ChainTip,
    rate: &FeeRate,
) -> Result<(XrpPayment, Option<ValidityWindow>)> {
    let chain = spec.chain;
    registry.validate_address(chain, &intent.recipient)?;
    refuse_coin_control(chain, intent)?;
    let drops = amount_u64(chain, intent.amount)?;
    let fee = per_operation(spec, rate)?;
    let sequence = u32::try_from(sequence)
        .map_err(|_| EngineError::new(ErrorKind::Encoding, chain, format!("sequence {sequence} overflows")))?;

    let mut payment = XrpPayment::new(from_address, &intent.recipient, drops, fee, sequence).on_chain(chain)?;
    payment.destination_tag = intent.destination_tag;
    if let Some(memo) = &intent.memo {
        payment.memos.push(XrpMemo::text(memo));
    }

    let window = window(spec, tip);
    if let Some(w) = window {
        payment.last_ledger_sequence = Some(u32::try_from(w.last_valid_height).map_err(|_| {
            EngineError::new(ErrorKind::Encoding, chain, "ledger index overflows")
        })?);
    }
    Ok((payment, window))
}
