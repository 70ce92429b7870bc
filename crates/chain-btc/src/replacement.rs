//! Fee arithmetic and transaction shapes for replace-by-fee (BIP-125)
//! and child-pays-for-parent bumps.

use bitcoin::{Amount, ScriptBuf, TxOut};

use crate::error::{BtcError, Result};
use crate::policy::dust_threshold;
use crate::transaction::{assemble, estimate_vsize, UnsignedBtcTx};
use crate::utxo::Utxo;

/// Absolute fee a replacement of `replacement_vsize` must pay.
///
/// The new rate has to beat the original's rate, and the absolute fee must
/// cover the original fee plus the replacement's own relay cost at the
/// incremental relay rate.
pub fn replacement_fee(
    original_fee: u64,
    original_vsize: u64,
    replacement_vsize: u64,
    new_fee_rate: u64,
    incremental_relay_rate: u64,
) -> Result<u64> {
    if original_vsize == 0 || replacement_vsize == 0 {
        return Err(BtcError::ReplacementError("zero vsize".into()));
    }
    if fee_at(new_fee_rate, original_vsize)? <= original_fee {
        return Err(BtcError::ReplacementError(format!(
            "new rate {new_fee_rate} sat/vB does not exceed original rate {:.2} sat/vB",
            original_fee as f64 / original_vsize as f64
        )));
    }
    let by_rate = fee_at(new_fee_rate, replacement_vsize)?;
    let by_increment = fee_at(incremental_relay_rate, replacement_vsize)?
        .checked_add(original_fee)
        .ok_or_else(|| overflow(incremental_relay_rate))?;
    Ok(by_rate.max(by_increment))
}

fn fee_at(rate: u64, vsize: u64) -> Result<u64> {
    rate.checked_mul(vsize).ok_or_else(|| overflow(rate))
}

fn overflow(rate: u64) -> BtcError {
    BtcError::ReplacementError(format!("fee rate {rate} sat/vB overflows"))
}

/// A replacement transaction together with the fee it pays.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub unsigned: UnsignedBtcTx,
    pub fee_sat: u64,
}

/// Speed up: same inputs, same outputs, higher fee taken from the change output.
///
/// If the reduced change would fall below its dust limit the change output
/// is dropped and its value goes to the fee.
pub fn speed_up(
    inputs: &[Utxo],
    outputs: &[TxOut],
    change_index: Option<usize>,
    original_fee: u64,
    new_fee_rate: u64,
    incremental_relay_rate: u64,
) -> Result<Replacement> {
    let vsize = estimate_vsize(inputs.len(), outputs.len());
    let required = replacement_fee(original_fee, vsize, vsize, new_fee_rate, incremental_relay_rate)?;
    let delta = required - original_fee;

    let index = change_index
        .filter(|i| *i < outputs.len())
        .ok_or_else(|| BtcError::ReplacementError("no change output to absorb the fee bump".into()))?;

    let mut new_outputs = outputs.to_vec();
    let change = new_outputs[index].value.to_sat();
    let remaining = change.checked_sub(delta).ok_or(BtcError::InsufficientFunds {
        available: change,
        required: delta,
    })?;

    let fee_sat = if remaining < dust_threshold(&new_outputs[index].script_pubkey) {
        if new_outputs.len() == 1 {
            return Err(BtcError::InsufficientFunds {
                available: change,
                required: delta + dust_threshold(&new_outputs[index].script_pubkey),
            });
        }
        new_outputs.remove(index);
        original_fee + change
    } else {
        new_outputs[index].value = Amount::from_sat(remaining);
        required
    };

    let unsigned = assemble(inputs, new_outputs, true)?;
    Ok(Replacement { unsigned, fee_sat })
}

/// Cancel: spend the same inputs back to the wallet in a single output.
pub fn cancel(
    inputs: &[Utxo],
    destination: ScriptBuf,
    original_fee: u64,
    original_vsize: u64,
    new_fee_rate: u64,
    incremental_relay_rate: u64,
) -> Result<Replacement> {
    let vsize = estimate_vsize(inputs.len(), 1);
    let fee_sat = replacement_fee(
        original_fee,
        original_vsize,
        vsize,
        new_fee_rate,
        incremental_relay_rate,
    )?;

    let total: u64 = inputs.iter().map(|u| u.amount_sat).sum();
    let threshold = dust_threshold(&destination);
    let value = total
        .checked_sub(fee_sat)
        .filter(|v| *v >= threshold)
        .ok_or(BtcError::InsufficientFunds {
            available: total,
            required: fee_sat.saturating_add(threshold),
        })?;

    let unsigned = assemble(
        inputs,
        vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: destination,
        }],
        true,
    )?;
    Ok(Replacement { unsigned, fee_sat })
}

/// Fee the child must pay so the parent+child package reaches `target_rate`.
///
/// `target_rate * (parent_vsize + child_vsize) - parent_fee`, never less
/// than the child's own size at the target rate.
pub fn required_child_fee(
    parent_vsize: u64,
    parent_fee: u64,
    child_vsize: u64,
    target_rate: u64,
) -> Result<u64> {
    let package_vsize = parent_vsize
        .checked_add(child_vsize)
        .ok_or_else(|| BtcError::ReplacementError("package vsize overflows".into()))?;
    let package_fee = fee_at(target_rate, package_vsize)?;
    Ok(package_fee
        .saturating_sub(parent_fee)
        .max(fee_at(target_rate, child_vsize)?))
}

/// A CPFP child and everything it spends.
#[derive(Debug, Clone)]
pub struct CpfpChild {
    pub unsigned: UnsignedBtcTx,
    pub fee_sat: u64,
    /// Parent outputs first, then any wallet outputs added for fee budget.
    pub inputs: Vec<Utxo>,
}

/// Build a child spending every one of `parent_outputs` into a single
/// output to `destination`.
///
/// When the parent's outputs cannot pay the package fee and leave a
/// non-dust output, `wallet_utxos` are added largest first until they can.
pub fn build_cpfp_child(
    parent_outputs: &[Utxo],
    wallet_utxos: &[Utxo],
    destination: ScriptBuf,
    parent_vsize: u64,
    parent_fee: u64,
    target_rate: u64,
) -> Result<CpfpChild> {
    if parent_outputs.is_empty() {
        return Err(BtcError::InvalidSelection("no parent output to spend".into()));
    }
    let threshold = dust_threshold(&destination);
    let mut extra: Vec<&Utxo> = wallet_utxos.iter().filter(|u| !u.frozen).collect();
    extra.sort_by(|a, b| b.amount_sat.cmp(&a.amount_sat));

    let mut inputs = parent_outputs.to_vec();
    let mut extra = extra.into_iter();
    loop {
        let total = inputs.iter().fold(0u64, |acc, u| acc.saturating_add(u.amount_sat));
        let fee_sat = required_child_fee(parent_vsize, parent_fee, estimate_vsize(inputs.len(), 1), target_rate)?;
        if let Some(value) = total.checked_sub(fee_sat).filter(|v| *v >= threshold) {
            let unsigned = assemble(
                &inputs,
                vec![TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey: destination,
                }],
                true,
            )?;
            return Ok(CpfpChild {
                unsigned,
                fee_sat,
                inputs,
            });
        }
        match extra.next() {
            Some(utxo) => inputs.push(utxo.clone()),
            None => {
                return Err(BtcError::InsufficientFunds {
                    available: total,
                    required: fee_sat.saturating_add(threshold),
                })
            }
        }
    }
}
