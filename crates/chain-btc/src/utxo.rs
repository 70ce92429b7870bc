use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{BtcError, Result};
use crate::transaction::estimate_fee;

/// A single unspent transaction output (UTXO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction ID as a hex string (big-endian / display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub amount_sat: u64,
    /// The locking script (scriptPubKey) serialized bytes.
    pub script_pubkey: Vec<u8>,
    /// Confirmations reported by the provider; zero while in the mempool.
    #[serde(default)]
    pub confirmations: u32,
    /// Frozen outputs are never picked by automatic selection.
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub label: Option<String>,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32, amount_sat: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            txid: txid.into(),
            vout,
            amount_sat,
            script_pubkey,
            confirmations: 0,
            frozen: false,
            label: None,
        }
    }

    /// `txid:vout`, the key used by coin control and the reservation table.
    pub fn outpoint(&self) -> String {
        outpoint_key(&self.txid, self.vout)
    }
}

pub fn outpoint_key(txid: &str, vout: u32) -> String {
    format!("{txid}:{vout}")
}

/// Result of UTXO selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoSelection {
    /// The selected UTXOs, in input order.
    pub selected: Vec<Utxo>,
    /// Total value of the selected UTXOs in satoshis.
    pub total_sat: u64,
    /// Absolute fee paid, including any change folded in below the dust limit.
    pub fee_sat: u64,
    /// Change returned to the wallet; zero when no change output is created.
    pub change_sat: u64,
}

impl UtxoSelection {
    pub fn has_change(&self) -> bool {
        self.change_sat > 0
    }

    pub fn num_outputs(&self) -> usize {
        if self.has_change() {
            2
        } else {
            1
        }
    }
}

/// User-controlled freeze flags and labels, keyed by outpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinControl {
    frozen: BTreeSet<String>,
    labels: BTreeMap<String, String>,
}

impl CoinControl {
    pub fn freeze(&mut self, outpoint: &str) {
        self.frozen.insert(outpoint.to_string());
    }

    pub fn unfreeze(&mut self, outpoint: &str) {
        self.frozen.remove(outpoint);
    }

    pub fn is_frozen(&self, outpoint: &str) -> bool {
        self.frozen.contains(outpoint)
    }

    pub fn set_label(&mut self, outpoint: &str, label: Option<String>) {
        match label {
            Some(label) => {
                self.labels.insert(outpoint.to_string(), label);
            }
            None => {
                self.labels.remove(outpoint);
            }
        }
    }

    pub fn label(&self, outpoint: &str) -> Option<&str> {
        self.labels.get(outpoint).map(String::as_str)
    }

    /// Overlay the stored flags onto a freshly fetched UTXO list.
    pub fn apply(&self, utxos: &mut [Utxo]) {
        for utxo in utxos.iter_mut() {
            let key = utxo.outpoint();
            utxo.frozen = utxo.frozen || self.frozen.contains(&key);
            if let Some(label) = self.labels.get(&key) {
                utxo.label = Some(label.clone());
            }
        }
    }
}

/// Select UTXOs to pay `target_sat` at `fee_rate_sat_vbyte`.
///
/// Largest-first accumulation over the non-frozen outputs. The fee is
/// re-estimated after every added input. Change below `change_dust_sat` is
/// not created; it is paid to the miner instead.
pub fn select_utxos(
    utxos: &[Utxo],
    target_sat: u64,
    fee_rate_sat_vbyte: u64,
    change_dust_sat: u64,
) -> Result<UtxoSelection> {
    let mut sorted: Vec<&Utxo> = utxos.iter().filter(|u| !u.frozen).collect();
    sorted.sort_by(|a, b| b.amount_sat.cmp(&a.amount_sat));

    let mut selected: Vec<Utxo> = Vec::new();
    let mut total_sat: u64 = 0;

    for utxo in sorted {
        selected.push(utxo.clone());
        total_sat += utxo.amount_sat;

        if let Some(selection) =
            settle(&selected, total_sat, target_sat, fee_rate_sat_vbyte, change_dust_sat)
        {
            return Ok(selection);
        }
    }

    Err(BtcError::InsufficientFunds {
        available: total_sat,
        required: target_sat + estimate_fee(selected.len().max(1), 2, fee_rate_sat_vbyte),
    })
}

/// Use exactly the caller's chosen outputs (coin control).
///
/// Frozen and duplicate outputs are refused; sufficiency and the change
/// dust rule are enforced the same way as for automatic selection.
pub fn select_manual(
    chosen: &[Utxo],
    target_sat: u64,
    fee_rate_sat_vbyte: u64,
    change_dust_sat: u64,
) -> Result<UtxoSelection> {
    if chosen.is_empty() {
        return Err(BtcError::InvalidSelection("no outputs chosen".into()));
    }

    let mut seen = BTreeSet::new();
    for utxo in chosen {
        if utxo.frozen {
            return Err(BtcError::InvalidSelection(format!(
                "{} is frozen",
                utxo.outpoint()
            )));
        }
        if !seen.insert(utxo.outpoint()) {
            return Err(BtcError::InvalidSelection(format!(
                "{} chosen twice",
                utxo.outpoint()
            )));
        }
    }

    let total_sat: u64 = chosen.iter().map(|u| u.amount_sat).sum();
    settle(chosen, total_sat, target_sat, fee_rate_sat_vbyte, change_dust_sat).ok_or(
        BtcError::InsufficientFunds {
            available: total_sat,
            required: target_sat + estimate_fee(chosen.len(), 1, fee_rate_sat_vbyte),
        },
    )
}

/// Decide whether `selected` pays for the target, with or without change.
fn settle(
    selected: &[Utxo],
    total_sat: u64,
    target_sat: u64,
    fee_rate: u64,
    change_dust_sat: u64,
) -> Option<UtxoSelection> {
    let inputs = selected.len();
    let fee_with_change = estimate_fee(inputs, 2, fee_rate);

    if let Some(change) = total_sat.checked_sub(target_sat + fee_with_change) {
        if change >= change_dust_sat {
            return Some(UtxoSelection {
                selected: selected.to_vec(),
                total_sat,
                fee_sat: fee_with_change,
                change_sat: change,
            });
        }
    }

    // No change output: whatever is left over the single-output fee goes to
    // the miner.
    let fee_without_change = estimate_fee(inputs, 1, fee_rate);
    total_sat.checked_sub(target_sat + fee_without_change)?;
    Some(UtxoSelection {
        selected: selected.to_vec(),
        total_sat,
        fee_sat: total_sat - target_sat,
        change_sat: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::P2WPKH_DUST_SAT;

    fn make_utxo(txid: &str, vout: u32, amount_sat: u64) -> Utxo {
        Utxo::new(txid, vout, amount_sat, vec![0xaa; 22])
    }

    #[test]
    fn selects_single_large_utxo() {
        let utxos = vec![make_utxo("aaaa", 0, 100_000), make_utxo("bbbb", 0, 50_000)];
        let selection = select_utxos(&utxos, 40_000, 1, P2WPKH_DUST_SAT).unwrap();
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.total_sat, 100_000);
        assert_eq!(selection.fee_sat, estimate_fee(1, 2, 1));
        assert_eq!(selection.change_sat, 100_000 - 40_000 - selection.fee_sat);
    }

    #[test]
    fn largest_first_two_of_three() {
        let utxos = vec![
            make_utxo("a", 0, 1_000_000),
            make_utxo("b", 0, 900_000),
            make_utxo("c", 0, 600_000),
        ];
        let selection = select_utxos(&utxos, 1_500_000, 5, P2WPKH_DUST_SAT).unwrap();
        let picked: Vec<&str> = selection.selected.iter().map(|u| u.txid.as_str()).collect();
        assert_eq!(picked, vec!["a", "b"]);
        assert_eq!(selection.fee_sat, estimate_fee(2, 2, 5));
        assert_eq!(selection.change_sat, 400_000 - estimate_fee(2, 2, 5));
    }

    #[test]
    fn selection_total_covers_amount_and_fee() {
        let utxos: Vec<Utxo> = (0..10)
            .map(|i| make_utxo(&format!("{i:064x}"), i, 7_000 + i as u64 * 1_300))
            .collect();
        for target in [5_000u64, 20_000, 45_000, 70_000] {
            for rate in [1u64, 3, 12] {
                if let Ok(sel) = select_utxos(&utxos, target, rate, P2WPKH_DUST_SAT) {
                    assert!(sel.total_sat >= target + sel.fee_sat);
                    assert_eq!(sel.total_sat, target + sel.fee_sat + sel.change_sat);
                    assert!(sel.fee_sat >= estimate_fee(sel.selected.len(), sel.num_outputs(), rate));
                }
            }
        }
    }

    #[test]
    fn dust_change_is_folded_into_fee() {
        let utxos = vec![make_utxo("aaaa", 0, 100_000)];
        let fee_one_output = estimate_fee(1, 1, 1);
        let target = 100_000 - fee_one_output - 100;
        let selection = select_utxos(&utxos, target, 1, P2WPKH_DUST_SAT).unwrap();
        assert!(!selection.has_change());
        assert_eq!(selection.fee_sat, fee_one_output + 100);
    }

    #[test]
    fn frozen_utxos_are_skipped() {
        let mut big = make_utxo("big", 0, 1_000_000);
        big.frozen = true;
        let utxos = vec![big, make_utxo("small", 0, 50_000)];
        let selection = select_utxos(&utxos, 10_000, 1, P2WPKH_DUST_SAT).unwrap();
        assert_eq!(selection.selected[0].txid, "small");
    }

    #[test]
    fn insufficient_funds_reports_amounts() {
        let utxos = vec![make_utxo("aaaa", 0, 1_000)];
        match select_utxos(&utxos, 500_000, 1, P2WPKH_DUST_SAT) {
            Err(BtcError::InsufficientFunds { available, required }) => {
                assert_eq!(available, 1_000);
                assert!(required > 500_000);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn empty_set_is_insufficient() {
        assert!(matches!(
            select_utxos(&[], 1_000, 1, P2WPKH_DUST_SAT),
            Err(BtcError::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn manual_selection_uses_exact_set() {
        let chosen = vec![make_utxo("x", 0, 30_000), make_utxo("y", 1, 30_000)];
        let selection = select_manual(&chosen, 20_000, 2, P2WPKH_DUST_SAT).unwrap();
        assert_eq!(selection.selected.len(), 2);
        assert_eq!(selection.total_sat, 60_000);
    }

    #[test]
    fn manual_selection_still_checks_sufficiency() {
        let chosen = vec![make_utxo("x", 0, 10_000)];
        assert!(matches!(
            select_manual(&chosen, 20_000, 2, P2WPKH_DUST_SAT),
            Err(BtcError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn manual_selection_refuses_frozen_and_duplicates() {
        let mut frozen = make_utxo("x", 0, 50_000);
        frozen.frozen = true;
        assert!(matches!(
            select_manual(&[frozen], 1_000, 1, P2WPKH_DUST_SAT),
            Err(BtcError::InvalidSelection(_))
        ));

        let dup = make_utxo("y", 0, 50_000);
        assert!(matches!(
            select_manual(&[dup.clone(), dup], 1_000, 1, P2WPKH_DUST_SAT),
            Err(BtcError::InvalidSelection(_))
        ));
    }

    #[test]
    fn coin_control_applies_freeze_and_label() {
        let mut control = CoinControl::default();
        control.freeze("aaaa:0");
        control.set_label("bbbb:1", Some("savings".into()));

        let mut utxos = vec![make_utxo("aaaa", 0, 1), make_utxo("bbbb", 1, 2)];
        control.apply(&mut utxos);
        assert!(utxos[0].frozen);
        assert!(!utxos[1].frozen);
        assert_eq!(utxos[1].label.as_deref(), Some("savings"));

        control.unfreeze("aaaa:0");
        control.set_label("bbbb:1", None);
        assert!(!control.is_frozen("aaaa:0"));
        assert_eq!(control.label("bbbb:1"), None);
    }

    #[test]
    fn utxo_deserializes_without_coin_control_fields() {
        let json = r#"{"txid":"ab","vout":1,"amount_sat":5,"script_pubkey":[0,20]}"#;
        let utxo: Utxo = serde_json::from_str(json).unwrap();
        assert!(!utxo.frozen);
        assert_eq!(utxo.outpoint(), "ab:1");
    }
}
