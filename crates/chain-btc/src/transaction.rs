use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::address::parse_address;
use crate::error::{BtcError, Result};
use crate::network::BtcNetwork;
use crate::policy::dust_threshold;
use crate::utxo::{Utxo, UtxoSelection};

/// Estimated virtual size of a P2WPKH input (in vbytes).
/// Breakdown: 41 bytes non-witness + ~27 witness bytes / 4 = ~68 vbytes per input.
pub const P2WPKH_INPUT_VBYTES: u64 = 68;

/// Estimated virtual size of a P2WPKH output (in vbytes).
pub const OUTPUT_VBYTES: u64 = 31;

/// Fixed transaction overhead (in vbytes): version + locktime + segwit marker/flag + counts.
pub const TX_OVERHEAD_VBYTES: u64 = 11;

/// An unsigned Bitcoin transaction ready for signing.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedBtcTx {
    /// The bitcoin transaction with empty witnesses.
    pub tx: Transaction,
    /// The outputs being spent, in input order. Needed for segwit sighashes.
    pub prevouts: Vec<TxOut>,
}

impl UnsignedBtcTx {
    pub fn input_total_sat(&self) -> u64 {
        self.prevouts.iter().map(|o| o.value.to_sat()).sum()
    }

    pub fn output_total_sat(&self) -> u64 {
        self.tx.output.iter().map(|o| o.value.to_sat()).sum()
    }

    pub fn fee_sat(&self) -> u64 {
        self.input_total_sat().saturating_sub(self.output_total_sat())
    }

    /// Virtual size the transaction will have once every input carries a P2WPKH witness.
    pub fn estimated_vsize(&self) -> u64 {
        estimate_vsize(self.tx.input.len(), self.tx.output.len())
    }

    pub fn signals_rbf(&self) -> bool {
        self.tx.is_explicitly_rbf()
    }
}

/// Estimate the virtual size of a P2WPKH transaction.
pub fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES + (num_inputs as u64 * P2WPKH_INPUT_VBYTES) + (num_outputs as u64 * OUTPUT_VBYTES)
}

/// Estimate the fee for a P2WPKH transaction: `estimated_vsize * fee_rate_sat_vbyte`.
pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate_sat_vbyte: u64) -> u64 {
    estimate_vsize(num_inputs, num_outputs) * fee_rate_sat_vbyte
}

/// Build an unsigned payment from a finished coin selection.
///
/// The recipient output comes first, change (if the selection kept any)
/// second. Every input signals BIP-125 replaceability unless `rbf` is false.
pub fn build_p2wpkh_transaction(
    selection: &UtxoSelection,
    recipient: &str,
    amount_sat: u64,
    change_address: &str,
    network: BtcNetwork,
    rbf: bool,
) -> Result<UnsignedBtcTx> {
    let recipient_script = parse_address(recipient, network)?.script_pubkey();
    let threshold = dust_threshold(&recipient_script);
    if amount_sat < threshold {
        return Err(BtcError::AmountBelowDust {
            amount: amount_sat,
            threshold,
        });
    }

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: recipient_script,
    }];
    if selection.has_change() {
        outputs.push(TxOut {
            value: Amount::from_sat(selection.change_sat),
            script_pubkey: parse_address(change_address, network)?.script_pubkey(),
        });
    }

    let unsigned = assemble(&selection.selected, outputs, rbf)?;
    if unsigned.fee_sat() != selection.fee_sat {
        return Err(BtcError::TransactionBuildError(format!(
            "selection fee {} does not balance transaction fee {}",
            selection.fee_sat,
            unsigned.fee_sat()
        )));
    }
    Ok(unsigned)
}

/// Assemble an unsigned version-2 transaction spending `inputs` into `outputs`.
pub fn assemble(inputs: &[Utxo], outputs: Vec<TxOut>, rbf: bool) -> Result<UnsignedBtcTx> {
    if inputs.is_empty() {
        return Err(BtcError::TransactionBuildError("no inputs".into()));
    }
    if outputs.is_empty() {
        return Err(BtcError::TransactionBuildError("no outputs".into()));
    }

    let sequence = if rbf {
        Sequence::ENABLE_RBF_NO_LOCKTIME
    } else {
        Sequence::ENABLE_LOCKTIME_NO_RBF
    };

    let mut tx_inputs = Vec::with_capacity(inputs.len());
    let mut prevouts = Vec::with_capacity(inputs.len());
    for utxo in inputs {
        let txid: Txid = utxo
            .txid
            .parse()
            .map_err(|e| BtcError::TransactionBuildError(format!("invalid txid {}: {e}", utxo.txid)))?;

        tx_inputs.push(TxIn {
            previous_output: OutPoint::new(txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::default(),
        });
        prevouts.push(TxOut {
            value: Amount::from_sat(utxo.amount_sat),
            script_pubkey: ScriptBuf::from(utxo.script_pubkey.clone()),
        });
    }

    let input_total: u64 = inputs.iter().map(|u| u.amount_sat).sum();
    let output_total: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();
    if output_total > input_total {
        return Err(BtcError::InsufficientFunds {
            available: input_total,
            required: output_total,
        });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: tx_inputs,
        output: outputs,
    };
    Ok(UnsignedBtcTx { tx, prevouts })
}

/// BIP-143 signature hashes (SIGHASH_ALL) for every input, in input order.
///
/// All inputs are assumed to be P2WPKH outputs of `pubkey`.
pub fn sighashes(unsigned: &UnsignedBtcTx, pubkey: &[u8; 33]) -> Result<Vec<[u8; 32]>> {
    let script_code = p2wpkh_script_code(pubkey)?;
    let mut cache = SighashCache::new(&unsigned.tx);

    (0..unsigned.tx.input.len())
        .map(|index| {
            let value = unsigned
                .prevouts
                .get(index)
                .ok_or_else(|| BtcError::SigningError(format!("missing prevout for input {index}")))?
                .value;
            cache
                .p2wpkh_signature_hash(index, &script_code, value, EcdsaSighashType::All)
                .map(|h| h.to_byte_array())
                .map_err(|e| BtcError::SigningError(format!("sighash computation failed: {e}")))
        })
        .collect()
}

/// Attach `[DER signature || SIGHASH_ALL, pubkey]` witnesses to every input.
///
/// `signatures` are compact 64-byte `r || s` values in input order. High-S
/// values are normalized before DER encoding.
pub fn finalize(
    unsigned: &UnsignedBtcTx,
    pubkey: &[u8; 33],
    signatures: &[[u8; 64]],
) -> Result<Transaction> {
    if signatures.len() != unsigned.tx.input.len() {
        return Err(BtcError::SigningError(format!(
            "expected {} signatures, got {}",
            unsigned.tx.input.len(),
            signatures.len()
        )));
    }

    let mut signed_tx = unsigned.tx.clone();
    for (input, compact) in signed_tx.input.iter_mut().zip(signatures) {
        let mut signature = Signature::from_compact(compact)
            .map_err(|e| BtcError::SigningError(format!("malformed signature: {e}")))?;
        signature.normalize_s();

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All as u8);

        let mut witness = Witness::new();
        witness.push(&sig_bytes);
        witness.push(pubkey);
        input.witness = witness;
    }
    Ok(signed_tx)
}

pub fn serialize(tx: &Transaction) -> Vec<u8> {
    bitcoin::consensus::serialize(tx)
}

/// Transaction id in display (big-endian hex) order.
pub fn txid(tx: &Transaction) -> String {
    tx.compute_txid().to_string()
}

pub fn decode_transaction(raw: &[u8]) -> Result<Transaction> {
    bitcoin::consensus::deserialize(raw)
        .map_err(|e| BtcError::DecodeError(format!("invalid transaction bytes: {e}")))
}

fn p2wpkh_script_code(pubkey: &[u8; 33]) -> Result<ScriptBuf> {
    let compressed = CompressedPublicKey::from_slice(pubkey)
        .map_err(|e| BtcError::InvalidPublicKey(format!("invalid compressed key: {e}")))?;
    Ok(ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{address_from_script, pubkey_to_p2wpkh_address};
    use crate::policy::P2WPKH_DUST_SAT;
    use crate::utxo::select_utxos;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};

    const RECIPIENT: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    struct TestKey {
        secret: SecretKey,
        pubkey: [u8; 33],
    }

    fn test_key(byte: u8) -> TestKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        let pubkey = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret).serialize();
        TestKey { secret, pubkey }
    }

    fn own_utxo(key: &TestKey, txid_byte: &str, amount_sat: u64) -> Utxo {
        let script = p2wpkh_script_code(&key.pubkey).unwrap();
        Utxo::new(txid_byte.repeat(64), 0, amount_sat, script.to_bytes())
    }

    fn sign_all(unsigned: &UnsignedBtcTx, key: &TestKey) -> Vec<[u8; 64]> {
        let secp = Secp256k1::new();
        sighashes(unsigned, &key.pubkey)
            .unwrap()
            .iter()
            .map(|h| {
                secp.sign_ecdsa(&Message::from_digest(*h), &key.secret)
                    .serialize_compact()
            })
            .collect()
    }

    #[test]
    fn estimate_fee_basic() {
        // 1 input, 2 outputs: 11 + 68 + 62 = 141 vbytes at 1 sat/vbyte.
        assert_eq!(estimate_fee(1, 2, 1), 141);
        assert_eq!(estimate_fee(2, 2, 10) - estimate_fee(1, 2, 10), P2WPKH_INPUT_VBYTES * 10);
        assert_eq!(estimate_fee(5, 5, 0), 0);
    }

    #[test]
    fn build_with_change_and_rbf() {
        let key = test_key(0x42);
        let utxos = vec![own_utxo(&key, "a", 100_000)];
        let change = pubkey_to_p2wpkh_address(&key.pubkey, BtcNetwork::Mainnet).unwrap();
        let selection = select_utxos(&utxos, 50_000, 1, P2WPKH_DUST_SAT).unwrap();

        let unsigned =
            build_p2wpkh_transaction(&selection, RECIPIENT, 50_000, &change, BtcNetwork::Mainnet, true)
                .unwrap();

        assert_eq!(unsigned.tx.output.len(), 2);
        assert_eq!(unsigned.tx.output[0].value.to_sat(), 50_000);
        assert_eq!(unsigned.fee_sat(), estimate_fee(1, 2, 1));
        assert!(unsigned.signals_rbf());
        assert_eq!(unsigned.estimated_vsize(), 141);
    }

    #[test]
    fn rbf_opt_out_uses_final_sequence() {
        let key = test_key(0x42);
        let utxos = vec![own_utxo(&key, "a", 100_000)];
        let selection = select_utxos(&utxos, 50_000, 1, P2WPKH_DUST_SAT).unwrap();
        let unsigned =
            build_p2wpkh_transaction(&selection, RECIPIENT, 50_000, RECIPIENT, BtcNetwork::Mainnet, false)
                .unwrap();
        assert!(!unsigned.signals_rbf());
        assert_eq!(unsigned.tx.input[0].sequence, Sequence::ENABLE_LOCKTIME_NO_RBF);
    }

    #[test]
    fn amount_below_dust_is_rejected() {
        let key = test_key(0x42);
        let utxos = vec![own_utxo(&key, "a", 100_000)];
        let selection = select_utxos(&utxos, 200, 1, P2WPKH_DUST_SAT).unwrap();
        let result =
            build_p2wpkh_transaction(&selection, RECIPIENT, 200, RECIPIENT, BtcNetwork::Mainnet, true);
        assert!(matches!(
            result,
            Err(BtcError::AmountBelowDust { threshold: 294, .. })
        ));
    }

    #[test]
    fn wrong_network_recipient_is_rejected() {
        let key = test_key(0x42);
        let utxos = vec![own_utxo(&key, "a", 100_000)];
        let selection = select_utxos(&utxos, 50_000, 1, P2WPKH_DUST_SAT).unwrap();
        let result =
            build_p2wpkh_transaction(&selection, RECIPIENT, 50_000, RECIPIENT, BtcNetwork::Testnet, true);
        assert!(matches!(result, Err(BtcError::InvalidAddress(_))));
    }

    #[test]
    fn assemble_rejects_overspend() {
        let key = test_key(0x42);
        let utxos = vec![own_utxo(&key, "a", 1_000)];
        let outputs = vec![TxOut {
            value: Amount::from_sat(2_000),
            script_pubkey: p2wpkh_script_code(&key.pubkey).unwrap(),
        }];
        assert!(matches!(
            assemble(&utxos, outputs, true),
            Err(BtcError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn finalize_then_decode_preserves_outputs() {
        let key = test_key(0x11);
        let utxos = vec![own_utxo(&key, "b", 80_000), own_utxo(&key, "c", 40_000)];
        let change = pubkey_to_p2wpkh_address(&key.pubkey, BtcNetwork::Mainnet).unwrap();
        let selection = select_utxos(&utxos, 100_000, 3, P2WPKH_DUST_SAT).unwrap();
        let unsigned =
            build_p2wpkh_transaction(&selection, RECIPIENT, 100_000, &change, BtcNetwork::Mainnet, true)
                .unwrap();

        let signed = finalize(&unsigned, &key.pubkey, &sign_all(&unsigned, &key)).unwrap();
        let raw = serialize(&signed);
        let decoded = decode_transaction(&raw).unwrap();

        assert_eq!(txid(&decoded), txid(&signed));
        assert_eq!(decoded.output[0].value.to_sat(), 100_000);
        assert_eq!(
            address_from_script(&decoded.output[0].script_pubkey, BtcNetwork::Mainnet).as_deref(),
            Some(RECIPIENT)
        );
        assert_eq!(decoded.input.len(), 2);
        assert!(decoded.input.iter().all(|i| i.witness.len() == 2));
        // The witness discount keeps the real vsize within a vbyte per input of the estimate.
        let actual = decoded.vsize() as u64;
        assert!(actual <= unsigned.estimated_vsize());
        assert!(actual + 2 >= unsigned.estimated_vsize());
    }

    #[test]
    fn finalize_normalizes_high_s() {
        let key = test_key(0x11);
        let utxos = vec![own_utxo(&key, "d", 50_000)];
        let selection = select_utxos(&utxos, 20_000, 1, P2WPKH_DUST_SAT).unwrap();
        let unsigned =
            build_p2wpkh_transaction(&selection, RECIPIENT, 20_000, RECIPIENT, BtcNetwork::Mainnet, true)
                .unwrap();

        let low = sign_all(&unsigned, &key)[0];
        // Negate s modulo the curve order to produce the high-S twin.
        let high = negate_s(&low);
        let a = finalize(&unsigned, &key.pubkey, &[low]).unwrap();
        let b = finalize(&unsigned, &key.pubkey, &[high]).unwrap();
        assert_eq!(a.input[0].witness, b.input[0].witness);
    }

    #[test]
    fn finalize_requires_one_signature_per_input() {
        let key = test_key(0x11);
        let utxos = vec![own_utxo(&key, "d", 50_000)];
        let selection = select_utxos(&utxos, 20_000, 1, P2WPKH_DUST_SAT).unwrap();
        let unsigned =
            build_p2wpkh_transaction(&selection, RECIPIENT, 20_000, RECIPIENT, BtcNetwork::Mainnet, true)
                .unwrap();
        assert!(matches!(
            finalize(&unsigned, &key.pubkey, &[]),
            Err(BtcError::SigningError(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_transaction(&[0x01, 0x02, 0x03]),
            Err(BtcError::DecodeError(_))
        ));
    }

    fn negate_s(sig: &[u8; 64]) -> [u8; 64] {
        const ORDER: [u8; 32] = [
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFE, 0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C,
            0xD0, 0x36, 0x41, 0x41,
        ];
        let mut out = *sig;
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let diff = ORDER[i] as i16 - sig[32 + i] as i16 - borrow;
            if diff < 0 {
                out[32 + i] = (diff + 256) as u8;
                borrow = 1;
            } else {
                out[32 + i] = diff as u8;
                borrow = 0;
            }
        }
        out
    }
}
