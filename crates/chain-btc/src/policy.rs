//! Relay policy constants: dust limits and the minimum relay and
//! incremental fee rates used by replace-by-fee.

use bitcoin::Script;

/// Default `-dustrelayfee` of Bitcoin Core, in sat/vB.
pub const DUST_RELAY_FEE_RATE: u64 = 3;

/// Default `-minrelaytxfee`, in sat/vB.
pub const MIN_RELAY_FEE_RATE: u64 = 1;

/// Default `-incrementalrelayfee` (BIP-125 rule 4), in sat/vB.
pub const INCREMENTAL_RELAY_FEE_RATE: u64 = 1;

/// Dust threshold of a P2WPKH output.
pub const P2WPKH_DUST_SAT: u64 = 294;

/// Dust threshold of a P2PKH output.
pub const P2PKH_DUST_SAT: u64 = 546;

/// Smallest value an output with this locking script may carry and still relay.
///
/// The output's serialized size is charged together with the size of the
/// input that would later spend it. Witness programs pay for a discounted
/// 67 vbyte input, everything else for a 148 byte legacy input.
pub fn dust_threshold(script_pubkey: &Script) -> u64 {
    if script_pubkey.is_op_return() {
        return 0;
    }
    let script_len = script_pubkey.len() as u64;
    let output_size = 8 + compact_size_len(script_len) + script_len;
    let spend_size = if script_pubkey.is_witness_program() {
        67
    } else {
        148
    };
    (output_size + spend_size) * DUST_RELAY_FEE_RATE
}

fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
