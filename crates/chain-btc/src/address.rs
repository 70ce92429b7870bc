use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::{CompressedPublicKey, Script, ScriptBuf};

use crate::error::{BtcError, Result};
use crate::network::BtcNetwork;

/// Derive a P2WPKH (native SegWit bech32) address from a compressed public key.
///
/// Returns `bc1...` on mainnet, `tb1...` on testnet/signet and `bcrt1...` on regtest.
pub fn pubkey_to_p2wpkh_address(pubkey_bytes: &[u8; 33], network: BtcNetwork) -> Result<String> {
    let compressed_pk = CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BtcError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;

    Ok(Address::p2wpkh(&compressed_pk, network.to_bitcoin_network()).to_string())
}

/// Parse an address string and require that it belongs to `network`.
pub fn parse_address(address: &str, network: BtcNetwork) -> Result<Address> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse {address}: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| BtcError::InvalidAddress(format!("{address} is not a {network} address: {e}")))
}

/// Validate a Bitcoin address string for the given network.
///
/// Returns `Ok(false)` for a well-formed address of another network.
pub fn validate_address(address: &str, network: BtcNetwork) -> Result<bool> {
    let parsed = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?;

    Ok(parsed.is_valid_for_network(network.to_bitcoin_network()))
}

/// Locking script paying to `address`.
pub fn script_for_address(address: &str, network: BtcNetwork) -> Result<ScriptBuf> {
    Ok(parse_address(address, network)?.script_pubkey())
}

/// Render a locking script back to an address, if it has a standard form.
pub fn address_from_script(script: &Script, network: BtcNetwork) -> Option<String> {
    Address::from_script(script, network.to_bitcoin_network())
        .ok()
        .map(|a| a.to_string())
}
