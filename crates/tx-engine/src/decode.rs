//! Read signed bytes back into what they transfer.

use serde::Serialize;

use crate::error::{EngineError, ErrorKind, Result, ResultExt};
use crate::registry::{ChainSpec, Protocol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedOutput {
    /// `None` for scripts without an address form.
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedTransfer {
    /// Recovered signer, when the format carries one.
    pub sender: Option<String>,
    pub recipient: String,
    pub amount: u128,
    /// Every output on UTXO chains; empty elsewhere.
    pub outputs: Vec<DecodedOutput>,
    pub memo: Option<String>,
    pub destination_tag: Option<u32>,
    /// Nonce or sequence on account chains.
    pub nonce: Option<u64>,
}

pub fn decode_transfer(spec: &ChainSpec, raw: &[u8]) -> Result<DecodedTransfer> {
    let chain = spec.chain;
    match spec.protocol {
        Protocol::Bitcoin => {
            let network = spec.btc_network()?;
            let tx = chain_btc::transaction::decode_transaction(raw).on_chain(chain)?;
            let outputs: Vec<DecodedOutput> = tx
                .output
                .iter()
                .map(|out| DecodedOutput {
                    address: chain_btc::address::address_from_script(&out.script_pubkey, network),
                    value: out.value.to_sat(),
                })
                .collect();
            let first = outputs
                .first()
                .ok_or_else(|| EngineError::new(ErrorKind::Encoding, chain, "transaction has no outputs"))?;
            Ok(DecodedTransfer {
                sender: None,
                recipient: first.address.clone().unwrap_or_default(),
                amount: first.value as u128,
                outputs,
                memo: None,
                destination_tag: None,
                nonce: None,
            })
        }
        Protocol::Evm => {
            let (tx, signature) = chain_eth::transaction::decode_signed(raw).on_chain(chain)?;
            let sender = chain_eth::transaction::recover_sender(&tx, &signature).on_chain(chain)?;
            Ok(DecodedTransfer {
                sender: Some(sender),
                recipient: tx.to,
                amount: tx.value,
                outputs: Vec::new(),
                memo: None,
                destination_tag: None,
                nonce: Some(tx.nonce),
            })
        }
        Protocol::Solana => {
            let (_, tx) = chain_sol::decode_transaction(raw).on_chain(chain)?;
            let transfer = chain_sol::decode_transfer(&tx).on_chain(chain)?;
            Ok(DecodedTransfer {
                sender: Some(chain_sol::pubkey_to_address(&transfer.from)),
                recipient: chain_sol::pubkey_to_address(&transfer.to),
                amount: transfer.lamports as u128,
                outputs: Vec::new(),
                memo: transfer.memo,
                destination_tag: None,
                nonce: None,
            })
        }
        Protocol::Xrp => {
            let decoded = chain_xrp::transaction::decode_transaction(raw).on_chain(chain)?;
            let payment = decoded.payment;
            let memo = payment
                .memos
                .first()
                .map(|m| String::from_utf8_lossy(&m.memo_data).into_owned());
            Ok(DecodedTransfer {
                sender: Some(payment.account),
                recipient: payment.destination,
                amount: payment.amount_drops as u128,
                outputs: Vec::new(),
                memo,
                destination_tag: payment.destination_tag,
                nonce: Some(payment.sequence as u64),
            })
        }
    }
}
