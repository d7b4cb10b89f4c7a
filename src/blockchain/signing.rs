// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction signing.
//!
//! Turns a contract call plus nonce and fee quote into a signed EIP-2718
//! envelope. The signer built from the [`PrivateKey`] lives only for the
//! duration of [`sign_call`].

use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    network::TxSignerSync,
    primitives::{Address, Bytes, TxHash, TxKind, U256},
};

use crate::error::{CustodyError, CustodyResult};
use crate::vault::PrivateKey;

/// Gas pricing for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeQuote {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Everything needed to sign a contract call.
#[derive(Debug, Clone)]
pub struct UnsignedCall {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fees: FeeQuote,
    pub to: Address,
    pub input: Bytes,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedCall {
    pub hash: TxHash,
    pub encoded: Bytes,
}

/// Sign `call` with `key`. Legacy transactions carry EIP-155 replay
/// protection.
pub fn sign_call(key: &PrivateKey, call: UnsignedCall) -> CustodyResult<SignedCall> {
    let signer = key.to_signer();

    let envelope: TxEnvelope = match call.fees {
        FeeQuote::Legacy { gas_price } => {
            let mut tx = TxLegacy {
                chain_id: Some(call.chain_id),
                nonce: call.nonce,
                gas_price,
                gas_limit: call.gas_limit,
                to: TxKind::Call(call.to),
                value: U256::ZERO,
                input: call.input,
            };
            let signature = signer
                .sign_transaction_sync(&mut tx)
                .map_err(|e| CustodyError::Signing(e.to_string()))?;
            tx.into_signed(signature).into()
        }
        FeeQuote::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let mut tx = TxEip1559 {
                chain_id: call.chain_id,
                nonce: call.nonce,
                gas_limit: call.gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                to: TxKind::Call(call.to),
                value: U256::ZERO,
                access_list: Default::default(),
                input: call.input,
            };
            let signature = signer
                .sign_transaction_sync(&mut tx)
                .map_err(|e| CustodyError::Signing(e.to_string()))?;
            tx.into_signed(signature).into()
        }
    };

    Ok(SignedCall {
        hash: *envelope.tx_hash(),
        encoded: Bytes::from(envelope.encoded_2718()),
    })
}
