// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory node for tests.
//!
//! [`MockChain`] accepts signed transactions, decodes them and keeps them
//! in submission order so tests can assert on senders and nonces. It refuses
//! a second transaction with a nonce it has already seen for the same
//! sender, like a real node would.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use alloy::{
    consensus::{transaction::SignerRecoverable, Transaction, TxEnvelope},
    dyn_abi::DynSolValue,
    eips::eip2718::Decodable2718,
    primitives::{Address, Bytes, TxHash, U256},
};
use async_trait::async_trait;

use super::abi::AbiDescriptor;
use super::rpc::{ChainRpc, Eip1559Fees, RpcFailure};

/// Registry contract ABI used across tests.
pub const REGISTRY_ABI: &str = r#"[
  {"type":"function","name":"createUser","stateMutability":"nonpayable",
   "inputs":[{"name":"user","type":"address"},{"name":"userType","type":"uint256"},{"name":"name","type":"bytes32"}],
   "outputs":[]},
  {"type":"function","name":"changeUserStatus","stateMutability":"nonpayable",
   "inputs":[{"name":"user","type":"address"}],"outputs":[]},
  {"type":"function","name":"createProcess","stateMutability":"nonpayable",
   "inputs":[{"name":"supplier","type":"address"},{"name":"title","type":"bytes32"}],"outputs":[]},
  {"type":"function","name":"createProject","stateMutability":"nonpayable",
   "inputs":[{"name":"expediente","type":"uint256"},{"name":"client","type":"address"},
             {"name":"title","type":"bytes32"},{"name":"orderCode","type":"bytes32"}],
   "outputs":[]},
  {"type":"function","name":"getAllUsers","stateMutability":"view",
   "inputs":[],"outputs":[{"name":"","type":"address[]"}]},
  {"type":"function","name":"getAllClients","stateMutability":"view",
   "inputs":[],"outputs":[{"name":"","type":"address[]"}]},
  {"type":"function","name":"getAllProjects","stateMutability":"view",
   "inputs":[],"outputs":[{"name":"","type":"uint256[]"}]},
  {"type":"function","name":"getUserDetails","stateMutability":"view",
   "inputs":[{"name":"user","type":"address"}],
   "outputs":[{"name":"name","type":"bytes32"},{"name":"userType","type":"uint256"},{"name":"active","type":"bool"}]}
]"#;

pub fn registry_abi() -> AbiDescriptor {
    AbiDescriptor::from_json(REGISTRY_ABI).unwrap()
}

/// Selector of a registry method.
pub fn selector(method: &str) -> [u8; 4] {
    registry_abi().method(method).unwrap().selector
}

pub const GAS_PRICE: u128 = 60_000_000;
pub const GAS_ESTIMATE: u64 = 100_000;

/// A transaction as the mock node saw it.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub from: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub input: Bytes,
    pub gas_limit: u64,
    pub hash: TxHash,
}

#[derive(Default)]
struct MockState {
    submitted: Vec<SubmittedTx>,
    call_results: HashMap<[u8; 4], Result<Bytes, RpcFailure>>,
    estimate_failure: Option<RpcFailure>,
    next_send_failure: Option<RpcFailure>,
    lost_response: Option<String>,
    call_delay: Option<Duration>,
    send_delay: Option<Duration>,
    lagging_nonces: bool,
    balances: HashMap<Address, U256>,
    requests: usize,
}

pub struct MockChain {
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `eth_call`s to `selector` with the ABI encoding of `values`.
    pub fn respond(&self, selector: [u8; 4], values: Vec<DynSolValue>) {
        let data = DynSolValue::Tuple(values).abi_encode_params();
        self.state()
            .call_results
            .insert(selector, Ok(Bytes::from(data)));
    }

    /// Answer `eth_call`s to `selector` with `bytes` verbatim.
    pub fn respond_raw(&self, selector: [u8; 4], bytes: Bytes) {
        self.state().call_results.insert(selector, Ok(bytes));
    }

    pub fn fail_calls(&self, selector: [u8; 4], failure: RpcFailure) {
        self.state().call_results.insert(selector, Err(failure));
    }

    pub fn fail_estimates(&self, failure: Option<RpcFailure>) {
        self.state().estimate_failure = failure;
    }

    /// Refuse the next raw transaction with `failure` without recording it.
    pub fn fail_next_send(&self, failure: RpcFailure) {
        self.state().next_send_failure = Some(failure);
    }

    /// Accept the next raw transaction but answer with a transport error,
    /// as if the connection dropped before the response arrived.
    pub fn lose_next_response(&self, detail: &str) {
        self.state().lost_response = Some(detail.to_string());
    }

    pub fn set_call_delay(&self, delay: Option<Duration>) {
        self.state().call_delay = delay;
    }

    /// Delay the node's answer to a raw transaction. The transaction is
    /// recorded before the delay, as if the response got lost.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.state().send_delay = delay;
    }

    /// Report a pending nonce of zero regardless of submissions.
    pub fn lag_nonces(&self, lagging: bool) {
        self.state().lagging_nonces = lagging;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state().submitted.clone()
    }

    pub fn submitted_by(&self, from: Address) -> Vec<SubmittedTx> {
        self.state()
            .submitted
            .iter()
            .filter(|tx| tx.from == from)
            .cloned()
            .collect()
    }

    /// Number of RPC requests served so far.
    pub fn requests(&self) -> usize {
        self.state().requests
    }

    fn count_request(&self) {
        self.state().requests += 1;
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        self.count_request();
        Ok(self.chain_id)
    }

    async fn call(&self, _from: Option<Address>, _to: Address, input: Bytes) -> Result<Bytes, RpcFailure> {
        self.count_request();
        let delay = self.state().call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if input.len() < 4 {
            return Err(RpcFailure::Reverted { reason: None });
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&input[..4]);
        self.state()
            .call_results
            .get(&selector)
            .cloned()
            .unwrap_or(Err(RpcFailure::Reverted { reason: None }))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcFailure> {
        self.count_request();
        let state = self.state();
        if state.lagging_nonces {
            return Ok(0);
        }
        Ok(state.submitted.iter().filter(|tx| tx.from == address).count() as u64)
    }

    async fn estimate_gas(&self, _from: Address, _to: Address, _input: Bytes) -> Result<u64, RpcFailure> {
        self.count_request();
        match self.state().estimate_failure.clone() {
            Some(failure) => Err(failure),
            None => Ok(GAS_ESTIMATE),
        }
    }

    async fn gas_price(&self) -> Result<u128, RpcFailure> {
        self.count_request();
        Ok(GAS_PRICE)
    }

    async fn eip1559_fees(&self) -> Result<Eip1559Fees, RpcFailure> {
        self.count_request();
        Ok(Eip1559Fees {
            max_fee_per_gas: 2 * GAS_PRICE + 1,
            max_priority_fee_per_gas: 1,
        })
    }

    async fn send_raw_transaction(&self, encoded: Bytes) -> Result<TxHash, RpcFailure> {
        self.count_request();
        let envelope = TxEnvelope::decode_2718(&mut encoded.as_ref())
            .map_err(|e| RpcFailure::Transport(format!("undecodable transaction: {e}")))?;
        let from = envelope
            .recover_signer()
            .map_err(|e| RpcFailure::Transport(format!("bad signature: {e}")))?;

        let (delay, lost) = {
            let mut state = self.state();
            if let Some(failure) = state.next_send_failure.take() {
                return Err(failure);
            }
            if envelope.chain_id() != Some(self.chain_id) {
                return Err(RpcFailure::Transport("invalid chain id".to_string()));
            }
            let duplicate = state
                .submitted
                .iter()
                .any(|tx| tx.from == from && tx.nonce == envelope.nonce());
            if duplicate {
                return Err(RpcFailure::NonceRejected("nonce too low".to_string()));
            }
            state.submitted.push(SubmittedTx {
                from,
                nonce: envelope.nonce(),
                to: envelope.to(),
                input: envelope.input().clone(),
                gas_limit: envelope.gas_limit(),
                hash: *envelope.tx_hash(),
            });
            (state.send_delay, state.lost_response.take())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(detail) = lost {
            return Err(RpcFailure::Transport(detail));
        }
        Ok(*envelope.tx_hash())
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcFailure> {
        self.count_request();
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }
}
