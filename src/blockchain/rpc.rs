// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Node access.
//!
//! [`ChainRpc`] is the narrow set of JSON-RPC calls the gateway needs.
//! [`HttpChainRpc`] implements it over an alloy HTTP provider; tests use an
//! in-memory node instead.

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    transports::TransportError,
};
use async_trait::async_trait;

use crate::error::{CustodyError, CustodyResult};

/// Fallback base fee when the latest block carries none (1 gwei).
const DEFAULT_BASE_FEE: u128 = 1_000_000_000;

/// Priority tip offered on EIP-1559 networks (1.5 gwei).
const PRIORITY_FEE: u128 = 1_500_000_000;

/// Node error messages that mean the nonce was already used or is pending.
const NONCE_REJECTIONS: [&str; 4] = [
    "nonce too low",
    "already known",
    "replacement transaction underpriced",
    "transaction with same nonce",
];

/// How a node request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcFailure {
    /// Node unreachable, HTTP failure or malformed response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The EVM reverted during `eth_call` or `eth_estimateGas`, or the node
    /// refused the transaction for execution reasons.
    #[error("execution reverted: {}", reason.as_deref().unwrap_or("no reason given"))]
    Reverted { reason: Option<String> },

    /// The node refused the nonce.
    #[error("nonce rejected: {0}")]
    NonceRejected(String),
}

impl From<RpcFailure> for CustodyError {
    /// Outside of a send, a nonce rejection is just a failed remote call.
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transport(detail) | RpcFailure::NonceRejected(detail) => {
                CustodyError::RemoteCall(detail)
            }
            RpcFailure::Reverted { reason } => CustodyError::ContractExecution { reason },
        }
    }
}

/// EIP-1559 fee caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eip1559Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// JSON-RPC surface used by the custody core.
#[async_trait]
pub trait ChainRpc: Send + Sync + 'static {
    async fn chain_id(&self) -> Result<u64, RpcFailure>;

    /// `eth_call` against the latest state.
    async fn call(&self, from: Option<Address>, to: Address, input: Bytes) -> Result<Bytes, RpcFailure>;

    /// Transaction count including the node's pending pool.
    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcFailure>;

    async fn estimate_gas(&self, from: Address, to: Address, input: Bytes) -> Result<u64, RpcFailure>;

    /// Legacy `eth_gasPrice`.
    async fn gas_price(&self) -> Result<u128, RpcFailure>;

    async fn eip1559_fees(&self) -> Result<Eip1559Fees, RpcFailure>;

    /// Submit a signed, EIP-2718 encoded transaction.
    async fn send_raw_transaction(&self, encoded: Bytes) -> Result<TxHash, RpcFailure>;

    async fn balance(&self, address: Address) -> Result<U256, RpcFailure>;
}

/// [`ChainRpc`] over HTTP JSON-RPC.
///
/// Built without alloy's fillers: nonces, gas and signing are decided by the
/// gateway, never by the provider.
pub struct HttpChainRpc {
    provider: DynProvider,
}

impl HttpChainRpc {
    pub fn connect(rpc_url: &str) -> CustodyResult<Self> {
        let url: url::Url = rpc_url.parse().map_err(|e: url::ParseError| {
            CustodyError::Config(format!("invalid RPC URL {rpc_url}: {e}"))
        })?;

        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_http(url)
            .erased();

        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        self.provider.get_chain_id().await.map_err(classify)
    }

    async fn call(&self, from: Option<Address>, to: Address, input: Bytes) -> Result<Bytes, RpcFailure> {
        let mut tx = TransactionRequest::default().to(to).input(input.into());
        if let Some(from) = from {
            tx = tx.from(from);
        }
        self.provider.call(tx).await.map_err(classify)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcFailure> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(classify)
    }

    async fn estimate_gas(&self, from: Address, to: Address, input: Bytes) -> Result<u64, RpcFailure> {
        let tx = TransactionRequest::default()
            .from(from)
            .to(to)
            .input(input.into());
        self.provider.estimate_gas(tx).await.map_err(classify)
    }

    async fn gas_price(&self) -> Result<u128, RpcFailure> {
        self.provider.get_gas_price().await.map_err(classify)
    }

    async fn eip1559_fees(&self) -> Result<Eip1559Fees, RpcFailure> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(classify)?
            .ok_or_else(|| RpcFailure::Transport("no latest block".to_string()))?;

        let base_fee: u128 = block
            .header
            .base_fee_per_gas
            .map(|f| f as u128)
            .unwrap_or(DEFAULT_BASE_FEE);

        // Max fee = 2 * base_fee + priority_fee (allows for base fee increase)
        Ok(Eip1559Fees {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(PRIORITY_FEE),
            max_priority_fee_per_gas: PRIORITY_FEE,
        })
    }

    async fn send_raw_transaction(&self, encoded: Bytes) -> Result<TxHash, RpcFailure> {
        let pending = self
            .provider
            .send_raw_transaction(&encoded)
            .await
            .map_err(classify)?;
        Ok(*pending.tx_hash())
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcFailure> {
        self.provider.get_balance(address).await.map_err(classify)
    }
}

/// Sort a provider error into revert, nonce rejection or transport failure.
fn classify(err: TransportError) -> RpcFailure {
    if let Some(payload) = err.as_error_resp() {
        let message = payload.message.to_string();
        if let Some(data) = payload.as_revert_data() {
            let reason = alloy::sol_types::decode_revert_reason(&data).or(Some(message));
            return RpcFailure::Reverted { reason };
        }
        let lower = message.to_lowercase();
        if NONCE_REJECTIONS.iter().any(|marker| lower.contains(marker)) {
            return RpcFailure::NonceRejected(message);
        }
        if lower.contains("revert") {
            return RpcFailure::Reverted {
                reason: Some(message),
            };
        }
    }
    RpcFailure::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_to_custody_errors() {
        assert!(matches!(
            CustodyError::from(RpcFailure::Transport("connection refused".into())),
            CustodyError::RemoteCall(_)
        ));
        match CustodyError::from(RpcFailure::Reverted {
            reason: Some("user exists".into()),
        }) {
            CustodyError::ContractExecution { reason } => {
                assert_eq!(reason.as_deref(), Some("user exists"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(matches!(
            HttpChainRpc::connect("not a url"),
            Err(CustodyError::Config(_))
        ));
    }

    #[test]
    fn accepts_http_urls() {
        assert!(HttpChainRpc::connect("http://127.0.0.1:4444").is_ok());
    }
}
