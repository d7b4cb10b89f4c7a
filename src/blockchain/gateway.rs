// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read and write access to one deployed contract.
//!
//! ## Send pipeline
//!
//! ```text
//! validate spec -> check sender -> lease nonce (per-address lock)
//!   -> pending nonce -> estimate gas -> price -> sign -> submit -> commit
//! ```
//!
//! Everything after the lease runs inside the address's critical section.
//! The lease is a guard, so timeouts and cancellation release it too.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};

use super::abi::{AbiDescriptor, AbiValue, ContractCallSpec};
use super::client::ChainClient;
use super::rpc::RpcFailure;
use super::signing::{sign_call, FeeQuote, UnsignedCall};
use super::types::FeeMode;
use crate::error::{CustodyError, CustodyResult};
use crate::vault::PrivateKey;

/// One contract instance: address plus ABI, bound to a chain client.
#[derive(Clone)]
pub struct ContractGateway {
    chain: Arc<ChainClient>,
    address: Address,
    abi: Arc<AbiDescriptor>,
}

impl ContractGateway {
    pub fn new(chain: Arc<ChainClient>, address: Address, abi: Arc<AbiDescriptor>) -> Self {
        Self {
            chain,
            address,
            abi,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &AbiDescriptor {
        &self.abi
    }

    pub fn chain(&self) -> &Arc<ChainClient> {
        &self.chain
    }

    /// Read-only call with the client's default timeout.
    pub async fn call(&self, spec: &ContractCallSpec) -> CustodyResult<Vec<AbiValue>> {
        self.call_with_timeout(spec, self.chain.default_timeout())
            .await
    }

    /// Read-only call against the latest state.
    pub async fn call_with_timeout(
        &self,
        spec: &ContractCallSpec,
        timeout: Duration,
    ) -> CustodyResult<Vec<AbiValue>> {
        let method = self.abi.validate(spec)?;
        let input = method.encode_call(&spec.args)?;

        let output = bounded("call", timeout, async {
            Ok(self.chain.rpc().call(spec.from, self.address, input).await?)
        })
        .await?;

        let values = method.decode_output(&output)?;
        tracing::debug!(
            contract = %self.address,
            method = %spec.method,
            returned = values.len(),
            "Contract call"
        );
        Ok(values)
    }

    /// Sign and submit with the client's default timeout.
    pub async fn send(&self, spec: &ContractCallSpec, key: &PrivateKey) -> CustodyResult<TxHash> {
        self.send_with_timeout(spec, key, self.chain.default_timeout())
            .await
    }

    /// Sign `spec` with `key` and submit it. Returns once the node has
    /// accepted the transaction into its pool, not once it is mined.
    ///
    /// A [`CustodyError::Timeout`] or [`CustodyError::SubmissionUnknown`]
    /// means the transaction may or may not have reached the node.
    pub async fn send_with_timeout(
        &self,
        spec: &ContractCallSpec,
        key: &PrivateKey,
        timeout: Duration,
    ) -> CustodyResult<TxHash> {
        let method = self.abi.validate(spec)?;
        if method.read_only {
            return Err(CustodyError::InvalidCall(format!(
                "{} is read-only and cannot be sent as a transaction",
                spec.method
            )));
        }
        let from = key.address();
        if let Some(declared) = spec.from {
            if declared != from {
                return Err(CustodyError::InvalidCall(format!(
                    "declared sender {declared} does not match the signing key"
                )));
            }
        }
        let input = method.encode_call(&spec.args)?;

        bounded("send", timeout, self.submit(&spec.method, from, key, input)).await
    }

    async fn submit(
        &self,
        method: &str,
        from: Address,
        key: &PrivateKey,
        input: alloy::primitives::Bytes,
    ) -> CustodyResult<TxHash> {
        let settings = self.chain.settings();
        let rpc = self.chain.rpc();

        let mut lease = self.chain.nonces().lease(from).await;

        let chain_nonce = rpc.pending_nonce(from).await?;
        let nonce = lease.next_nonce(chain_nonce);

        let estimated = rpc.estimate_gas(from, self.address, input.clone()).await?;
        let gas_limit = settings.gas_limit_for(estimated);

        let fees = match settings.fee_mode {
            FeeMode::Legacy => FeeQuote::Legacy {
                gas_price: rpc.gas_price().await?,
            },
            FeeMode::Eip1559 => {
                let fees = rpc.eip1559_fees().await?;
                FeeQuote::Eip1559 {
                    max_fee_per_gas: fees.max_fee_per_gas,
                    max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
                }
            }
        };

        let signed = sign_call(
            key,
            UnsignedCall {
                chain_id: settings.network.chain_id,
                nonce,
                gas_limit,
                fees,
                to: self.address,
                input,
            },
        )?;

        lease.begin_submission();
        match rpc.send_raw_transaction(signed.encoded).await {
            Ok(hash) => {
                if hash != signed.hash {
                    tracing::warn!(
                        expected = %signed.hash,
                        reported = %hash,
                        "Node reported a different transaction hash"
                    );
                }
                lease.commit(nonce);
                tracing::info!(
                    from = %from,
                    contract = %self.address,
                    method,
                    nonce,
                    gas_limit,
                    tx_hash = %hash,
                    explorer = ?settings.network.explorer_tx_url(&hash),
                    "Transaction submitted"
                );
                Ok(hash)
            }
            Err(RpcFailure::Reverted { reason }) => {
                lease.release();
                Err(CustodyError::ContractExecution { reason })
            }
            Err(RpcFailure::NonceRejected(detail)) => {
                // Drop the lease in flight so the next send re-reads the chain.
                drop(lease);
                tracing::error!(address = %from, nonce, %detail, "Node rejected nonce");
                Err(CustodyError::NonceConflict {
                    address: from,
                    detail,
                })
            }
            Err(RpcFailure::Transport(detail)) => {
                // The lease drops in flight and the cached nonce is forgotten.
                tracing::warn!(
                    address = %from,
                    nonce,
                    tx_hash = %signed.hash,
                    %detail,
                    "No answer to transaction submission"
                );
                Err(CustodyError::SubmissionUnknown {
                    tx_hash: signed.hash,
                    detail,
                })
            }
        }
    }
}

/// Run `fut` under `after`, mapping expiry to [`CustodyError::Timeout`].
async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = CustodyResult<T>>,
) -> CustodyResult<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?after, "Node request timed out; outcome unknown");
            Err(CustodyError::Timeout { operation, after })
        }
    }
}
