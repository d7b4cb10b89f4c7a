// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain client shared by every contract gateway.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use super::abi::AbiDescriptor;
use super::gateway::ContractGateway;
use super::nonce::NonceManager;
use super::rpc::{ChainRpc, HttpChainRpc};
use super::types::{ChainSettings, NetworkConfig};
use crate::error::{CustodyError, CustodyResult};

/// Node handle plus submission policy and the per-address nonce locks.
pub struct ChainClient {
    rpc: Arc<dyn ChainRpc>,
    settings: ChainSettings,
    nonces: NonceManager,
}

impl ChainClient {
    pub fn new(rpc: Arc<dyn ChainRpc>, settings: ChainSettings) -> Self {
        Self {
            rpc,
            settings,
            nonces: NonceManager::new(),
        }
    }

    /// Client over HTTP JSON-RPC at `settings.network.rpc_url`.
    pub fn connect(settings: ChainSettings) -> CustodyResult<Self> {
        let rpc = HttpChainRpc::connect(&settings.network.rpc_url)?;
        Ok(Self::new(Arc::new(rpc), settings))
    }

    /// Fail unless the node serves the configured chain.
    pub async fn verify_chain_id(&self) -> CustodyResult<u64> {
        let reported = self.rpc.chain_id().await?;
        if reported != self.settings.network.chain_id {
            return Err(CustodyError::Config(format!(
                "node reports chain id {reported}, expected {}",
                self.settings.network.chain_id
            )));
        }
        tracing::info!(
            network = %self.settings.network.name,
            chain_id = reported,
            "Connected to node"
        );
        Ok(reported)
    }

    /// Native balance in wei.
    pub async fn balance(&self, address: Address) -> CustodyResult<U256> {
        Ok(self.rpc.balance(address).await?)
    }

    /// Gateway for the contract at `address`.
    pub fn contract(self: &Arc<Self>, address: Address, abi: Arc<AbiDescriptor>) -> ContractGateway {
        ContractGateway::new(self.clone(), address, abi)
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.settings.network
    }

    pub fn default_timeout(&self) -> Duration {
        self.settings.default_timeout
    }

    pub(super) fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    pub(super) fn rpc(&self) -> &dyn ChainRpc {
        self.rpc.as_ref()
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::testing::MockChain;

    #[tokio::test]
    async fn verifies_chain_id() {
        let settings = ChainSettings::default();
        let client = ChainClient::new(Arc::new(MockChain::new(33)), settings.clone());
        assert_eq!(client.verify_chain_id().await.unwrap(), 33);

        let wrong = ChainClient::new(Arc::new(MockChain::new(30)), settings);
        assert!(matches!(
            wrong.verify_chain_id().await,
            Err(CustodyError::Config(_))
        ));
    }

    #[tokio::test]
    async fn reads_balances() {
        let mock = Arc::new(MockChain::new(33));
        let address = Address::repeat_byte(7);
        mock.set_balance(address, U256::from(1_000u64));
        let client = ChainClient::new(mock, ChainSettings::default());

        assert_eq!(client.balance(address).await.unwrap(), U256::from(1_000u64));
        assert_eq!(
            client.balance(Address::repeat_byte(8)).await.unwrap(),
            U256::ZERO
        );
    }

    #[test]
    fn connect_rejects_bad_url() {
        let mut settings = ChainSettings::default();
        settings.network.rpc_url = "::not a url::".to_string();
        assert!(matches!(
            ChainClient::connect(settings),
            Err(CustodyError::Config(_))
        ));
    }
}
