// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::TxHash;

/// Network the custody core talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: String,
    /// Chain ID (EIP-155)
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Block explorer URL
    pub explorer_url: Option<String>,
}

/// RSK mainnet chain id.
pub const RSK_MAINNET_CHAIN_ID: u64 = 30;
/// RSK testnet chain id.
pub const RSK_TESTNET_CHAIN_ID: u64 = 31;
/// RSK regtest (local node) chain id.
pub const RSK_REGTEST_CHAIN_ID: u64 = 33;

impl NetworkConfig {
    /// Describe a network by chain id, filling in name and explorer for the
    /// RSK networks we know about.
    pub fn for_chain(chain_id: u64, rpc_url: impl Into<String>) -> Self {
        let (name, explorer_url) = match chain_id {
            RSK_MAINNET_CHAIN_ID => ("RSK Mainnet", Some("https://explorer.rsk.co")),
            RSK_TESTNET_CHAIN_ID => ("RSK Testnet", Some("https://explorer.testnet.rsk.co")),
            RSK_REGTEST_CHAIN_ID => ("RSK Regtest", None),
            _ => ("Custom EVM network", None),
        };
        Self {
            name: name.to_string(),
            chain_id,
            rpc_url: rpc_url.into(),
            explorer_url: explorer_url.map(str::to_string),
        }
    }

    /// Public RSK testnet node.
    pub fn rsk_testnet() -> Self {
        Self::for_chain(RSK_TESTNET_CHAIN_ID, "https://public-node.testnet.rsk.co")
    }

    /// Local regtest node on the default port.
    pub fn rsk_regtest() -> Self {
        Self::for_chain(RSK_REGTEST_CHAIN_ID, "http://127.0.0.1:4444")
    }

    /// Explorer link for a transaction, when the network has an explorer.
    pub fn explorer_tx_url(&self, tx_hash: &TxHash) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{base}/tx/{tx_hash}"))
    }
}

/// Transaction pricing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeMode {
    /// Single `gasPrice` with EIP-155 replay protection. RSK only supports
    /// this form.
    #[default]
    Legacy,
    /// EIP-1559 base fee plus priority tip.
    Eip1559,
}

impl FromStr for FeeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "eip1559" | "eip-1559" => Ok(Self::Eip1559),
            other => Err(format!("unknown fee mode `{other}` (expected legacy or eip1559)")),
        }
    }
}

/// Submission policy shared by every gateway built from one client.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub network: NetworkConfig,
    pub fee_mode: FeeMode,
    /// Extra gas on top of the node's estimate, in percent.
    pub gas_margin_percent: u64,
    /// Timeout applied by `call` and `send` when the caller gives none.
    pub default_timeout: Duration,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            network: NetworkConfig::rsk_regtest(),
            fee_mode: FeeMode::Legacy,
            gas_margin_percent: 20,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl ChainSettings {
    /// Gas limit to sign with, given the node's estimate. Never below the
    /// estimate.
    pub fn gas_limit_for(&self, estimated: u64) -> u64 {
        let padded = u128::from(estimated) * (100 + u128::from(self.gas_margin_percent)) / 100;
        u64::try_from(padded).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_networks_get_names_and_explorers() {
        let testnet = NetworkConfig::rsk_testnet();
        assert_eq!(testnet.chain_id, 31);
        assert_eq!(testnet.name, "RSK Testnet");

        let custom = NetworkConfig::for_chain(1337, "http://localhost:8545");
        assert_eq!(custom.name, "Custom EVM network");
        assert!(custom.explorer_url.is_none());
    }

    #[test]
    fn explorer_links() {
        let hash = TxHash::repeat_byte(0xab);
        let link = NetworkConfig::rsk_testnet().explorer_tx_url(&hash).unwrap();
        assert!(link.starts_with("https://explorer.testnet.rsk.co/tx/0xabab"));
        assert!(NetworkConfig::rsk_regtest().explorer_tx_url(&hash).is_none());
    }

    #[test]
    fn fee_mode_parsing() {
        assert_eq!("legacy".parse::<FeeMode>().unwrap(), FeeMode::Legacy);
        assert_eq!("EIP1559".parse::<FeeMode>().unwrap(), FeeMode::Eip1559);
        assert_eq!("eip-1559".parse::<FeeMode>().unwrap(), FeeMode::Eip1559);
        assert!("fast".parse::<FeeMode>().is_err());
    }

    #[test]
    fn gas_margin_is_applied() {
        let settings = ChainSettings::default();
        assert_eq!(settings.gas_limit_for(100_000), 120_000);
        assert_eq!(settings.gas_limit_for(u64::MAX), u64::MAX);

        let near_max = u64::MAX / 2;
        assert!(settings.gas_limit_for(near_max) >= near_max);

        let no_margin = ChainSettings {
            gas_margin_percent: 0,
            ..ChainSettings::default()
        };
        assert_eq!(no_margin.gas_limit_for(21_000), 21_000);
    }
}
