// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared handles built once at startup.

use std::sync::Arc;

use alloy::primitives::Address;
use secrecy::SecretString;

use crate::blockchain::{AbiDescriptor, ChainClient, ContractGateway};
use crate::config::CustodyConfig;
use crate::error::CustodyResult;
use crate::storage::CustodyDatabase;
use crate::vault::{KeyVault, MnemonicDeriver};

/// Identity whose key signs registry writes on behalf of users.
pub struct AdminCredentials {
    pub identity: String,
    pub passphrase: SecretString,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// HD derivation settings for user accounts.
#[derive(Debug, Clone, Copy)]
pub struct AccountPolicy {
    pub coin_type: u32,
    pub discovery_bound: u32,
}

#[derive(Clone)]
pub struct CustodyState {
    pub db: CustodyDatabase,
    pub chain: Arc<ChainClient>,
    pub registry: ContractGateway,
    pub vault: KeyVault,
    pub deriver: Arc<MnemonicDeriver>,
    pub accounts: AccountPolicy,
    pub admin: Arc<AdminCredentials>,
}

impl CustodyState {
    pub fn new(
        config: CustodyConfig,
        db: CustodyDatabase,
        chain: Arc<ChainClient>,
        registry_abi: AbiDescriptor,
    ) -> CustodyResult<Self> {
        let vault = KeyVault::new(config.kdf)?;
        let registry = chain.contract(config.registry_address, Arc::new(registry_abi));
        Ok(Self {
            db,
            chain,
            registry,
            vault,
            deriver: Arc::new(MnemonicDeriver::new()),
            accounts: AccountPolicy {
                coin_type: config.coin_type,
                discovery_bound: config.discovery_bound,
            },
            admin: Arc::new(AdminCredentials {
                identity: config.admin_identity,
                passphrase: config.admin_passphrase,
            }),
        })
    }

    /// Open the database and load the registry ABI named by `config`.
    pub fn open(config: CustodyConfig, chain: Arc<ChainClient>) -> CustodyResult<Self> {
        let db = CustodyDatabase::open(&config.database_path())?;
        let abi = AbiDescriptor::from_file(&config.registry_abi_path)?;
        Self::new(config, db, chain, abi)
    }

    pub fn registry_address(&self) -> Address {
        self.registry.address()
    }
}
