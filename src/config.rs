// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into a
//! [`CustodyConfig`] that is passed down explicitly. No component reads the
//! environment on its own.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RPC_URL` | Node JSON-RPC endpoint | `http://127.0.0.1:4444` |
//! | `CHAIN_ID` | Expected chain id (EIP-155) | `33` (RSK regtest) |
//! | `REGISTRY_CONTRACT_ADDRESS` | Registry contract address | Required |
//! | `REGISTRY_ABI_PATH` | JSON ABI or build artifact of the registry | Required |
//! | `DATA_DIR` | Directory holding `custody.redb` | `./data` |
//! | `ADMIN_IDENTITY` | Identity whose key signs registry writes | Required |
//! | `ADMIN_PASSPHRASE` | Passphrase of the admin key | Required |
//! | `ADMIN_PRIVATE_KEY` | Hex key imported for the admin on first start | Optional |
//! | `DERIVATION_COIN_TYPE` | BIP-44 coin type | `137` (RSK) |
//! | `DISCOVERY_BOUND` | Max indices scanned by account discovery | `200` |
//! | `KDF_MEMORY_KIB` | Argon2id memory cost | `19456` |
//! | `KDF_ITERATIONS` | Argon2id passes | `2` |
//! | `KDF_LANES` | Argon2id parallelism | `1` |
//! | `FEE_MODE` | `legacy` or `eip1559` | `legacy` |
//! | `GAS_MARGIN_PERCENT` | Extra gas over the node's estimate | `20` |
//! | `RPC_TIMEOUT_SECS` | Default timeout for node calls | `30` |
//! | `RECONCILE_INTERVAL_SECS` | Pending reconciliation period | `30` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use secrecy::SecretString;

use crate::blockchain::{ChainSettings, FeeMode, NetworkConfig};
use crate::error::{CustodyError, CustodyResult};
use crate::storage::DATABASE_FILE;
use crate::vault::KdfParams;

pub const RPC_URL_ENV: &str = "RPC_URL";
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";
pub const REGISTRY_ADDRESS_ENV: &str = "REGISTRY_CONTRACT_ADDRESS";
pub const REGISTRY_ABI_PATH_ENV: &str = "REGISTRY_ABI_PATH";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const ADMIN_IDENTITY_ENV: &str = "ADMIN_IDENTITY";
pub const ADMIN_PASSPHRASE_ENV: &str = "ADMIN_PASSPHRASE";
pub const ADMIN_PRIVATE_KEY_ENV: &str = "ADMIN_PRIVATE_KEY";
pub const COIN_TYPE_ENV: &str = "DERIVATION_COIN_TYPE";
pub const DISCOVERY_BOUND_ENV: &str = "DISCOVERY_BOUND";
pub const KDF_MEMORY_KIB_ENV: &str = "KDF_MEMORY_KIB";
pub const KDF_ITERATIONS_ENV: &str = "KDF_ITERATIONS";
pub const KDF_LANES_ENV: &str = "KDF_LANES";
pub const FEE_MODE_ENV: &str = "FEE_MODE";
pub const GAS_MARGIN_PERCENT_ENV: &str = "GAS_MARGIN_PERCENT";
pub const RPC_TIMEOUT_SECS_ENV: &str = "RPC_TIMEOUT_SECS";
pub const RECONCILE_INTERVAL_SECS_ENV: &str = "RECONCILE_INTERVAL_SECS";

/// Logging format selector read by the binary.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:4444";
pub const DEFAULT_CHAIN_ID: u64 = 33;
pub const DEFAULT_DATA_DIR: &str = "./data";
/// SLIP-44 coin type registered for RSK.
pub const DEFAULT_COIN_TYPE: u32 = 137;
pub const DEFAULT_DISCOVERY_BOUND: u32 = 200;
pub const DEFAULT_GAS_MARGIN_PERCENT: u64 = 20;
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Everything the custody core needs at startup.
///
/// Secrets are held as [`SecretString`] and never appear in `Debug` output.
#[derive(Debug)]
pub struct CustodyConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub registry_address: Address,
    pub registry_abi_path: PathBuf,
    pub data_dir: PathBuf,
    pub admin_identity: String,
    pub admin_passphrase: SecretString,
    pub admin_private_key: Option<SecretString>,
    pub coin_type: u32,
    pub discovery_bound: u32,
    pub kdf: KdfParams,
    pub fee_mode: FeeMode,
    pub gas_margin_percent: u64,
    pub rpc_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl CustodyConfig {
    /// Load from the process environment.
    pub fn from_env() -> CustodyResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> CustodyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let registry_address = required(&get, REGISTRY_ADDRESS_ENV)?;
        let registry_address = Address::from_str(registry_address.trim()).map_err(|e| {
            CustodyError::Config(format!("{REGISTRY_ADDRESS_ENV} is not an address: {e}"))
        })?;

        let defaults = KdfParams::default();
        let kdf = KdfParams {
            memory_kib: parsed(&get, KDF_MEMORY_KIB_ENV, defaults.memory_kib)?,
            iterations: parsed(&get, KDF_ITERATIONS_ENV, defaults.iterations)?,
            lanes: parsed(&get, KDF_LANES_ENV, defaults.lanes)?,
        };
        kdf.validate()?;

        let fee_mode = match get(FEE_MODE_ENV) {
            Some(raw) => raw.parse::<FeeMode>().map_err(CustodyError::Config)?,
            None => FeeMode::default(),
        };

        let discovery_bound = parsed(&get, DISCOVERY_BOUND_ENV, DEFAULT_DISCOVERY_BOUND)?;
        if discovery_bound == 0 {
            return Err(CustodyError::Config(format!(
                "{DISCOVERY_BOUND_ENV} must be at least 1"
            )));
        }

        let rpc_timeout = parsed(&get, RPC_TIMEOUT_SECS_ENV, DEFAULT_RPC_TIMEOUT.as_secs())?;
        let reconcile_interval = parsed(
            &get,
            RECONCILE_INTERVAL_SECS_ENV,
            DEFAULT_RECONCILE_INTERVAL.as_secs(),
        )?;
        if rpc_timeout == 0 || reconcile_interval == 0 {
            return Err(CustodyError::Config(
                "timeouts and intervals must be positive".to_string(),
            ));
        }

        Ok(Self {
            rpc_url: get(RPC_URL_ENV).unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            chain_id: parsed(&get, CHAIN_ID_ENV, DEFAULT_CHAIN_ID)?,
            registry_address,
            registry_abi_path: PathBuf::from(required(&get, REGISTRY_ABI_PATH_ENV)?),
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            admin_identity: required(&get, ADMIN_IDENTITY_ENV)?,
            admin_passphrase: SecretString::from(required(&get, ADMIN_PASSPHRASE_ENV)?),
            admin_private_key: get(ADMIN_PRIVATE_KEY_ENV).map(SecretString::from),
            coin_type: parsed(&get, COIN_TYPE_ENV, DEFAULT_COIN_TYPE)?,
            discovery_bound,
            kdf,
            fee_mode,
            gas_margin_percent: parsed(&get, GAS_MARGIN_PERCENT_ENV, DEFAULT_GAS_MARGIN_PERCENT)?,
            rpc_timeout: Duration::from_secs(rpc_timeout),
            reconcile_interval: Duration::from_secs(reconcile_interval),
        })
    }

    /// Submission policy for the chain client.
    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            network: NetworkConfig::for_chain(self.chain_id, self.rpc_url.clone()),
            fee_mode: self.fee_mode,
            gas_margin_percent: self.gas_margin_percent,
            default_timeout: self.rpc_timeout,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, name: &str) -> CustodyResult<String> {
    get(name).ok_or_else(|| CustodyError::Config(format!("{name} must be set")))
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> CustodyResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CustodyError::Config(format!("{name}={raw} is invalid: {e}"))),
        None => Ok(default),
    }
}
