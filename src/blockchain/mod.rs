// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration for RSK and other EVM networks.
//!
//! This module provides functionality for:
//! - Typed contract ABIs and call validation
//! - Read-only contract calls
//! - Transaction signing and submission with per-address nonce ordering

pub mod abi;
pub mod client;
pub mod gateway;
pub mod nonce;
pub mod rpc;
pub mod signing;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use abi::{AbiDescriptor, AbiType, AbiValue, ContractCallSpec, MethodSpec};
pub use client::ChainClient;
pub use gateway::ContractGateway;
pub use nonce::{NonceLease, NonceManager};
pub use rpc::{ChainRpc, Eip1559Fees, HttpChainRpc, RpcFailure};
pub use types::*;
