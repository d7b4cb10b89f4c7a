// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Notary Custody - Custodial Key & Transaction Core
//!
//! Holds passphrase-encrypted keys for users who never see them, signs and
//! submits registry transactions on their behalf, and keeps a ledger of
//! submissions that are not yet visible on chain.
//!
//! ## Modules
//!
//! - `vault` - key generation, encryption at rest, mnemonic derivation
//! - `blockchain` - typed contract ABI, node access, nonce-ordered sending
//! - `storage` - embedded database for key records and pending transactions
//! - `custody` - request-facing operations combining the above
//! - `reconciler` - background pruning of confirmed pending entries

pub mod blockchain;
pub mod config;
pub mod custody;
pub mod error;
pub mod reconciler;
pub mod state;
pub mod storage;
pub mod vault;
