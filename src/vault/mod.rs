// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Vault
//!
//! Everything that touches raw key material lives here:
//!
//! - `keys` - secp256k1 keys and EVM address derivation
//! - `encryption` - passphrase encryption of keys at rest
//! - `mnemonic` - BIP-39 phrases and BIP-44 account derivation
//!
//! All operations are CPU-bound and never perform I/O. Async callers should
//! run them on the blocking pool.

pub mod encryption;
pub mod keys;
pub mod mnemonic;

pub use encryption::{EncryptedKeyBlob, KdfParams, KeyVault, ALGORITHM_PREFIX};
pub use keys::{PrivateKey, PublicKey};
pub use mnemonic::{DerivedAccount, Mnemonic, MnemonicDeriver};
