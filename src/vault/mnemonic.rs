// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! BIP-39 mnemonics and BIP-44 account derivation.
//!
//! Accounts live at `m/44'/{coin_type}'/0'/0/{index}`. Derivation is a pure
//! function of `(mnemonic, coin_type, index)` so an account can always be
//! recovered from its phrase.

use std::str::FromStr;

use alloy::primitives::Address;
use bip32::{ChildNumber, DerivationPath, XPrv};
use bip39::Language;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use super::keys::PrivateKey;
use crate::error::{CustodyError, CustodyResult};

/// 128 bits of entropy, i.e. a 12-word phrase.
const ENTROPY_BYTES: usize = 16;

/// Highest index usable without hardening.
const MAX_UNHARDENED: u32 = (1 << 31) - 1;

/// A validated BIP-39 phrase (English wordlist).
pub struct Mnemonic {
    inner: bip39::Mnemonic,
}

impl Mnemonic {
    /// Parse and checksum-validate a phrase.
    pub fn parse(phrase: &str) -> CustodyResult<Self> {
        let inner = bip39::Mnemonic::parse_in(Language::English, phrase)
            .map_err(|e| CustodyError::Derivation(format!("invalid mnemonic: {e}")))?;
        Ok(Self { inner })
    }

    /// The phrase itself. Treat it like a private key.
    pub fn phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.inner.to_string())
    }

    pub fn word_count(&self) -> usize {
        self.inner.word_count()
    }

    fn to_seed(&self, passphrase: &str) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.inner.to_seed(passphrase))
    }
}

impl std::fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mnemonic")
            .field("words", &self.word_count())
            .field("phrase", &"[REDACTED]")
            .finish()
    }
}

/// A derived account.
#[derive(Debug)]
pub struct DerivedAccount {
    pub index: u32,
    pub private_key: PrivateKey,
    pub address: Address,
}

/// Derives accounts from mnemonics.
#[derive(Default)]
pub struct MnemonicDeriver {
    /// Optional BIP-39 seed password (the "25th word").
    seed_passphrase: Zeroizing<String>,
}

impl MnemonicDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a BIP-39 seed password in addition to the phrase.
    pub fn with_seed_passphrase(seed_passphrase: &str) -> Self {
        Self {
            seed_passphrase: Zeroizing::new(seed_passphrase.to_string()),
        }
    }

    /// Fresh 12-word phrase from OS entropy.
    pub fn generate_mnemonic(&self) -> CustodyResult<Mnemonic> {
        let mut entropy = Zeroizing::new([0u8; ENTROPY_BYTES]);
        OsRng.fill_bytes(entropy.as_mut());
        let inner = bip39::Mnemonic::from_entropy_in(Language::English, entropy.as_ref())
            .map_err(|e| CustodyError::Derivation(format!("mnemonic generation failed: {e}")))?;
        Ok(Mnemonic { inner })
    }

    /// Derive the account at `index`.
    pub fn derive_at(
        &self,
        mnemonic: &Mnemonic,
        coin_type: u32,
        index: u32,
    ) -> CustodyResult<DerivedAccount> {
        let branch = self.external_branch(mnemonic, coin_type)?;
        derive_child(&branch, index)
    }

    /// Find which index in `0..max_index` derives `target`.
    ///
    /// The bound keeps attacker-supplied phrases from forcing unbounded
    /// work.
    pub fn discover_account(
        &self,
        mnemonic: &Mnemonic,
        coin_type: u32,
        target: Address,
        max_index: u32,
    ) -> CustodyResult<u32> {
        let branch = self.external_branch(mnemonic, coin_type)?;
        for index in 0..max_index.min(MAX_UNHARDENED) {
            let account = derive_child(&branch, index)?;
            if account.address == target {
                tracing::debug!(address = %target, index, "Account discovered");
                return Ok(index);
            }
        }
        Err(CustodyError::NotFound(format!(
            "address {target} not derived within the first {max_index} indices"
        )))
    }

    /// Extended key at `m/44'/{coin_type}'/0'/0`.
    fn external_branch(&self, mnemonic: &Mnemonic, coin_type: u32) -> CustodyResult<XPrv> {
        if coin_type > MAX_UNHARDENED {
            return Err(CustodyError::Derivation(format!(
                "coin type {coin_type} out of range"
            )));
        }
        let path = DerivationPath::from_str(&format!("m/44'/{coin_type}'/0'/0"))
            .map_err(|e| CustodyError::Derivation(format!("invalid derivation path: {e}")))?;
        let seed = mnemonic.to_seed(&self.seed_passphrase);
        XPrv::derive_from_path(seed.as_ref(), &path)
            .map_err(|e| CustodyError::Derivation(format!("derivation failed: {e}")))
    }
}

fn derive_child(branch: &XPrv, index: u32) -> CustodyResult<DerivedAccount> {
    let child_number = ChildNumber::new(index, false)
        .map_err(|e| CustodyError::Derivation(format!("invalid index {index}: {e}")))?;
    let child = branch
        .derive_child(child_number)
        .map_err(|e| CustodyError::Derivation(format!("derivation failed: {e}")))?;

    let mut scalar = Zeroizing::new([0u8; 32]);
    scalar.copy_from_slice(&child.private_key().to_bytes());
    let private_key = PrivateKey::from_slice(scalar.as_ref())?;
    let address = private_key.address();

    Ok(DerivedAccount {
        index,
        private_key,
        address,
    })
}
