// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! secp256k1 key material and EVM address derivation.
//!
//! Keys flow through a one-way pipeline of immutable values:
//! `PrivateKey -> PublicKey -> Address`.

use alloy::{
    primitives::{keccak256, Address},
    signers::local::PrivateKeySigner,
};
use k256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint, SecretKey};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CustodyError, CustodyResult};

/// Resampling cap for key generation. The chance of even one rejection is
/// about 2^-128, so hitting this means the RNG is broken.
const MAX_GENERATION_ATTEMPTS: usize = 16;

/// A 32-byte secp256k1 secret scalar.
///
/// Never serialized and never printed. The inner `SecretKey` zeroes its
/// memory on drop.
pub struct PrivateKey {
    secret: SecretKey,
}

impl PrivateKey {
    /// Generate a fresh key from the OS RNG.
    ///
    /// Candidates that are zero or not below the curve order are discarded
    /// and resampled.
    pub fn generate() -> CustodyResult<Self> {
        let mut candidate = Zeroizing::new([0u8; 32]);
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            OsRng.fill_bytes(candidate.as_mut());
            if let Ok(key) = Self::from_slice(candidate.as_ref()) {
                return Ok(key);
            }
        }
        Err(CustodyError::Derivation(
            "could not sample a valid secp256k1 scalar".to_string(),
        ))
    }

    /// Build a key from 32 big-endian bytes.
    pub fn from_slice(bytes: &[u8]) -> CustodyResult<Self> {
        if bytes.len() != 32 {
            return Err(CustodyError::Derivation(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| CustodyError::Derivation("scalar out of range".to_string()))?;
        Ok(Self { secret })
    }

    /// Parse a hex-encoded key (with or without `0x`).
    pub fn from_hex(key_hex: &str) -> CustodyResult<Self> {
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
        let bytes = Zeroizing::new(
            alloy::hex::decode(key_hex)
                .map_err(|e| CustodyError::Derivation(format!("invalid key hex: {e}")))?,
        );
        Self::from_slice(&bytes)
    }

    /// Raw scalar bytes, wiped when the returned buffer is dropped.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        let mut field_bytes = self.secret.to_bytes();
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&field_bytes);
        field_bytes.as_mut_slice().zeroize();
        out
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.secret.public_key(),
        }
    }

    /// Shorthand for `self.public_key().address()`.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Build a transaction signer for one signing operation.
    ///
    /// The signer holds its own copy of the scalar; drop it as soon as the
    /// signature is produced.
    pub fn to_signer(&self) -> PrivateKeySigner {
        PrivateKeySigner::from_signing_key(SigningKey::from(&self.secret))
    }
}

impl PartialEq for PrivateKey {
    // SecretKey equality is constant-time.
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl Eq for PrivateKey {}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("address", &self.address())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Public half of a [`PrivateKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: k256::PublicKey,
}

impl PublicKey {
    /// Uncompressed SEC1 encoding (`0x04 || x || y`).
    pub fn to_uncompressed(&self) -> Vec<u8> {
        self.inner.to_encoded_point(false).as_bytes().to_vec()
    }

    /// EVM address: last 20 bytes of keccak256 over the 64-byte point.
    pub fn address(&self) -> Address {
        let point = self.inner.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        Address::from_slice(&hash[12..])
    }
}
