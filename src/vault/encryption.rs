// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Passphrase encryption of private keys.
//!
//! ## Scheme
//!
//! ```text
//! argon2id(nfkd(passphrase), salt) -> 64 bytes = enc_key(32) || mac_key(32)
//! ciphertext = AES-256-GCM(enc_key, iv, key_bytes, aad = algorithm_id)
//! checksum   = HMAC-SHA256(mac_key, address)
//! ```
//!
//! Decryption opens the ciphertext, re-derives the address and compares the
//! checksum in constant time. A wrong passphrase fails at one of those two
//! steps and the caller only ever sees [`CustodyError::Authentication`].
//!
//! The Argon2 work factor is part of the algorithm id, so blobs written
//! under an older work factor remain readable after the configuration
//! changes.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use alloy::primitives::{Address, Bytes};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use super::keys::PrivateKey;
use crate::error::{CustodyError, CustodyResult};

type HmacSha256 = Hmac<Sha256>;

/// Scheme name; the KDF parameters follow after `;`.
pub const ALGORITHM_PREFIX: &str = "argon2id-aes256gcm-hmacsha256/v1";

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const DERIVED_LEN: usize = 64;

/// Ceilings on the work factor accepted from configuration or a stored blob.
pub const MAX_MEMORY_KIB: u32 = 1_048_576;
pub const MAX_ITERATIONS: u32 = 64;
pub const MAX_LANES: u32 = 16;

/// Argon2id work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            lanes: 1,
        }
    }
}

impl KdfParams {
    /// Check the parameters against Argon2's limits.
    pub fn validate(&self) -> CustodyResult<()> {
        if !self.within_ceilings() {
            return Err(CustodyError::Config(format!(
                "KDF parameters exceed m={MAX_MEMORY_KIB},t={MAX_ITERATIONS},p={MAX_LANES}"
            )));
        }
        self.argon2_params().map(|_| ())
    }

    fn within_ceilings(&self) -> bool {
        self.memory_kib <= MAX_MEMORY_KIB
            && self.iterations <= MAX_ITERATIONS
            && self.lanes <= MAX_LANES
    }

    fn argon2_params(&self) -> CustodyResult<Params> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.lanes,
            Some(DERIVED_LEN),
        )
        .map_err(|e| CustodyError::Config(format!("invalid KDF parameters: {e}")))
    }

    /// Full algorithm id for blobs written with these parameters.
    pub fn algorithm_id(&self) -> String {
        format!(
            "{ALGORITHM_PREFIX};m={},t={},p={}",
            self.memory_kib, self.iterations, self.lanes
        )
    }

    /// Recover the parameters from a stored algorithm id.
    pub fn from_algorithm_id(algorithm_id: &str) -> CustodyResult<Self> {
        let unsupported =
            || CustodyError::Decoding(format!("unsupported key algorithm: {algorithm_id}"));

        let (scheme, params) = algorithm_id.split_once(';').ok_or_else(unsupported)?;
        if scheme != ALGORITHM_PREFIX {
            return Err(unsupported());
        }

        let (mut memory_kib, mut iterations, mut lanes) = (None, None, None);
        for part in params.split(',') {
            let (name, value) = part.split_once('=').ok_or_else(unsupported)?;
            let value: u32 = value.parse().map_err(|_| unsupported())?;
            match name {
                "m" => memory_kib = Some(value),
                "t" => iterations = Some(value),
                "p" => lanes = Some(value),
                _ => return Err(unsupported()),
            }
        }

        match (memory_kib, iterations, lanes) {
            (Some(memory_kib), Some(iterations), Some(lanes)) => {
                let kdf = Self {
                    memory_kib,
                    iterations,
                    lanes,
                };
                if !kdf.within_ceilings() {
                    return Err(CustodyError::Decoding(format!(
                        "key algorithm work factor out of range: {algorithm_id}"
                    )));
                }
                Ok(kdf)
            }
            _ => Err(unsupported()),
        }
    }
}

/// Persisted form of a private key. Field names are part of the stored
/// format and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyBlob {
    pub algorithm_id: String,
    pub salt: Bytes,
    pub iv: Bytes,
    pub ciphertext: Bytes,
    pub checksum: Bytes,
}

/// Encrypts, decrypts and verifies keys under user passphrases.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyVault {
    kdf: KdfParams,
}

impl KeyVault {
    /// Create a vault that writes new blobs with the given work factor.
    pub fn new(kdf: KdfParams) -> CustodyResult<Self> {
        kdf.validate()?;
        Ok(Self { kdf })
    }

    /// Fresh random key.
    pub fn generate(&self) -> CustodyResult<PrivateKey> {
        PrivateKey::generate()
    }

    pub fn derive_address(&self, key: &PrivateKey) -> Address {
        key.address()
    }

    /// Encrypt `key` under `passphrase`.
    pub fn encrypt(&self, key: &PrivateKey, passphrase: &str) -> CustodyResult<EncryptedKeyBlob> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let algorithm_id = self.kdf.algorithm_id();
        let derived = derive_keys(&self.kdf, passphrase, &salt)?;
        let (enc_key, mac_key) = derived.split_at(32);

        let cipher = Aes256Gcm::new_from_slice(enc_key)
            .map_err(|_| CustodyError::Derivation("invalid cipher key length".to_string()))?;
        let plaintext = key.to_bytes();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext.as_ref(),
                    aad: algorithm_id.as_bytes(),
                },
            )
            .map_err(|_| CustodyError::Derivation("key encryption failed".to_string()))?;

        let checksum = address_checksum(mac_key, &key.address())?;

        Ok(EncryptedKeyBlob {
            algorithm_id,
            salt: Bytes::copy_from_slice(&salt),
            iv: Bytes::copy_from_slice(&iv),
            ciphertext: Bytes::from(ciphertext),
            checksum: Bytes::copy_from_slice(&checksum),
        })
    }

    /// Decrypt a blob. A wrong passphrase yields `Authentication`, never a
    /// different key.
    pub fn decrypt(&self, blob: &EncryptedKeyBlob, passphrase: &str) -> CustodyResult<PrivateKey> {
        let kdf = KdfParams::from_algorithm_id(&blob.algorithm_id)?;
        if blob.salt.len() != SALT_LEN || blob.iv.len() != IV_LEN {
            return Err(CustodyError::Decoding(
                "malformed key blob: bad salt or iv length".to_string(),
            ));
        }

        let derived = derive_keys(&kdf, passphrase, &blob.salt)?;
        let (enc_key, mac_key) = derived.split_at(32);

        let cipher = Aes256Gcm::new_from_slice(enc_key)
            .map_err(|_| CustodyError::Derivation("invalid cipher key length".to_string()))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&blob.iv),
                    Payload {
                        msg: &blob.ciphertext,
                        aad: blob.algorithm_id.as_bytes(),
                    },
                )
                .map_err(|_| CustodyError::Authentication)?,
        );

        let key = PrivateKey::from_slice(&plaintext).map_err(|_| CustodyError::Authentication)?;
        let expected = address_checksum(mac_key, &key.address())?;
        if !bool::from(expected.as_slice().ct_eq(&blob.checksum)) {
            return Err(CustodyError::Authentication);
        }
        Ok(key)
    }

    /// Whether `passphrase` opens `blob` to a key controlling
    /// `expected_address`. Errors count as a failed verification.
    pub fn verify(&self, blob: &EncryptedKeyBlob, passphrase: &str, expected_address: Address) -> bool {
        match self.decrypt(blob, passphrase) {
            Ok(key) => key.address() == expected_address,
            Err(e) => {
                tracing::debug!(address = %expected_address, error = %e, "Key verification failed");
                false
            }
        }
    }

    /// Re-encrypt under a new passphrase using the current work factor.
    pub fn rotate_passphrase(
        &self,
        blob: &EncryptedKeyBlob,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> CustodyResult<EncryptedKeyBlob> {
        let key = self.decrypt(blob, old_passphrase)?;
        self.encrypt(&key, new_passphrase)
    }
}

fn derive_keys(
    kdf: &KdfParams,
    passphrase: &str,
    salt: &[u8],
) -> CustodyResult<Zeroizing<[u8; DERIVED_LEN]>> {
    let normalized: Zeroizing<String> = Zeroizing::new(passphrase.nfkd().collect());
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, kdf.argon2_params()?);

    let mut out = Zeroizing::new([0u8; DERIVED_LEN]);
    argon2
        .hash_password_into(normalized.as_bytes(), salt, out.as_mut())
        .map_err(|e| CustodyError::Derivation(format!("key derivation failed: {e}")))?;
    Ok(out)
}

fn address_checksum(mac_key: &[u8], address: &Address) -> CustodyResult<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|_| CustodyError::Derivation("invalid checksum key".to_string()))?;
    mac.update(address.as_slice());
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
