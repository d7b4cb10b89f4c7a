// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Custody Operations
//!
//! Request-facing entry points. Each one unlocks at most one key, uses it
//! for a single signing operation and drops it before returning.
//!
//! Argon2 and HD derivation run on the blocking pool; only node calls and
//! the per-address nonce lock suspend the calling task.
//!
//! Unknown identities and wrong passphrases both surface as
//! [`CustodyError::Authentication`].

use alloy::primitives::{Address, TxHash};
use secrecy::ExposeSecret;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::blockchain::{AbiValue, ContractCallSpec};
use crate::config::ADMIN_PRIVATE_KEY_ENV;
use crate::error::{CustodyError, CustodyResult};
use crate::reconciler::listing_keys;
use crate::state::CustodyState;
use crate::storage::{PendingSubject, StoreError, StoredKeyRecord};
use crate::vault::{Mnemonic, MnemonicDeriver, PrivateKey};

/// Registry entity created by a submission, recorded until it is visible on
/// chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub subject: PendingSubject,
    pub data: Vec<String>,
}

impl PendingRecord {
    pub fn new(subject: PendingSubject, data: Vec<String>) -> Self {
        Self { subject, data }
    }
}

/// Result of [`CustodyService::onboard_user`]. The mnemonic is returned
/// exactly once and is not stored.
#[derive(Debug)]
pub struct OnboardedUser {
    pub identity: String,
    pub address: Address,
    pub mnemonic: Mnemonic,
    pub tx_hash: TxHash,
    /// False when the node accepted `createUser` but the pending ledger
    /// could not store it. The user will not be listed until mined.
    pub pending_recorded: bool,
}

#[derive(Clone)]
pub struct CustodyService {
    state: CustodyState,
}

impl CustodyService {
    pub fn new(state: CustodyState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &CustodyState {
        &self.state
    }

    /// Make sure the admin identity has a key the configured passphrase
    /// unlocks, importing `private_key` when no record exists yet.
    pub async fn provision_admin(&self, private_key: Option<PrivateKey>) -> CustodyResult<Address> {
        let admin = self.state.admin.clone();
        let existing = self.state.db.keys().get(&admin.identity)?;

        match (existing, private_key) {
            (Some(record), Some(key)) if key.address() != record.address => {
                Err(CustodyError::Config(format!(
                    "{ADMIN_PRIVATE_KEY_ENV} does not match the stored key of {}",
                    admin.identity
                )))
            }
            (Some(record), _) => {
                self.unlock(&admin.identity, admin.passphrase.expose_secret())
                    .await
                    .map_err(|e| match e {
                        CustodyError::Authentication => CustodyError::Config(format!(
                            "admin passphrase does not unlock the key of {}",
                            admin.identity
                        )),
                        other => other,
                    })?;
                info!(identity = %admin.identity, address = %record.address, "Admin key unlocked");
                Ok(record.address)
            }
            (None, Some(key)) => {
                let record = self
                    .import_key(&admin.identity, key, admin.passphrase.expose_secret())
                    .await?;
                info!(identity = %admin.identity, address = %record.address, "Admin key imported");
                Ok(record.address)
            }
            (None, None) => Err(CustodyError::Config(format!(
                "no key stored for {} and {ADMIN_PRIVATE_KEY_ENV} is unset",
                admin.identity
            ))),
        }
    }

    /// Encrypt an existing key under `passphrase` and store it for
    /// `identity`.
    pub async fn import_key(
        &self,
        identity: &str,
        key: PrivateKey,
        passphrase: &str,
    ) -> CustodyResult<StoredKeyRecord> {
        let vault = self.state.vault;
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let address = key.address();
        let blob = blocking(move || vault.encrypt(&key, &passphrase)).await?;
        Ok(self.state.db.keys().put(identity, address, blob)?)
    }

    /// Create an account for a new user and register it on chain.
    ///
    /// A fresh mnemonic is generated and index 0 becomes the user's key,
    /// stored encrypted under `passphrase`. The admin key signs
    /// `createUser(address, userType, bytes32(username))`.
    ///
    /// The key record is created before anything is sent, which also
    /// claims `identity`. It is removed again only when the registration
    /// definitely did not happen; after an indeterminate failure it stays
    /// so the passphrase keeps unlocking the account.
    pub async fn onboard_user(
        &self,
        identity: &str,
        passphrase: &str,
        username: &str,
        user_type: u64,
    ) -> CustodyResult<OnboardedUser> {
        let keys = self.state.db.keys();
        if keys.get(identity)?.is_some() {
            return Err(StoreError::Conflict(format!("identity {identity} already has a key")).into());
        }
        let name = AbiValue::bytes32_from_ascii(username)?;

        let vault = self.state.vault;
        let deriver = self.state.deriver.clone();
        let coin_type = self.state.accounts.coin_type;
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let (mnemonic, address, blob) = blocking(move || {
            let mnemonic = deriver.generate_mnemonic()?;
            let account = deriver.derive_at(&mnemonic, coin_type, 0)?;
            let blob = vault.encrypt(&account.private_key, &passphrase)?;
            Ok((mnemonic, account.address, blob))
        })
        .await?;

        let spec = ContractCallSpec::new("createUser")
            .arg(address)
            .arg(user_type)
            .arg(name);
        let pending = PendingRecord::new(
            PendingSubject::AddUser,
            vec![
                username.to_string(),
                user_type.to_string(),
                AbiValue::Address(address).to_key_string(),
            ],
        );
        keys.create(identity, address, blob)?;

        let (tx_hash, pending_recorded) = match self.submit_as_admin(&spec, Some(pending)).await {
            Ok(tx_hash) => (tx_hash, true),
            Err(CustodyError::Unrecorded { tx_hash, .. }) => (tx_hash, false),
            Err(e) if e.is_indeterminate() => {
                warn!(identity, address = %address, error = %e, "Registration outcome unknown; key kept");
                return Err(e);
            }
            Err(e) => {
                if let Err(cleanup) = keys.remove(identity, address) {
                    error!(identity, error = %cleanup, "Could not remove key of failed registration");
                }
                return Err(e);
            }
        };
        info!(identity, address = %address, tx_hash = %tx_hash, "User onboarded");

        Ok(OnboardedUser {
            identity: identity.to_string(),
            address,
            mnemonic,
            tx_hash,
            pending_recorded,
        })
    }

    /// Check `passphrase` against the stored key of `identity`.
    pub async fn login(&self, identity: &str, passphrase: &str) -> CustodyResult<Address> {
        let record = self
            .state
            .db
            .keys()
            .get(identity)?
            .ok_or(CustodyError::Authentication)?;

        let vault = self.state.vault;
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let blob = record.blob;
        let address = record.address;
        let verified = blocking(move || Ok(vault.verify(&blob, &passphrase, address))).await?;
        if !verified {
            debug!(identity, "Login rejected");
            return Err(CustodyError::Authentication);
        }
        Ok(address)
    }

    /// Login with a mnemonic instead of a passphrase.
    ///
    /// Scans the first `discovery_bound` accounts of the phrase (with the
    /// optional BIP-39 seed passphrase) for the identity's address.
    pub async fn discover_login(
        &self,
        identity: &str,
        phrase: &str,
        seed_passphrase: &str,
    ) -> CustodyResult<Address> {
        let record = self
            .state
            .db
            .keys()
            .get(identity)?
            .ok_or(CustodyError::Authentication)?;

        let target = record.address;
        let accounts = self.state.accounts;
        let phrase = Zeroizing::new(phrase.to_owned());
        let seed_passphrase = Zeroizing::new(seed_passphrase.to_owned());
        let index = blocking(move || {
            let mnemonic = Mnemonic::parse(&phrase)?;
            MnemonicDeriver::with_seed_passphrase(&seed_passphrase).discover_account(
                &mnemonic,
                accounts.coin_type,
                target,
                accounts.discovery_bound,
            )
        })
        .await
        .map_err(|e| match e {
            CustodyError::NotFound(_) | CustodyError::Derivation(_) => CustodyError::Authentication,
            other => other,
        })?;

        debug!(identity, index, "Mnemonic login");
        Ok(target)
    }

    pub async fn change_passphrase(
        &self,
        identity: &str,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> CustodyResult<()> {
        let (_, key) = self.unlock(identity, old_passphrase).await?;
        let vault = self.state.vault;
        let passphrase = Zeroizing::new(new_passphrase.to_owned());
        let blob = blocking(move || vault.encrypt(&key, &passphrase)).await?;
        self.state.db.keys().replace_blob(identity, blob)?;
        info!(identity, "Passphrase changed");
        Ok(())
    }

    /// Re-key the account derived at index 0 of `phrase` under a new
    /// passphrase.
    pub async fn restore(&self, phrase: &str, new_passphrase: &str) -> CustodyResult<StoredKeyRecord> {
        let deriver = self.state.deriver.clone();
        let coin_type = self.state.accounts.coin_type;
        let phrase = Zeroizing::new(phrase.to_owned());
        let account = blocking(move || {
            let mnemonic = Mnemonic::parse(&phrase)?;
            deriver.derive_at(&mnemonic, coin_type, 0)
        })
        .await?;

        let keys = self.state.db.keys();
        let record = keys.find_by_address(account.address)?.ok_or_else(|| {
            CustodyError::NotFound(format!("no identity holds {}", account.address))
        })?;

        let vault = self.state.vault;
        let passphrase = Zeroizing::new(new_passphrase.to_owned());
        let blob = blocking(move || vault.encrypt(&account.private_key, &passphrase)).await?;
        let updated = keys.replace_blob(&record.identity, blob)?;
        info!(identity = %updated.identity, address = %updated.address, "Account restored from mnemonic");
        Ok(updated)
    }

    /// Sign `spec` with the key of `identity` and submit it to the registry.
    pub async fn submit(
        &self,
        identity: &str,
        passphrase: &str,
        spec: &ContractCallSpec,
        pending: Option<PendingRecord>,
    ) -> CustodyResult<TxHash> {
        check_pending(pending.as_ref())?;
        let (_, key) = self.unlock(identity, passphrase).await?;
        self.send_and_record(&key, spec, pending).await
    }

    /// Like [`submit`](Self::submit), signed by the admin identity.
    pub async fn submit_as_admin(
        &self,
        spec: &ContractCallSpec,
        pending: Option<PendingRecord>,
    ) -> CustodyResult<TxHash> {
        check_pending(pending.as_ref())?;
        let admin = self.state.admin.clone();
        let (_, key) = self
            .unlock(&admin.identity, admin.passphrase.expose_secret())
            .await?;
        self.send_and_record(&key, spec, pending).await
    }

    /// Confirmed keys returned by `listing` followed by the keys of
    /// `subject` entries that are still pending.
    pub async fn list_with_pending(
        &self,
        subject: PendingSubject,
        listing: &ContractCallSpec,
    ) -> CustodyResult<Vec<String>> {
        let ledger = self.state.db.pending();
        let values = self.state.registry.call(listing).await?;
        let mut keys = listing_keys(&values)?;

        ledger.reconcile(subject, &keys)?;
        keys.extend(
            ledger
                .list_pending(subject)?
                .iter()
                .filter_map(|tx| tx.identifying_key()),
        );
        Ok(keys)
    }

    async fn unlock(
        &self,
        identity: &str,
        passphrase: &str,
    ) -> CustodyResult<(StoredKeyRecord, PrivateKey)> {
        let record = self
            .state
            .db
            .keys()
            .get(identity)?
            .ok_or(CustodyError::Authentication)?;

        let vault = self.state.vault;
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let blob = record.blob.clone();
        let expected = record.address;
        let key = blocking(move || {
            let key = vault.decrypt(&blob, &passphrase)?;
            if key.address() != expected {
                return Err(CustodyError::Authentication);
            }
            Ok(key)
        })
        .await?;
        debug!(identity, address = %expected, "Key unlocked");
        Ok((record, key))
    }

    /// Send, then record `pending`. A ledger failure after the node accepted
    /// the transaction is reported as [`CustodyError::Unrecorded`].
    async fn send_and_record(
        &self,
        key: &PrivateKey,
        spec: &ContractCallSpec,
        pending: Option<PendingRecord>,
    ) -> CustodyResult<TxHash> {
        let tx_hash = self.state.registry.send(spec, key).await?;

        if let Some(PendingRecord { subject, data }) = pending {
            if let Err(e) = self.state.db.pending().record_pending(tx_hash, subject, data) {
                error!(
                    tx_hash = %tx_hash,
                    subject = %subject,
                    error = %e,
                    "Submitted transaction could not be recorded as pending"
                );
                return Err(CustodyError::Unrecorded {
                    tx_hash,
                    detail: e.to_string(),
                });
            }
        }
        Ok(tx_hash)
    }
}

fn check_pending(pending: Option<&PendingRecord>) -> CustodyResult<()> {
    match pending {
        Some(record) if record.subject.identifying_key(&record.data).is_none() => {
            Err(CustodyError::InvalidCall(format!(
                "{} data needs an identifying key at position {}",
                record.subject,
                record.subject.key_index()
            )))
        }
        _ => Ok(()),
    }
}

/// Run CPU-bound key work on the blocking pool.
async fn blocking<T, F>(work: F) -> CustodyResult<T>
where
    F: FnOnce() -> CustodyResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(CustodyError::Derivation(format!("key worker cancelled: {e}"))),
    }
}

// =============================================================================
// Tests
// =============================================================================
