// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted key records keyed by user identity.

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};

use super::database::{StoreError, StoreResult, ADDRESS_IDENTITY, KEY_RECORDS};
use crate::vault::EncryptedKeyBlob;

/// One custodial account at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeyRecord {
    pub identity: String,
    pub address: Address,
    pub blob: EncryptedKeyBlob,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn address_key(address: &Address) -> String {
    format!("{address:?}").to_lowercase()
}

/// Repository over the `key_records` and `address_identity` tables.
pub struct KeyStore {
    db: Arc<Database>,
}

impl KeyStore {
    pub(super) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the record for `identity`, or replace its blob.
    ///
    /// An identity stays bound to the address it was created with, and an
    /// address belongs to at most one identity.
    pub fn put(
        &self,
        identity: &str,
        address: Address,
        blob: EncryptedKeyBlob,
    ) -> StoreResult<StoredKeyRecord> {
        let now = Utc::now();
        let addr = address_key(&address);

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut records = write_txn.open_table(KEY_RECORDS)?;
            let mut by_address = write_txn.open_table(ADDRESS_IDENTITY)?;

            let existing: Option<StoredKeyRecord> = match records.get(identity)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            if let Some(existing) = &existing {
                if existing.address != address {
                    return Err(StoreError::Conflict(format!(
                        "identity {identity} is bound to another address"
                    )));
                }
            }

            let owner = by_address
                .get(addr.as_str())?
                .map(|v| v.value().to_string());
            if let Some(owner) = owner {
                if owner != identity {
                    return Err(StoreError::Conflict(format!(
                        "address {address} already belongs to another identity"
                    )));
                }
            }

            let record = StoredKeyRecord {
                identity: identity.to_string(),
                address,
                blob,
                created_at: existing.map(|r| r.created_at).unwrap_or(now),
                updated_at: now,
            };
            let json = serde_json::to_vec(&record)?;
            records.insert(identity, json.as_slice())?;
            by_address.insert(addr.as_str(), identity)?;
            record
        };
        write_txn.commit()?;

        tracing::debug!(identity, address = %address, "Key record stored");
        Ok(record)
    }

    /// Store a record for an identity and address that are both unused.
    ///
    /// The check and the insert share one write transaction, so of two
    /// concurrent creates for the same identity exactly one succeeds.
    pub fn create(
        &self,
        identity: &str,
        address: Address,
        blob: EncryptedKeyBlob,
    ) -> StoreResult<StoredKeyRecord> {
        let now = Utc::now();
        let addr = address_key(&address);

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut records = write_txn.open_table(KEY_RECORDS)?;
            let mut by_address = write_txn.open_table(ADDRESS_IDENTITY)?;

            if records.get(identity)?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "identity {identity} already has a key"
                )));
            }
            if by_address.get(addr.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "address {address} already belongs to another identity"
                )));
            }

            let record = StoredKeyRecord {
                identity: identity.to_string(),
                address,
                blob,
                created_at: now,
                updated_at: now,
            };
            let json = serde_json::to_vec(&record)?;
            records.insert(identity, json.as_slice())?;
            by_address.insert(addr.as_str(), identity)?;
            record
        };
        write_txn.commit()?;

        tracing::debug!(identity, address = %address, "Key record created");
        Ok(record)
    }

    /// Delete the record of `identity` if it is bound to `address`.
    /// Returns whether anything was removed.
    pub fn remove(&self, identity: &str, address: Address) -> StoreResult<bool> {
        let addr = address_key(&address);

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut records = write_txn.open_table(KEY_RECORDS)?;
            let mut by_address = write_txn.open_table(ADDRESS_IDENTITY)?;

            let bound = match records.get(identity)? {
                Some(value) => {
                    let record: StoredKeyRecord = serde_json::from_slice(value.value())?;
                    record.address == address
                }
                None => false,
            };
            if bound {
                records.remove(identity)?;
                by_address.remove(addr.as_str())?;
            }
            bound
        };
        write_txn.commit()?;

        if removed {
            tracing::debug!(identity, address = %address, "Key record removed");
        }
        Ok(removed)
    }

    pub fn get(&self, identity: &str) -> StoreResult<Option<StoredKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEY_RECORDS)?;
        match table.get(identity)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up the record owning an on-chain address.
    pub fn find_by_address(&self, address: Address) -> StoreResult<Option<StoredKeyRecord>> {
        let addr = address_key(&address);
        let read_txn = self.db.begin_read()?;
        let by_address = read_txn.open_table(ADDRESS_IDENTITY)?;
        let identity = match by_address.get(addr.as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        let records = read_txn.open_table(KEY_RECORDS)?;
        match records.get(identity.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Swap the encrypted blob of an existing record (passphrase change or
    /// restore).
    pub fn replace_blob(&self, identity: &str, blob: EncryptedKeyBlob) -> StoreResult<StoredKeyRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(KEY_RECORDS)?;

            let existing_bytes = {
                let existing = table
                    .get(identity)?
                    .ok_or_else(|| StoreError::NotFound(format!("key record {identity}")))?;
                existing.value().to_vec()
            };

            let mut record: StoredKeyRecord = serde_json::from_slice(&existing_bytes)?;
            record.blob = blob;
            record.updated_at = Utc::now();

            let json = serde_json::to_vec(&record)?;
            table.insert(identity, json.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CustodyDatabase;
    use alloy::primitives::Bytes;

    fn temp_store() -> (KeyStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CustodyDatabase::open(&dir.path().join("test.redb")).unwrap();
        (db.keys(), dir)
    }

    fn blob(tag: u8) -> EncryptedKeyBlob {
        EncryptedKeyBlob {
            algorithm_id: "argon2id-aes256gcm-hmacsha256/v1;m=64,t=1,p=1".to_string(),
            salt: Bytes::from(vec![tag; 16]),
            iv: Bytes::from(vec![tag; 12]),
            ciphertext: Bytes::from(vec![tag; 48]),
            checksum: Bytes::from(vec![tag; 32]),
        }
    }

    #[test]
    fn put_and_get() {
        let (store, _dir) = temp_store();
        let address = Address::repeat_byte(0x11);
        store.put("alice", address, blob(1)).unwrap();

        let record = store.get("alice").unwrap().unwrap();
        assert_eq!(record.address, address);
        assert_eq!(record.blob, blob(1));
        assert!(store.get("bob").unwrap().is_none());
    }

    #[test]
    fn find_by_address() {
        let (store, _dir) = temp_store();
        let address = Address::repeat_byte(0xab);
        store.put("alice", address, blob(1)).unwrap();

        let found = store.find_by_address(address).unwrap().unwrap();
        assert_eq!(found.identity, "alice");
        assert!(store
            .find_by_address(Address::repeat_byte(0xcd))
            .unwrap()
            .is_none());
    }

    #[test]
    fn put_keeps_created_at_and_replaces_blob() {
        let (store, _dir) = temp_store();
        let address = Address::repeat_byte(0x11);
        let first = store.put("alice", address, blob(1)).unwrap();
        let second = store.put("alice", address, blob(2)).unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.get("alice").unwrap().unwrap().blob, blob(2));
    }

    #[test]
    fn identity_cannot_be_rebound() {
        let (store, _dir) = temp_store();
        store.put("alice", Address::repeat_byte(0x11), blob(1)).unwrap();

        let err = store
            .put("alice", Address::repeat_byte(0x22), blob(2))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store
            .put("bob", Address::repeat_byte(0x11), blob(3))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get("bob").unwrap().is_none());
    }

    #[test]
    fn create_refuses_taken_identity_or_address() {
        let (store, _dir) = temp_store();
        store.create("alice", Address::repeat_byte(0x11), blob(1)).unwrap();

        // Same identity and address is still a conflict, unlike `put`.
        for (identity, address) in [
            ("alice", Address::repeat_byte(0x11)),
            ("alice", Address::repeat_byte(0x22)),
            ("bob", Address::repeat_byte(0x11)),
        ] {
            assert!(matches!(
                store.create(identity, address, blob(2)),
                Err(StoreError::Conflict(_))
            ));
        }
        assert_eq!(store.get("alice").unwrap().unwrap().blob, blob(1));
        assert!(store.get("bob").unwrap().is_none());
    }

    #[test]
    fn remove_only_matches_the_bound_address() {
        let (store, _dir) = temp_store();
        let address = Address::repeat_byte(0x11);
        store.create("alice", address, blob(1)).unwrap();

        assert!(!store.remove("alice", Address::repeat_byte(0x22)).unwrap());
        assert!(store.get("alice").unwrap().is_some());

        assert!(store.remove("alice", address).unwrap());
        assert!(store.get("alice").unwrap().is_none());
        assert!(store.find_by_address(address).unwrap().is_none());
        assert!(!store.remove("alice", address).unwrap());

        // Both the identity and the address are free again.
        store.create("alice", address, blob(2)).unwrap();
    }

    #[test]
    fn replace_blob_requires_existing_record() {
        let (store, _dir) = temp_store();
        assert!(matches!(
            store.replace_blob("ghost", blob(1)),
            Err(StoreError::NotFound(_))
        ));

        store.put("alice", Address::repeat_byte(0x11), blob(1)).unwrap();
        let updated = store.replace_blob("alice", blob(9)).unwrap();
        assert_eq!(updated.blob, blob(9));
        assert_eq!(store.get("alice").unwrap().unwrap().blob, blob(9));
    }
}
