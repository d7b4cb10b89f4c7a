// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded custody database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `key_records`: identity → serialized StoredKeyRecord
//! - `address_identity`: lowercase address → identity
//! - `pending_transactions`: composite key (subject|created_at|hash) → serialized PendingTransaction
//! - `pending_hash_index`: tx hash → composite key

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};

use super::keys::KeyStore;
use super::pending::PendingLedger;

// =============================================================================
// Table Definitions
// =============================================================================

/// identity → serialized StoredKeyRecord (JSON bytes).
pub(super) const KEY_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("key_records");

/// Lowercase on-chain address → identity.
pub(super) const ADDRESS_IDENTITY: TableDefinition<&str, &str> =
    TableDefinition::new("address_identity");

/// Composite key → serialized PendingTransaction.
/// Key format: `subject|created_at_be|tx_hash` for oldest-first range scans.
pub(super) const PENDING_TRANSACTIONS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("pending_transactions");

/// tx hash → composite key in `pending_transactions`.
pub(super) const PENDING_HASH_INDEX: TableDefinition<&str, &[u8]> =
    TableDefinition::new("pending_hash_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// CustodyDatabase
// =============================================================================

/// Handle to the custody database file. Cheap to clone.
#[derive(Clone)]
pub struct CustodyDatabase {
    db: Arc<Database>,
}

impl CustodyDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KEY_RECORDS)?;
            let _ = write_txn.open_table(ADDRESS_IDENTITY)?;
            let _ = write_txn.open_table(PENDING_TRANSACTIONS)?;
            let _ = write_txn.open_table(PENDING_HASH_INDEX)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Custody database opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Encrypted key records.
    pub fn keys(&self) -> KeyStore {
        KeyStore::new(self.db.clone())
    }

    /// Pending transaction ledger.
    pub fn pending(&self) -> PendingLedger {
        PendingLedger::new(self.db.clone())
    }
}
