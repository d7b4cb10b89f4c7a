// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Durable custody state in a single embedded redb file.
//!
//! ## Storage Layout
//!
//! ```text
//! {data_dir}/
//!   custody.redb
//!     key_records           # identity -> encrypted key record
//!     address_identity      # address -> identity
//!     pending_transactions  # subject|time|hash -> pending entry
//!     pending_hash_index    # hash -> pending key
//! ```
//!
//! ## Important Notes
//!
//! - Private keys only ever reach this module as [`EncryptedKeyBlob`]s
//! - Pending entries are removed by reconciliation and nothing else
//!
//! [`EncryptedKeyBlob`]: crate::vault::EncryptedKeyBlob

pub mod database;
pub mod keys;
pub mod pending;

pub use database::{CustodyDatabase, StoreError, StoreResult};
pub use keys::{KeyStore, StoredKeyRecord};
pub use pending::{normalize_key, PendingLedger, PendingSubject, PendingTransaction};

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "custody.redb";
