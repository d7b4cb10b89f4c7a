// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pending transaction ledger.
//!
//! Every state-changing submission is recorded here before its effect is
//! visible on chain. Listing paths merge the confirmed on-chain list with
//! what is still pending, and prune entries whose identifying key has shown
//! up on chain. Entries are only ever removed by reconciliation.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::{Deserialize, Serialize};

use super::database::{StoreResult, PENDING_HASH_INDEX, PENDING_TRANSACTIONS};
use crate::error::{CustodyError, CustodyResult};

/// What a pending transaction creates on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingSubject {
    /// `data = [username, userType, address]`
    AddUser,
    /// `data = [name, address]`
    AddClient,
    /// `data = [supplierAddress, processTitle]`
    AddProcess,
    /// `data = [projectId, clientAddress, title, orderCode]`
    AddProject,
}

impl PendingSubject {
    pub const ALL: [PendingSubject; 4] = [
        Self::AddUser,
        Self::AddClient,
        Self::AddProcess,
        Self::AddProject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddUser => "add-user",
            Self::AddClient => "add-client",
            Self::AddProcess => "add-process",
            Self::AddProject => "add-project",
        }
    }

    /// Position of the identifying key inside `data`.
    pub fn key_index(&self) -> usize {
        match self {
            Self::AddUser => 2,
            Self::AddClient => 1,
            Self::AddProcess => 1,
            Self::AddProject => 0,
        }
    }

    /// Normalised key at [`key_index`](Self::key_index), if present and
    /// non-empty.
    pub fn identifying_key<S: AsRef<str>>(&self, data: &[S]) -> Option<String> {
        data.get(self.key_index())
            .map(|raw| normalize_key(raw.as_ref()))
            .filter(|key| !key.is_empty())
    }

    /// Registry method listing the confirmed keys of this subject, if the
    /// registry exposes one.
    pub fn listing_method(&self) -> Option<&'static str> {
        match self {
            Self::AddUser => Some("getAllUsers"),
            Self::AddClient => Some("getAllClients"),
            Self::AddProject => Some("getAllProjects"),
            // Processes are listed per supplier, not globally.
            Self::AddProcess => None,
        }
    }
}

impl fmt::Display for PendingSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingSubject {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| CustodyError::InvalidCall(format!("unknown pending subject `{s}`")))
    }
}

/// A submitted transaction whose effect is not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub subject: PendingSubject,
    pub data: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Normalised identifying key, if `data` carries one.
    pub fn identifying_key(&self) -> Option<String> {
        self.subject.identifying_key(&self.data)
    }
}

/// Canonical form used to compare pending keys with on-chain values:
/// trimmed, and lower-cased when it is `0x`-prefixed hex.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let is_hex = trimmed.len() > 2
        && (trimmed.starts_with("0x") || trimmed.starts_with("0X"))
        && trimmed[2..].bytes().all(|b| b.is_ascii_hexdigit());
    if is_hex {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Composite key: `subject | created_at_be | tx_hash`.
///
/// The sign bit of the millisecond timestamp is flipped so that byte order
/// matches time order (oldest first).
fn make_pending_key(subject: PendingSubject, created_at: &DateTime<Utc>, hash: &TxHash) -> Vec<u8> {
    let subject = subject.as_str();
    let hash = format!("{hash:?}");
    let mut key = Vec::with_capacity(subject.len() + 1 + 8 + 1 + hash.len());
    key.extend_from_slice(subject.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&((created_at.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(hash.as_bytes());
    key
}

fn make_prefix(subject: PendingSubject) -> Vec<u8> {
    let mut prefix = subject.as_str().as_bytes().to_vec();
    prefix.push(b'|');
    prefix
}

fn make_prefix_end(subject: PendingSubject) -> Vec<u8> {
    let mut end = make_prefix(subject);
    end.extend_from_slice(&[0xFF; 20]);
    end
}

// =============================================================================
// PendingLedger
// =============================================================================

/// Durable store of pending transactions.
///
/// Every reconcile pass runs in one redb write transaction. redb serialises
/// writers, so concurrent passes for the same subject are safe and deletes
/// are idempotent.
#[derive(Clone)]
pub struct PendingLedger {
    db: Arc<Database>,
}

impl PendingLedger {
    pub(super) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a submission. Re-recording a known hash is a no-op and
    /// returns `false`.
    pub fn record_pending(
        &self,
        hash: TxHash,
        subject: PendingSubject,
        data: Vec<String>,
    ) -> CustodyResult<bool> {
        let entry = PendingTransaction {
            hash,
            subject,
            data,
            created_at: Utc::now(),
        };
        if entry.identifying_key().is_none() {
            return Err(CustodyError::InvalidCall(format!(
                "{subject} data needs an identifying key at position {}",
                subject.key_index()
            )));
        }
        let inserted = self.insert(&entry)?;
        if inserted {
            tracing::debug!(tx_hash = %hash, subject = %subject, "Pending transaction recorded");
        }
        Ok(inserted)
    }

    fn insert(&self, entry: &PendingTransaction) -> StoreResult<bool> {
        let hash = format!("{:?}", entry.hash);
        let write_txn = self.db.begin_write()?;
        {
            let mut hash_index = write_txn.open_table(PENDING_HASH_INDEX)?;
            if hash_index.get(hash.as_str())?.is_some() {
                return Ok(false);
            }
            let key = make_pending_key(entry.subject, &entry.created_at, &entry.hash);
            let json = serde_json::to_vec(entry)?;

            let mut pending = write_txn.open_table(PENDING_TRANSACTIONS)?;
            pending.insert(key.as_slice(), json.as_slice())?;
            hash_index.insert(hash.as_str(), key.as_slice())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    /// Delete every pending entry of `subject` whose identifying key is in
    /// `confirmed`. Returns the number of entries removed.
    pub fn reconcile<S: AsRef<str>>(
        &self,
        subject: PendingSubject,
        confirmed: &[S],
    ) -> CustodyResult<usize> {
        let confirmed: HashSet<String> = confirmed
            .iter()
            .map(|key| normalize_key(key.as_ref()))
            .collect();
        if confirmed.is_empty() {
            return Ok(0);
        }
        let removed = self.remove_confirmed(subject, &confirmed)?;
        if removed > 0 {
            tracing::info!(subject = %subject, removed, "Pending transactions reconciled");
        }
        Ok(removed)
    }

    fn remove_confirmed(&self, subject: PendingSubject, confirmed: &HashSet<String>) -> StoreResult<usize> {
        let prefix = make_prefix(subject);
        let prefix_end = make_prefix_end(subject);

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut pending = write_txn.open_table(PENDING_TRANSACTIONS)?;
            let mut hash_index = write_txn.open_table(PENDING_HASH_INDEX)?;

            let mut doomed: Vec<(Vec<u8>, TxHash)> = Vec::new();
            for entry in pending.range(prefix.as_slice()..prefix_end.as_slice())? {
                let (key, value) = entry?;
                let tx: PendingTransaction = serde_json::from_slice(value.value())?;
                if tx
                    .identifying_key()
                    .is_some_and(|k| confirmed.contains(&k))
                {
                    doomed.push((key.value().to_vec(), tx.hash));
                }
            }

            for (key, hash) in &doomed {
                pending.remove(key.as_slice())?;
                hash_index.remove(format!("{hash:?}").as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Reconcile against a confirmed set that still has to be fetched.
    ///
    /// If the source fails nothing is deleted and its error is returned.
    pub async fn reconcile_from<F>(&self, subject: PendingSubject, source: F) -> CustodyResult<usize>
    where
        F: Future<Output = CustodyResult<Vec<String>>>,
    {
        let confirmed = match source.await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Reconcile source failed; ledger untouched");
                return Err(e);
            }
        };
        self.reconcile(subject, &confirmed)
    }

    /// Remaining entries of `subject`, oldest first.
    pub fn list_pending(&self, subject: PendingSubject) -> CustodyResult<Vec<PendingTransaction>> {
        Ok(self.scan(subject)?)
    }

    fn scan(&self, subject: PendingSubject) -> StoreResult<Vec<PendingTransaction>> {
        let prefix = make_prefix(subject);
        let prefix_end = make_prefix_end(subject);

        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_TRANSACTIONS)?;
        let mut results = Vec::new();
        for entry in pending.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (_, value) = entry?;
            results.push(serde_json::from_slice(value.value())?);
        }
        Ok(results)
    }

    /// Total pending entries across all subjects.
    pub fn count_pending(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_TRANSACTIONS)?;
        Ok(pending.len()?)
    }
}

// =============================================================================
// Tests
// =============================================================================
