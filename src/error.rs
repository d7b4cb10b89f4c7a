// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error kinds surfaced by the custody core.
//!
//! Callers are expected to branch on the variant:
//!
//! - [`CustodyError::RemoteCall`] is transient and may be retried by the
//!   caller with backoff. The core never retries on its own, since
//!   retrying a `send` risks a double submission.
//! - [`CustodyError::Timeout`] and [`CustodyError::SubmissionUnknown`] mean
//!   the outcome is unknown. The transaction may or may not have reached the
//!   node, and resending risks a double submission.
//! - [`CustodyError::Unrecorded`] means the node accepted the transaction
//!   but the pending ledger could not store it.
//! - Everything else is final for the request.

use std::time::Duration;

use alloy::primitives::{Address, TxHash};

use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// Wrong passphrase, checksum mismatch or address mismatch. Carries no
    /// detail on purpose.
    #[error("authentication failed")]
    Authentication,

    #[error("derivation error: {0}")]
    Derivation(String),

    #[error("remote call failed: {0}")]
    RemoteCall(String),

    #[error("nonce conflict for {address}: {detail}")]
    NonceConflict { address: Address, detail: String },

    #[error("contract execution reverted: {}", reason.as_deref().unwrap_or("no reason given"))]
    ContractExecution { reason: Option<String> },

    #[error("could not decode contract return data: {0}")]
    ReturnDecoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("invalid contract call: {0}")]
    InvalidCall(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("{operation} timed out after {after:?}; outcome unknown")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The signed transaction was handed to the node but no answer came
    /// back. `tx_hash` is the locally computed hash to look up.
    #[error("submission of {tx_hash} has unknown outcome: {detail}")]
    SubmissionUnknown { tx_hash: TxHash, detail: String },

    #[error("transaction {tx_hash} was submitted but not recorded: {detail}")]
    Unrecorded { tx_hash: TxHash, detail: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CustodyError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteCall(_))
    }

    /// Whether the underlying action may or may not have happened.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::SubmissionUnknown { .. })
    }
}

pub type CustodyResult<T> = Result<T, CustodyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_call_is_retryable() {
        assert!(CustodyError::RemoteCall("down".into()).is_retryable());
        assert!(!CustodyError::Authentication.is_retryable());
        assert!(!CustodyError::ContractExecution { reason: None }.is_retryable());
        assert!(!CustodyError::Timeout {
            operation: "send",
            after: Duration::from_secs(5),
        }
        .is_retryable());
    }

    #[test]
    fn timeout_is_indeterminate() {
        let err = CustodyError::Timeout {
            operation: "send",
            after: Duration::from_secs(5),
        };
        assert!(err.is_indeterminate());
        assert!(err.to_string().contains("outcome unknown"));
        assert!(!CustodyError::RemoteCall("x".into()).is_indeterminate());
    }

    #[test]
    fn lost_submission_response_is_not_retryable() {
        let err = CustodyError::SubmissionUnknown {
            tx_hash: TxHash::repeat_byte(0x11),
            detail: "connection reset".into(),
        };
        assert!(err.is_indeterminate());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains(&TxHash::repeat_byte(0x11).to_string()));

        let unrecorded = CustodyError::Unrecorded {
            tx_hash: TxHash::repeat_byte(0x22),
            detail: "disk full".into(),
        };
        assert!(!unrecorded.is_indeterminate());
        assert!(!unrecorded.is_retryable());
    }

    #[test]
    fn authentication_message_has_no_detail() {
        assert_eq!(CustodyError::Authentication.to_string(), "authentication failed");
    }

    #[test]
    fn revert_message_includes_reason() {
        let err = CustodyError::ContractExecution {
            reason: Some("user exists".into()),
        };
        assert_eq!(err.to_string(), "contract execution reverted: user exists");

        let bare = CustodyError::ContractExecution { reason: None };
        assert!(bare.to_string().ends_with("no reason given"));
    }
}
