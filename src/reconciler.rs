// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pending Reconciler
//!
//! Background task that prunes pending registry submissions once they are
//! visible on chain, so the ledger does not depend on someone listing
//! users or projects to stay small.
//!
//! ## Strategy
//!
//! Every `interval` (default 30 s) the reconciler:
//! 1. Reads the registry listing method of every subject that has one
//!    (`getAllUsers`, `getAllClients`, `getAllProjects`).
//! 2. Reconciles the subject's pending entries against the returned keys.
//!
//! A failed read leaves that subject untouched until the next sweep.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blockchain::{AbiValue, ContractCallSpec, ContractGateway};
use crate::config::DEFAULT_RECONCILE_INTERVAL;
use crate::error::{CustodyError, CustodyResult};
use crate::storage::{PendingLedger, PendingSubject};

/// Identifying keys from the return values of a registry listing method.
///
/// The first return value must be an array; each element becomes one key.
pub fn listing_keys(values: &[AbiValue]) -> CustodyResult<Vec<String>> {
    let items = values
        .first()
        .and_then(AbiValue::as_array)
        .ok_or_else(|| CustodyError::ReturnDecoding("listing did not return an array".into()))?;
    Ok(items.iter().map(AbiValue::to_key_string).collect())
}

pub struct PendingReconciler {
    ledger: PendingLedger,
    registry: ContractGateway,
    interval: Duration,
}

impl PendingReconciler {
    pub fn new(ledger: PendingLedger, registry: ContractGateway) -> Self {
        Self {
            ledger,
            registry,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reconciler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            registry = %self.registry.address(),
            "Pending reconciler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Pending reconciler shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Pending reconciler shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over every listable subject. Returns the number of entries
    /// removed.
    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for subject in PendingSubject::ALL {
            let Some(method) = subject.listing_method() else {
                continue;
            };
            if self.registry.abi().method(method).is_none() {
                debug!(subject = %subject, method, "Registry has no listing method; skipped");
                continue;
            }

            let spec = ContractCallSpec::new(method);
            let source = async {
                let values = self.registry.call(&spec).await?;
                listing_keys(&values)
            };
            match self.ledger.reconcile_from(subject, source).await {
                Ok(count) => removed += count,
                Err(e) => {
                    warn!(
                        subject = %subject,
                        method,
                        error = %e,
                        "Reconciler: sweep failed for subject"
                    );
                }
            }
        }
        removed
    }
}
