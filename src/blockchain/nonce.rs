// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-address nonce serialization.
//!
//! Each signer address has one async mutex. A send holds that address's
//! [`NonceLease`] from the nonce read until the node has answered, so
//! submissions from one address are strictly ordered while different
//! addresses never wait on each other. tokio mutexes are fair, so waiters
//! are served in the order they called `lease`.
//!
//! The slot also remembers the next nonce handed out. The chain's pending
//! count can lag behind our own submissions, so the nonce used is the larger
//! of the two. A cached value the chain has stayed below for
//! [`STALE_AFTER`] is discarded: the transactions behind it were dropped
//! from the mempool and their nonces must be reused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

/// How long the chain may report a lower pending count than our cache
/// before the cache is dropped.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct NonceSlot {
    /// Next nonce after our last accepted submission.
    next: Option<u64>,
    /// When the chain was first seen behind `next`.
    lagging_since: Option<Instant>,
}

impl NonceSlot {
    fn reset(&mut self) {
        self.next = None;
        self.lagging_since = None;
    }
}

/// Registry of per-address nonce slots, shared by every gateway of a client.
#[derive(Debug, Default)]
pub struct NonceManager {
    slots: Mutex<HashMap<Address, Arc<AsyncMutex<NonceSlot>>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `address`'s nonce sequence.
    pub async fn lease(&self, address: Address) -> NonceLease {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(address).or_default().clone()
        };
        NonceLease {
            address,
            guard: slot.lock_owned().await,
            in_flight: false,
        }
    }

    /// Whether some task currently holds the lease for `address`.
    pub fn is_leased(&self, address: Address) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&address)
            .is_some_and(|slot| slot.try_lock().is_err())
    }
}

/// Exclusive right to sign and submit for one address.
///
/// Dropping a lease releases the address. If it is dropped while a
/// submission is in flight (timeout, cancellation, transport failure) the
/// cached nonce is forgotten and the next lease starts from the chain's
/// view.
#[derive(Debug)]
pub struct NonceLease {
    address: Address,
    guard: OwnedMutexGuard<NonceSlot>,
    in_flight: bool,
}

impl NonceLease {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Nonce to sign with, given the node's pending transaction count.
    pub fn next_nonce(&mut self, chain_pending: u64) -> u64 {
        let Some(local) = self.guard.next else {
            return chain_pending;
        };
        if chain_pending >= local {
            self.guard.lagging_since = None;
            return chain_pending;
        }

        let since = *self.guard.lagging_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= STALE_AFTER {
            tracing::warn!(
                address = %self.address,
                cached = local,
                chain = chain_pending,
                "Chain stayed behind cached nonce; resyncing"
            );
            self.guard.reset();
            return chain_pending;
        }
        local
    }

    /// Mark that a signed transaction is about to reach the node.
    pub fn begin_submission(&mut self) {
        self.in_flight = true;
    }

    /// The node accepted the transaction with `nonce`.
    pub fn commit(mut self, nonce: u64) {
        self.guard.next = Some(nonce + 1);
        self.in_flight = false;
    }

    /// The node definitively refused the transaction; the nonce is unused
    /// and the cache stays valid.
    pub fn release(mut self) {
        self.in_flight = false;
    }
}

impl Drop for NonceLease {
    fn drop(&mut self) {
        if self.in_flight {
            tracing::warn!(
                address = %self.address,
                "Submission outcome unknown; dropping cached nonce"
            );
            self.guard.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const A: Address = Address::repeat_byte(0xaa);
    const B: Address = Address::repeat_byte(0xbb);

    #[tokio::test]
    async fn committed_nonces_advance_locally() {
        let nonces = NonceManager::new();

        let mut lease = nonces.lease(A).await;
        assert_eq!(lease.next_nonce(0), 0);
        lease.commit(0);

        // Chain has not seen the first transaction yet.
        let mut lease = nonces.lease(A).await;
        assert_eq!(lease.next_nonce(0), 1);
        lease.commit(1);

        // Chain is ahead (e.g. sent from elsewhere).
        let mut lease = nonces.lease(A).await;
        assert_eq!(lease.next_nonce(7), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_the_chain_stays_below_is_dropped() {
        let nonces = NonceManager::new();
        nonces.lease(A).await.commit(0);

        // Transaction 0 was evicted; the chain keeps reporting 0.
        assert_eq!(nonces.lease(A).await.next_nonce(0), 1);
        tokio::time::advance(STALE_AFTER - Duration::from_secs(1)).await;
        assert_eq!(nonces.lease(A).await.next_nonce(0), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(nonces.lease(A).await.next_nonce(0), 0);
        // Cache is gone, the chain is trusted from here on.
        assert_eq!(nonces.lease(A).await.next_nonce(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn catching_up_clears_the_lag_timer() {
        let nonces = NonceManager::new();
        nonces.lease(A).await.commit(4);

        assert_eq!(nonces.lease(A).await.next_nonce(3), 5);
        tokio::time::advance(STALE_AFTER / 2).await;
        // The chain sees everything; a later lag starts a fresh window.
        assert_eq!(nonces.lease(A).await.next_nonce(5), 5);
        nonces.lease(A).await.commit(5);

        tokio::time::advance(STALE_AFTER / 2).await;
        assert_eq!(nonces.lease(A).await.next_nonce(5), 6);
        tokio::time::advance(STALE_AFTER / 2).await;
        assert_eq!(nonces.lease(A).await.next_nonce(5), 6);
    }

    #[tokio::test]
    async fn released_lease_keeps_cache() {
        let nonces = NonceManager::new();
        nonces.lease(A).await.commit(4);

        let mut lease = nonces.lease(A).await;
        lease.begin_submission();
        lease.release();

        assert_eq!(nonces.lease(A).await.next_nonce(0), 5);
    }

    #[tokio::test]
    async fn dropped_in_flight_lease_resets_cache() {
        let nonces = NonceManager::new();
        nonces.lease(A).await.commit(4);

        let mut lease = nonces.lease(A).await;
        lease.begin_submission();
        drop(lease);

        assert_eq!(nonces.lease(A).await.next_nonce(2), 2);
    }

    #[tokio::test]
    async fn lease_is_exclusive_per_address() {
        let nonces = Arc::new(NonceManager::new());
        let held = nonces.lease(A).await;
        assert!(nonces.is_leased(A));

        // Same address waits.
        let waiting = tokio::time::timeout(Duration::from_millis(50), nonces.lease(A)).await;
        assert!(waiting.is_err());

        // Other addresses do not.
        let other = tokio::time::timeout(Duration::from_millis(50), nonces.lease(B)).await;
        assert!(other.is_ok());

        drop(held);
        assert!(!nonces.is_leased(A));
        let again = tokio::time::timeout(Duration::from_millis(50), nonces.lease(A)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_poison_slot() {
        let nonces = Arc::new(NonceManager::new());
        let held = nonces.lease(A).await;

        let waiter = {
            let nonces = nonces.clone();
            tokio::spawn(async move { nonces.lease(A).await.next_nonce(0) })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        let lease = tokio::time::timeout(Duration::from_millis(50), nonces.lease(A))
            .await
            .unwrap();
        assert_eq!(lease.address(), A);
    }
}
