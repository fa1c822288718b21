//! Per-(chain, executor) nonce serialization. One `tokio::sync::Mutex` per
//! signing key means concurrent plans for the same executor queue up
//! rather than racing each other's nonce, while plans on different chains
//! (or different executors on the same chain) proceed independently.

use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct NonceManager {
    locks: DashMap<(u64, Address), Arc<Mutex<u64>>>,
}

pub struct NonceGuard<'a> {
    _guard: MutexGuard<'a, u64>,
    pub value: u64,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, chain_id: u64, executor: Address) -> Arc<Mutex<u64>> {
        self.locks
            .entry((chain_id, executor))
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }

    /// Seeds (or resets) the cached nonce from an on-chain read. Call once
    /// at boot and after any transaction failure that might have desynced
    /// the cache from the chain.
    pub async fn sync(&self, chain_id: u64, executor: Address, on_chain_nonce: u64) {
        let lock = self.lock_for(chain_id, executor);
        let mut guard = lock.lock().await;
        *guard = on_chain_nonce;
    }

    /// Reserves the next nonce, holding the lock until the returned guard is
    /// dropped so a second caller for the same executor cannot reserve the
    /// same value concurrently. Callers increment `guard.value` themselves
    /// only on successful submission via `commit`.
    pub async fn reserve(&self, chain_id: u64, executor: Address) -> NonceLease {
        let lock = self.lock_for(chain_id, executor);
        NonceLease { lock }
    }
}

pub struct NonceLease {
    lock: Arc<Mutex<u64>>,
}

impl NonceLease {
    pub async fn acquire(&self) -> LockedNonce<'_> {
        let guard = self.lock.lock().await;
        let value = *guard;
        LockedNonce { guard, value }
    }
}

pub struct LockedNonce<'a> {
    guard: MutexGuard<'a, u64>,
    pub value: u64,
}

impl<'a> LockedNonce<'a> {
    /// Advances the cached nonce after a transaction is successfully
    /// submitted (not necessarily mined) so the next reservation doesn't
    /// reuse it.
    pub fn commit(mut self) {
        *self.guard += 1;
    }

    /// Leaves the cached nonce untouched, for a plan that was abandoned
    /// before submission.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_advances_the_cached_nonce() {
        let manager = NonceManager::new();
        let executor = Address::repeat_byte(1);
        manager.sync(1, executor, 5).await;

        let lease = manager.reserve(1, executor).await;
        let locked = lease.acquire().await;
        assert_eq!(locked.value, 5);
        locked.commit();

        let lease2 = manager.reserve(1, executor).await;
        let locked2 = lease2.acquire().await;
        assert_eq!(locked2.value, 6);
    }

    #[tokio::test]
    async fn release_leaves_nonce_unchanged() {
        let manager = NonceManager::new();
        let executor = Address::repeat_byte(2);
        manager.sync(1, executor, 10).await;

        let lease = manager.reserve(1, executor).await;
        let locked = lease.acquire().await;
        locked.release();

        let lease2 = manager.reserve(1, executor).await;
        let locked2 = lease2.acquire().await;
        assert_eq!(locked2.value, 10);
    }
}
