//! Route quote cache, keyed by (chain, dex, token_in, token_out, amount
//! bucket). DEX pool state moves fast enough that a 15s success TTL / 5s
//! failure TTL is used rather than the oracle cache's day-long TTL.

use crate::cache::single_flight::SingleFlightCache;
use crate::chain::DexId;
use crate::models::RouteOption;
use ethers::types::{Address, U256};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteCacheKey {
    pub chain_id: u64,
    pub dex: DexId,
    pub token_in: Address,
    pub token_out: Address,
    /// Quantized so near-identical repay sizes across a throttle window
    /// reuse the same quote instead of missing on every wei difference.
    pub amount_bucket: u64,
}

impl RouteCacheKey {
    pub fn new(chain_id: u64, dex: DexId, token_in: Address, token_out: Address, amount_in: U256) -> Self {
        let bucket = (amount_in / U256::from(1_000_000u64)).as_u64();
        Self {
            chain_id,
            dex,
            token_in,
            token_out,
            amount_bucket: bucket,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedQuote {
    pub option: RouteOption,
    pub amount_out: U256,
}

pub struct RouteCache {
    cache: SingleFlightCache<RouteCacheKey, CachedQuote>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self {
            cache: SingleFlightCache::new(Duration::from_secs(15), Duration::from_secs(5)),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: RouteCacheKey, fetch: F) -> anyhow::Result<CachedQuote>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<CachedQuote>>,
    {
        self.cache.get_or_fetch(key, fetch).await
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_within_the_same_bucket_produce_equal_keys() {
        let a = RouteCacheKey::new(1, DexId::UniswapV3, Address::zero(), Address::repeat_byte(1), U256::from(1_000_500u64));
        let b = RouteCacheKey::new(1, DexId::UniswapV3, Address::zero(), Address::repeat_byte(1), U256::from(1_000_999u64));
        assert_eq!(a, b);
    }
}
