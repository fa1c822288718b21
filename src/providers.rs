//! Per-chain RPC client pool with round-robin rotation and failover,
//! generalized from a single hardcoded Alchemy/Infura pair to an arbitrary
//! list of HTTP endpoints per chain.

use anyhow::{Context, Result};
use ethers::{
    middleware::Middleware,
    providers::{Http, Provider},
    types::U256,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A rotating pool of HTTP JSON-RPC providers for one chain. Calls that fail
/// rotate to the next endpoint and retry once per remaining endpoint before
/// giving up, rather than sticking to a dead provider for the rest of the run.
pub struct ChainProviderPool {
    chain_id: u64,
    providers: Vec<Arc<Provider<Http>>>,
    cursor: AtomicUsize,
}

impl ChainProviderPool {
    pub async fn new(chain_id: u64, rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            anyhow::bail!("no RPC URLs configured for chain {}", chain_id);
        }
        let mut providers = Vec::with_capacity(rpc_urls.len());
        for url in rpc_urls {
            let provider =
                Provider::<Http>::try_from(url.as_str()).context("invalid RPC url")?;
            providers.push(Arc::new(provider));
        }

        for (i, provider) in providers.iter().enumerate() {
            match provider.get_block_number().await {
                Ok(block) => debug!(chain_id, index = i, %block, "rpc endpoint reachable"),
                Err(e) => warn!(chain_id, index = i, error = %e, "rpc endpoint unreachable at boot"),
            }
        }

        Ok(Self {
            chain_id,
            providers,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn current(&self) -> Arc<Provider<Http>> {
        let idx = self.cursor.load(Ordering::Relaxed) % self.providers.len();
        self.providers[idx].clone()
    }

    pub fn rotate(&self) {
        self.cursor.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let mut last_err = None;
        for _ in 0..self.providers.len() {
            match self.current().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(chain_id = self.chain_id, error = %e, "rpc call failed, rotating");
                    last_err = Some(e);
                    self.rotate();
                }
            }
        }
        Err(anyhow::anyhow!("all RPC endpoints failed for chain {}: {:?}", self.chain_id, last_err))
    }

    pub async fn get_gas_price(&self) -> Result<U256> {
        let mut last_err = None;
        for _ in 0..self.providers.len() {
            match self.current().get_gas_price().await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    last_err = Some(e);
                    self.rotate();
                }
            }
        }
        Err(anyhow::anyhow!("all RPC endpoints failed to quote gas price: {:?}", last_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_endpoint_list() {
        let err = ChainProviderPool::new(1, &[]).await.unwrap_err();
        assert!(err.to_string().contains("no RPC URLs"));
    }
}
