//! Oracle price cache: single-flight Chainlink `latestRoundData` reads with
//! a long success TTL (oracle prices barely move between liquidation
//! scoring cycles) and a short failure TTL, falling back to a stale value
//! or the legacy `AggregatorV2Interface.latestAnswer()` when the v3 read
//! reverts.

use crate::cache::single_flight::SingleFlightCache;
use anyhow::Result;
use ethers::{contract::abigen, providers::Http, providers::Provider, types::Address};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

abigen!(
    AggregatorV3,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
        function decimals() external view returns (uint8)
    ]"#
);

abigen!(
    AggregatorV2,
    r#"[
        function latestAnswer() external view returns (int256)
    ]"#
);

#[derive(Debug, Clone, Copy)]
pub struct OraclePrice {
    pub answer: i128,
    pub decimals: u8,
    pub updated_at_unix: u64,
}

impl OraclePrice {
    pub fn as_f64(&self) -> f64 {
        self.answer as f64 / 10f64.powi(self.decimals as i32)
    }
}

pub struct OracleCache {
    cache: SingleFlightCache<Address, OraclePrice>,
}

impl OracleCache {
    pub fn new() -> Self {
        Self {
            cache: SingleFlightCache::new(Duration::from_secs(86_400), Duration::from_secs(15)),
        }
    }

    pub async fn get(&self, provider: Arc<Provider<Http>>, oracle: Address) -> Result<OraclePrice> {
        let result = self
            .cache
            .get_or_fetch(oracle, || fetch_v3(provider.clone(), oracle))
            .await;

        match result {
            Ok(price) => Ok(price),
            Err(e) => {
                if let Some(stale) = self.cache.get_stale(&oracle) {
                    warn!(%oracle, error = %e, "oracle v3 read failed, serving stale price");
                    return Ok(stale);
                }
                warn!(%oracle, error = %e, "oracle v3 read failed, falling back to legacy aggregator");
                fetch_v2_legacy(provider, oracle).await
            }
        }
    }
}

impl Default for OracleCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_v3(provider: Arc<Provider<Http>>, oracle: Address) -> Result<OraclePrice> {
    let contract = AggregatorV3::new(oracle, provider);
    let decimals = contract.decimals().call().await?;
    let (_, answer, _, updated_at, _) = contract.latest_round_data().call().await?;
    if answer <= 0.into() {
        anyhow::bail!("oracle {} returned non-positive answer", oracle);
    }
    Ok(OraclePrice {
        answer: answer.as_u128() as i128,
        decimals,
        updated_at_unix: updated_at.as_u64(),
    })
}

async fn fetch_v2_legacy(provider: Arc<Provider<Http>>, oracle: Address) -> Result<OraclePrice> {
    let contract = AggregatorV2::new(oracle, provider);
    let answer = contract.latest_answer().call().await?;
    if answer <= 0.into() {
        anyhow::bail!("legacy oracle {} returned non-positive answer", oracle);
    }
    Ok(OraclePrice {
        answer: answer.as_u128() as i128,
        decimals: 8,
        updated_at_unix: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_f64_scales_by_decimals() {
        let price = OraclePrice {
            answer: 200_000_000_000,
            decimals: 8,
            updated_at_unix: 0,
        };
        assert!((price.as_f64() - 2000.0).abs() < 1e-6);
    }
}
