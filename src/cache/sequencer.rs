//! L2 sequencer uptime feed cache. A down sequencer rejects every candidate
//! on that chain outright (spec §4.2 gate), so this is checked once per
//! scoring cycle rather than once per candidate.

use crate::cache::single_flight::SingleFlightCache;
use anyhow::Result;
use ethers::{contract::abigen, providers::Http, providers::Provider, types::Address};
use std::sync::Arc;
use std::time::Duration;

abigen!(
    SequencerUptimeFeed,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
    ]"#
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerStatus {
    Up,
    Down,
}

pub struct SequencerCache {
    cache: SingleFlightCache<Address, SequencerStatus>,
}

impl SequencerCache {
    pub fn new() -> Self {
        Self {
            cache: SingleFlightCache::new(Duration::from_secs(15), Duration::from_secs(5)),
        }
    }

    /// `None` feed address means this chain has no sequencer uptime oracle
    /// (an L1, or an L2 without one published) and is always considered up.
    pub async fn status(&self, provider: Arc<Provider<Http>>, feed: Option<Address>) -> Result<SequencerStatus> {
        let Some(feed) = feed else {
            return Ok(SequencerStatus::Up);
        };
        self.cache
            .get_or_fetch(feed, || fetch(provider, feed))
            .await
    }
}

impl Default for SequencerCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch(provider: Arc<Provider<Http>>, feed: Address) -> Result<SequencerStatus> {
    let contract = SequencerUptimeFeed::new(feed, provider);
    let (_, answer, _, _, _) = contract.latest_round_data().call().await?;
    // Chainlink's L2 sequencer uptime convention: 0 == up, 1 == down.
    Ok(if answer.is_zero() {
        SequencerStatus::Up
    } else {
        SequencerStatus::Down
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chains_without_a_feed_are_always_up() {
        let cache = SequencerCache::new();
        let provider = Arc::new(Provider::<Http>::try_from("http://localhost:1").unwrap());
        let status = cache.status(provider, None).await.unwrap();
        assert_eq!(status, SequencerStatus::Up);
    }
}
