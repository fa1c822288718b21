//! Rolling-window dedupe for the merged candidate stream: the same
//! borrower position can be re-observed by the subgraph poller, a realtime
//! watcher, and the predictive scanner within seconds of each other, and
//! only the first should reach the scorer.

use crate::models::Candidate;
use dashmap::DashMap;
use ethers::types::Address;
use std::time::{Duration, Instant};

pub struct Dedupe {
    seen: DashMap<(u64, Address, Address, Address), Instant>,
    window: Duration,
}

impl Dedupe {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            window,
        }
    }

    /// Returns `true` if this candidate should be forwarded (i.e. it was not
    /// seen within the window), recording it as seen either way.
    pub fn admit(&self, candidate: &Candidate) -> bool {
        let key = candidate.dedupe_key();
        let now = Instant::now();
        let fresh = self
            .seen
            .get(&key)
            .map(|t| now.duration_since(*t) > self.window)
            .unwrap_or(true);
        self.seen.insert(key, now);
        fresh
    }

    /// Drops entries older than the window so the map doesn't grow forever
    /// across a long-running process.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.seen.retain(|_, t| now.duration_since(*t) <= self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateSource, ProtocolKey, TokenPosition};
    use ethers::types::U256;

    fn candidate() -> Candidate {
        Candidate {
            chain_id: 1,
            borrower: Address::repeat_byte(1),
            debt: TokenPosition { symbol: "USDC".into(), address: Address::repeat_byte(2), decimals: 6, amount: U256::from(1u64) },
            collateral: TokenPosition { symbol: "WETH".into(), address: Address::repeat_byte(3), decimals: 18, amount: U256::from(1u64) },
            health_factor: Some(0.9),
            protocol: ProtocolKey::AaveV3,
            morpho: None,
            preliq_offer: None,
            source: CandidateSource::Subgraph,
            observed_at_unix: 0,
        }
    }

    #[test]
    fn second_observation_within_window_is_suppressed() {
        let dedupe = Dedupe::new(Duration::from_secs(30));
        assert!(dedupe.admit(&candidate()));
        assert!(!dedupe.admit(&candidate()));
    }
}
