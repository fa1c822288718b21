//! Fan-in merge of every candidate producer into one bounded, unordered
//! stream the scorer consumes from. Each producer task owns a clone of the
//! sender; the channel's bound (spec §5: depth ≥256) applies backpressure
//! to the fastest producer rather than letting the slowest one stall the
//! others.

pub mod dedupe;
pub mod morpho;
pub mod predictive;
pub mod retry_queue;
pub mod subgraph;
pub mod watchers;

use crate::models::Candidate;
use dedupe::Dedupe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub const CHANNEL_DEPTH: usize = 256;

pub struct IngestionFanIn {
    pub tx: mpsc::Sender<Candidate>,
    pub rx: mpsc::Receiver<Candidate>,
    pub dedupe: Arc<Dedupe>,
}

impl IngestionFanIn {
    pub fn new(dedupe_window: Duration) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        Self {
            tx,
            rx,
            dedupe: Arc::new(Dedupe::new(dedupe_window)),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Candidate> {
        self.tx.clone()
    }

    /// Pulls the next deduped candidate, silently dropping repeats rather
    /// than surfacing them to the caller.
    pub async fn recv(&mut self) -> Option<Candidate> {
        loop {
            let candidate = self.rx.recv().await?;
            if self.dedupe.admit(&candidate) {
                return Some(candidate);
            }
            debug!(chain_id = candidate.chain_id, borrower = ?candidate.borrower, "dropped duplicate candidate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateSource, ProtocolKey, TokenPosition};
    use ethers::types::{Address, U256};

    fn candidate(borrower: Address) -> Candidate {
        Candidate {
            chain_id: 1,
            borrower,
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

    #[tokio::test]
    async fn duplicate_sends_collapse_into_one_receive() {
        let mut fan_in = IngestionFanIn::new(Duration::from_secs(30));
        let tx = fan_in.sender();
        tx.send(candidate(Address::repeat_byte(9))).await.unwrap();
        tx.send(candidate(Address::repeat_byte(9))).await.unwrap();
        tx.send(candidate(Address::repeat_byte(10))).await.unwrap();
        drop(tx);

        let first = fan_in.recv().await.unwrap();
        let second = fan_in.recv().await.unwrap();
        assert_ne!(first.borrower, second.borrower);
        assert!(fan_in.recv().await.is_none());
    }
}
