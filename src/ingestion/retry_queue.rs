//! Retry queue for candidates that were rejected for a transient reason
//! (oracle unavailable, throttled, sequencer down) rather than a durable
//! one. Delay grows exponentially with jitter so a bad patch of RPC errors
//! doesn't turn into a retry storm.

use crate::models::Candidate;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

struct PendingRetry {
    ready_at: Instant,
    attempt: u32,
    candidate: Candidate,
}

impl PartialEq for PendingRetry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}
impl Eq for PendingRetry {}
impl PartialOrd for PendingRetry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingRetry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ready_at.cmp(&other.ready_at)
    }
}

pub struct RetryQueue {
    heap: std::sync::Mutex<BinaryHeap<Reverse<PendingRetry>>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            heap: std::sync::Mutex::new(BinaryHeap::new()),
            base_delay,
            max_delay,
        }
    }

    pub fn push(&self, candidate: Candidate, attempt: u32) {
        let backoff = self.base_delay.saturating_mul(1 << attempt.min(10)).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 4 + 1);
        let delay = backoff + Duration::from_millis(jitter_ms);
        let entry = PendingRetry {
            ready_at: Instant::now() + delay,
            attempt: attempt + 1,
            candidate,
        };
        self.heap.lock().expect("retry queue lock").push(Reverse(entry));
    }

    /// Re-queues a candidate that was drained, re-scored, and rejected
    /// again, but only if its health factor moved by at least `epsilon`
    /// since `previous_hf` — otherwise the position isn't actually changing
    /// and an unconditional requeue would just thrash the same candidate
    /// through the retry queue on every cycle.
    pub fn push_if_improved(&self, candidate: Candidate, attempt: u32, previous_hf: Option<f64>, epsilon: f64) {
        let moved = match (candidate.health_factor, previous_hf) {
            (Some(new_hf), Some(old_hf)) => (new_hf - old_hf).abs() >= epsilon,
            // No prior HF to compare against, or the new read still has none:
            // let it back in rather than silently dropping it.
            _ => true,
        };
        if moved {
            self.push(candidate, attempt);
        }
    }

    /// Pops every candidate whose delay has elapsed, leaving the rest queued.
    pub fn drain_ready(&self) -> Vec<(Candidate, u32)> {
        let mut heap = self.heap.lock().expect("retry queue lock");
        let now = Instant::now();
        let mut ready = Vec::new();
        while let Some(Reverse(top)) = heap.peek() {
            if top.ready_at > now {
                break;
            }
            let Reverse(entry) = heap.pop().expect("peeked");
            ready.push((entry.candidate, entry.attempt));
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.heap.lock().expect("retry queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateSource, ProtocolKey, TokenPosition};
    use ethers::types::{Address, U256};

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
            source: CandidateSource::PolicyRetry,
            observed_at_unix: 0,
        }
    }

    #[test]
    fn nothing_is_ready_before_its_delay_elapses() {
        let queue = RetryQueue::new(Duration::from_secs(60), Duration::from_secs(600));
        queue.push(candidate(), 0);
        assert!(queue.drain_ready().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn zero_delay_attempt_is_immediately_ready() {
        let queue = RetryQueue::new(Duration::from_millis(0), Duration::from_secs(600));
        queue.push(candidate(), 0);
        std::thread::sleep(Duration::from_millis(5));
        let ready = queue.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1, 1);
    }
}
