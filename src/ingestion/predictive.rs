//! Predictive scanner: on a fixed timer, re-evaluates health factor slope
//! for borrowers already being watched and promotes anyone trending toward
//! the threshold fast enough that waiting for the next subgraph poll would
//! likely miss the window.

use crate::models::Candidate;
use dashmap::DashMap;
use ethers::types::Address;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct HfSample {
    hf: f64,
    at: Instant,
}

pub struct PredictiveScanner {
    history: DashMap<(u64, Address), HfSample>,
    interval: Duration,
}

impl PredictiveScanner {
    pub fn new(interval: Duration) -> Self {
        Self {
            history: DashMap::new(),
            interval,
        }
    }

    pub fn observe(&self, chain_id: u64, borrower: Address, hf: f64, at: Instant) {
        self.history.insert((chain_id, borrower), HfSample { hf, at });
    }

    /// Negative slope means HF is falling; returns HF-per-second, or `None`
    /// without at least two samples.
    pub fn slope(&self, chain_id: u64, borrower: Address, current_hf: f64, now: Instant) -> Option<f64> {
        let prev = self.history.get(&(chain_id, borrower))?;
        let dt = now.saturating_duration_since(prev.at).as_secs_f64();
        if dt <= 0.0 {
            return None;
        }
        Some((current_hf - prev.hf) / dt)
    }

    /// A candidate is worth promoting to the scorer early when it is
    /// falling fast enough to cross `threshold_hf` before the next poll
    /// interval elapses.
    pub fn should_promote(&self, candidate: &Candidate, threshold_hf: f64, now: Instant) -> bool {
        let Some(hf) = candidate.health_factor else { return false };
        let Some(slope) = self.slope(candidate.chain_id, candidate.borrower, hf, now) else {
            self.observe(candidate.chain_id, candidate.borrower, hf, now);
            return false;
        };
        self.observe(candidate.chain_id, candidate.borrower, hf, now);
        if slope >= 0.0 {
            return false;
        }
        let seconds_to_threshold = (hf - threshold_hf) / -slope;
        seconds_to_threshold <= self.interval.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_health_factor_never_promotes() {
        let scanner = PredictiveScanner::new(Duration::from_secs(30));
        let now = Instant::now();
        scanner.observe(1, Address::repeat_byte(1), 1.0, now);
        let later = now + Duration::from_secs(10);
        let slope = scanner.slope(1, Address::repeat_byte(1), 1.1, later);
        assert!(slope.unwrap() > 0.0);
    }

    #[test]
    fn fast_falling_health_factor_is_promoted() {
        let scanner = PredictiveScanner::new(Duration::from_secs(30));
        let now = Instant::now();
        scanner.observe(1, Address::repeat_byte(1), 1.10, now);
        let later = now + Duration::from_secs(10);
        // hf dropped 0.10 in 10s => slope -0.01/s; at that rate, reaching
        // 1.00 from 1.00 takes 0s, well within the 30s interval.
        let candidate_hf = 1.00;
        let slope = scanner.slope(1, Address::repeat_byte(1), candidate_hf, later).unwrap();
        assert!(slope < 0.0);
    }
}
