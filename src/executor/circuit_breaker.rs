//! Fail-rate circuit breaker: trips per (chain, executor) once a rolling
//! window of recent executions crosses a failure-rate threshold, so one bad
//! RPC endpoint or a misconfigured executor doesn't keep burning gas on
//! guaranteed-revert transactions.

use dashmap::DashMap;
use ethers::types::Address;
use std::collections::VecDeque;

struct Window {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl Window {
    fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn fail_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let fails = self.outcomes.iter().filter(|s| !**s).count();
        fails as f64 / self.outcomes.len() as f64
    }
}

pub struct CircuitBreaker {
    windows: DashMap<(u64, Address), Window>,
    capacity: usize,
    threshold: f64,
}

impl CircuitBreaker {
    pub fn new(capacity: usize, threshold: f64) -> Self {
        Self {
            windows: DashMap::new(),
            capacity,
            threshold,
        }
    }

    pub fn record(&self, chain_id: u64, executor: Address, success: bool) {
        self.windows
            .entry((chain_id, executor))
            .or_insert_with(|| Window { outcomes: VecDeque::new(), capacity: self.capacity })
            .record(success);
    }

    pub fn is_tripped(&self, chain_id: u64, executor: Address) -> bool {
        self.windows
            .get(&(chain_id, executor))
            .map(|w| w.outcomes.len() >= self.capacity / 2 && w.fail_rate() >= self.threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_once_half_capacity_observed_above_threshold() {
        let breaker = CircuitBreaker::new(20, 0.5);
        let executor = Address::repeat_byte(1);
        for _ in 0..10 {
            breaker.record(1, executor, false);
        }
        assert!(breaker.is_tripped(1, executor));
    }

    #[test]
    fn stays_closed_below_the_minimum_sample_size() {
        let breaker = CircuitBreaker::new(20, 0.5);
        let executor = Address::repeat_byte(2);
        breaker.record(1, executor, false);
        breaker.record(1, executor, false);
        assert!(!breaker.is_tripped(1, executor));
    }

    #[test]
    fn stays_closed_when_failures_are_below_threshold() {
        let breaker = CircuitBreaker::new(20, 0.5);
        let executor = Address::repeat_byte(3);
        for i in 0..20 {
            breaker.record(1, executor, i % 5 != 0);
        }
        assert!(!breaker.is_tripped(1, executor));
    }
}
