//! EWMA predictor over oracle inter-update intervals, used to decide
//! whether a candidate is worth "precommitting" — building and holding a
//! plan ahead of the next oracle update rather than waiting for it to land
//! and racing every other liquidator from a cold start.

use dashmap::DashMap;
use ethers::types::Address;
use std::time::{Duration, Instant};

pub struct PrecommitPredictor {
    alpha: f64,
    last_update: DashMap<Address, Instant>,
    ewma_interval: DashMap<Address, Duration>,
}

impl PrecommitPredictor {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            last_update: DashMap::new(),
            ewma_interval: DashMap::new(),
        }
    }

    /// Call on every observed oracle `AnswerUpdated` event for `oracle`.
    pub fn record_update(&self, oracle: Address, at: Instant) {
        if let Some(prev) = self.last_update.get(&oracle) {
            let gap = at.saturating_duration_since(*prev);
            let updated = match self.ewma_interval.get(&oracle) {
                Some(existing) => {
                    let existing_secs = existing.as_secs_f64();
                    let gap_secs = gap.as_secs_f64();
                    Duration::from_secs_f64(self.alpha * gap_secs + (1.0 - self.alpha) * existing_secs)
                }
                None => gap,
            };
            self.ewma_interval.insert(oracle, updated);
        }
        self.last_update.insert(oracle, at);
    }

    pub fn ewma_interval(&self, oracle: Address) -> Option<Duration> {
        self.ewma_interval.get(&oracle).map(|v| *v)
    }

    /// Whether an oracle update looks imminent enough that precommitting a
    /// plan for a candidate dependent on it is worthwhile.
    pub fn update_imminent(&self, oracle: Address, now: Instant, lead_time: Duration) -> bool {
        let (Some(last), Some(interval)) = (self.last_update.get(&oracle), self.ewma_interval(oracle)) else {
            return false;
        };
        let elapsed = now.saturating_duration_since(*last);
        elapsed + lead_time >= interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_converges_toward_steady_interval() {
        let predictor = PrecommitPredictor::new(0.2);
        let oracle = Address::repeat_byte(1);
        let start = Instant::now();
        predictor.record_update(oracle, start);
        predictor.record_update(oracle, start + Duration::from_secs(60));
        predictor.record_update(oracle, start + Duration::from_secs(120));
        predictor.record_update(oracle, start + Duration::from_secs(180));
        let interval = predictor.ewma_interval(oracle).unwrap();
        assert!((interval.as_secs_f64() - 60.0).abs() < 1.0);
    }

    #[test]
    fn update_imminent_is_false_without_history() {
        let predictor = PrecommitPredictor::new(0.2);
        assert!(!predictor.update_imminent(Address::repeat_byte(1), Instant::now(), Duration::from_secs(5)));
    }
}
