//! Per-borrower hourly attempt throttle and borrower-intel store. Backed by
//! Redis when configured, falling back to an in-process map so the agent
//! still runs (degraded, single-instance) if Redis is unreachable at boot.
//!
//! A borrower is throttled once its rolling-hour attempt count reaches
//! `max_attempts_per_borrower_hour`, *unless* its health factor has dropped
//! by at least `bypass_hf_drop` since the last recorded attempt — a fast
//! deteriorating position should not wait out the window (spec §3
//! invariant, §4.2 gate 6).

use dashmap::DashMap;
use ethers::types::Address;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Default)]
struct BorrowerIntel {
    attempts: VecDeque<Instant>,
    last_hf: Option<f64>,
}

#[derive(Default)]
struct LocalThrottleStore {
    intel: DashMap<(u64, Address), BorrowerIntel>,
}

pub enum ThrottleStore {
    Redis(redis::aio::ConnectionManager),
    Local(LocalThrottleStore),
}

pub struct Throttle {
    store: tokio::sync::Mutex<ThrottleStore>,
    window: Duration,
}

impl Throttle {
    pub async fn connect(redis_url: Option<&str>, window: Duration) -> Self {
        let store = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match client.get_tokio_connection_manager().await {
                    Ok(manager) => ThrottleStore::Redis(manager),
                    Err(e) => {
                        warn!(error = %e, "redis connection failed, falling back to in-memory throttle");
                        ThrottleStore::Local(LocalThrottleStore::default())
                    }
                },
                Err(e) => {
                    warn!(error = %e, "invalid redis url, falling back to in-memory throttle");
                    ThrottleStore::Local(LocalThrottleStore::default())
                }
            },
            None => ThrottleStore::Local(LocalThrottleStore::default()),
        };
        Self {
            store: tokio::sync::Mutex::new(store),
            window,
        }
    }

    /// Returns `true` if this `(chain, borrower)` should be rejected as
    /// throttled. Always records the attempt (and, when present, the
    /// observed health factor) regardless of the verdict, so the next call
    /// can detect a qualifying HF drop.
    pub async fn check_and_record(
        &self,
        chain_id: u64,
        borrower: Address,
        current_hf: Option<f64>,
        max_attempts_per_hour: u32,
        bypass_hf_drop: f64,
    ) -> bool {
        let mut guard = self.store.lock().await;
        match &mut *guard {
            ThrottleStore::Local(local) => {
                let now = Instant::now();
                let mut entry = local.intel.entry((chain_id, borrower)).or_default();
                while let Some(front) = entry.attempts.front() {
                    if now.duration_since(*front) > self.window {
                        entry.attempts.pop_front();
                    } else {
                        break;
                    }
                }

                let bypass = match (current_hf, entry.last_hf) {
                    (Some(hf), Some(last_hf)) => last_hf - hf >= bypass_hf_drop,
                    _ => false,
                };
                let at_cap = entry.attempts.len() >= max_attempts_per_hour as usize;
                let throttled = at_cap && !bypass;

                entry.attempts.push_back(now);
                if current_hf.is_some() {
                    entry.last_hf = current_hf;
                }
                throttled
            }
            ThrottleStore::Redis(conn) => {
                use redis::AsyncCommands;
                let count_key = format!("throttle:count:{}:{:?}", chain_id, borrower);
                let hf_key = format!("throttle:hf:{}:{:?}", chain_id, borrower);

                let last_hf: Option<f64> = conn
                    .get::<_, Option<String>>(&hf_key)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|s| s.parse().ok());
                let bypass = match (current_hf, last_hf) {
                    (Some(hf), Some(last)) => last - hf >= bypass_hf_drop,
                    _ => false,
                };

                let count: u64 = conn.incr(&count_key, 1u64).await.unwrap_or(1);
                if count == 1 {
                    let _: Result<(), _> = conn.expire(&count_key, self.window.as_secs() as i64).await;
                }
                if let Some(hf) = current_hf {
                    let _: Result<(), _> = conn
                        .set_ex(&hf_key, hf.to_string(), self.window.as_secs())
                        .await;
                }

                let at_cap = count > max_attempts_per_hour as u64;
                at_cap && !bypass
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_attempts_within_the_rolling_window() {
        let throttle = Throttle::connect(None, Duration::from_secs(3600)).await;
        let borrower = Address::repeat_byte(1);
        assert!(!throttle.check_and_record(1, borrower, Some(0.9), 2, 0.1).await);
        assert!(!throttle.check_and_record(1, borrower, Some(0.9), 2, 0.1).await);
        assert!(throttle.check_and_record(1, borrower, Some(0.9), 2, 0.1).await);
    }

    #[tokio::test]
    async fn qualifying_hf_drop_bypasses_the_cap() {
        let throttle = Throttle::connect(None, Duration::from_secs(3600)).await;
        let borrower = Address::repeat_byte(2);
        assert!(!throttle.check_and_record(1, borrower, Some(0.95), 1, 0.05).await);
        // HF dropped by 0.1 >= bypass threshold of 0.05: not throttled despite being at cap.
        assert!(!throttle.check_and_record(1, borrower, Some(0.85), 1, 0.05).await);
    }

    #[tokio::test]
    async fn different_borrowers_do_not_throttle_each_other() {
        let throttle = Throttle::connect(None, Duration::from_secs(3600)).await;
        assert!(!throttle.check_and_record(1, Address::repeat_byte(1), Some(0.9), 1, 0.05).await);
        assert!(!throttle.check_and_record(1, Address::repeat_byte(2), Some(0.9), 1, 0.05).await);
    }
}
