//! Cross-chain global state shared by every `ChainAgent`: the session
//! notional cap, the kill switch, and the handle to the adaptive thresholds
//! client, all wrapped so they can be cloned cheaply into each chain's task.

use crate::killswitch::KillSwitch;
use crate::scorer::adaptive::AdaptiveThresholdsClient;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Tracks USD notional (scaled by 100 to keep the counter integer) sent to
/// execution across all chains this process, enforced against
/// `Tunables::max_session_notional_usd`.
pub struct SessionState {
    notional_cents: AtomicU64,
    shutdown_requested: AtomicBool,
    pub kill_switch: Arc<KillSwitch>,
    pub adaptive: Arc<AdaptiveThresholdsClient>,
}

impl SessionState {
    pub fn new(kill_switch: Arc<KillSwitch>, adaptive: Arc<AdaptiveThresholdsClient>) -> Self {
        Self {
            notional_cents: AtomicU64::new(0),
            shutdown_requested: AtomicBool::new(false),
            kill_switch,
            adaptive,
        }
    }

    /// Marks the process for clean shutdown once the live work in flight
    /// drains. Idempotent; only the first caller's reason is logged.
    pub fn request_shutdown(&self, reason: &str) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            error!(reason, "session cap exceeded, shutting down cleanly");
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn session_notional_usd(&self) -> f64 {
        self.notional_cents.load(Ordering::Relaxed) as f64 / 100.0
    }

    pub fn add_notional(&self, usd: f64) {
        let cents = (usd * 100.0).round() as u64;
        self.notional_cents.fetch_add(cents, Ordering::Relaxed);
    }

    pub fn would_exceed_cap(&self, additional_usd: f64, cap_usd: f64) -> bool {
        self.session_notional_usd() + additional_usd > cap_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notional_accumulates_across_calls() {
        let session = SessionState::new(
            Arc::new(KillSwitch::new(None)),
            Arc::new(AdaptiveThresholdsClient::disabled()),
        );
        session.add_notional(100.0);
        session.add_notional(50.5);
        assert!((session.session_notional_usd() - 150.5).abs() < 1e-6);
    }

    #[test]
    fn shutdown_request_is_sticky_and_idempotent() {
        let session = SessionState::new(
            Arc::new(KillSwitch::new(None)),
            Arc::new(AdaptiveThresholdsClient::disabled()),
        );
        assert!(!session.shutdown_requested());
        session.request_shutdown("max_live_executions exceeded");
        assert!(session.shutdown_requested());
        session.request_shutdown("max_session_notional_usd exceeded");
        assert!(session.shutdown_requested());
    }

    #[test]
    fn would_exceed_cap_accounts_for_pending_amount() {
        let session = SessionState::new(
            Arc::new(KillSwitch::new(None)),
            Arc::new(AdaptiveThresholdsClient::disabled()),
        );
        session.add_notional(900.0);
        assert!(session.would_exceed_cap(200.0, 1000.0));
        assert!(!session.would_exceed_cap(50.0, 1000.0));
    }
}
