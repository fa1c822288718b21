//! Internal instrumentation only. No scrape server is bound by this crate;
//! a sidecar (or wiring into an existing exporter) is expected to read the
//! process default registry.

use prometheus::{register_counter_vec, register_gauge, CounterVec, Gauge};

#[derive(Clone)]
pub struct Metrics {
    pub plans_ready: CounterVec,
    pub plans_sent: CounterVec,
    pub plans_error: CounterVec,
    pub plans_rejected: CounterVec,
    pub session_notional_usd: Gauge,
    pub gas_price_gwei: Gauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let plans_ready = register_counter_vec!(
            "liquidation_plans_ready_total",
            "Candidates that cleared the gate cascade and produced a plan",
            &["chain"]
        )?;
        let plans_sent = register_counter_vec!(
            "liquidation_plans_sent_total",
            "Plans submitted on-chain, by outcome",
            &["chain", "outcome"]
        )?;
        let plans_error = register_counter_vec!(
            "liquidation_plans_error_total",
            "Plans that errored during submission",
            &["chain"]
        )?;
        let plans_rejected = register_counter_vec!(
            "liquidation_plans_rejected_total",
            "Candidates rejected by the scorer, by reason code",
            &["chain", "reason"]
        )?;
        let session_notional_usd = register_gauge!(
            "liquidation_session_notional_usd",
            "Running notional liquidated this process lifetime"
        )?;
        let gas_price_gwei = register_gauge!(
            "liquidation_gas_price_gwei",
            "Last observed gas price"
        )?;

        Ok(Self {
            plans_ready,
            plans_sent,
            plans_error,
            plans_rejected,
            session_notional_usd,
            gas_price_gwei,
        })
    }

    pub fn record_rejection(&self, chain: &str, reason: &crate::models::RejectionReason) {
        self.plans_rejected.with_label_values(&[chain, reason.code()]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_registers_without_panicking() {
        let metrics = Metrics::new().expect("metrics register");
        metrics.plans_ready.with_label_values(&["arb"]).inc();
        metrics.session_notional_usd.set(1234.5);
        assert_eq!(metrics.plans_ready.with_label_values(&["arb"]).get(), 1.0);
    }
}
