//! Client for the external adaptive-thresholds risk engine. It can only
//! tighten a chain's configured risk limits, never loosen them — the
//! returned values are combined with `min()` against the chain's static
//! `RiskOverrides` (spec §4.2/§9).

use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
struct AdaptiveResponse {
    health_factor_max: Option<f64>,
    gap_cap_bps: Option<u32>,
}

pub struct AdaptiveThresholdsClient {
    http: Option<Client>,
    url: Option<String>,
    /// Pairs whose gap cap is relaxed rather than tightened, e.g. wstETH/ETH
    /// — two assets that track each other so closely that the oracle-vs-DEX
    /// gap naturally runs wider without indicating a real dislocation.
    pegged_pairs: HashSet<(String, String)>,
}

impl AdaptiveThresholdsClient {
    pub fn new(url: Option<String>) -> Self {
        let http = url.as_ref().map(|_| {
            Client::builder()
                .timeout(Duration::from_millis(800))
                .build()
                .expect("reqwest client builds")
        });
        Self {
            http,
            url,
            pegged_pairs: default_pegged_pairs(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            http: None,
            url: None,
            pegged_pairs: default_pegged_pairs(),
        }
    }

    pub fn is_pegged_pair(&self, symbol_a: &str, symbol_b: &str) -> bool {
        self.pegged_pairs.contains(&(symbol_a.to_string(), symbol_b.to_string()))
            || self.pegged_pairs.contains(&(symbol_b.to_string(), symbol_a.to_string()))
    }

    /// Returns `(health_factor_max, gap_cap_bps)`, each clamped to at most
    /// the chain's configured base value. Falls back to the base values
    /// unchanged on any client error — a transient risk-engine outage
    /// should not stall scoring entirely.
    pub async fn effective_limits(
        &self,
        chain_id: u64,
        base_hf_max: f64,
        base_gap_cap_bps: u32,
        symbol_a: &str,
        symbol_b: &str,
    ) -> (f64, u32) {
        let mut gap_cap = base_gap_cap_bps;
        if self.is_pegged_pair(symbol_a, symbol_b) {
            gap_cap = gap_cap.saturating_mul(3);
        }

        let (Some(http), Some(url)) = (&self.http, &self.url) else {
            return (base_hf_max, gap_cap);
        };

        let result = http
            .get(format!("{}/limits/{}", url, chain_id))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(resp) => match resp.json::<AdaptiveResponse>().await {
                Ok(parsed) => {
                    let hf = parsed.health_factor_max.map(|v| v.min(base_hf_max)).unwrap_or(base_hf_max);
                    let gap = parsed.gap_cap_bps.map(|v| v.min(gap_cap)).unwrap_or(gap_cap);
                    (hf, gap)
                }
                Err(e) => {
                    warn!(chain_id, error = %e, "adaptive thresholds response unparseable, using base limits");
                    (base_hf_max, gap_cap)
                }
            },
            Err(e) => {
                warn!(chain_id, error = %e, "adaptive thresholds request failed, using base limits");
                (base_hf_max, gap_cap)
            }
        }
    }
}

fn default_pegged_pairs() -> HashSet<(String, String)> {
    [
        ("wstETH", "WETH"),
        ("wstETH", "ETH"),
        ("cbETH", "WETH"),
        ("rETH", "WETH"),
        ("weETH", "WETH"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_base_limits_unchanged() {
        let client = AdaptiveThresholdsClient::disabled();
        let (hf, gap) = client.effective_limits(1, 1.05, 150, "WETH", "USDC").await;
        assert_eq!(hf, 1.05);
        assert_eq!(gap, 150);
    }

    #[tokio::test]
    async fn pegged_pair_relaxes_gap_cap() {
        let client = AdaptiveThresholdsClient::disabled();
        let (_, gap) = client.effective_limits(1, 1.05, 150, "wstETH", "WETH").await;
        assert_eq!(gap, 450);
    }

    #[test]
    fn pegged_pair_lookup_is_symmetric() {
        let client = AdaptiveThresholdsClient::disabled();
        assert!(client.is_pegged_pair("WETH", "wstETH"));
        assert!(client.is_pegged_pair("wstETH", "WETH"));
    }
}
