//! Subgraph candidate source: polls an Aave-v3-family GraphQL endpoint for
//! borrowers near the liquidation threshold, rotating through fallback
//! endpoints and backing off exponentially when every endpoint errors.
//! A configured "indexer boost" endpoint (a faster, paid indexer) is tried
//! first each cycle before falling back to the public ones.

use crate::models::{Candidate, CandidateSource, ProtocolKey, TokenPosition};
use ethers::types::{Address, U256};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct BorrowerRow {
    id: String,
    #[serde(rename = "totalCollateralETH")]
    total_collateral: String,
    #[serde(rename = "totalDebtETH")]
    total_debt: String,
    #[serde(rename = "healthFactor")]
    health_factor: String,
    #[serde(rename = "debtAsset")]
    debt_asset: String,
    #[serde(rename = "collateralAsset")]
    collateral_asset: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<GraphQlData>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    users: Vec<BorrowerRow>,
}

pub struct SubgraphSource {
    http: Client,
    endpoints: Vec<String>,
    indexer_boost: Option<String>,
    chain_id: u64,
    protocol: ProtocolKey,
    limiter: RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

impl SubgraphSource {
    pub fn new(chain_id: u64, protocol: ProtocolKey, endpoints: Vec<String>, indexer_boost: Option<String>) -> Self {
        Self {
            http: Client::builder().timeout(Duration::from_secs(10)).build().expect("reqwest client builds"),
            endpoints,
            indexer_boost,
            chain_id,
            protocol,
            limiter: RateLimiter::direct(Quota::per_second(nonzero!(5u32))),
        }
    }

    /// Polls once, trying the indexer boost endpoint then each fallback in
    /// order, applying exponential backoff across the whole call only when
    /// every endpoint has failed.
    pub async fn poll_once(&self, threshold_hf: f64) -> Vec<Candidate> {
        let mut endpoints: Vec<&str> = Vec::new();
        if let Some(boost) = &self.indexer_boost {
            endpoints.push(boost.as_str());
        }
        endpoints.extend(self.endpoints.iter().map(|s| s.as_str()));

        let mut delay = Duration::from_millis(500);
        for attempt in 0..endpoints.len().max(1) {
            let endpoint = endpoints.get(attempt % endpoints.len().max(1));
            let Some(endpoint) = endpoint else { break };

            self.limiter.until_ready().await;

            match self.query(endpoint, threshold_hf).await {
                Ok(rows) => return rows.into_iter().filter_map(|r| self.to_candidate(r)).collect(),
                Err(e) => {
                    warn!(chain_id = self.chain_id, endpoint, error = %e, "subgraph query failed");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                }
            }
        }
        Vec::new()
    }

    async fn query(&self, endpoint: &str, threshold_hf: f64) -> anyhow::Result<Vec<BorrowerRow>> {
        let body = json!({
            "query": r#"query($hf: BigDecimal!) {
                users(where: { healthFactor_lt: $hf, borrowedReservesCount_gt: 0 }, first: 200) {
                    id totalCollateralETH totalDebtETH healthFactor debtAsset collateralAsset
                }
            }"#,
            "variables": { "hf": threshold_hf },
        });
        let resp: GraphQlEnvelope = self.http.post(endpoint).json(&body).send().await?.json().await?;
        Ok(resp.data.map(|d| d.users).unwrap_or_default())
    }

    fn to_candidate(&self, row: BorrowerRow) -> Option<Candidate> {
        let borrower = Address::from_str(&row.id).ok()?;
        let health_factor = row.health_factor.parse::<f64>().ok();
        let debt_asset = Address::from_str(&row.debt_asset).ok()?;
        let collateral_asset = Address::from_str(&row.collateral_asset).ok()?;
        let debt_amount = parse_decimal_to_u256(&row.total_debt, 18);
        let collateral_amount = parse_decimal_to_u256(&row.total_collateral, 18);

        debug!(borrower = %borrower, hf = ?health_factor, "subgraph candidate");

        Some(Candidate {
            chain_id: self.chain_id,
            borrower,
            debt: TokenPosition { symbol: String::new(), address: debt_asset, decimals: 18, amount: debt_amount },
            collateral: TokenPosition { symbol: String::new(), address: collateral_asset, decimals: 18, amount: collateral_amount },
            health_factor,
            protocol: self.protocol,
            morpho: None,
            preliq_offer: None,
            source: CandidateSource::Subgraph,
            observed_at_unix: 0,
        })
    }
}

fn parse_decimal_to_u256(value: &str, decimals: u32) -> U256 {
    let f: f64 = value.parse().unwrap_or(0.0);
    if f <= 0.0 {
        return U256::zero();
    }
    U256::from((f * 10f64.powi(decimals as i32)) as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_parsing_tolerates_garbage_as_zero() {
        assert_eq!(parse_decimal_to_u256("not-a-number", 18), U256::zero());
        assert_eq!(parse_decimal_to_u256("1.0", 6), U256::from(1_000_000u64));
    }
}
