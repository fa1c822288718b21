//! Morpho Blue candidate source: discovers borrowers via the Morpho API's
//! `marketPositions` schema, confirms state by reading the singleton
//! contract directly rather than trusting the indexer's numbers, and derives
//! any pre-liquidation offer contract address via CREATE2 rather than
//! waiting for an indexer to notice it.

use crate::chain::ChainDescriptor;
use crate::models::{Candidate, CandidateSource, MorphoMarket, PreLiquidationOffer, ProtocolKey, TokenPosition};
use crate::utils::create2_address;
use ethers::{
    contract::abigen,
    providers::{Http, Provider},
    types::{Address, H256, U256},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

abigen!(
    MorphoBlue,
    r#"[
        function position(bytes32 id, address user) external view returns (uint256 supplyShares, uint256 borrowShares, uint256 collateral)
        function market(bytes32 id) external view returns (uint128 totalSupplyAssets, uint128 totalSupplyShares, uint128 totalBorrowAssets, uint128 totalBorrowShares, uint128 lastUpdate, uint128 fee)
        function isAuthorized(address authorizer, address authorized) external view returns (bool)
    ]"#
);

abigen!(
    PreLiquidationFactory,
    r#"[
        function PRE_LIQUIDATION_CODE_HASH() external view returns (bytes32)
    ]"#
);

abigen!(
    PreLiquidationOfferView,
    r#"[
        function preLLTV() external view returns (uint256)
        function preLCF1() external view returns (uint256)
        function preLCF2() external view returns (uint256)
        function preLIF1() external view returns (uint256)
        function preLIF2() external view returns (uint256)
        function oracle() external view returns (address)
        function expiry() external view returns (uint256)
    ]"#
);

#[derive(Debug, Deserialize)]
struct MarketPositionRow {
    #[serde(rename = "user")]
    user: String,
    #[serde(rename = "marketId")]
    market_id: String,
    #[serde(rename = "loanToken")]
    loan_token: String,
    #[serde(rename = "collateralToken")]
    collateral_token: String,
    #[serde(rename = "oracle")]
    oracle: String,
    #[serde(rename = "irm")]
    irm: String,
    #[serde(rename = "lltv")]
    lltv: String,
    #[serde(rename = "borrowShares")]
    borrow_shares: String,
}

#[derive(Debug, Deserialize)]
struct MorphoEnvelope {
    data: Option<MorphoData>,
}

#[derive(Debug, Deserialize)]
struct MorphoData {
    #[serde(rename = "marketPositions")]
    market_positions: Vec<MarketPositionRow>,
}

/// Discovers (market, borrower) pairs at risk via the Morpho API. Polling
/// cadence is owned by the caller, not this type: the agent doubles its
/// interval on an empty result and resets to the success delay on a yield,
/// independently per chain.
pub struct MorphoGraphSource {
    http: Client,
    endpoint: String,
    chain_id: u64,
}

impl MorphoGraphSource {
    pub fn new(chain_id: u64, endpoint: String) -> Self {
        Self {
            http: Client::builder().timeout(Duration::from_secs(10)).build().expect("reqwest client builds"),
            endpoint,
            chain_id,
        }
    }

    pub async fn poll_once(&self) -> Vec<(MorphoMarket, Address)> {
        match self.query().await {
            Ok(rows) => rows.into_iter().filter_map(|r| self.to_market_and_borrower(r)).collect(),
            Err(e) => {
                warn!(chain_id = self.chain_id, error = %e, "morpho api query failed");
                Vec::new()
            }
        }
    }

    async fn query(&self) -> anyhow::Result<Vec<MarketPositionRow>> {
        let body = json!({
            "query": r#"query {
                marketPositions(where: { healthFactor_lt: "1.05" }, first: 200) {
                    user marketId loanToken collateralToken oracle irm lltv borrowShares
                }
            }"#,
        });
        let resp: MorphoEnvelope = self.http.post(&self.endpoint).json(&body).send().await?.json().await?;
        Ok(resp.data.map(|d| d.market_positions).unwrap_or_default())
    }

    fn to_market_and_borrower(&self, row: MarketPositionRow) -> Option<(MorphoMarket, Address)> {
        let borrower = Address::from_str(&row.user).ok()?;
        let market = MorphoMarket {
            market_id: H256::from_str(row.market_id.trim_start_matches("0x")).ok()?,
            loan_token: Address::from_str(&row.loan_token).ok()?,
            collateral_token: Address::from_str(&row.collateral_token).ok()?,
            oracle: Address::from_str(&row.oracle).ok()?,
            irm: Address::from_str(&row.irm).ok()?,
            lltv: U256::from_dec_str(&row.lltv).unwrap_or_default(),
            borrow_shares: U256::from_dec_str(&row.borrow_shares).unwrap_or_default(),
        };
        Some((market, borrower))
    }
}

pub struct MorphoSource {
    chain_id: u64,
    morpho: Address,
}

impl MorphoSource {
    pub fn new(chain_id: u64, morpho: Address) -> Self {
        Self { chain_id, morpho }
    }

    pub async fn read_position(
        &self,
        provider: Arc<Provider<Http>>,
        market: &MorphoMarket,
        borrower: Address,
    ) -> anyhow::Result<Candidate> {
        let contract = MorphoBlue::new(self.morpho, provider);
        let (_, borrow_shares, collateral) = contract
            .position(market.market_id.into(), borrower)
            .call()
            .await?;

        let mut market_state = market.clone();
        market_state.borrow_shares = borrow_shares;

        Ok(Candidate {
            chain_id: self.chain_id,
            borrower,
            debt: TokenPosition {
                symbol: String::new(),
                address: market.loan_token,
                decimals: 18,
                amount: borrow_shares,
            },
            collateral: TokenPosition {
                symbol: String::new(),
                address: market.collateral_token,
                decimals: 18,
                amount: collateral,
            },
            health_factor: None,
            protocol: ProtocolKey::MorphoBlue,
            morpho: Some(market_state),
            preliq_offer: None,
            source: CandidateSource::Subgraph,
            observed_at_unix: 0,
        })
    }

    /// Derives the deterministic pre-liquidation offer address for a
    /// (market, borrower) pair without needing the offer's creation event.
    pub fn derive_preliq_address(
        &self,
        chain: &ChainDescriptor,
        market: &MorphoMarket,
        borrower: Address,
    ) -> Option<Address> {
        let factory = chain.preliq_factory?;
        let init_code_hash = chain.preliq_init_code_hash?;
        let mut salt_bytes = Vec::with_capacity(52);
        salt_bytes.extend_from_slice(market.market_id.as_bytes());
        salt_bytes.extend_from_slice(borrower.as_bytes());
        let salt = H256::from_slice(&ethers::utils::keccak256(&salt_bytes));
        Some(create2_address(factory, salt, init_code_hash))
    }

    /// Reads the live offer parameters off the deterministically-derived
    /// offer contract. Returns `Ok(None)` rather than erroring when no
    /// contract is deployed at that address yet (`eth_call` against an
    /// empty account returns empty data, which `abigen`'s decoder rejects).
    pub async fn read_offer(
        &self,
        provider: Arc<Provider<Http>>,
        offer_address: Address,
    ) -> anyhow::Result<Option<PreLiquidationOffer>> {
        let contract = PreLiquidationOfferView::new(offer_address, provider);
        let pre_lltv = match contract.pre_lltv().call().await {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let pre_lcf1 = contract.pre_lcf_1().call().await?;
        let pre_lcf2 = contract.pre_lcf_2().call().await?;
        let pre_lif1 = contract.pre_lif_1().call().await?;
        let pre_lif2 = contract.pre_lif_2().call().await?;
        let oracle = contract.oracle().call().await?;
        let expiry = contract.expiry().call().await?.as_u64();

        debug!(%offer_address, "read pre-liquidation offer parameters");
        Ok(Some(PreLiquidationOffer {
            offer_address,
            pre_lltv,
            pre_lcf1,
            pre_lcf2,
            pre_lif1,
            pre_lif2,
            oracle,
            expiry,
        }))
    }
}

pub fn build_offer(offer_address: Address, oracle: Address, expiry: u64) -> PreLiquidationOffer {
    PreLiquidationOffer {
        offer_address,
        pre_lltv: U256::zero(),
        pre_lcf1: U256::zero(),
        pre_lcf2: U256::zero(),
        pre_lif1: U256::zero(),
        pre_lif2: U256::zero(),
        oracle,
        expiry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ChainDescriptor {
        ChainDescriptor {
            chain_id: 1,
            name: "test".into(),
            rpc_url: "http://localhost".into(),
            ws_urls: vec![],
            liquidator: Address::zero(),
            executor_key_env: "K".into(),
            tokens: Default::default(),
            routers: vec![],
            sequencer_feed: None,
            market_provider: Address::zero(),
            risk: crate::chain::RiskOverrides { health_factor_max: 1.0, gap_cap_bps: 100 },
            preferred_stables: vec![],
            preliq_factory: None,
            preliq_init_code_hash: None,
            bundler3: None,
            l1_fee_oracle: None,
            protocol: crate::models::ProtocolKey::MorphoBlue,
            subgraph_endpoints: vec![],
            subgraph_indexer_boost: None,
            morpho_markets: vec![],
            uniswap_v3_quoter: None,
            market_policies: Default::default(),
        }
    }

    fn market() -> MorphoMarket {
        MorphoMarket {
            market_id: H256::zero(),
            loan_token: Address::zero(),
            collateral_token: Address::zero(),
            oracle: Address::zero(),
            irm: Address::zero(),
            lltv: U256::zero(),
            borrow_shares: U256::zero(),
        }
    }

    #[test]
    fn preliq_address_is_none_without_configured_factory() {
        let source = MorphoSource::new(1, Address::zero());
        assert!(source.derive_preliq_address(&chain(), &market(), Address::repeat_byte(1)).is_none());
    }

    #[test]
    fn graph_source_parses_well_formed_rows() {
        let source = MorphoGraphSource::new(1, "https://example.invalid/graphql".into());
        let row = MarketPositionRow {
            user: format!("{:?}", Address::repeat_byte(7)),
            market_id: format!("{:?}", H256::repeat_byte(1)),
            loan_token: format!("{:?}", Address::repeat_byte(2)),
            collateral_token: format!("{:?}", Address::repeat_byte(3)),
            oracle: format!("{:?}", Address::repeat_byte(4)),
            irm: format!("{:?}", Address::repeat_byte(5)),
            lltv: "860000000000000000".into(),
            borrow_shares: "1000000".into(),
        };
        let (parsed_market, borrower) = source.to_market_and_borrower(row).expect("row parses");
        assert_eq!(borrower, Address::repeat_byte(7));
        assert_eq!(parsed_market.borrow_shares, U256::from(1_000_000u64));
    }
}
