//! Chain, token, and DEX router descriptors, plus the flat lookup tables
//! built once at boot from them.
//!
//! Cycles in the natural description of this data (a chain references its
//! tokens, a token's fallback route hint references another token on the
//! same chain, a DEX router entry references a chain) are resolved here into
//! plain `HashMap`s keyed by id/address rather than carried as live
//! back-references, so the rest of the agent never has to deal with
//! partially-initialized or circular structures.

use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleDenomination {
    Usd,
    Native,
}

#[derive(Debug, Clone)]
pub struct TokenDescriptor {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub oracle: Option<Address>,
    pub oracle_denomination: OracleDenomination,
    /// A hop token to quote against when no direct USD feed exists.
    pub fallback_route_hint: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexId {
    UniswapV3,
    UniswapV2,
    Sushiswap,
    SolidlyV2,
}

impl std::fmt::Display for DexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DexId::UniswapV3 => "UniswapV3",
            DexId::UniswapV2 => "UniswapV2",
            DexId::Sushiswap => "Sushiswap",
            DexId::SolidlyV2 => "SolidlyV2",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct DexRouterEntry {
    pub dex: DexId,
    pub router: Address,
    /// Solidly-family routers quote through an explicit factory that is not
    /// derivable from the router address; this carries it end to end.
    pub factory: Option<Address>,
}

/// Per-chain overrides on top of the agent-wide defaults in [`crate::config::Tunables`].
#[derive(Debug, Clone)]
pub struct RiskOverrides {
    pub health_factor_max: f64,
    pub gap_cap_bps: u32,
}

/// Close factor and liquidation bonus for one `(debt, collateral)` market,
/// overriding the agent-wide `Tunables` defaults. These vary per reserve
/// pair even within the same protocol deployment, so a single global bonus
/// cannot price every market correctly.
#[derive(Debug, Clone, Copy)]
pub struct MarketPolicy {
    pub close_factor_bps: u32,
    pub liquidation_bonus_bps: u32,
}

#[derive(Debug, Clone)]
pub struct ChainDescriptor {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub ws_urls: Vec<String>,
    pub liquidator: Address,
    /// Name of the environment variable holding this chain's signing key,
    /// e.g. `WALLET_PK_ARB`. Resolved lazily so a chain can be configured
    /// without a live key (dry-run / scoring-only mode).
    pub executor_key_env: String,
    pub tokens: HashMap<Address, TokenDescriptor>,
    pub routers: Vec<DexRouterEntry>,
    pub sequencer_feed: Option<Address>,
    pub market_provider: Address,
    pub risk: RiskOverrides,
    /// Ordered list of stable tokens to fall back to for DEX-quoted pricing.
    pub preferred_stables: Vec<Address>,
    pub preliq_factory: Option<Address>,
    pub preliq_init_code_hash: Option<H256>,
    pub bundler3: Option<Address>,
    /// L1 fee helper contract, when this chain is an L2 that charges one.
    pub l1_fee_oracle: Option<L1FeeOracle>,
    /// Primary protocol this chain's subgraph polling targets. A chain can
    /// still surface candidates of other protocols via realtime watchers or
    /// direct Morpho market reads; this only picks the subgraph query shape.
    pub protocol: crate::models::ProtocolKey,
    pub subgraph_endpoints: Vec<String>,
    pub subgraph_indexer_boost: Option<String>,
    /// Morpho Blue market ids to poll directly when `protocol` is `MorphoBlue`.
    pub morpho_markets: Vec<H256>,
    /// UniswapV3 `QuoterV2` address, required for any `UniswapV3` entry in
    /// `routers` to ever be quoted.
    pub uniswap_v3_quoter: Option<Address>,
    /// Per-`(debt, collateral)` close factor and liquidation bonus, keyed by
    /// token address pair. Falls back to the agent-wide defaults when a
    /// candidate's market has no entry here.
    pub market_policies: HashMap<(Address, Address), MarketPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1FeeOracle {
    /// OP-stack `GasPriceOracle.getL1Fee(bytes)`.
    OpStack(Address),
    /// Arbitrum `ArbGasInfo.gasEstimateL1Component(address,bytes,bool)`.
    Arbitrum(Address),
}

impl ChainDescriptor {
    pub fn token(&self, address: Address) -> Option<&TokenDescriptor> {
        self.tokens.get(&address)
    }

    pub fn router(&self, dex: DexId) -> Option<&DexRouterEntry> {
        self.routers.iter().find(|r| r.dex == dex)
    }

    /// Close factor/bonus override for a `(debt, collateral)` market, if one
    /// was configured; falls back to the agent-wide defaults otherwise.
    pub fn market_policy(&self, debt: Address, collateral: Address) -> Option<&MarketPolicy> {
        self.market_policies.get(&(debt, collateral))
    }
}

/// Flat, address/id-keyed lookup tables built once at process boot.
///
/// Everything downstream (scorer, executor, ingestion) reads through this
/// registry rather than holding its own copy of chain config, so a chain's
/// token table or router list is consulted in one place.
#[derive(Debug, Default)]
pub struct ChainRegistry {
    by_id: HashMap<u64, ChainDescriptor>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
        }
    }

    pub fn insert(&mut self, chain: ChainDescriptor) {
        self.by_id.insert(chain.chain_id, chain);
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainDescriptor> {
        self.by_id.get(&chain_id)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.by_id.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

pub fn parse_address(s: &str) -> anyhow::Result<Address> {
    Address::from_str(s).map_err(|e| anyhow::anyhow!("invalid address '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chain() -> ChainDescriptor {
        ChainDescriptor {
            chain_id: 42161,
            name: "arbitrum".into(),
            rpc_url: "https://arb1.example".into(),
            ws_urls: vec![],
            liquidator: Address::zero(),
            executor_key_env: "WALLET_PK_ARB".into(),
            tokens: HashMap::new(),
            routers: vec![DexRouterEntry {
                dex: DexId::UniswapV3,
                router: Address::repeat_byte(1),
                factory: None,
            }],
            sequencer_feed: None,
            market_provider: Address::zero(),
            risk: RiskOverrides {
                health_factor_max: 1.05,
                gap_cap_bps: 150,
            },
            preferred_stables: vec![],
            preliq_factory: None,
            preliq_init_code_hash: None,
            bundler3: None,
            l1_fee_oracle: Some(L1FeeOracle::Arbitrum(Address::repeat_byte(2))),
            protocol: crate::models::ProtocolKey::AaveV3,
            subgraph_endpoints: vec![],
            subgraph_indexer_boost: None,
            morpho_markets: vec![],
            uniswap_v3_quoter: None,
            market_policies: HashMap::new(),
        }
    }

    #[test]
    fn registry_round_trips_chain_lookup() {
        let mut registry = ChainRegistry::new();
        registry.insert(sample_chain());

        let found = registry.get(42161).expect("chain present");
        assert_eq!(found.name, "arbitrum");
        assert_eq!(found.router(DexId::UniswapV3).unwrap().router, Address::repeat_byte(1));
        assert!(found.router(DexId::UniswapV2).is_none());
    }

    #[test]
    fn parse_address_rejects_garbage() {
        assert!(parse_address("not-an-address").is_err());
    }

    #[test]
    fn market_policy_falls_back_to_none_for_unconfigured_pair() {
        let mut chain = sample_chain();
        assert!(chain.market_policy(Address::repeat_byte(3), Address::repeat_byte(4)).is_none());

        chain.market_policies.insert(
            (Address::repeat_byte(3), Address::repeat_byte(4)),
            MarketPolicy { close_factor_bps: 5_000, liquidation_bonus_bps: 800 },
        );
        let found = chain.market_policy(Address::repeat_byte(3), Address::repeat_byte(4)).unwrap();
        assert_eq!(found.liquidation_bonus_bps, 800);
    }
}
