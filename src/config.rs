//! Environment-driven configuration.
//!
//! Chains are configured through a `CHAINS` list of short names
//! (`CHAINS=arb,op,mainnet`) and then a `<NAME>_*` prefixed group of
//! variables per chain, so a single process can run the agent across many
//! chains at once from one `.env` file.

use crate::chain::{ChainDescriptor, DexRouterEntry, L1FeeOracle, OracleDenomination, RiskOverrides};
use crate::chain::{parse_address, DexId, TokenDescriptor};
use crate::models::ProtocolKey;
use anyhow::{Context, Result};
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Tunables {
    pub health_factor_max_default: f64,
    pub gap_cap_bps_default: u32,
    pub min_net_usd: f64,
    pub min_pnl_multiple: f64,
    pub max_gas_usd: f64,
    pub throttle_window_secs: u64,
    pub dedupe_window_secs: u64,
    pub subgraph_poll_interval_secs: u64,
    pub predictive_interval_secs: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub route_cache_ttl_secs: u64,
    pub route_cache_fail_ttl_secs: u64,
    pub oracle_cache_ttl_secs: u64,
    pub oracle_cache_fail_ttl_secs: u64,
    pub sequencer_cache_ttl_secs: u64,
    pub sequencer_cache_fail_ttl_secs: u64,
    pub max_live_executions: usize,
    pub max_session_notional_usd: f64,
    pub fail_rate_window: usize,
    pub fail_rate_threshold: f64,
    pub precommit_ewma_alpha: f64,
    /// Width of the HF band above `health_factor_max` within which a
    /// timing-eligible precommit candidate is still allowed through the HF
    /// gate (spec §4.5's "narrow band above the liquidation threshold").
    pub precommit_hf_margin: f64,
    pub max_attempts_per_borrower_hour: u32,
    pub throttle_bypass_hf_drop: f64,
    pub close_factor_bps_default: u32,
    pub liquidation_bonus_bps_default: u32,
    /// Minimum `net_usd / repay_usd * 10_000` a plan must clear; also the
    /// basis for `min_profit := ceil(repay_raw * floor_bps / 10_000)`.
    pub floor_bps: u32,
    /// Caps the repay leg's USD value regardless of what the close factor
    /// alone would produce, bounding exposure to oracle/DEX price error on
    /// any single liquidation.
    pub max_repay_usd: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            health_factor_max_default: 1.0,
            gap_cap_bps_default: 150,
            min_net_usd: 10.0,
            min_pnl_multiple: 1.5,
            max_gas_usd: 50.0,
            throttle_window_secs: 3600,
            dedupe_window_secs: 30,
            subgraph_poll_interval_secs: 12,
            predictive_interval_secs: 30,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            route_cache_ttl_secs: 15,
            route_cache_fail_ttl_secs: 5,
            oracle_cache_ttl_secs: 86_400,
            oracle_cache_fail_ttl_secs: 15,
            sequencer_cache_ttl_secs: 15,
            sequencer_cache_fail_ttl_secs: 5,
            max_live_executions: 3,
            max_session_notional_usd: 250_000.0,
            fail_rate_window: 20,
            fail_rate_threshold: 0.5,
            precommit_ewma_alpha: 0.2,
            precommit_hf_margin: 0.02,
            max_attempts_per_borrower_hour: 6,
            throttle_bypass_hf_drop: 0.03,
            close_factor_bps_default: 5_000,
            liquidation_bonus_bps_default: 500,
            floor_bps: 50,
            max_repay_usd: 100_000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chains: Vec<ChainDescriptor>,
    pub tunables: Tunables,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub adaptive_thresholds_url: Option<String>,
    pub flashbots_relay_url: Option<String>,
    pub odos_api_url: String,
    pub oneinch_api_url: String,
    pub killswitch_file: Option<String>,
    pub enable_preliq: bool,
    /// Score and log every candidate as usual but never submit a
    /// transaction. Distinct from the kill switch: this is a standing
    /// configuration choice for a canary chain, not an emergency stop.
    pub dry_run: bool,
    /// ETH/USD used to price gas cost against a plan's profit. Static for
    /// now; refreshed by restarting the process with an updated value.
    pub eth_price_usd: f64,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let names = env_or("CHAINS", "");
        let chain_names: Vec<String> = names
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let mut chains = Vec::new();
        for name in &chain_names {
            chains.push(load_chain(name).with_context(|| format!("loading chain '{}'", name))?);
        }

        Ok(Self {
            chains,
            tunables: Tunables::default(),
            database_url: env_var("DATABASE_URL"),
            redis_url: env_var("REDIS_URL"),
            adaptive_thresholds_url: env_var("ADAPTIVE_THRESHOLDS_URL"),
            flashbots_relay_url: env_var("FLASHBOTS_RELAY_URL"),
            odos_api_url: env_or("ODOS_API_URL", "https://api.odos.xyz"),
            oneinch_api_url: env_or("ONEINCH_API_URL", "https://api.1inch.dev"),
            killswitch_file: env_var("KILLSWITCH_FILE"),
            enable_preliq: env_or("ENABLE_PRELIQ", "false") == "true",
            dry_run: env_or("DRY_RUN", "false") == "true",
            eth_price_usd: env_parse("ETH_PRICE_USD", 3_000.0)?,
        })
    }
}

fn load_chain(name: &str) -> Result<ChainDescriptor> {
    let prefix = name.to_string();
    let chain_id: u64 = env_parse(&format!("{}_CHAIN_ID", prefix), 0)?;
    if chain_id == 0 {
        anyhow::bail!("{}_CHAIN_ID not set", prefix);
    }

    let rpc_url = env::var(format!("{}_RPC_URL", prefix))
        .with_context(|| format!("{}_RPC_URL not set", prefix))?;
    let ws_urls = env_var(&format!("{}_WS_URLS", prefix))
        .map(|s| s.split(',').map(|u| u.trim().to_string()).collect())
        .unwrap_or_default();

    let liquidator = parse_address(&env::var(format!("{}_LIQUIDATOR", prefix))
        .with_context(|| format!("{}_LIQUIDATOR not set", prefix))?)?;

    let market_provider = parse_address(&env::var(format!("{}_MARKET_PROVIDER", prefix))
        .with_context(|| format!("{}_MARKET_PROVIDER not set", prefix))?)?;

    let sequencer_feed = env_var(&format!("{}_SEQUENCER_FEED", prefix))
        .map(|s| parse_address(&s))
        .transpose()?;

    let preliq_factory = env_var(&format!("{}_PRELIQ_FACTORY", prefix))
        .map(|s| parse_address(&s))
        .transpose()?;

    let preliq_init_code_hash = env_var(&format!("PRELIQ_INIT_CODE_HASH_{}", prefix))
        .map(|s| H256::from_str(s.trim_start_matches("0x")))
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid PRELIQ_INIT_CODE_HASH_{}: {}", prefix, e))?;

    let bundler3 = env_var(&format!("{}_BUNDLER3", prefix))
        .map(|s| parse_address(&s))
        .transpose()?;

    let l1_fee_oracle = match env_var(&format!("{}_L1_FEE_ORACLE_KIND", prefix)).as_deref() {
        Some("optimism") => {
            let addr = parse_address(&env::var(format!("{}_L1_FEE_ORACLE_ADDR", prefix))?)?;
            Some(L1FeeOracle::OpStack(addr))
        }
        Some("arbitrum") => {
            let addr = parse_address(&env::var(format!("{}_L1_FEE_ORACLE_ADDR", prefix))?)?;
            Some(L1FeeOracle::Arbitrum(addr))
        }
        _ => None,
    };

    let health_factor_max: f64 = env_parse(&format!("{}_HEALTH_FACTOR_MAX", prefix), 1.0)?;
    let gap_cap_bps: u32 = env_parse(&format!("{}_GAP_CAP_BPS", prefix), 150)?;

    let mut routers = Vec::new();
    for (env_suffix, dex) in [
        ("UNIV3_ROUTER", DexId::UniswapV3),
        ("UNIV2_ROUTER", DexId::UniswapV2),
        ("SUSHI_ROUTER", DexId::Sushiswap),
        ("SOLIDLY_ROUTER", DexId::SolidlyV2),
    ] {
        if let Some(addr) = env_var(&format!("{}_{}", prefix, env_suffix)) {
            let router = parse_address(&addr)?;
            let factory = if dex == DexId::SolidlyV2 {
                Some(parse_address(&env::var(format!("{}_SOLIDLY_FACTORY", prefix))
                    .with_context(|| format!("{}_SOLIDLY_FACTORY required with a Solidly router", prefix))?)?)
            } else {
                None
            };
            routers.push(DexRouterEntry { dex, router, factory });
        }
    }

    let uniswap_v3_quoter = env_var(&format!("{}_UNIV3_QUOTER", prefix))
        .map(|s| parse_address(&s))
        .transpose()?;

    let preferred_stables = env_var(&format!("{}_PREFERRED_STABLES", prefix))
        .map(|s| {
            s.split(',')
                .map(|a| parse_address(a.trim()))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let tokens = load_tokens(&prefix)?;

    let protocol = protocol_from_str(&env_or(&format!("{}_PROTOCOL", prefix), "aave-v3"));

    let subgraph_endpoints = env_var(&format!("{}_SUBGRAPH_ENDPOINTS", prefix))
        .map(|s| s.split(',').map(|u| u.trim().to_string()).filter(|u| !u.is_empty()).collect())
        .unwrap_or_default();
    let subgraph_indexer_boost = env_var(&format!("{}_SUBGRAPH_INDEXER_BOOST", prefix));

    let morpho_markets = env_var(&format!("{}_MORPHO_MARKETS", prefix))
        .map(|s| {
            s.split(',')
                .map(|m| m.trim())
                .filter(|m| !m.is_empty())
                .map(|m| H256::from_str(m.trim_start_matches("0x")))
                .collect::<std::result::Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid {}_MORPHO_MARKETS: {}", prefix, e))?
        .unwrap_or_default();

    let market_policies = load_market_policies(&prefix)?;

    Ok(ChainDescriptor {
        chain_id,
        name: name.to_lowercase(),
        rpc_url,
        ws_urls,
        liquidator,
        executor_key_env: format!("WALLET_PK_{}", prefix),
        tokens,
        routers,
        sequencer_feed,
        market_provider,
        risk: RiskOverrides {
            health_factor_max,
            gap_cap_bps,
        },
        preferred_stables,
        preliq_factory,
        preliq_init_code_hash,
        bundler3,
        l1_fee_oracle,
        protocol,
        subgraph_endpoints,
        subgraph_indexer_boost,
        morpho_markets,
        uniswap_v3_quoter,
        market_policies,
    })
}

fn protocol_from_str(s: &str) -> ProtocolKey {
    match s {
        "morpho-blue" | "morpho" => ProtocolKey::MorphoBlue,
        "compound-v3" | "compound" => ProtocolKey::CompoundV3,
        "radiant" => ProtocolKey::Radiant,
        "seamless" => ProtocolKey::Seamless,
        _ => ProtocolKey::AaveV3,
    }
}

/// Parses `<NAME>_TOKENS=SYM:ADDR:DECIMALS:ORACLE:DENOM:FALLBACK,...` into a
/// chain's token table. `ORACLE` and `FALLBACK` may be empty (no Chainlink
/// feed / no fallback-route hop token respectively); `DENOM` is `usd` or
/// `native`, defaulting to `usd` when empty.
fn load_tokens(prefix: &str) -> Result<HashMap<Address, TokenDescriptor>> {
    let mut tokens = HashMap::new();
    let raw = match env_var(&format!("{}_TOKENS", prefix)) {
        Some(raw) => raw,
        None => return Ok(tokens),
    };

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let fields: Vec<&str> = entry.split(':').collect();
        if fields.len() < 3 {
            anyhow::bail!("{}_TOKENS entry '{}' malformed", prefix, entry);
        }
        let (symbol, address, decimals) = (fields[0], fields[1], fields[2]);
        let oracle = fields.get(3).map(|s| s.trim()).filter(|s| !s.is_empty());
        let denom = fields.get(4).map(|s| s.trim()).unwrap_or("");
        let fallback = fields.get(5).map(|s| s.trim()).filter(|s| !s.is_empty());

        let address = parse_address(address)?;
        tokens.insert(
            address,
            TokenDescriptor {
                address,
                symbol: symbol.to_string(),
                decimals: decimals
                    .parse()
                    .with_context(|| format!("{}_TOKENS entry '{}' has invalid decimals", prefix, entry))?,
                oracle: oracle.map(parse_address).transpose()?,
                oracle_denomination: denomination_from_str(denom),
                fallback_route_hint: fallback.map(parse_address).transpose()?,
            },
        );
    }

    Ok(tokens)
}

/// Parses `<NAME>_MARKETS=DEBT:COLLATERAL:CLOSEFACTOR_BPS:BONUS_BPS,...` into
/// a chain's per-market close factor/bonus table. A market with no entry
/// here falls back to the agent-wide `Tunables` defaults.
fn load_market_policies(prefix: &str) -> Result<HashMap<(Address, Address), crate::chain::MarketPolicy>> {
    use crate::chain::MarketPolicy;

    let mut policies = HashMap::new();
    let raw = match env_var(&format!("{}_MARKETS", prefix)) {
        Some(raw) => raw,
        None => return Ok(policies),
    };

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let fields: Vec<&str> = entry.split(':').collect();
        if fields.len() != 4 {
            anyhow::bail!("{}_MARKETS entry '{}' malformed", prefix, entry);
        }
        let debt = parse_address(fields[0])?;
        let collateral = parse_address(fields[1])?;
        let close_factor_bps: u32 = fields[2]
            .parse()
            .with_context(|| format!("{}_MARKETS entry '{}' has invalid close factor", prefix, entry))?;
        let liquidation_bonus_bps: u32 = fields[3]
            .parse()
            .with_context(|| format!("{}_MARKETS entry '{}' has invalid bonus", prefix, entry))?;
        policies.insert(
            (debt, collateral),
            MarketPolicy {
                close_factor_bps,
                liquidation_bonus_bps,
            },
        );
    }

    Ok(policies)
}

pub fn denomination_from_str(s: &str) -> OracleDenomination {
    match s {
        "native" => OracleDenomination::Native,
        _ => OracleDenomination::Usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_when_unset() {
        let v: u64 = env_parse("DEFINITELY_UNSET_CONFIG_VAR_XYZ", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn protocol_from_str_defaults_to_aave() {
        assert_eq!(protocol_from_str("morpho-blue"), ProtocolKey::MorphoBlue);
        assert_eq!(protocol_from_str("unknown-protocol"), ProtocolKey::AaveV3);
    }

    #[test]
    fn tunables_default_is_internally_consistent() {
        let t = Tunables::default();
        assert!(t.route_cache_fail_ttl_secs < t.route_cache_ttl_secs);
        assert!(t.oracle_cache_fail_ttl_secs < t.oracle_cache_ttl_secs);
        assert!(t.retry_base_delay_ms < t.retry_max_delay_ms);
    }
}
