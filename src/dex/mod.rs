//! Route quoting dispatcher: turns a `(dex, token_in, token_out, amount)`
//! request into a priced `RouteOption`, trying the configured DEXs for a
//! chain and keeping the best output.

pub mod solidly;
pub mod univ2;
pub mod univ3;

use crate::chain::{ChainDescriptor, DexId};
use crate::models::{ChosenRoute, RouteOption};
use ethers::{
    contract::abigen,
    providers::{Http, Provider},
    types::{Address, U256},
};
use std::sync::Arc;

abigen!(
    LiquidatorRouterGate,
    r#"[
        function allowedRouters(address router) external view returns (bool)
    ]"#
);

/// Quotes every router configured for `chain` and returns the best output,
/// or `None` if none of them could price the pair at all. Each router is
/// checked against the executor contract's `allowedRouters` view first;
/// disallowed (or unreadable) routers drop silently rather than being
/// quoted.
pub async fn best_route(
    provider: Arc<Provider<Http>>,
    chain: &ChainDescriptor,
    quoter: Option<Address>,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
) -> Option<ChosenRoute> {
    let mut best: Option<ChosenRoute> = None;
    let gate = LiquidatorRouterGate::new(chain.liquidator, provider.clone());

    for entry in &chain.routers {
        match gate.allowed_routers(entry.router).call().await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => continue,
        }

        let candidate = match entry.dex {
            DexId::UniswapV3 => {
                let Some(quoter) = quoter else { continue };
                univ3::best_single_hop(provider.clone(), quoter, token_in, token_out, amount_in)
                    .await
                    .map(|(fee, out)| ChosenRoute {
                        dex: entry.dex,
                        router: entry.router,
                        option: RouteOption::UniV3Single { fee },
                        quoted_out: out,
                    })
            }
            DexId::UniswapV2 | DexId::Sushiswap => {
                univ2::quote(provider.clone(), entry.router, token_in, token_out, amount_in)
                    .await
                    .ok()
                    .map(|out| ChosenRoute {
                        dex: entry.dex,
                        router: entry.router,
                        option: RouteOption::UniV2 { factory: entry.router },
                        quoted_out: out,
                    })
            }
            DexId::SolidlyV2 => {
                let Some(factory) = entry.factory else { continue };
                solidly::quote(provider.clone(), entry.router, token_in, token_out, amount_in)
                    .await
                    .ok()
                    .map(|(out, stable)| ChosenRoute {
                        dex: entry.dex,
                        router: entry.router,
                        option: RouteOption::SolidlyV2 { factory, stable },
                        quoted_out: out,
                    })
            }
        };

        if let Some(candidate) = candidate {
            if best.as_ref().map(|b| candidate.quoted_out > b.quoted_out).unwrap_or(true) {
                best = Some(candidate);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_none_when_chain_has_no_routers() {
        let chain = ChainDescriptor {
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
            protocol: crate::models::ProtocolKey::AaveV3,
            subgraph_endpoints: vec![],
            subgraph_indexer_boost: None,
            morpho_markets: vec![],
            uniswap_v3_quoter: None,
            market_policies: Default::default(),
        };
        let provider = Arc::new(Provider::<Http>::try_from("http://localhost:1").unwrap());
        let result = best_route(provider, &chain, None, Address::zero(), Address::repeat_byte(1), U256::from(1u64)).await;
        assert!(result.is_none());
    }
}
