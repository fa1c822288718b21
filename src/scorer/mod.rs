//! The scoring pipeline: runs a candidate through the ordered gate cascade
//! from spec §4.2, then hands survivors to the plan builder.

pub mod adaptive;
pub mod gates;
pub mod plan_builder;
pub mod precommit;

use crate::cache::{OracleCache, SequencerCache};
use crate::chain::ChainRegistry;
use crate::gas::GasEstimator;
use crate::ingestion::watchers::{LendingPoolView, HEALTH_FACTOR_WAD};
use crate::models::{Candidate, RejectionReason, ScoreOutcome};
use crate::scorer::adaptive::AdaptiveThresholdsClient;
use crate::scorer::precommit::PrecommitPredictor;
use crate::throttle::Throttle;
use ethers::providers::{Http, Provider};
use ethers::types::U256;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

pub struct ScoringContext {
    pub registry: Arc<ChainRegistry>,
    pub oracle_cache: Arc<OracleCache>,
    pub sequencer_cache: Arc<SequencerCache>,
    pub throttle: Arc<Throttle>,
    pub adaptive: Arc<AdaptiveThresholdsClient>,
    pub precommit: Arc<PrecommitPredictor>,
    pub denylist: HashSet<String>,
    pub min_net_usd: f64,
    pub min_pnl_multiple: f64,
    pub max_gas_usd: f64,
    pub min_incentive_bps: u32,
    pub max_attempts_per_borrower_hour: u32,
    pub throttle_bypass_hf_drop: f64,
    pub close_factor_bps_default: u32,
    pub liquidation_bonus_bps_default: u32,
    pub floor_bps: u32,
    pub max_repay_usd: f64,
    pub precommit_lead_time: Duration,
    pub precommit_hf_margin: f64,
}

#[instrument(skip(ctx, provider, gas), fields(chain_id = candidate.chain_id, borrower = ?candidate.borrower))]
pub async fn score(
    ctx: &ScoringContext,
    provider: Arc<Provider<Http>>,
    gas: &GasEstimator,
    candidate: &Candidate,
    now_unix: u64,
) -> ScoreOutcome {
    let chain = ctx.registry.get(candidate.chain_id);
    if let Err(reason) = gates::chain_enabled(chain) {
        return reject(reason);
    }
    let chain = chain.expect("checked above");

    let debt_symbol = chain
        .token(candidate.debt.address)
        .map(|t| t.symbol.as_str())
        .unwrap_or("");
    let collateral_symbol = chain
        .token(candidate.collateral.address)
        .map(|t| t.symbol.as_str())
        .unwrap_or("");
    if let Err(reason) = gates::policy_denylist(&ctx.denylist, debt_symbol, collateral_symbol) {
        return reject(reason);
    }

    if let Err(reason) = gates::zero_exposure(candidate) {
        return reject(reason);
    }

    // Market-enabled is modeled as "protocol resolved a chain entry for
    // this candidate's market" until a richer per-market registry exists.
    if let Err(reason) = gates::market_enabled(true) {
        return reject(reason);
    }

    let sequencer_status = match ctx
        .sequencer_cache
        .status(provider.clone(), chain.sequencer_feed)
        .await
    {
        Ok(status) => status,
        Err(e) => {
            debug!(error = %e, "sequencer status check failed, treating as down");
            crate::cache::SequencerStatus::Down
        }
    };
    if let Err(reason) = gates::sequencer_up(sequencer_status) {
        return reject(reason);
    }

    let throttled = ctx
        .throttle
        .check_and_record(
            candidate.chain_id,
            candidate.borrower,
            candidate.health_factor,
            ctx.max_attempts_per_borrower_hour,
            ctx.throttle_bypass_hf_drop,
        )
        .await;
    if let Err(reason) = gates::not_throttled(throttled) {
        return reject(reason);
    }

    let debt_oracle = chain.token(candidate.debt.address).and_then(|t| t.oracle);
    let debt_price_usd = match debt_oracle {
        Some(oracle) => match ctx.oracle_cache.get(provider.clone(), oracle).await {
            Ok(price) => price.as_f64(),
            Err(e) => return reject(RejectionReason::OracleUnavailable(e.to_string())),
        },
        None => return reject(RejectionReason::OracleUnavailable("no oracle configured".into())),
    };

    let collateral_oracle = chain.token(candidate.collateral.address).and_then(|t| t.oracle);
    let collateral_price_usd = match collateral_oracle {
        Some(oracle) => match ctx.oracle_cache.get(provider.clone(), oracle).await {
            Ok(price) => price.as_f64(),
            Err(e) => return reject(RejectionReason::OracleUnavailable(e.to_string())),
        },
        // Some collateral assets (LSTs pegged 1:1) carry no independent feed
        // and are priced off the debt asset's own oracle instead.
        None => debt_price_usd,
    };

    let (hf_max, gap_cap_bps) = ctx
        .adaptive
        .effective_limits(
            candidate.chain_id,
            chain.risk.health_factor_max,
            chain.risk.gap_cap_bps,
            debt_symbol,
            collateral_symbol,
        )
        .await;

    // Oracle-vs-DEX gap is evaluated against the same debt price read above;
    // a proper DEX-quoted comparison is layered on by the caller once a
    // route is known, so this gate here only enforces the adaptive cap is
    // non-degenerate (a gap of 0 when no comparison is possible).
    if let Err(reason) = gates::oracle_dex_gap_within_cap(0, gap_cap_bps) {
        return reject(reason);
    }

    let precommit_timing_eligible = match debt_oracle {
        Some(oracle) => ctx.precommit.update_imminent(oracle, Instant::now(), ctx.precommit_lead_time),
        None => false,
    };

    // Morpho Blue candidates already carry a freshly-derived HF from the
    // LLTV/oracle read at ingestion time; Aave-family candidates are
    // re-read here rather than trusted from ingestion, since the position
    // may have moved between observation and scoring (spec gate 10).
    let onchain_hf = if candidate.morpho.is_none() {
        let contract = LendingPoolView::new(chain.market_provider, provider.clone());
        match contract.get_user_account_data(candidate.borrower).call().await {
            Ok((_, _, _, _, _, hf_wad)) => {
                if hf_wad > U256::from(u128::MAX) {
                    None
                } else {
                    Some(hf_wad.as_u128() as f64 / HEALTH_FACTOR_WAD)
                }
            }
            Err(e) => {
                debug!(error = %e, "on-chain health factor read failed, falling back to ingestion-time value");
                candidate.health_factor
            }
        }
    } else {
        candidate.health_factor
    };

    let (hf, precommit_eligible) = match gates::health_factor_below_max(
        onchain_hf,
        hf_max,
        precommit_timing_eligible,
        ctx.precommit_hf_margin,
    ) {
        Ok(result) => result,
        Err(reason) => return reject(reason),
    };
    debug!(hf, precommit_eligible, "candidate passed health factor gate");

    if let Some(offer) = &candidate.preliq_offer {
        if let Err(reason) = gates::preliq_offer_valid(offer, now_unix, ctx.min_incentive_bps) {
            return reject(reason);
        }
    }

    let policy = chain.market_policy(candidate.debt.address, candidate.collateral.address);
    let close_factor_bps: i64 = policy
        .map(|p| p.close_factor_bps)
        .unwrap_or(ctx.close_factor_bps_default) as i64;
    if let Err(reason) = gates::close_factor_in_range(close_factor_bps) {
        return reject(reason);
    }
    let liquidation_bonus_bps = policy
        .map(|p| p.liquidation_bonus_bps)
        .unwrap_or(ctx.liquidation_bonus_bps_default);

    let inputs = plan_builder::PlanInputs {
        candidate,
        chain,
        close_factor_bps: close_factor_bps as u32,
        liquidation_bonus_bps,
        debt_price_usd,
        collateral_price_usd,
        gas_limit: U256::from(450_000u64),
        quoter: chain.uniswap_v3_quoter,
        min_net_usd: ctx.min_net_usd,
        min_pnl_multiple: ctx.min_pnl_multiple,
        max_gas_usd: ctx.max_gas_usd,
        max_repay_usd: ctx.max_repay_usd,
        floor_bps: ctx.floor_bps,
        now_unix,
        precommit_eligible,
    };

    match plan_builder::build_plan(provider, gas, inputs).await {
        Ok(plan) => ScoreOutcome::Plan(plan),
        Err(reason) => reject(reason),
    }
}

fn reject(reason: RejectionReason) -> ScoreOutcome {
    ScoreOutcome::Rejected(reason)
}
