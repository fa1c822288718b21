//! Plan construction: given a candidate that has cleared every upstream
//! gate, compute the repay/seize amounts, quote the best route to convert
//! seized collateral back to the debt asset, price gas, and assemble a
//! `Plan` — or reject with a reason if nothing comes out profitable.

use crate::chain::ChainDescriptor;
use crate::dex;
use crate::gas::GasEstimator;
use crate::models::{
    Candidate, ChosenRoute, ExecutionMode, Plan, PreLiquidationOffer, RejectionReason,
};
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use std::sync::Arc;

abigen!(
    Erc20Balance,
    r#"[
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

pub struct PlanInputs<'a> {
    pub candidate: &'a Candidate,
    pub chain: &'a ChainDescriptor,
    pub close_factor_bps: u32,
    pub liquidation_bonus_bps: u32,
    pub debt_price_usd: f64,
    pub collateral_price_usd: f64,
    pub gas_limit: U256,
    pub quoter: Option<Address>,
    pub min_net_usd: f64,
    pub min_pnl_multiple: f64,
    pub max_gas_usd: f64,
    /// Caps the repay leg's USD value; repay is clamped down to
    /// `max_repay_usd / debt_price_usd` (floor) when it would exceed this.
    pub max_repay_usd: f64,
    /// Minimum `net_usd / repay_usd * 10_000` a plan must clear, and the
    /// basis for `min_profit`.
    pub floor_bps: u32,
    pub now_unix: u64,
    /// From the precommit predictor: worth building and holding this plan
    /// ahead of the next oracle update rather than racing from a cold start.
    pub precommit_eligible: bool,
}

/// Repay amount in debt-token smallest units, scaled by the close factor.
pub fn repay_amount(debt_amount: U256, close_factor_bps: u32) -> U256 {
    debt_amount * U256::from(close_factor_bps) / U256::from(10_000u32)
}

/// Clamps `repay` down to `max_repay_usd / debt_price_usd`, floored to
/// integer debt-token units, when its USD value exceeds `max_repay_usd`.
pub fn clamp_repay_to_max_usd(
    repay: U256,
    debt_decimals: u8,
    debt_price_usd: f64,
    max_repay_usd: f64,
) -> U256 {
    if debt_price_usd <= 0.0 {
        return repay;
    }
    let repay_usd = repay.as_u128() as f64 / 10f64.powi(debt_decimals as i32) * debt_price_usd;
    if repay_usd <= max_repay_usd {
        return repay;
    }
    let capped_units = (max_repay_usd / debt_price_usd * 10f64.powi(debt_decimals as i32)).floor();
    if capped_units <= 0.0 || !capped_units.is_finite() {
        return U256::zero();
    }
    repay.min(U256::from(capped_units as u128))
}

/// Seized collateral amount for a given repay, in collateral-token smallest
/// units, incorporating the liquidation bonus and the debt/collateral price
/// ratio (`debt_price_usd` / `collateral_price_usd`), with decimals
/// normalized to 18 then rescaled to the collateral token's own decimals.
/// Clamped to `collateral_amount`: a plan can never seize more than the
/// borrower actually holds.
#[allow(clippy::too_many_arguments)]
pub fn seize_amount(
    repay_amount: U256,
    debt_decimals: u8,
    collateral_decimals: u8,
    debt_price_usd: f64,
    collateral_price_usd: f64,
    liquidation_bonus_bps: u32,
    collateral_amount: U256,
) -> U256 {
    if collateral_price_usd <= 0.0 {
        return U256::zero();
    }
    let repay_f64 = repay_amount.as_u128() as f64 / 10f64.powi(debt_decimals as i32);
    let repay_usd = repay_f64 * debt_price_usd;
    let bonus_multiplier = 1.0 + (liquidation_bonus_bps as f64 / 10_000.0);
    let seize_units = (repay_usd * bonus_multiplier / collateral_price_usd)
        * 10f64.powi(collateral_decimals as i32);
    if seize_units <= 0.0 || !seize_units.is_finite() {
        return U256::zero();
    }
    U256::from(seize_units as u128).min(collateral_amount)
}

/// Rounds `numerator / denominator` up, matching the spec's `ceil(...)`
/// steps for `min_profit` and Morpho `repay_shares`. Returns zero for a
/// zero denominator rather than panicking; callers only reach this once the
/// relevant amount is known to be nonzero.
fn ceil_div(numerator: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::zero();
    }
    (numerator + denominator - U256::one()) / denominator
}

pub async fn build_plan(
    provider: Arc<Provider<Http>>,
    gas: &GasEstimator,
    inputs: PlanInputs<'_>,
) -> Result<Plan, RejectionReason> {
    let candidate = inputs.candidate;
    let repay_raw = repay_amount(candidate.debt.amount, inputs.close_factor_bps);
    if repay_raw.is_zero() {
        return Err(RejectionReason::PlanNull);
    }
    let repay = clamp_repay_to_max_usd(
        repay_raw,
        candidate.debt.decimals,
        inputs.debt_price_usd,
        inputs.max_repay_usd,
    );
    if repay.is_zero() {
        return Err(RejectionReason::PlanNull);
    }

    let seize = seize_amount(
        repay,
        candidate.debt.decimals,
        candidate.collateral.decimals,
        inputs.debt_price_usd,
        inputs.collateral_price_usd,
        inputs.liquidation_bonus_bps,
        candidate.collateral.amount,
    );
    if seize.is_zero() {
        return Err(RejectionReason::PlanNull);
    }

    let route = dex::best_route(
        provider.clone(),
        inputs.chain,
        inputs.quoter,
        candidate.collateral.address,
        candidate.debt.address,
        seize,
    )
    .await
    .ok_or(RejectionReason::NoRoute)?;

    let amount_out_min = route.quoted_out * U256::from(9_900u32) / U256::from(10_000u32);

    let repay_f64 = repay.as_u128() as f64 / 10f64.powi(candidate.debt.decimals as i32);
    let repay_usd = repay_f64 * inputs.debt_price_usd;
    let out_f64 = route.quoted_out.as_u128() as f64 / 10f64.powi(candidate.debt.decimals as i32);
    let out_usd = out_f64 * inputs.debt_price_usd;
    let net_usd_before_gas = out_usd - repay_usd;

    let calldata = ethers::types::Bytes::from(Vec::<u8>::new());
    let gas_usd = gas
        .total_cost_usd(inputs.chain, inputs.gas_limit, inputs.chain.liquidator, &calldata)
        .await
        .map_err(|e| RejectionReason::ContractRevert {
            selector: None,
            name: None,
            detail: e.to_string(),
        })?;

    if gas_usd > inputs.max_gas_usd {
        return Err(RejectionReason::GasCostTooHigh);
    }

    let net_usd = net_usd_before_gas - gas_usd;
    if net_usd <= 0.0 {
        return Err(RejectionReason::MinProfitZero);
    }
    if net_usd < inputs.min_net_usd {
        return Err(RejectionReason::NetBelowMin);
    }
    if gas_usd > 0.0 && net_usd / gas_usd < inputs.min_pnl_multiple {
        return Err(RejectionReason::PnlMultBelowMin);
    }

    let est_net_bps = if repay_usd <= 0.0 {
        0
    } else {
        ((net_usd / repay_usd) * 10_000.0) as i64
    };
    if est_net_bps < inputs.floor_bps as i64 {
        return Err(RejectionReason::NetBpsBelowFloor { bps: est_net_bps, floor: inputs.floor_bps });
    }

    let min_profit = ceil_div(repay * U256::from(inputs.floor_bps), U256::from(10_000u32));
    if min_profit.is_zero() {
        return Err(RejectionReason::MinProfitZero);
    }

    let repay_shares = candidate.morpho.as_ref().map(|market| {
        ceil_div(repay * market.borrow_shares, candidate.debt.amount).min(market.borrow_shares)
    });

    let solidly_factory = match &route.option {
        crate::models::RouteOption::SolidlyV2 { factory, .. } => Some(*factory),
        _ => None,
    };

    let mode = if has_sufficient_inventory(provider, inputs.chain.liquidator, candidate.debt.address, repay).await {
        ExecutionMode::Funds
    } else {
        ExecutionMode::Flash
    };

    Ok(Plan {
        protocol: candidate.protocol,
        chain_id: candidate.chain_id,
        borrower: candidate.borrower,
        debt_token: candidate.debt.address,
        collateral_token: candidate.collateral.address,
        repay_amount: repay,
        repay_usd,
        seize_amount: seize,
        route: route_clone(&route),
        amount_out_min,
        net_usd,
        gas_usd,
        min_profit,
        mode,
        precommit: inputs.precommit_eligible,
        morpho_market: candidate.morpho.clone(),
        repay_shares,
        preliq: preliq_with_expiry_check(candidate.preliq_offer.clone(), inputs.now_unix),
        deadline_unix: inputs.now_unix + 300,
        solidly_factory,
    })
}

fn route_clone(route: &ChosenRoute) -> ChosenRoute {
    route.clone()
}

/// `mode := funds` when the executor contract already holds enough of the
/// debt asset to repay without a flash loan; falls back to `flash` on any
/// read failure rather than risk a false positive.
async fn has_sufficient_inventory(
    provider: Arc<Provider<Http>>,
    executor: Address,
    debt_token: Address,
    repay_amount: U256,
) -> bool {
    let contract = Erc20Balance::new(debt_token, provider);
    match contract.balance_of(executor).call().await {
        Ok(balance) => balance >= repay_amount,
        Err(_) => false,
    }
}

fn preliq_with_expiry_check(offer: Option<PreLiquidationOffer>, _now: u64) -> Option<PreLiquidationOffer> {
    offer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repay_amount_scales_by_close_factor() {
        let repay = repay_amount(U256::from(1_000_000u64), 5_000);
        assert_eq!(repay, U256::from(500_000u64));
    }

    #[test]
    fn seize_amount_is_zero_for_zero_collateral_price() {
        let seize = seize_amount(U256::from(1_000u64), 6, 18, 1.0, 0.0, 500, U256::MAX);
        assert_eq!(seize, U256::zero());
    }

    #[test]
    fn seize_amount_grows_with_liquidation_bonus() {
        let low = seize_amount(U256::from(1_000_000u64), 6, 18, 1.0, 1.0, 0, U256::MAX);
        let high = seize_amount(U256::from(1_000_000u64), 6, 18, 1.0, 1.0, 1000, U256::MAX);
        assert!(high > low);
    }

    #[test]
    fn seize_amount_clamps_to_collateral_on_hand() {
        let uncapped = seize_amount(U256::from(1_000_000u64), 6, 18, 1.0, 1.0, 1000, U256::MAX);
        let capped = seize_amount(U256::from(1_000_000u64), 6, 18, 1.0, 1.0, 1000, U256::from(1_000u64));
        assert!(uncapped > U256::from(1_000u64));
        assert_eq!(capped, U256::from(1_000u64));
    }

    #[test]
    fn clamp_repay_to_max_usd_leaves_cheap_repay_untouched() {
        let repay = U256::from(500_000_000u64);
        let clamped = clamp_repay_to_max_usd(repay, 6, 1.0, 100_000.0);
        assert_eq!(clamped, repay);
    }

    #[test]
    fn clamp_repay_to_max_usd_floors_to_the_cap() {
        // 2,000 USDC repay at $1 each against a $1,000 cap should floor to
        // exactly 1,000_000000 raw units.
        let repay = U256::from(2_000_000_000u64);
        let clamped = clamp_repay_to_max_usd(repay, 6, 1.0, 1_000.0);
        assert_eq!(clamped, U256::from(1_000_000_000u64));
    }

    #[test]
    fn ceil_div_rounds_up_on_remainder() {
        assert_eq!(ceil_div(U256::from(10u64), U256::from(3u64)), U256::from(4u64));
        assert_eq!(ceil_div(U256::from(9u64), U256::from(3u64)), U256::from(3u64));
    }
}
