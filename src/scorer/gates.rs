//! Individual gate checks run in the order spec §4.2 specifies. Each gate
//! takes what it needs directly rather than the whole scoring context, so
//! the cascade in `mod.rs` stays a flat, readable sequence of early-returns.

use crate::chain::ChainDescriptor;
use crate::models::{Candidate, RejectionReason};
use std::collections::HashSet;

pub fn chain_enabled(chain: Option<&ChainDescriptor>) -> Result<(), RejectionReason> {
    if chain.is_some() {
        Ok(())
    } else {
        Err(RejectionReason::ChainDisabled)
    }
}

pub fn policy_denylist(
    denylist: &HashSet<String>,
    debt_symbol: &str,
    collateral_symbol: &str,
) -> Result<(), RejectionReason> {
    if denylist.contains(debt_symbol) {
        return Err(RejectionReason::Denylisted(debt_symbol.to_string()));
    }
    if denylist.contains(collateral_symbol) {
        return Err(RejectionReason::Denylisted(collateral_symbol.to_string()));
    }
    Ok(())
}

pub fn zero_exposure(candidate: &Candidate) -> Result<(), RejectionReason> {
    if candidate.debt.is_zero() || candidate.collateral.is_zero() {
        Err(RejectionReason::ZeroExposure)
    } else {
        Ok(())
    }
}

pub fn market_enabled(enabled: bool) -> Result<(), RejectionReason> {
    if enabled {
        Ok(())
    } else {
        Err(RejectionReason::MarketDisabled)
    }
}

pub fn sequencer_up(status: crate::cache::SequencerStatus) -> Result<(), RejectionReason> {
    match status {
        crate::cache::SequencerStatus::Up => Ok(()),
        crate::cache::SequencerStatus::Down => Err(RejectionReason::SequencerDown("uptime feed reports down".into())),
    }
}

pub fn not_throttled(throttled: bool) -> Result<(), RejectionReason> {
    if throttled {
        Err(RejectionReason::Throttled)
    } else {
        Ok(())
    }
}

pub fn oracle_dex_gap_within_cap(gap_bps: u32, cap_bps: u32) -> Result<(), RejectionReason> {
    if gap_bps > cap_bps {
        Err(RejectionReason::GapExceeded { bps: gap_bps })
    } else {
        Ok(())
    }
}

/// Returns `(hf, is_precommit)`. A candidate with `hf < max` passes
/// normally. A candidate with `hf` in `[max, max + precommit_hf_margin)`
/// passes only when `precommit_timing_eligible` (the oracle's next update
/// looks imminent per the EWMA predictor) — that's the one case where
/// submitting ahead of HF crossing the threshold is worthwhile.
pub fn health_factor_below_max(
    hf: Option<f64>,
    max: f64,
    precommit_timing_eligible: bool,
    precommit_hf_margin: f64,
) -> Result<(f64, bool), RejectionReason> {
    let hf = hf.ok_or(RejectionReason::HealthFactorMissing)?;
    if hf < max {
        return Ok((hf, false));
    }
    if precommit_timing_eligible && hf < max + precommit_hf_margin {
        return Ok((hf, true));
    }
    Err(RejectionReason::HealthFactorAboveMax)
}

/// Pre-liquidation-specific gates: the offer must not be expired and must
/// clear the minimum incentive floor the agent is configured with.
pub fn preliq_offer_valid(
    offer: &crate::models::PreLiquidationOffer,
    now_unix: u64,
    min_incentive_bps: u32,
) -> Result<(), RejectionReason> {
    if offer.expiry != 0 && now_unix > offer.expiry {
        return Err(RejectionReason::OfferExpired);
    }
    let incentive_bps = (offer.pre_lif1.as_u128() / 10u128.pow(14)) as u32;
    if incentive_bps < min_incentive_bps {
        return Err(RejectionReason::IncentiveTooLow {
            have: incentive_bps,
            need: min_incentive_bps,
        });
    }
    Ok(())
}

pub fn close_factor_in_range(close_factor_bps: i64) -> Result<(), RejectionReason> {
    if close_factor_bps <= 0 {
        Err(RejectionReason::CloseFactorNonpositive)
    } else if close_factor_bps > 10_000 {
        Err(RejectionReason::CloseFactorOutOfRange)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, U256};

    #[test]
    fn gap_gate_rejects_only_when_strictly_over_cap() {
        assert!(oracle_dex_gap_within_cap(150, 150).is_ok());
        assert!(oracle_dex_gap_within_cap(151, 150).is_err());
    }

    #[test]
    fn hf_gate_requires_a_value_and_rejects_at_or_above_max() {
        assert_eq!(
            health_factor_below_max(None, 1.0, false, 0.02),
            Err(RejectionReason::HealthFactorMissing)
        );
        assert!(health_factor_below_max(Some(1.0), 1.0, false, 0.02).is_err());
        assert_eq!(health_factor_below_max(Some(0.98), 1.0, false, 0.02), Ok((0.98, false)));
    }

    #[test]
    fn hf_gate_allows_precommit_band_only_when_timing_eligible() {
        assert!(health_factor_below_max(Some(1.01), 1.0, false, 0.02).is_err());
        assert_eq!(health_factor_below_max(Some(1.01), 1.0, true, 0.02), Ok((1.01, true)));
        assert!(health_factor_below_max(Some(1.03), 1.0, true, 0.02).is_err());
    }

    #[test]
    fn preliq_offer_rejects_past_expiry() {
        let offer = crate::models::PreLiquidationOffer {
            offer_address: Address::zero(),
            pre_lltv: U256::zero(),
            pre_lcf1: U256::zero(),
            pre_lcf2: U256::zero(),
            pre_lif1: U256::from(103_000_000_000_000_000u128),
            pre_lif2: U256::zero(),
            oracle: Address::zero(),
            expiry: 100,
        };
        assert_eq!(preliq_offer_valid(&offer, 200, 200), Err(RejectionReason::OfferExpired));
    }

    #[test]
    fn close_factor_bounds_are_exclusive_and_inclusive_correctly() {
        assert!(close_factor_in_range(0).is_err());
        assert!(close_factor_in_range(10_000).is_ok());
        assert!(close_factor_in_range(10_001).is_err());
    }
}
