use super::plan::Plan;
use thiserror::Error;

/// Every gate in the scorer's cascade (spec §4.2) yields one of these when it
/// fails. The reason code is what gets written into the attempt log and
/// counted toward metrics; it is deliberately compact and never contains a
/// borrower address or other PII-adjacent data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    #[error("chain disabled")]
    ChainDisabled,
    #[error("protocol adapter unresolved")]
    ProtocolUnresolved,
    #[error("asset denylisted: {0}")]
    Denylisted(String),
    #[error("zero-exposure")]
    ZeroExposure,
    #[error("market disabled")]
    MarketDisabled,
    #[error("sequencer status-down: {0}")]
    SequencerDown(String),
    #[error("throttled")]
    Throttled,
    #[error("price-volatility-rejected")]
    PriceVolatility,
    #[error("oracle-dex gap too large: {bps} bps")]
    GapExceeded { bps: u32 },
    #[error("health factor above max")]
    HealthFactorAboveMax,
    #[error("health factor missing")]
    HealthFactorMissing,
    #[error("incentive-too-low: {have} bps < {need} bps")]
    IncentiveTooLow { have: u32, need: u32 },
    #[error("offer expired")]
    OfferExpired,
    #[error("close-factor-nonpositive")]
    CloseFactorNonpositive,
    #[error("effective close factor out of range")]
    CloseFactorOutOfRange,
    #[error("plan-null")]
    PlanNull,
    #[error("net-below-min")]
    NetBelowMin,
    #[error("pnl-mult-below-min")]
    PnlMultBelowMin,
    #[error("gas-cost-too-high")]
    GasCostTooHigh,
    #[error("min-profit-zero")]
    MinProfitZero,
    #[error("est-net-bps {bps} below floor {floor}")]
    NetBpsBelowFloor { bps: i64, floor: u32 },
    #[error("contract revert: {detail}")]
    ContractRevert {
        selector: Option<String>,
        name: Option<String>,
        detail: String,
    },
    #[error("hf-recovered")]
    HfRecovered,
    #[error("missing wallet key")]
    MissingWalletKey,
    #[error("missing liquidator contract")]
    MissingLiquidator,
    #[error("missing executor address")]
    MissingExecutor,
    #[error("no profitable route")]
    NoRoute,
    #[error("oracle read failed: {0}")]
    OracleUnavailable(String),
}

impl RejectionReason {
    /// Whether this rejection should count toward the executor's fail-rate
    /// circuit breaker. HF-recovered and all plan-construction/gate
    /// rejections are "opportunity gone", not errors.
    pub fn counts_as_error(&self) -> bool {
        matches!(self, RejectionReason::ContractRevert { .. })
    }

    /// The compact code written into the attempt log's `reason` column.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::ChainDisabled => "chain-disabled",
            RejectionReason::ProtocolUnresolved => "protocol-unresolved",
            RejectionReason::Denylisted(_) => "denylisted",
            RejectionReason::ZeroExposure => "zero-exposure",
            RejectionReason::MarketDisabled => "market-disabled",
            RejectionReason::SequencerDown(_) => "sequencer-down",
            RejectionReason::Throttled => "throttled",
            RejectionReason::PriceVolatility => "price-volatility-rejected",
            RejectionReason::GapExceeded { .. } => "gap-exceeded",
            RejectionReason::HealthFactorAboveMax => "hf-above-max",
            RejectionReason::HealthFactorMissing => "hf-missing",
            RejectionReason::IncentiveTooLow { .. } => "incentive-too-low",
            RejectionReason::OfferExpired => "offer-expired",
            RejectionReason::CloseFactorNonpositive => "close-factor-nonpositive",
            RejectionReason::CloseFactorOutOfRange => "close-factor-out-of-range",
            RejectionReason::PlanNull => "plan-null",
            RejectionReason::NetBelowMin => "net-below-min",
            RejectionReason::PnlMultBelowMin => "pnl-mult-below-min",
            RejectionReason::GasCostTooHigh => "gas-cost-too-high",
            RejectionReason::MinProfitZero => "min-profit-zero",
            RejectionReason::NetBpsBelowFloor { .. } => "net-bps-below-floor",
            RejectionReason::ContractRevert { .. } => "contract-revert",
            RejectionReason::HfRecovered => "hf-recovered",
            RejectionReason::MissingWalletKey => "missing-wallet-key",
            RejectionReason::MissingLiquidator => "missing-liquidator",
            RejectionReason::MissingExecutor => "missing-executor",
            RejectionReason::NoRoute => "no-route",
            RejectionReason::OracleUnavailable(_) => "oracle-unavailable",
        }
    }
}

pub enum ScoreOutcome {
    Plan(Plan),
    Rejected(RejectionReason),
}

impl ScoreOutcome {
    pub fn is_plan(&self) -> bool {
        matches!(self, ScoreOutcome::Plan(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contract_revert_counts_as_error() {
        assert!(RejectionReason::ContractRevert {
            selector: Some("0xdeadbeef".into()),
            name: Some("Whatever".into()),
            detail: "revert".into()
        }
        .counts_as_error());
        assert!(!RejectionReason::HfRecovered.counts_as_error());
        assert!(!RejectionReason::Throttled.counts_as_error());
    }

    #[test]
    fn codes_are_stable_identifiers() {
        assert_eq!(RejectionReason::ZeroExposure.code(), "zero-exposure");
        assert_eq!(RejectionReason::HfRecovered.code(), "hf-recovered");
    }
}
