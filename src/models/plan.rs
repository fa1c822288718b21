use super::candidate::{MorphoMarket, PreLiquidationOffer, ProtocolKey};
use crate::chain::DexId;
use ethers::types::{Address, U256};

/// The swap venue shapes the executor contract understands. `fee` values are
/// basis points unless noted; `UniV3Multi` carries the already-validated
/// hop/fee arrays used to build the bit-exact encoded path (see
/// `crate::dex::univ3::encode_path`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOption {
    UniV3Single { fee: u32 },
    UniV3Multi { tokens: Vec<Address>, fees: Vec<u32> },
    UniV2 { factory: Address },
    SolidlyV2 { factory: Address, stable: bool },
}

#[derive(Debug, Clone)]
pub struct ChosenRoute {
    pub dex: DexId,
    pub router: Address,
    pub option: RouteOption,
    pub quoted_out: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Flash,
    Funds,
}

/// A fully-priced, gas-estimated intent to submit one liquidation
/// transaction. Exists only for the duration of a single scoring/execution
/// attempt — nothing about a `Plan` survives a process restart.
#[derive(Debug, Clone)]
pub struct Plan {
    pub protocol: ProtocolKey,
    pub chain_id: u64,
    pub borrower: Address,
    pub debt_token: Address,
    pub collateral_token: Address,
    pub repay_amount: U256,
    pub repay_usd: f64,
    pub seize_amount: U256,
    pub route: ChosenRoute,
    pub amount_out_min: U256,
    pub net_usd: f64,
    pub gas_usd: f64,
    pub min_profit: U256,
    pub mode: ExecutionMode,
    pub precommit: bool,
    pub morpho_market: Option<MorphoMarket>,
    pub repay_shares: Option<U256>,
    pub preliq: Option<PreLiquidationOffer>,
    pub deadline_unix: u64,
    /// Carried verbatim from the chosen route when it is `SolidlyV2` — the
    /// executor ABI wants it as a distinct field, not nested in the route.
    pub solidly_factory: Option<Address>,
}

impl Plan {
    pub fn est_net_bps(&self) -> i64 {
        if self.repay_usd <= 0.0 {
            return 0;
        }
        ((self.net_usd / self.repay_usd) * 10_000.0) as i64
    }

    pub fn pnl_per_gas(&self) -> f64 {
        if self.gas_usd <= 0.0 {
            return f64::INFINITY;
        }
        self.net_usd / self.gas_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_plan() -> Plan {
        Plan {
            protocol: ProtocolKey::AaveV3,
            chain_id: 42161,
            borrower: Address::repeat_byte(1),
            debt_token: Address::repeat_byte(2),
            collateral_token: Address::repeat_byte(3),
            repay_amount: U256::from(500_000_000u64),
            repay_usd: 500.0,
            seize_amount: U256::from(270_000_000_000_000_000u128),
            route: ChosenRoute {
                dex: DexId::UniswapV3,
                router: Address::repeat_byte(4),
                option: RouteOption::UniV3Single { fee: 500 },
                quoted_out: U256::from(270_000_000_000_000_000u128),
            },
            amount_out_min: U256::from(269_000_000_000_000_000u128),
            net_usd: 15.0,
            gas_usd: 3.0,
            min_profit: U256::from(1_500_000u64),
            mode: ExecutionMode::Flash,
            precommit: false,
            morpho_market: None,
            repay_shares: None,
            preliq: None,
            deadline_unix: 1_700_000_300,
            solidly_factory: None,
        }
    }

    #[test]
    fn est_net_bps_matches_manual_ratio() {
        let plan = base_plan();
        // 15 / 500 * 10_000 = 300 bps
        assert_eq!(plan.est_net_bps(), 300);
    }

    #[test]
    fn pnl_per_gas_is_ratio_of_net_to_gas() {
        let plan = base_plan();
        assert!((plan.pnl_per_gas() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn pnl_per_gas_is_infinite_for_zero_gas() {
        let mut plan = base_plan();
        plan.gas_usd = 0.0;
        assert!(plan.pnl_per_gas().is_infinite());
    }
}
