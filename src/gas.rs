//! Gas cost estimation and contract-revert classification.
//!
//! L2 chains that charge an L1 data fee (OP-stack, Arbitrum) need that fee
//! added to the L2 execution cost before a plan's gas figure means anything;
//! the two `L1FeeOracle` variants call the chain's own helper contract for
//! it rather than estimating from calldata length.

use crate::chain::{ChainDescriptor, L1FeeOracle};
use crate::providers::ChainProviderPool;
use anyhow::Result;
use ethers::{
    contract::abigen,
    types::{Address, Bytes, U256},
};
use std::sync::Arc;

abigen!(
    OpGasPriceOracle,
    r#"[
        function getL1Fee(bytes memory data) external view returns (uint256)
    ]"#
);

abigen!(
    ArbGasInfo,
    r#"[
        function gasEstimateL1Component(address to, bytes calldata data, bool contractCreation) external view returns (uint64 gasEstimateForL1, uint256 baseFee, uint256 l1BaseFeeEstimate)
    ]"#
);

/// The selector for Morpho's `HealthFactorNotBelowThreshold` revert — the
/// position recovered between candidate observation and execution. This is
/// never treated as an execution error; it does not count toward the
/// executor's fail-rate circuit breaker.
pub const HEALTH_FACTOR_RECOVERED_SELECTOR: &str = "0x930bb771";

pub struct GasEstimator {
    provider: Arc<ChainProviderPool>,
    eth_price_usd: f64,
}

impl GasEstimator {
    pub fn new(provider: Arc<ChainProviderPool>, eth_price_usd: f64) -> Self {
        Self {
            provider,
            eth_price_usd,
        }
    }

    pub fn set_eth_price(&mut self, price_usd: f64) {
        self.eth_price_usd = price_usd;
    }

    pub async fn l2_execution_cost_wei(&self, gas_limit: U256) -> Result<U256> {
        let gas_price = self.provider.get_gas_price().await?;
        Ok(gas_limit * gas_price)
    }

    /// Adds the L1 data-posting fee for a chain's L1 fee oracle, if any.
    /// `to`/`calldata` describe the transaction whose calldata is being
    /// priced; `contract_creation` is always false for liquidation calls.
    pub async fn l1_fee_wei(
        &self,
        chain: &ChainDescriptor,
        to: Address,
        calldata: &Bytes,
    ) -> Result<U256> {
        let Some(oracle) = chain.l1_fee_oracle else {
            return Ok(U256::zero());
        };
        let client = self.provider.current();
        match oracle {
            L1FeeOracle::OpStack(addr) => {
                let contract = OpGasPriceOracle::new(addr, client);
                let fee = contract.get_l1_fee(calldata.clone().0).call().await?;
                Ok(fee)
            }
            L1FeeOracle::Arbitrum(addr) => {
                let contract = ArbGasInfo::new(addr, client);
                let (gas_for_l1, base_fee, _l1_base_fee) = contract
                    .gas_estimate_l1_component(to, calldata.clone().0, false)
                    .call()
                    .await?;
                Ok(U256::from(gas_for_l1) * base_fee)
            }
        }
    }

    pub async fn total_cost_usd(
        &self,
        chain: &ChainDescriptor,
        gas_limit: U256,
        to: Address,
        calldata: &Bytes,
    ) -> Result<f64> {
        let l2 = self.l2_execution_cost_wei(gas_limit).await?;
        let l1 = self.l1_fee_wei(chain, to, calldata).await?;
        Ok(self.wei_to_usd(l2 + l1))
    }

    pub fn wei_to_usd(&self, wei: U256) -> f64 {
        let eth = wei.as_u128() as f64 / 1e18;
        eth * self.eth_price_usd
    }
}

/// Pulls the 4-byte selector off a revert's returndata, if present, for
/// comparison against known "not actually an error" reverts.
pub fn revert_selector(revert_data: &[u8]) -> Option<String> {
    if revert_data.len() < 4 {
        return None;
    }
    Some(format!("0x{}", hex::encode(&revert_data[..4])))
}

pub fn is_health_factor_recovered(selector: &str) -> bool {
    selector.eq_ignore_ascii_case(HEALTH_FACTOR_RECOVERED_SELECTOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_extraction_needs_four_bytes() {
        assert_eq!(revert_selector(&[0x93, 0x0b, 0xb7]), None);
        assert_eq!(
            revert_selector(&[0x93, 0x0b, 0xb7, 0x71, 0xAA]),
            Some("0x930bb771".to_string())
        );
    }

    #[test]
    fn hf_recovered_selector_matches_case_insensitively() {
        assert!(is_health_factor_recovered("0x930BB771"));
        assert!(!is_health_factor_recovered("0xdeadbeef"));
    }
}
