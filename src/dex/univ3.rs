//! UniswapV3 quoting via the on-chain `QuoterV2` (a static call, not a
//! simulation — cheap enough to run per candidate) plus the bit-exact path
//! codec used for both quoting and the final swap calldata.

pub use crate::utils::{decode_v3_path, encode_v3_path};
use ethers::{
    contract::abigen,
    providers::{Http, Provider},
    types::{Address, U256},
};
use std::sync::Arc;

abigen!(
    QuoterV2,
    r#"[
        function quoteExactInputSingle((address tokenIn, address tokenOut, uint256 amountIn, uint24 fee, uint160 sqrtPriceLimitX96) params) external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate)
        function quoteExactInput(bytes path, uint256 amountIn) external returns (uint256 amountOut, uint160[] sqrtPriceX96AfterList, uint32[] initializedTicksCrossedList, uint256 gasEstimate)
    ]"#
);

pub const COMMON_FEE_TIERS: [u32; 4] = [100, 500, 3_000, 10_000];

pub async fn quote_single(
    provider: Arc<Provider<Http>>,
    quoter: Address,
    token_in: Address,
    token_out: Address,
    fee: u32,
    amount_in: U256,
) -> anyhow::Result<U256> {
    let contract = QuoterV2::new(quoter, provider);
    let params = QuoteExactInputSingleParams {
        token_in,
        token_out,
        amount_in,
        fee,
        sqrt_price_limit_x96: U256::zero().into(),
    };
    let (amount_out, ..) = contract.quote_exact_input_single(params).call().await?;
    Ok(amount_out)
}

pub async fn quote_multi(
    provider: Arc<Provider<Http>>,
    quoter: Address,
    tokens: &[Address],
    fees: &[u32],
    amount_in: U256,
) -> anyhow::Result<U256> {
    let path = encode_v3_path(tokens, fees);
    let contract = QuoterV2::new(quoter, provider);
    let (amount_out, ..) = contract.quote_exact_input(path.to_vec().into(), amount_in).call().await?;
    Ok(amount_out)
}

/// Tries the single-hop fee tiers for a pair; callers fall back to
/// `quote_multi` through a preferred stable hop when every direct tier
/// fails (spec §4.4's DEX-quoted pricing fallback).
pub async fn best_single_hop(
    provider: Arc<Provider<Http>>,
    quoter: Address,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
) -> Option<(u32, U256)> {
    let mut best: Option<(u32, U256)> = None;
    for fee in COMMON_FEE_TIERS {
        if let Ok(out) = quote_single(provider.clone(), quoter, token_in, token_out, fee, amount_in).await {
            if best.as_ref().map(|(_, b)| out > *b).unwrap_or(true) {
                best = Some((fee, out));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_fee_tiers_are_sorted_ascending() {
        let mut sorted = COMMON_FEE_TIERS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, COMMON_FEE_TIERS.to_vec());
    }
}
