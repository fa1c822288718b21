//! UniswapV2-family constant-product quoting (also used for Sushiswap,
//! which shares the same pair ABI and 30bps fee).

use ethers::{
    contract::abigen,
    providers::{Http, Provider},
    types::{Address, U256},
};
use std::sync::Arc;

abigen!(
    UniswapV2Pair,
    r#"[
        function token0() external view returns (address)
        function token1() external view returns (address)
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)
    ]"#
);

abigen!(
    UniswapV2Factory,
    r#"[
        function getPair(address tokenA, address tokenB) external view returns (address pair)
    ]"#
);

pub const FEE_BPS: u32 = 30;

pub fn amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256, fee_bps: u32) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::zero();
    }
    let fee_multiplier = U256::from(10_000 - fee_bps);
    let amount_in_with_fee = amount_in * fee_multiplier;
    let numerator = amount_in_with_fee * reserve_out;
    let denominator = reserve_in * U256::from(10_000) + amount_in_with_fee;
    if denominator.is_zero() {
        return U256::zero();
    }
    numerator / denominator
}

pub async fn quote(
    provider: Arc<Provider<Http>>,
    factory: Address,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
) -> anyhow::Result<U256> {
    let factory_contract = UniswapV2Factory::new(factory, provider.clone());
    let pair_addr = factory_contract.get_pair(token_in, token_out).call().await?;
    if pair_addr == Address::zero() {
        anyhow::bail!("no v2-style pair for {:?}/{:?}", token_in, token_out);
    }
    let pair = UniswapV2Pair::new(pair_addr, provider);
    let token0 = pair.token_0().call().await?;
    let (reserve0, reserve1, _) = pair.get_reserves().call().await?;
    let (reserve_in, reserve_out) = if token0 == token_in {
        (U256::from(reserve0), U256::from(reserve1))
    } else {
        (U256::from(reserve1), U256::from(reserve0))
    };
    Ok(amount_out(amount_in, reserve_in, reserve_out, FEE_BPS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_out_matches_constant_product_with_fee() {
        let amt = amount_out(U256::from(1_000u64), U256::from(100_000u64), U256::from(100_000u64), 30);
        assert_eq!(amt, U256::from(987u64));
    }

    #[test]
    fn zero_reserves_yield_zero_output() {
        assert_eq!(amount_out(U256::from(1u64), U256::zero(), U256::from(1u64), 30), U256::zero());
    }
}
