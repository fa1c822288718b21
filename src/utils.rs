//! Formatting helpers, UniswapV3 path encoding, and CREATE2 address
//! derivation (used to locate a borrower's pre-liquidation offer contract
//! without an indexer round-trip).

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

pub fn format_token_amount(amount: U256, decimals: u8) -> String {
    let divisor = U256::from(10u128.pow(decimals as u32));
    let whole = amount / divisor;
    let fraction = amount % divisor;

    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction_str = format!("{:0>width$}", fraction, width = decimals as usize);
    let trimmed = fraction_str.trim_end_matches('0');
    if trimmed.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, trimmed)
    }
}

pub fn wei_to_ether(wei: U256) -> f64 {
    wei.as_u128() as f64 / 1e18
}

pub fn gwei_to_wei(gwei: f64) -> U256 {
    U256::from((gwei * 1e9) as u128)
}

/// Bit-exact UniswapV3 multi-hop path encoding: `token0 | fee0(3 bytes) |
/// token1 | fee1(3 bytes) | token2 | ...`. `tokens.len()` must be
/// `fees.len() + 1`; callers validate this before building a `RouteOption`.
pub fn encode_v3_path(tokens: &[Address], fees: &[u32]) -> Bytes {
    debug_assert_eq!(tokens.len(), fees.len() + 1);
    let mut out = Vec::with_capacity(tokens.len() * 20 + fees.len() * 3);
    for (i, token) in tokens.iter().enumerate() {
        out.extend_from_slice(token.as_bytes());
        if i < fees.len() {
            let fee = fees[i];
            out.push((fee >> 16) as u8);
            out.push((fee >> 8) as u8);
            out.push(fee as u8);
        }
    }
    Bytes::from(out)
}

pub fn decode_v3_path(path: &Bytes) -> (Vec<Address>, Vec<u32>) {
    let bytes = path.as_ref();
    let mut tokens = Vec::new();
    let mut fees = Vec::new();
    let mut i = 0usize;
    while i + 20 <= bytes.len() {
        tokens.push(Address::from_slice(&bytes[i..i + 20]));
        i += 20;
        if i + 3 <= bytes.len() {
            let fee = ((bytes[i] as u32) << 16) | ((bytes[i + 1] as u32) << 8) | bytes[i + 2] as u32;
            fees.push(fee);
            i += 3;
        }
    }
    (tokens, fees)
}

/// Standard CREATE2 address derivation: `keccak256(0xff ++ deployer ++ salt
/// ++ keccak256(init_code))[12..]`.
pub fn create2_address(deployer: Address, salt: H256, init_code_hash: H256) -> Address {
    let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
    buf.push(0xffu8);
    buf.extend_from_slice(deployer.as_bytes());
    buf.extend_from_slice(salt.as_bytes());
    buf.extend_from_slice(init_code_hash.as_bytes());
    let hash = keccak256(&buf);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_token_amount_trims_trailing_zeros() {
        assert_eq!(format_token_amount(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_token_amount(U256::from(1_000_000u64), 6), "1");
        assert_eq!(format_token_amount(U256::zero(), 6), "0");
    }

    #[test]
    fn v3_path_round_trips() {
        let tokens = vec![Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3)];
        let fees = vec![500u32, 3000u32];
        let encoded = encode_v3_path(&tokens, &fees);
        let (decoded_tokens, decoded_fees) = decode_v3_path(&encoded);
        assert_eq!(decoded_tokens, tokens);
        assert_eq!(decoded_fees, fees);
    }

    #[test]
    fn create2_is_deterministic() {
        let deployer = Address::repeat_byte(0xAA);
        let salt = H256::repeat_byte(0x01);
        let init_hash = H256::repeat_byte(0x02);
        let a = create2_address(deployer, salt, init_hash);
        let b = create2_address(deployer, salt, init_hash);
        assert_eq!(a, b);
    }
}
