//! Bundler3 multicall construction for pre-liquidation execution: quotes a
//! swap from an aggregator (Odos primary, 1inch fallback) and encodes the
//! callback calldata the executor contract expects bit-exact, since
//! Bundler3 re-enters the liquidator contract mid-multicall.

use anyhow::{Context, Result};
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub aggregator: &'static str,
    pub to: Address,
    pub calldata: Bytes,
    pub amount_out: U256,
}

#[derive(Debug, Deserialize)]
struct OdosQuoteResponse {
    #[serde(rename = "outAmounts")]
    out_amounts: Vec<String>,
    transaction: Option<OdosTransaction>,
}

#[derive(Debug, Deserialize)]
struct OdosTransaction {
    to: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct OneInchQuoteResponse {
    #[serde(rename = "toAmount")]
    to_amount: String,
    tx: OneInchTx,
}

#[derive(Debug, Deserialize)]
struct OneInchTx {
    to: String,
    data: String,
}

pub struct AggregatorClient {
    http: Client,
    odos_base: String,
    oneinch_base: String,
    odos_key: Option<String>,
    oneinch_key: Option<String>,
}

impl AggregatorClient {
    pub fn new(odos_base: String, oneinch_base: String) -> Self {
        Self {
            http: Client::builder().timeout(Duration::from_millis(1500)).build().expect("reqwest client builds"),
            odos_base,
            oneinch_base,
            odos_key: std::env::var("ODOS_API_KEY").ok().filter(|s| !s.is_empty()),
            oneinch_key: std::env::var("ONEINCH_API_KEY").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Tries Odos first; falls back to 1inch if Odos errors, returns no
    /// route, or has no key configured, matching the spec's
    /// "primary/fallback aggregator" design (spec §6: a missing bearer key
    /// makes that branch return "no quote" rather than erroring the whole
    /// lookup).
    pub async fn quote(
        &self,
        chain_id: u64,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<SwapQuote> {
        match self.quote_odos(chain_id, token_in, token_out, amount_in).await {
            Ok(quote) => Ok(quote),
            Err(e) => {
                warn!(error = %e, "odos quote unavailable, falling back to 1inch");
                self.quote_oneinch(chain_id, token_in, token_out, amount_in).await
            }
        }
    }

    async fn quote_odos(&self, chain_id: u64, token_in: Address, token_out: Address, amount_in: U256) -> Result<SwapQuote> {
        let key = self.odos_key.as_ref().context("no odos api key configured")?;
        let body = json!({
            "chainId": chain_id,
            "inputTokens": [{"tokenAddress": format!("{:?}", token_in), "amount": amount_in.to_string()}],
            "outputTokens": [{"tokenAddress": format!("{:?}", token_out), "proportion": 1}],
        });
        let resp: OdosQuoteResponse = self
            .http
            .post(format!("{}/sor/quote/v2", self.odos_base))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        let amount_out = resp.out_amounts.first().context("odos quote missing outAmounts")?.parse::<u128>()?;
        let tx = resp.transaction.context("odos quote missing transaction")?;
        Ok(SwapQuote {
            aggregator: "odos",
            to: tx.to.parse()?,
            calldata: tx.data.parse()?,
            amount_out: U256::from(amount_out),
        })
    }

    async fn quote_oneinch(&self, chain_id: u64, token_in: Address, token_out: Address, amount_in: U256) -> Result<SwapQuote> {
        let key = self.oneinch_key.as_ref().context("no 1inch api key configured")?;
        let url = format!(
            "{}/swap/v6.0/{}/swap?src={:?}&dst={:?}&amount={}&from={:?}&slippage=1",
            self.oneinch_base, chain_id, token_in, token_out, amount_in, Address::zero()
        );
        let resp: OneInchQuoteResponse = self.http.get(url).bearer_auth(key).send().await?.json().await?;
        Ok(SwapQuote {
            aggregator: "1inch",
            to: resp.tx.to.parse()?,
            calldata: resp.tx.data.parse()?,
            amount_out: U256::from(resp.to_amount.parse::<u128>()?),
        })
    }
}

/// Bit-exact callback ABI the offer contract's `preLiquidate` re-enters the
/// liquidator through (spec §6):
/// `abi.encode(debtAsset, minRepayAssets, router, aggregatorCalldata,
/// profitToken, beneficiary, collateralAsset, collateralSeized,
/// wrappedNative)`. Field order and types must match exactly — this is
/// decoded by the deployed contract, not by this binary.
#[allow(clippy::too_many_arguments)]
pub fn encode_preliq_callback(
    debt_asset: Address,
    min_repay_assets: U256,
    router: Address,
    aggregator_calldata: &Bytes,
    profit_token: Address,
    beneficiary: Address,
    collateral_asset: Address,
    collateral_seized: U256,
    wrapped_native: Address,
) -> Bytes {
    let tokens = vec![
        Token::Address(debt_asset),
        Token::Uint(min_repay_assets),
        Token::Address(router),
        Token::Bytes(aggregator_calldata.to_vec()),
        Token::Address(profit_token),
        Token::Address(beneficiary),
        Token::Address(collateral_asset),
        Token::Uint(collateral_seized),
        Token::Address(wrapped_native),
    ];
    Bytes::from(encode(&tokens))
}

/// One entry of the Bundler3 `multicall((address,bytes,uint256,bool,bytes32)[])`
/// call: `(to, data, value, skipRevert, callbackHash)`. The pre-liquidation
/// path always sends a single-entry multicall with `value = 0`,
/// `skipRevert = false`, and a zero callback hash (spec §4.3).
pub struct MulticallEntry {
    pub to: Address,
    pub data: Bytes,
}

impl MulticallEntry {
    pub fn into_token(self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.to),
            Token::Bytes(self.data.to_vec()),
            Token::Uint(U256::zero()),
            Token::Bool(false),
            Token::FixedBytes(vec![0u8; 32]),
        ])
    }
}

/// Builds the `preLiquidate(borrower, collateralSeized, repayShares,
/// callbackData)` calldata targeted at the offer contract, then wraps it in
/// the single-entry Bundler3 multicall tuple the liquidator contract's
/// `multicall` entrypoint expects.
pub fn build_preliquidate_multicall(
    offer_address: Address,
    borrower: Address,
    collateral_seized: U256,
    repay_shares: U256,
    callback_data: Bytes,
) -> Bytes {
    let selector = ethers::utils::keccak256(
        b"preLiquidate(address,uint256,uint256,bytes)",
    )[..4]
        .to_vec();
    let mut calldata = selector;
    calldata.extend(encode(&[
        Token::Address(borrower),
        Token::Uint(collateral_seized),
        Token::Uint(repay_shares),
        Token::Bytes(callback_data.to_vec()),
    ]));

    let entry = MulticallEntry {
        to: offer_address,
        data: Bytes::from(calldata),
    };
    Bytes::from(encode(&[Token::Array(vec![entry.into_token()])]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quote() -> SwapQuote {
        SwapQuote {
            aggregator: "odos",
            to: Address::repeat_byte(1),
            calldata: Bytes::from(vec![0xde, 0xad]),
            amount_out: U256::from(100u64),
        }
    }

    #[test]
    fn callback_encoding_is_deterministic() {
        let quote = sample_quote();
        let encode_it = || {
            encode_preliq_callback(
                Address::repeat_byte(2),
                U256::from(1_000u64),
                quote.to,
                &quote.calldata,
                Address::repeat_byte(3),
                Address::repeat_byte(4),
                Address::repeat_byte(5),
                U256::from(2_000u64),
                Address::repeat_byte(6),
            )
        };
        assert_eq!(encode_it(), encode_it());
    }

    #[test]
    fn callback_encoding_is_nine_abi_words_plus_dynamic_bytes() {
        let quote = sample_quote();
        let encoded = encode_preliq_callback(
            Address::repeat_byte(2),
            U256::from(1_000u64),
            quote.to,
            &quote.calldata,
            Address::repeat_byte(3),
            Address::repeat_byte(4),
            Address::repeat_byte(5),
            U256::from(2_000u64),
            Address::repeat_byte(6),
        );
        // 9 head words (one of them a dynamic-bytes offset) plus the bytes
        // tail (length word + one padded 32-byte chunk for a 2-byte payload).
        assert_eq!(encoded.len(), 9 * 32 + 32 + 32);
    }

    #[test]
    fn multicall_wraps_preliquidate_call_in_a_single_entry_array() {
        let callback = Bytes::from(vec![0xaa; 4]);
        let wrapped = build_preliquidate_multicall(
            Address::repeat_byte(7),
            Address::repeat_byte(8),
            U256::from(500u64),
            U256::from(10u64),
            callback,
        );
        assert!(!wrapped.is_empty());
    }

    #[tokio::test]
    async fn quote_fails_fast_without_any_api_keys_configured() {
        std::env::remove_var("ODOS_API_KEY");
        std::env::remove_var("ONEINCH_API_KEY");
        let client = AggregatorClient::new("http://localhost:1".into(), "http://localhost:1".into());
        let result = client
            .quote(1, Address::repeat_byte(1), Address::repeat_byte(2), U256::from(1u64))
            .await;
        assert!(result.is_err());
    }
}
