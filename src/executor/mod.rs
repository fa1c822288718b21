//! Submission: turns a scored `Plan` into a signed transaction, dispatches it
//! through a private relay when configured (falling back to the public
//! mempool), waits for a receipt, and classifies the outcome for the
//! circuit breaker and attempt log.

pub mod bundler3;
pub mod circuit_breaker;
pub mod nonce;

use crate::chain::ChainDescriptor;
use crate::executor::circuit_breaker::CircuitBreaker;
use crate::executor::nonce::NonceManager;
use crate::gas::{is_health_factor_recovered, revert_selector, GasEstimator};
use crate::models::{ExecutionMode, Plan};
use crate::providers::ChainProviderPool;
use crate::session::SessionState;
use anyhow::{Context, Result};
use ethers::{
    contract::abigen,
    middleware::SignerMiddleware,
    providers::Middleware,
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest, U256},
};
use ethers_flashbots::{BundleRequest, FlashbotsMiddleware};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

abigen!(
    LiquidatorExecutor,
    r#"[
        function execute(uint8 mode, address protocol, address marketOrPool, address borrower, address debtAsset, address collateralAsset, uint256 repayAmount, uint256 minCollateralOut, address swapRouter, bytes swapCalldata, uint256 deadline) external returns (uint256 profit)
        function multicall(tuple(address,bytes,uint256,bool,bytes32)[] calls) external payable
    ]"#
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Transaction mined and did not revert.
    Success,
    /// Transaction reverted with the "health factor recovered" selector —
    /// the position closed out from under us; not counted as a failure.
    HealthFactorRecovered,
    /// Transaction reverted for any other reason, or never landed.
    Failed,
}

pub struct Executor {
    provider: Arc<ChainProviderPool>,
    gas: Arc<GasEstimator>,
    nonces: Arc<NonceManager>,
    breaker: Arc<CircuitBreaker>,
    session: Arc<SessionState>,
    aggregator: bundler3::AggregatorClient,
    flashbots_relay_url: Option<String>,
    max_live_executions: usize,
    max_session_notional_usd: f64,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<ChainProviderPool>,
        gas: Arc<GasEstimator>,
        nonces: Arc<NonceManager>,
        breaker: Arc<CircuitBreaker>,
        session: Arc<SessionState>,
        aggregator: bundler3::AggregatorClient,
        flashbots_relay_url: Option<String>,
        max_live_executions: usize,
        max_session_notional_usd: f64,
    ) -> Self {
        Self {
            provider,
            gas,
            nonces,
            breaker,
            session,
            aggregator,
            flashbots_relay_url,
            max_live_executions,
            max_session_notional_usd,
        }
    }

    /// Submits `plan` for execution on `chain`, or returns without
    /// submitting if the session notional cap, the kill switch, or the
    /// per-executor circuit breaker says not to.
    pub async fn submit(&self, chain: &ChainDescriptor, plan: &Plan, live_count: usize) -> Result<SubmissionOutcome> {
        if self.session.kill_switch.is_tripped() {
            warn!(chain_id = chain.chain_id, "kill switch tripped, refusing to submit");
            return Ok(SubmissionOutcome::Failed);
        }
        if live_count >= self.max_live_executions {
            self.session.request_shutdown("max_live_executions exceeded");
            return Ok(SubmissionOutcome::Failed);
        }
        if self.breaker.is_tripped(chain.chain_id, chain.liquidator) {
            warn!(chain_id = chain.chain_id, "circuit breaker tripped for this executor, skipping submission");
            return Ok(SubmissionOutcome::Failed);
        }
        if self.session.would_exceed_cap(plan.repay_usd, self.max_session_notional_usd) {
            self.session.request_shutdown("max_session_notional_usd exceeded");
            return Ok(SubmissionOutcome::Failed);
        }

        let calldata = match self.build_calldata(chain, plan).await {
            Ok(calldata) => calldata,
            Err(e) => {
                warn!(chain_id = chain.chain_id, error = %e, "could not assemble calldata for plan, skipping submission");
                return Ok(SubmissionOutcome::Failed);
            }
        };
        let fresh_gas_usd = self
            .gas
            .total_cost_usd(chain, U256::from(450_000u64), chain.liquidator, &calldata)
            .await
            .unwrap_or(plan.gas_usd);
        if fresh_gas_usd > plan.gas_usd * 2.0 {
            warn!(
                chain_id = chain.chain_id,
                planned_gas_usd = plan.gas_usd,
                fresh_gas_usd,
                "gas repriced well above plan estimate since scoring, skipping stale plan"
            );
            return Ok(SubmissionOutcome::Failed);
        }

        let wallet = self.load_wallet(chain).await?;
        let lease = self.nonces.reserve(chain.chain_id, chain.liquidator).await;
        let locked = lease.acquire().await;

        let tx = self
            .build_transaction(chain, &wallet, locked.value, calldata)
            .await?;

        let outcome = match self.dispatch(chain, &wallet, tx.clone()).await {
            Ok(true) => {
                locked.commit();
                self.session.add_notional(plan.repay_usd);
                SubmissionOutcome::Success
            }
            Ok(false) => {
                locked.commit();
                self.classify_landed_revert(chain, &tx).await
            }
            Err(e) => {
                locked.release();
                error!(chain_id = chain.chain_id, error = %e, "submission failed before landing on chain");
                SubmissionOutcome::Failed
            }
        };

        let hf_recovered = matches!(outcome, SubmissionOutcome::HealthFactorRecovered);
        self.breaker.record(
            chain.chain_id,
            chain.liquidator,
            matches!(outcome, SubmissionOutcome::Success) || hf_recovered,
        );

        Ok(outcome)
    }

    async fn load_wallet(&self, chain: &ChainDescriptor) -> Result<LocalWallet> {
        let pk = env::var(&chain.executor_key_env)
            .with_context(|| format!("{} not set", chain.executor_key_env))?;
        let wallet: LocalWallet = pk
            .parse()
            .context("executor private key is not a valid secp256k1 key")?;
        Ok(wallet.with_chain_id(chain.chain_id))
    }

    async fn build_transaction(
        &self,
        chain: &ChainDescriptor,
        wallet: &LocalWallet,
        nonce: u64,
        calldata: Bytes,
    ) -> Result<Eip1559TransactionRequest> {
        let gas_price = self.provider.get_gas_price().await?;

        Ok(Eip1559TransactionRequest::new()
            .to(chain.liquidator)
            .data(calldata)
            .nonce(nonce)
            .chain_id(chain.chain_id)
            .max_fee_per_gas(gas_price * 2)
            .max_priority_fee_per_gas(gas_price / 10)
            .from(wallet.address()))
    }

    /// Sends through the configured Flashbots-compatible relay if one is set
    /// for this run, else falls back to the public mempool via the chain's
    /// provider pool. Returns `Ok(true)` if the receipt shows success,
    /// `Ok(false)` if it reverted (after classifying health-factor-recovered
    /// reverts as a non-failure outcome upstream of this return value).
    async fn dispatch(
        &self,
        chain: &ChainDescriptor,
        wallet: &LocalWallet,
        tx: Eip1559TransactionRequest,
    ) -> Result<bool> {
        let provider = self.provider.current();

        if let Some(relay_url) = &self.flashbots_relay_url {
            match self.dispatch_via_relay(chain, wallet, provider.clone(), relay_url, tx.clone()).await {
                Ok(landed) => Ok(landed),
                Err(e) => {
                    warn!(chain_id = chain.chain_id, error = %e, "relay submission failed, falling back to public mempool");
                    self.dispatch_public(chain, wallet, provider, tx).await
                }
            }
        } else {
            self.dispatch_public(chain, wallet, provider, tx).await
        }
    }

    /// Signs the transaction, wraps it as a single-transaction Flashbots
    /// bundle targeted at the next block, and submits it to the configured
    /// relay rather than the public mempool.
    async fn dispatch_via_relay(
        &self,
        chain: &ChainDescriptor,
        wallet: &LocalWallet,
        provider: Arc<ethers::providers::Provider<ethers::providers::Http>>,
        relay_url: &str,
        tx: Eip1559TransactionRequest,
    ) -> Result<bool> {
        let url = Url::parse(relay_url).context("invalid flashbots relay url")?;
        let bundle_signer = LocalWallet::new(&mut rand::thread_rng());
        let client = SignerMiddleware::new(
            FlashbotsMiddleware::new(provider.clone(), url, bundle_signer),
            wallet.clone(),
        );

        let typed: TypedTransaction = tx.into();
        let signature = client.signer().sign_transaction(&typed).await?;
        let raw_tx = typed.rlp_signed(&signature);

        let block = provider.get_block_number().await?;
        let bundle = BundleRequest::new()
            .push_transaction(raw_tx)
            .set_block(block + 1)
            .set_simulation_block(block)
            .set_simulation_timestamp(0);

        let tx_hash = typed.hash(&signature);
        let pending_bundle = client.inner().send_bundle(&bundle).await?;
        match pending_bundle.await {
            Ok(_) => self.wait_for_receipt(chain, tx_hash).await,
            Err(e) => {
                warn!(chain_id = chain.chain_id, error = %e, "bundle did not land in targeted block");
                Ok(false)
            }
        }
    }

    async fn dispatch_public(
        &self,
        chain: &ChainDescriptor,
        wallet: &LocalWallet,
        provider: Arc<ethers::providers::Provider<ethers::providers::Http>>,
        tx: Eip1559TransactionRequest,
    ) -> Result<bool> {
        let client = SignerMiddleware::new(provider, wallet.clone());
        let typed: TypedTransaction = tx.into();
        let pending = client.send_transaction(typed, None).await?;
        self.wait_for_receipt(chain, pending.tx_hash()).await
    }

    async fn wait_for_receipt(&self, chain: &ChainDescriptor, tx_hash: ethers::types::H256) -> Result<bool> {
        let provider = self.provider.current();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
        loop {
            if tokio::time::Instant::now() > deadline {
                warn!(chain_id = chain.chain_id, %tx_hash, "timed out waiting for receipt");
                return Ok(false);
            }
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
                    if !success {
                        info!(chain_id = chain.chain_id, %tx_hash, "transaction reverted on chain");
                    }
                    return Ok(success);
                }
                Ok(None) => tokio::time::sleep(Duration::from_secs(1)).await,
                Err(e) => {
                    warn!(chain_id = chain.chain_id, error = %e, "receipt poll failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Whether the per-(chain, executor) fail-rate breaker is currently
    /// tripped, for the agent's own alerting/halt decision.
    pub fn breaker_tripped(&self, chain_id: u64, executor: Address) -> bool {
        self.breaker.is_tripped(chain_id, executor)
    }

    /// Classifies a failed call's returndata: `HealthFactorRecovered` is not
    /// an execution error and does not feed the circuit breaker as a
    /// failure.
    pub fn classify_revert(&self, revert_data: &[u8]) -> SubmissionOutcome {
        match revert_selector(revert_data) {
            Some(selector) if is_health_factor_recovered(&selector) => SubmissionOutcome::HealthFactorRecovered,
            _ => SubmissionOutcome::Failed,
        }
    }

    /// A transaction that reverted on chain carries no returndata in its
    /// receipt; replay it as an `eth_call` against the same calldata to
    /// recover the revert reason and classify it.
    async fn classify_landed_revert(&self, chain: &ChainDescriptor, tx: &Eip1559TransactionRequest) -> SubmissionOutcome {
        let provider = self.provider.current();
        let typed: TypedTransaction = tx.clone().into();
        let Err(e) = provider.call(&typed, None).await else {
            return SubmissionOutcome::Failed;
        };
        // Revert data shows up embedded as a `0x`-prefixed hex blob somewhere
        // in the JSON-RPC error message text across client implementations;
        // pull the first one out rather than depending on a specific shape.
        let message = e.to_string();
        let revert_data = message
            .split("0x")
            .nth(1)
            .and_then(|rest| {
                let hex_str: String = rest.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
                hex::decode(hex_str).ok()
            })
            .unwrap_or_default();
        info!(chain_id = chain.chain_id, "classifying landed revert via eth_call replay");
        self.classify_revert(&revert_data)
    }
}

impl Executor {
    /// Builds the outer calldata for `chain.liquidator`. Pre-liquidation
    /// plans first fetch a real swap quote from the configured aggregator
    /// (Odos primary, 1inch fallback) to wrap in the Bundler3 callback;
    /// per spec §4.3 a plan with no profitable swap quote is rejected
    /// rather than submitted with empty swap calldata.
    async fn build_calldata(&self, chain: &ChainDescriptor, plan: &Plan) -> Result<Bytes> {
        if let Some(offer) = &plan.preliq {
            let repay_shares = plan.repay_shares.unwrap_or(plan.repay_amount);
            let swap_quote = self
                .aggregator
                .quote(chain.chain_id, plan.collateral_token, plan.debt_token, plan.seize_amount)
                .await
                .context("no profitable aggregator swap quote for pre-liquidation plan")?;
            if swap_quote.amount_out < plan.min_profit {
                anyhow::bail!(
                    "aggregator quote {} below min repay {}",
                    swap_quote.amount_out,
                    plan.min_profit
                );
            }
            let callback = bundler3::encode_preliq_callback(
                plan.debt_token,
                plan.min_profit,
                swap_quote.to,
                &swap_quote.calldata,
                plan.debt_token,
                chain.liquidator,
                plan.collateral_token,
                plan.seize_amount,
                chain.liquidator,
            );
            Ok(bundler3::build_preliquidate_multicall(
                offer.offer_address,
                plan.borrower,
                plan.seize_amount,
                repay_shares,
                callback,
            ))
        } else {
            let mode = match plan.mode {
                ExecutionMode::Flash => 0u8,
                ExecutionMode::Funds => 1u8,
            };
            let contract = LiquidatorExecutor::new(chain.liquidator, self.provider.current());
            let calldata = contract
                .execute(
                    mode,
                    chain.liquidator,
                    chain.market_provider,
                    plan.borrower,
                    plan.debt_token,
                    plan.collateral_token,
                    plan.repay_amount,
                    plan.amount_out_min,
                    plan.route.router,
                    Vec::new().into(),
                    U256::from(plan.deadline_unix),
                )
                .calldata()
                .expect("execute() ABI-encodes unconditionally");
            Ok(calldata)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChosenRoute, PreLiquidationOffer, ProtocolKey, RouteOption};
    use crate::chain::DexId;

    fn base_chain() -> ChainDescriptor {
        ChainDescriptor {
            chain_id: 1,
            name: "test".into(),
            rpc_url: "http://localhost".into(),
            ws_urls: vec![],
            liquidator: Address::repeat_byte(9),
            executor_key_env: "K".into(),
            tokens: Default::default(),
            routers: vec![],
            sequencer_feed: None,
            market_provider: Address::repeat_byte(8),
            risk: crate::chain::RiskOverrides { health_factor_max: 1.0, gap_cap_bps: 100 },
            preferred_stables: vec![],
            preliq_factory: None,
            preliq_init_code_hash: None,
            bundler3: None,
            l1_fee_oracle: None,
            protocol: crate::models::ProtocolKey::AaveV3,
            subgraph_endpoints: vec![],
            subgraph_indexer_boost: None,
            morpho_markets: vec![],
            uniswap_v3_quoter: None,
            market_policies: Default::default(),
        }
    }

    fn base_plan() -> Plan {
        Plan {
            protocol: ProtocolKey::AaveV3,
            chain_id: 1,
            borrower: Address::repeat_byte(1),
            debt_token: Address::repeat_byte(2),
            collateral_token: Address::repeat_byte(3),
            repay_amount: U256::from(1_000u64),
            repay_usd: 1_000.0,
            seize_amount: U256::from(500u64),
            route: ChosenRoute {
                dex: DexId::UniswapV3,
                router: Address::repeat_byte(4),
                option: RouteOption::UniV3Single { fee: 500 },
                quoted_out: U256::from(1_000u64),
            },
            amount_out_min: U256::from(990u64),
            net_usd: 10.0,
            gas_usd: 1.0,
            min_profit: U256::from(10u64),
            mode: ExecutionMode::Flash,
            precommit: false,
            morpho_market: None,
            repay_shares: None,
            preliq: None,
            deadline_unix: 1_700_000_300,
            solidly_factory: None,
        }
    }

    async fn test_executor() -> Executor {
        let provider = Arc::new(ChainProviderPool::new(1, &["http://localhost:1".to_string()]).await.unwrap());
        let gas = Arc::new(GasEstimator::new(provider.clone(), 3_000.0));
        Executor::new(
            provider,
            gas,
            Arc::new(NonceManager::new()),
            Arc::new(CircuitBreaker::new(20, 0.5)),
            Arc::new(SessionState::new(
                Arc::new(crate::killswitch::KillSwitch::new(None)),
                Arc::new(crate::scorer::adaptive::AdaptiveThresholdsClient::disabled()),
            )),
            bundler3::AggregatorClient::new("http://localhost:1".into(), "http://localhost:1".into()),
            None,
            3,
            250_000.0,
        )
    }

    #[tokio::test]
    async fn build_calldata_for_standard_plan_needs_no_aggregator_quote() {
        let executor = test_executor().await;
        let chain = base_chain();
        let standard = executor.build_calldata(&chain, &base_plan()).await;
        assert!(standard.is_ok());
    }

    #[tokio::test]
    async fn build_calldata_for_preliq_plan_requires_an_aggregator_quote() {
        let executor = test_executor().await;
        let chain = base_chain();
        let mut preliq_plan = base_plan();
        preliq_plan.preliq = Some(PreLiquidationOffer {
            offer_address: Address::repeat_byte(5),
            pre_lltv: U256::from(800_000u64),
            pre_lcf1: U256::from(100_000u64),
            pre_lcf2: U256::from(500_000u64),
            pre_lif1: U256::from(1_020_000u64),
            pre_lif2: U256::from(1_050_000u64),
            oracle: Address::repeat_byte(6),
            expiry: 1_700_000_300,
        });

        // No aggregator is reachable at this address, so the quote fails
        // and the pre-liq plan is rejected rather than submitted with an
        // empty swap calldata.
        let preliq = executor.build_calldata(&chain, &preliq_plan).await;
        assert!(preliq.is_err());
    }
}
