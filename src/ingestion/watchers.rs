//! Realtime event watchers: subscribes to `Borrow`/`Repay`/`Supply`/
//! `Withdraw`/`LiquidationCall` events on the lending pool and
//! `AnswerUpdated` on price feeds, turning each into either a refetch
//! request (pool events) or an EWMA observation (oracle events).

use crate::models::{Candidate, CandidateSource, ProtocolKey, TokenPosition};
use crate::scorer::precommit::PrecommitPredictor;
use ethers::{
    contract::{abigen, EthEvent},
    providers::{Http, Middleware, Provider, StreamExt, Ws},
    types::{Address, U256},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

abigen!(
    LendingPoolEvents,
    r#"[
        event Borrow(address indexed reserve, address user, address indexed onBehalfOf, uint256 amount, uint8 interestRateMode, uint256 borrowRate, uint16 indexed referral)
        event Repay(address indexed reserve, address indexed user, address indexed repayer, uint256 amount)
        event Supply(address indexed reserve, address user, address indexed onBehalfOf, uint256 amount, uint16 indexed referral)
        event Withdraw(address indexed reserve, address indexed user, address indexed to, uint256 amount)
        event LiquidationCall(address indexed collateralAsset, address indexed debtAsset, address indexed user, uint256 debtToCover, uint256 liquidatedCollateralAmount, address liquidator, bool receiveAToken)
    ]"#
);

abigen!(
    LendingPoolView,
    r#"[
        function getUserAccountData(address user) external view returns (uint256 totalCollateralBase, uint256 totalDebtBase, uint256 availableBorrowsBase, uint256 currentLiquidationThreshold, uint256 ltv, uint256 healthFactor)
    ]"#
);

/// WAD scale (1e18) Aave-family `getUserAccountData` returns its health
/// factor in.
pub(crate) const HEALTH_FACTOR_WAD: f64 = 1e18;

/// Re-reads a borrower's on-chain account data for a pool-event-triggered
/// refetch, folding it into a fresh `Candidate` with a real health factor
/// rather than the zeroed placeholder the event alone carries.
pub async fn refresh_candidate(
    provider: Arc<Provider<Http>>,
    pool: Address,
    req: &RefetchRequest,
    protocol: ProtocolKey,
) -> anyhow::Result<Candidate> {
    let contract = LendingPoolView::new(pool, provider);
    let (total_collateral, total_debt, _, _, _, health_factor_wad) =
        contract.get_user_account_data(req.borrower).call().await?;

    let health_factor = if health_factor_wad > U256::from(u128::MAX) {
        None
    } else {
        Some(health_factor_wad.as_u128() as f64 / HEALTH_FACTOR_WAD)
    };

    Ok(Candidate {
        chain_id: req.chain_id,
        borrower: req.borrower,
        debt: TokenPosition { symbol: String::new(), address: req.reserve, decimals: 18, amount: total_debt },
        collateral: TokenPosition { symbol: String::new(), address: Address::zero(), decimals: 18, amount: total_collateral },
        health_factor,
        protocol,
        morpho: None,
        preliq_offer: None,
        source: CandidateSource::Realtime,
        observed_at_unix: 0,
    })
}

#[derive(Debug, Clone, EthEvent)]
#[ethevent(name = "AnswerUpdated")]
pub struct AnswerUpdated {
    #[ethevent(indexed)]
    pub current: ethers::types::I256,
    #[ethevent(indexed)]
    pub round_id: U256,
    pub updated_at: U256,
}

/// A borrower implicated by a pool event, to be refetched and scored as a
/// candidate rather than trusted verbatim (the event alone doesn't carry a
/// health factor).
#[derive(Debug, Clone)]
pub struct RefetchRequest {
    pub chain_id: u64,
    pub borrower: Address,
    pub reserve: Address,
}

pub async fn watch_pool_events(
    provider: Arc<Provider<Ws>>,
    chain_id: u64,
    pool: Address,
    tx: tokio::sync::mpsc::Sender<RefetchRequest>,
) -> anyhow::Result<()> {
    let contract = LendingPoolEvents::new(pool, provider);
    let events = contract.events();
    let mut stream = events.stream().await?;

    while let Some(event) = stream.next().await {
        match event {
            Ok(LendingPoolEventsEvents::BorrowFilter(e)) => {
                let _ = tx.send(RefetchRequest { chain_id, borrower: e.on_behalf_of, reserve: e.reserve }).await;
            }
            Ok(LendingPoolEventsEvents::RepayFilter(e)) => {
                let _ = tx.send(RefetchRequest { chain_id, borrower: e.user, reserve: e.reserve }).await;
            }
            Ok(LendingPoolEventsEvents::WithdrawFilter(e)) => {
                let _ = tx.send(RefetchRequest { chain_id, borrower: e.user, reserve: e.reserve }).await;
            }
            Ok(LendingPoolEventsEvents::LiquidationCallFilter(e)) => {
                debug!(chain_id, user = ?e.user, "observed a liquidation by another actor");
            }
            Ok(_) => {}
            Err(e) => warn!(chain_id, error = %e, "pool event stream error"),
        }
    }
    Ok(())
}

pub async fn watch_oracle_updates(
    provider: Arc<Provider<Ws>>,
    oracle: Address,
    predictor: Arc<PrecommitPredictor>,
) -> anyhow::Result<()> {
    let contract = AnswerUpdatedFilter::new(oracle, provider);
    let mut stream = contract.stream().await?;
    while let Some(event) = stream.next().await {
        match event {
            Ok(_update) => predictor.record_update(oracle, Instant::now()),
            Err(e) => warn!(%oracle, error = %e, "oracle event stream error"),
        }
    }
    Ok(())
}

/// Thin wrapper so `watch_oracle_updates` can build an event filter without
/// pulling in a full abigen! contract just for one event.
struct AnswerUpdatedFilter;
impl AnswerUpdatedFilter {
    fn new(address: Address, provider: Arc<Provider<Ws>>) -> ethers::contract::Event<Arc<Provider<Ws>>, Provider<Ws>, AnswerUpdated> {
        let contract = ethers::contract::Contract::new(address, ethers::abi::Abi::default(), provider.clone());
        contract.event::<AnswerUpdated>()
    }
}

pub fn refetch_to_pending_candidate(req: &RefetchRequest, protocol: ProtocolKey) -> Candidate {
    Candidate {
        chain_id: req.chain_id,
        borrower: req.borrower,
        debt: TokenPosition { symbol: String::new(), address: req.reserve, decimals: 18, amount: U256::zero() },
        collateral: TokenPosition { symbol: String::new(), address: Address::zero(), decimals: 18, amount: U256::zero() },
        health_factor: None,
        protocol,
        morpho: None,
        preliq_offer: None,
        source: CandidateSource::Realtime,
        observed_at_unix: 0,
    }
}
