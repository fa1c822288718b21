//! Per-chain orchestration: wires every candidate producer into the scoring
//! pipeline and every scored plan into the executor, owning the caches,
//! throttle handle, nonce lock, and watcher tasks for one chain. One
//! `ChainAgent` runs per configured chain; chains never share a fan-in
//! channel, a throttle window, or a circuit breaker.

use crate::attempt_log::{AttemptLog, AttemptRecord, AttemptStatus};
use crate::cache::{OracleCache, SequencerCache};
use crate::chain::ChainDescriptor;
use crate::config::Tunables;
use crate::executor::Executor;
use crate::gas::GasEstimator;
use crate::ingestion::morpho::{MorphoGraphSource, MorphoSource};
use crate::ingestion::predictive::PredictiveScanner;
use crate::ingestion::retry_queue::RetryQueue;
use crate::ingestion::subgraph::SubgraphSource;
use crate::ingestion::watchers::{self, RefetchRequest};
use crate::ingestion::IngestionFanIn;
use crate::metrics::Metrics;
use crate::models::{Candidate, RejectionReason, ScoreOutcome};
use crate::providers::ChainProviderPool;
use crate::scorer::adaptive::AdaptiveThresholdsClient;
use crate::scorer::precommit::PrecommitPredictor;
use crate::scorer::{self, ScoringContext};
use crate::session::SessionState;
use crate::throttle::Throttle;
use ethers::providers::{Provider, Ws};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// How close a rejected-for-HF-above-max candidate's health factor must be
/// to the cap before it earns a retry rather than waiting for the next
/// natural poll. Keeps the retry queue from filling with borrowers nowhere
/// near liquidatable.
const RETRY_HF_MARGIN: f64 = 0.05;
/// Minimum health-factor movement between retries to consider a borrower's
/// position meaningfully changed.
const RETRY_HF_EPSILON: f64 = 0.002;
/// Cooldown between repeated fail-rate circuit breaker alerts for the same
/// chain, so a persistently tripped breaker logs once per window rather
/// than once per rejected candidate.
const BREAKER_ALERT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

pub struct ChainAgent {
    chain: ChainDescriptor,
    tunables: Tunables,
    provider_pool: Arc<ChainProviderPool>,
    oracle_cache: Arc<OracleCache>,
    sequencer_cache: Arc<SequencerCache>,
    throttle: Arc<Throttle>,
    adaptive: Arc<AdaptiveThresholdsClient>,
    precommit: Arc<PrecommitPredictor>,
    denylist: HashSet<String>,
    gas: Arc<GasEstimator>,
    executor: Arc<Executor>,
    attempt_log: Arc<AttemptLog>,
    metrics: Arc<Metrics>,
    session: Arc<SessionState>,
    retry_queue: Arc<RetryQueue>,
    predictive: Arc<PredictiveScanner>,
    scoring_registry: Arc<crate::chain::ChainRegistry>,
    live_executions: AtomicUsize,
    last_breaker_alert: AsyncMutex<Option<Instant>>,
    dry_run: bool,
}

impl ChainAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: ChainDescriptor,
        tunables: Tunables,
        provider_pool: Arc<ChainProviderPool>,
        oracle_cache: Arc<OracleCache>,
        sequencer_cache: Arc<SequencerCache>,
        throttle: Arc<Throttle>,
        adaptive: Arc<AdaptiveThresholdsClient>,
        gas: Arc<GasEstimator>,
        executor: Arc<Executor>,
        attempt_log: Arc<AttemptLog>,
        metrics: Arc<Metrics>,
        session: Arc<SessionState>,
        denylist: HashSet<String>,
        dry_run: bool,
    ) -> Self {
        let retry_queue = Arc::new(RetryQueue::new(
            Duration::from_millis(tunables.retry_base_delay_ms),
            Duration::from_millis(tunables.retry_max_delay_ms),
        ));
        let predictive = Arc::new(PredictiveScanner::new(Duration::from_secs(tunables.predictive_interval_secs)));
        let precommit = Arc::new(PrecommitPredictor::new(tunables.precommit_ewma_alpha));
        let scoring_registry = Arc::new({
            let mut registry = crate::chain::ChainRegistry::new();
            registry.insert(chain.clone());
            registry
        });

        Self {
            chain,
            tunables,
            provider_pool,
            oracle_cache,
            sequencer_cache,
            throttle,
            adaptive,
            precommit,
            denylist,
            gas,
            executor,
            attempt_log,
            metrics,
            session,
            retry_queue,
            predictive,
            scoring_registry,
            live_executions: AtomicUsize::new(0),
            last_breaker_alert: AsyncMutex::new(None),
            dry_run,
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    fn scoring_context(self: &Arc<Self>) -> ScoringContext {
        ScoringContext {
            registry: self.scoring_registry.clone(),
            oracle_cache: self.oracle_cache.clone(),
            sequencer_cache: self.sequencer_cache.clone(),
            throttle: self.throttle.clone(),
            adaptive: self.adaptive.clone(),
            precommit: self.precommit.clone(),
            denylist: self.denylist.clone(),
            min_net_usd: self.tunables.min_net_usd,
            min_pnl_multiple: self.tunables.min_pnl_multiple,
            max_gas_usd: self.tunables.max_gas_usd,
            min_incentive_bps: 0,
            max_attempts_per_borrower_hour: self.tunables.max_attempts_per_borrower_hour,
            throttle_bypass_hf_drop: self.tunables.throttle_bypass_hf_drop,
            close_factor_bps_default: self.tunables.close_factor_bps_default,
            liquidation_bonus_bps_default: self.tunables.liquidation_bonus_bps_default,
            floor_bps: self.tunables.floor_bps,
            max_repay_usd: self.tunables.max_repay_usd,
            precommit_lead_time: Duration::from_secs(self.tunables.predictive_interval_secs),
            precommit_hf_margin: self.tunables.precommit_hf_margin,
        }
    }

    /// Runs this chain's agent until its producer tasks exit or the process
    /// is shut down. Spawns one task per candidate source and drives the
    /// scoring/execution loop on the calling task.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let mut fan_in = IngestionFanIn::new(Duration::from_secs(self.tunables.dedupe_window_secs));
        let mut join_set = tokio::task::JoinSet::new();

        if !self.chain.subgraph_endpoints.is_empty() {
            join_set.spawn(self.clone().run_subgraph_poller(fan_in.sender()));
        }
        if self.chain.protocol == crate::models::ProtocolKey::MorphoBlue && !self.chain.subgraph_endpoints.is_empty() {
            join_set.spawn(self.clone().run_morpho_poller(fan_in.sender()));
        }
        if !self.chain.ws_urls.is_empty() {
            join_set.spawn(self.clone().run_realtime_watchers(fan_in.sender()));
        }

        let mut retry_tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                candidate = fan_in.recv() => {
                    let Some(candidate) = candidate else {
                        warn!(chain_id = self.chain.chain_id, "ingestion fan-in closed, stopping agent");
                        break;
                    };
                    self.handle_candidate(candidate, 0).await;
                }
                _ = retry_tick.tick() => {
                    for (candidate, attempt) in self.retry_queue.drain_ready() {
                        self.handle_candidate(candidate, attempt).await;
                    }
                }
                Some(finished) = join_set.join_next() => {
                    if let Err(e) = finished {
                        error!(chain_id = self.chain.chain_id, error = %e, "ingestion producer task panicked");
                    }
                }
            }

            if self.session.kill_switch.is_tripped() {
                warn!(chain_id = self.chain.chain_id, "kill switch tripped, agent shutting down cleanly");
                break;
            }
            if self.session.shutdown_requested() {
                warn!(chain_id = self.chain.chain_id, "session cap exceeded, agent shutting down cleanly");
                break;
            }
        }

        join_set.shutdown().await;
        Ok(())
    }

    async fn run_subgraph_poller(self: Arc<Self>, tx: mpsc::Sender<Candidate>) -> anyhow::Result<()> {
        let source = SubgraphSource::new(
            self.chain.chain_id,
            self.chain.protocol,
            self.chain.subgraph_endpoints.clone(),
            self.chain.subgraph_indexer_boost.clone(),
        );
        let mut interval = tokio::time::interval(Duration::from_secs(self.tunables.subgraph_poll_interval_secs));
        loop {
            interval.tick().await;
            let (hf_max, _) = self
                .adaptive
                .effective_limits(self.chain.chain_id, self.chain.risk.health_factor_max, self.chain.risk.gap_cap_bps, "", "")
                .await;
            for candidate in source.poll_once(hf_max).await {
                if tx.send(candidate).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn run_morpho_poller(self: Arc<Self>, tx: mpsc::Sender<Candidate>) -> anyhow::Result<()> {
        let Some(endpoint) = self.chain.subgraph_endpoints.first().cloned() else {
            return Ok(());
        };
        let graph = MorphoGraphSource::new(self.chain.chain_id, endpoint);
        let onchain = MorphoSource::new(self.chain.chain_id, self.chain.market_provider);
        let allowlist: HashSet<ethers::types::H256> = self.chain.morpho_markets.iter().copied().collect();

        let success_delay = Duration::from_secs(self.tunables.subgraph_poll_interval_secs);
        let max_delay = Duration::from_secs(self.tunables.subgraph_poll_interval_secs * 16);
        let mut delay = success_delay;

        loop {
            tokio::time::sleep(delay).await;
            let provider = self.provider_pool.current();
            let discovered = graph.poll_once().await;
            let relevant: Vec<_> = discovered
                .into_iter()
                .filter(|(market, _)| allowlist.is_empty() || allowlist.contains(&market.market_id))
                .collect();

            if relevant.is_empty() {
                delay = (delay * 2).min(max_delay);
                continue;
            }
            delay = success_delay;

            for (market, borrower) in relevant {
                let mut candidate = match onchain.read_position(provider.clone(), &market, borrower).await {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        warn!(chain_id = self.chain.chain_id, %borrower, error = %e, "morpho position read failed");
                        continue;
                    }
                };

                if let Some(offer_address) = onchain.derive_preliq_address(&self.chain, &market, borrower) {
                    match onchain.read_offer(provider.clone(), offer_address).await {
                        Ok(offer) => candidate.preliq_offer = offer,
                        Err(e) => debug!(chain_id = self.chain.chain_id, %borrower, error = %e, "pre-liquidation offer read failed"),
                    }
                }

                if tx.send(candidate).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn run_realtime_watchers(self: Arc<Self>, tx: mpsc::Sender<Candidate>) -> anyhow::Result<()> {
        let ws_url = self.chain.ws_urls.first().cloned();
        let Some(ws_url) = ws_url else { return Ok(()) };
        let ws = Provider::<Ws>::connect(&ws_url).await?;
        let ws = Arc::new(ws);

        let (refetch_tx, mut refetch_rx) = mpsc::channel::<RefetchRequest>(256);
        let pool_watch = {
            let ws = ws.clone();
            let chain_id = self.chain.chain_id;
            let pool = self.chain.market_provider;
            let refetch_tx = refetch_tx.clone();
            tokio::spawn(async move { watchers::watch_pool_events(ws, chain_id, pool, refetch_tx).await })
        };

        let oracle_watches: Vec<_> = self
            .chain
            .tokens
            .values()
            .filter_map(|t| t.oracle)
            .map(|oracle| {
                let ws = ws.clone();
                let predictor = self.precommit.clone();
                tokio::spawn(async move { watchers::watch_oracle_updates(ws, oracle, predictor).await })
            })
            .collect();

        let http_provider = self.provider_pool.current();
        while let Some(req) = refetch_rx.recv().await {
            match watchers::refresh_candidate(http_provider.clone(), self.chain.market_provider, &req, self.chain.protocol).await {
                Ok(candidate) => {
                    if tx.send(candidate).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(chain_id = self.chain.chain_id, borrower = ?req.borrower, error = %e, "on-chain refetch failed"),
            }
        }

        pool_watch.abort();
        for handle in oracle_watches {
            handle.abort();
        }
        Ok(())
    }

    async fn handle_candidate(self: &Arc<Self>, candidate: Candidate, attempt: u32) {
        self.session.kill_switch.poll();
        self.alert_if_breaker_tripped().await;

        let ctx = self.scoring_context();
        let provider = self.provider_pool.current();
        let now_unix = candidate.observed_at_unix.max(unix_now());
        let previous_hf = candidate.health_factor;

        match scorer::score(&ctx, provider, &self.gas, &candidate, now_unix).await {
            ScoreOutcome::Plan(plan) => {
                self.metrics.plans_ready.with_label_values(&[&self.chain.name]).inc();

                if self.dry_run {
                    self.log_attempt(&candidate, AttemptStatus::DryRun, "dry_run_mode", None, &plan_snapshot(&plan)).await;
                    return;
                }

                let live_count = self.live_executions.load(Ordering::Relaxed);
                self.live_executions.fetch_add(1, Ordering::Relaxed);
                let result = self.executor.submit(&self.chain, &plan, live_count).await;
                self.live_executions.fetch_sub(1, Ordering::Relaxed);

                match result {
                    Ok(crate::executor::SubmissionOutcome::Success) => {
                        self.metrics.plans_sent.with_label_values(&[&self.chain.name, "success"]).inc();
                        self.metrics.session_notional_usd.set(self.session.session_notional_usd());
                        self.log_attempt(&candidate, AttemptStatus::Sent, "submitted", None, &plan_snapshot(&plan)).await;
                    }
                    Ok(crate::executor::SubmissionOutcome::HealthFactorRecovered) => {
                        self.metrics.plans_sent.with_label_values(&[&self.chain.name, "hf_recovered"]).inc();
                        self.log_attempt(&candidate, AttemptStatus::PolicySkip, RejectionReason::HfRecovered.code(), None, &plan_snapshot(&plan)).await;
                    }
                    Ok(crate::executor::SubmissionOutcome::Failed) => {
                        self.metrics.plans_error.with_label_values(&[&self.chain.name]).inc();
                        self.log_attempt(&candidate, AttemptStatus::Error, "submission_failed_or_deferred", None, &plan_snapshot(&plan)).await;
                    }
                    Err(e) => {
                        self.metrics.plans_error.with_label_values(&[&self.chain.name]).inc();
                        error!(chain_id = self.chain.chain_id, error = %e, "plan submission errored");
                        self.log_attempt(&candidate, AttemptStatus::Error, &e.to_string(), None, &plan_snapshot(&plan)).await;
                    }
                }
            }
            ScoreOutcome::Rejected(reason) => {
                self.metrics.record_rejection(&self.chain.name, &reason);
                self.log_attempt(&candidate, rejection_status(&reason), reason.code(), None, &candidate_snapshot(&candidate)).await;
                self.maybe_retry(candidate, attempt, previous_hf, reason);
            }
        }
    }

    fn maybe_retry(&self, candidate: Candidate, attempt: u32, previous_hf: Option<f64>, reason: RejectionReason) {
        match reason {
            RejectionReason::HealthFactorAboveMax => {
                if let Some(hf) = candidate.health_factor {
                    if hf <= self.chain.risk.health_factor_max + RETRY_HF_MARGIN {
                        self.retry_queue.push_if_improved(candidate, attempt, previous_hf, RETRY_HF_EPSILON);
                    }
                }
            }
            RejectionReason::OracleUnavailable(_)
            | RejectionReason::SequencerDown(_)
            | RejectionReason::Throttled
            | RejectionReason::NoRoute => {
                self.retry_queue.push(candidate, attempt);
            }
            _ => {}
        }
    }

    async fn alert_if_breaker_tripped(&self) {
        if !self.executor.breaker_tripped(self.chain.chain_id, self.chain.liquidator) {
            return;
        }
        let mut last = self.last_breaker_alert.lock().await;
        let now = Instant::now();
        if last.map(|t| now.duration_since(t) >= BREAKER_ALERT_COOLDOWN).unwrap_or(true) {
            error!(chain_id = self.chain.chain_id, "fail-rate circuit breaker is tripped, executions are being skipped");
            *last = Some(now);
        }
    }

    async fn log_attempt(&self, candidate: &Candidate, status: AttemptStatus, reason: &str, tx_hash: Option<String>, snapshot: &serde_json::Value) {
        self.attempt_log
            .record(&AttemptRecord {
                chain_id: self.chain.chain_id,
                borrower: format!("{:?}", candidate.borrower),
                status,
                reason: reason.to_string(),
                tx_hash,
                snapshot: snapshot.clone(),
            })
            .await;
    }
}

fn rejection_status(reason: &RejectionReason) -> AttemptStatus {
    match reason {
        RejectionReason::GapExceeded { .. } => AttemptStatus::GapSkip,
        RejectionReason::Throttled => AttemptStatus::Throttled,
        RejectionReason::ContractRevert { .. } => AttemptStatus::Error,
        _ => AttemptStatus::PolicySkip,
    }
}

fn candidate_snapshot(candidate: &Candidate) -> serde_json::Value {
    serde_json::json!({
        "chain_id": candidate.chain_id,
        "borrower": format!("{:?}", candidate.borrower),
        "health_factor": candidate.health_factor,
        "protocol": candidate.protocol.to_string(),
        "source": candidate.source.to_string(),
    })
}

fn plan_snapshot(plan: &crate::models::Plan) -> serde_json::Value {
    serde_json::json!({
        "chain_id": plan.chain_id,
        "borrower": format!("{:?}", plan.borrower),
        "repay_usd": plan.repay_usd,
        "net_usd": plan.net_usd,
        "gas_usd": plan.gas_usd,
        "mode": format!("{:?}", plan.mode),
    })
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
