use anyhow::{Context, Result};
use dotenv::dotenv;
use liquidation_agent::agent::ChainAgent;
use liquidation_agent::attempt_log::AttemptLog;
use liquidation_agent::cache::{OracleCache, SequencerCache};
use liquidation_agent::config::AppConfig;
use liquidation_agent::executor::bundler3::AggregatorClient;
use liquidation_agent::executor::circuit_breaker::CircuitBreaker;
use liquidation_agent::executor::nonce::NonceManager;
use liquidation_agent::executor::Executor;
use liquidation_agent::gas::GasEstimator;
use liquidation_agent::killswitch::KillSwitch;
use liquidation_agent::metrics::Metrics;
use liquidation_agent::providers::ChainProviderPool;
use liquidation_agent::scorer::adaptive::AdaptiveThresholdsClient;
use liquidation_agent::session::SessionState;
use liquidation_agent::throttle::Throttle;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn load_denylist() -> HashSet<String> {
    std::env::var("ASSET_DENYLIST")
        .ok()
        .map(|raw| raw.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting liquidation agent");

    let config = AppConfig::from_env().context("loading configuration")?;
    if config.chains.is_empty() {
        anyhow::bail!("no chains configured; set CHAINS=<name,...> and the matching <NAME>_* variables");
    }
    if config.dry_run {
        warn!("dry run mode: candidates will be scored and logged but never submitted");
    }

    let kill_switch = Arc::new(KillSwitch::new(config.killswitch_file.clone()));
    let adaptive = Arc::new(AdaptiveThresholdsClient::new(config.adaptive_thresholds_url.clone()));
    let session = Arc::new(SessionState::new(kill_switch, adaptive.clone()));
    let throttle = Arc::new(Throttle::connect(config.redis_url.as_deref(), Duration::from_secs(config.tunables.throttle_window_secs)).await);
    let metrics = Arc::new(Metrics::new().context("registering prometheus metrics")?);
    let attempt_log = Arc::new(AttemptLog::connect(config.database_url.as_deref()).await);
    let denylist = load_denylist();

    let nonces = Arc::new(NonceManager::new());
    let breaker = Arc::new(CircuitBreaker::new(config.tunables.fail_rate_window, config.tunables.fail_rate_threshold));

    let mut agents = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let provider_pool = Arc::new(
            ChainProviderPool::new(chain.chain_id, std::slice::from_ref(&chain.rpc_url))
                .await
                .with_context(|| format!("connecting provider pool for chain {}", chain.name))?,
        );
        let gas = Arc::new(GasEstimator::new(provider_pool.clone(), config.eth_price_usd));
        let aggregator = AggregatorClient::new(config.odos_api_url.clone(), config.oneinch_api_url.clone());
        let executor = Arc::new(Executor::new(
            provider_pool.clone(),
            gas.clone(),
            nonces.clone(),
            breaker.clone(),
            session.clone(),
            aggregator,
            config.flashbots_relay_url.clone(),
            config.tunables.max_live_executions,
            config.tunables.max_session_notional_usd,
        ));

        let agent = Arc::new(ChainAgent::new(
            chain.clone(),
            config.tunables.clone(),
            provider_pool,
            Arc::new(OracleCache::new()),
            Arc::new(SequencerCache::new()),
            throttle.clone(),
            adaptive.clone(),
            gas,
            executor,
            attempt_log.clone(),
            metrics.clone(),
            session.clone(),
            denylist.clone(),
            config.dry_run,
        ));
        agents.push(agent);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for agent in agents {
        let name = agent.chain_name().to_string();
        tasks.spawn(async move {
            let result = agent.run().await;
            (name, result)
        });
    }

    while let Some(finished) = tasks.join_next().await {
        match finished {
            Ok((name, Ok(()))) => info!(chain = %name, "agent exited cleanly"),
            Ok((name, Err(e))) => error!(chain = %name, error = %e, "agent exited with an error"),
            Err(e) => error!(error = %e, "agent task panicked"),
        }
    }

    Ok(())
}
