//! organic-worker -- runs the organic scoring loop against HTTP miners.
//!
//! Organic entries are read from stdin, one JSON object per line:
//! `{"caller": "5F...", "payload": {...}, "signature": "..."}`.
//! Each miner receives the sample payload as a JSON POST body; a miner that
//! answers with a JSON body earns reward 1.0, anything else earns 0.0.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use organic_scoring::{
    JsonlDataset, OrganicEntry, OrganicScoring, MinerQuery, Responses, RewardGenerator, Rewards,
    Sample, ScoringConfig, StageError, TriggerMode, WeightSetter,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Organic scoring worker: organic traffic first, synthetic fallback otherwise.
#[derive(Parser, Debug)]
#[command(name = "organic-worker", version, about)]
struct Cli {
    /// Path to organic.toml config file.
    #[arg(long, env = "ORGANIC_CONFIG", default_value = "config/organic.toml")]
    config: PathBuf,

    /// JSON-lines synthetic dataset(s), comma-separated.
    #[arg(long, env = "ORGANIC_SYNTHETIC", value_delimiter = ',')]
    synthetic: Vec<PathBuf>,

    /// Miner endpoint URLs, comma-separated.
    #[arg(long, env = "ORGANIC_MINERS", value_delimiter = ',', required = true)]
    miners: Vec<String>,

    /// Seconds between step counter increments (steps mode only).
    #[arg(long, env = "ORGANIC_STEP_SECS", default_value_t = 12)]
    step_secs: u64,

    /// Per-miner request timeout in seconds.
    #[arg(long, env = "ORGANIC_QUERY_TIMEOUT", default_value_t = 30)]
    query_timeout: u64,
}

// ── Stages ──────────────────────────────────────────────────────────

struct HttpMinerQuery {
    client: reqwest::Client,
    miners: Vec<String>,
}

impl HttpMinerQuery {
    fn new(miners: Vec<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, miners })
    }

    async fn ask(&self, miner: &str, sample: &Sample) -> serde_json::Value {
        let response = match self.client.post(miner).json(&sample.payload).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(miner, error = %e, "miner unreachable");
                return serde_json::Value::Null;
            }
        };
        if !response.status().is_success() {
            warn!(miner, status = %response.status(), "miner returned error status");
            return serde_json::Value::Null;
        }
        match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(miner, error = %e, "miner response is not JSON");
                serde_json::Value::Null
            }
        }
    }
}

#[async_trait]
impl MinerQuery for HttpMinerQuery {
    async fn query(&self, sample: &Sample) -> Result<Responses, StageError> {
        let requests = self.miners.iter().map(|miner| async move {
            (miner.clone(), self.ask(miner, sample).await)
        });
        let responses: Responses = join_all(requests).await.into_iter().collect();
        debug!(
            sample_id = %sample.id,
            answered = responses.values().filter(|v| !v.is_null()).count(),
            queried = responses.len(),
            "miners queried"
        );
        Ok(responses)
    }
}

/// 1.0 for every miner that answered, 0.0 otherwise.
struct AvailabilityReward;

#[async_trait]
impl RewardGenerator for AvailabilityReward {
    async fn generate_rewards(
        &self,
        _sample: &Sample,
        responses: &Responses,
        _reference: Option<&serde_json::Value>,
    ) -> Result<Rewards, StageError> {
        let scores = responses
            .iter()
            .map(|(miner, body)| (miner.clone(), if body.is_null() { 0.0 } else { 1.0 }))
            .collect();
        Ok(Rewards::new(scores))
    }
}

/// Normalizes rewards into weights and logs them.
struct LoggingWeightSetter;

#[async_trait]
impl WeightSetter for LoggingWeightSetter {
    async fn apply(&self, rewards: &Rewards) -> Result<(), StageError> {
        let total: f64 = rewards.scores.values().sum();
        if total <= 0.0 {
            warn!(miners = rewards.scores.len(), "all rewards are zero, weights left unchanged");
            return Ok(());
        }
        for miner in rewards.miners() {
            let weight = rewards.scores[miner] / total;
            info!(miner, weight, "weight set");
        }
        Ok(())
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// Submit every stdin line as an organic entry until EOF.
async fn read_organic_entries(engine: Arc<OrganicScoring>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<OrganicEntry>(&line) {
            Ok(entry) => {
                let verdict = engine.submit(entry).await;
                debug!(accepted = verdict.is_accepted(), queue_size = engine.queue_size(), "organic entry submitted");
            }
            Err(e) => warn!(error = %e, "invalid organic entry"),
        }
    }
    info!("organic intake closed");
}

async fn advance_steps(engine: Arc<OrganicScoring>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        engine.increment_step();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?;
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for ctrl_c")?;
    }

    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ScoringConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    info!(path = %cli.config.display(), "loaded organic scoring config");

    let query = HttpMinerQuery::new(cli.miners.clone(), Duration::from_secs(cli.query_timeout))
        .context("failed to build miner HTTP client")?;

    let mut builder = OrganicScoring::builder(config)
        .query(Arc::new(query))
        .rewards(Arc::new(AvailabilityReward))
        .weights(Arc::new(LoggingWeightSetter));

    for path in &cli.synthetic {
        let dataset = JsonlDataset::from_file(path)
            .with_context(|| format!("failed to load synthetic dataset {}", path.display()))?;
        info!(path = %path.display(), samples = dataset.len(), "loaded synthetic dataset");
        builder = builder.synthetic(Arc::new(dataset));
    }

    let engine = Arc::new(builder.build()?);

    let intake = tokio::spawn(read_organic_entries(Arc::clone(&engine)));
    let stepper = (engine.config().trigger.mode == TriggerMode::Steps).then(|| {
        tokio::spawn(advance_steps(
            Arc::clone(&engine),
            Duration::from_secs(cli.step_secs.max(1)),
        ))
    });

    engine.start().await?;
    info!(miners = cli.miners.len(), "organic-worker running");

    shutdown_signal().await?;
    info!("shutdown signal received");

    intake.abort();
    if let Some(stepper) = stepper {
        stepper.abort();
    }
    engine.stop().await;

    let metrics = serde_json::to_string(&engine.metrics())?;
    info!(%metrics, "organic-worker exited cleanly");
    Ok(())
}
