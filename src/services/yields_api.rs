use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::AppError;

/// One pool row from the public yields aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct YieldPool {
    pub chain: String,
    pub project: String,
    pub symbol: String,
    #[serde(rename = "tvlUsd")]
    pub tvl_usd: f64,
    #[serde(rename = "apyBase")]
    pub apy_base: Option<f64>,
    #[serde(rename = "apyReward")]
    pub apy_reward: Option<f64>,
    pub apy: Option<f64>,
    pub pool: String,
}

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    data: Vec<YieldPool>,
}

struct CachedPools {
    pools: Vec<YieldPool>,
    fetched_at: Instant,
}

/// Client for a public yields aggregator (DefiLlama-style `/pools`).
///
/// Used to split incentive/reward APY out of blended rates. One full-list
/// fetch feeds every adapter, held briefly to avoid hammering the API when
/// several adapters refresh in the same aggregation pass.
pub struct YieldsApiClient {
    http_client: Client,
    base_url: String,
    chain: String,
    cached: RwLock<Option<CachedPools>>,
}

impl YieldsApiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    const HOLD_WINDOW: Duration = Duration::from_secs(60);

    pub fn new(base_url: String, chain: impl Into<String>) -> Result<Self, AppError> {
        url::Url::parse(&base_url)
            .map_err(|e| AppError::ConfigError(format!("Bad yields API URL: {}", e)))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent("lending-aggregator/1.0")
            .build()
            .map_err(|e| AppError::ExternalApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            chain: chain.into(),
            cached: RwLock::new(None),
        })
    }

    /// Reward APY for one (project, symbol) pair, already clamped to the
    /// pool's reported value. Returns 0 when the aggregator has no row —
    /// a missing row means "no incentives", not an error.
    pub async fn reward_apy(&self, project: &str, symbol: &str) -> f64 {
        match self.pools().await {
            Ok(pools) => pools
                .iter()
                .find(|p| {
                    p.project.eq_ignore_ascii_case(project)
                        && p.symbol.eq_ignore_ascii_case(symbol)
                })
                .and_then(|p| p.apy_reward)
                .unwrap_or(0.0),
            Err(e) => {
                debug!(project, symbol, error = %e, "Yields API unavailable, reporting zero reward APY");
                0.0
            }
        }
    }

    /// All pools for the configured chain.
    pub async fn pools(&self) -> Result<Vec<YieldPool>, AppError> {
        {
            let cached = self.cached.read().await;
            if let Some(held) = cached.as_ref() {
                if held.fetched_at.elapsed() < Self::HOLD_WINDOW {
                    return Ok(held.pools.clone());
                }
            }
        }

        let pools = self.fetch_pools().await?;

        {
            let mut cached = self.cached.write().await;
            *cached = Some(CachedPools {
                pools: pools.clone(),
                fetched_at: Instant::now(),
            });
        }

        Ok(pools)
    }

    async fn fetch_pools(&self) -> Result<Vec<YieldPool>, AppError> {
        let url = format!("{}/pools", self.base_url);

        let response = timeout(Self::REQUEST_TIMEOUT, self.http_client.get(&url).send())
            .await
            .map_err(|_| AppError::ExternalApiError("Yields API request timeout".to_string()))?
            .map_err(|e| AppError::ExternalApiError(format!("Yields API request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Yields API HTTP error: {}",
                response.status()
            )));
        }

        let body: PoolsResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Yields API JSON parse error: {}", e)))?;

        let mut pools = body.data;
        pools.retain(|p| p.chain.eq_ignore_ascii_case(&self.chain) && p.tvl_usd > 0.0);

        info!(chain = %self.chain, pool_count = pools.len(), "Fetched yields aggregator pools");

        Ok(pools)
    }
}
