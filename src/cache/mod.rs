use std::time::{Duration, SystemTime, UNIX_EPOCH};

use moka::future::Cache;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::Protocol;

/// Cache categories with fixed time-to-live per data class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Pool/market data: slow-moving risk parameters and rates
    MarketData,
    /// Per-user position data
    PositionData,
    /// Token prices
    PriceData,
    /// Emergency data retained for outage fallback
    Fallback,
    /// Token metadata (symbol, decimals) that effectively never changes
    StaticMetadata,
}

impl CacheCategory {
    /// Logical freshness window for the category.
    pub fn ttl(&self) -> Duration {
        match self {
            CacheCategory::MarketData => Duration::from_secs(3 * 24 * 3600),
            CacheCategory::PositionData => Duration::from_secs(5 * 60),
            CacheCategory::PriceData => Duration::from_secs(3600),
            CacheCategory::Fallback => Duration::from_secs(7 * 24 * 3600),
            CacheCategory::StaticMetadata => Duration::from_secs(30 * 24 * 3600),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::MarketData => "market_data",
            CacheCategory::PositionData => "position_data",
            CacheCategory::PriceData => "price_data",
            CacheCategory::Fallback => "fallback",
            CacheCategory::StaticMetadata => "static_metadata",
        }
    }
}

/// Physical retention for both tiers. Entries stay resident past their
/// logical expiry so an upstream outage can still be served stale data.
const RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Where a cache payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Api,
    Onchain,
    /// Served stale after a failed refresh
    Fallback,
}

/// Immutable cache entry. Entries are replaced, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: u64,
    pub expires_at: u64,
    pub source: CacheSource,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, category: CacheCategory, source: CacheSource, now: u64) -> Self {
        Self {
            data,
            created_at: now,
            expires_at: now + category.ttl().as_secs(),
            source,
        }
    }

    /// Logical freshness at a given instant.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    /// Copy of this entry re-tagged as stale-fallback data.
    pub fn as_fallback(&self) -> Self
    where
        T: Clone,
    {
        Self {
            data: self.data.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            source: CacheSource::Fallback,
        }
    }
}

/// Structured cache key: `(category, chain_id, protocol?, asset?, user?)`.
/// Mainnet and test-network data can never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub category: CacheCategory,
    pub chain_id: u64,
    pub protocol: Option<Protocol>,
    pub asset: Option<String>,
    pub user: Option<String>,
}

impl CacheKey {
    pub fn new(category: CacheCategory, chain_id: u64) -> Self {
        Self {
            category,
            chain_id,
            protocol: None,
            asset: None,
            user: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn render(&self) -> String {
        let mut key = format!("{}:{}", self.category.as_str(), self.chain_id);
        if let Some(protocol) = self.protocol {
            key.push(':');
            key.push_str(protocol.as_str());
        }
        if let Some(asset) = &self.asset {
            key.push(':');
            key.push_str(&asset.to_lowercase());
        }
        if let Some(user) = &self.user {
            key.push(':');
            key.push_str(&user.to_lowercase());
        }
        key
    }
}

/// Two-tier cache: in-memory L1 (moka) plus optional Redis L2.
///
/// L2 hits are promoted back into L1. Both tiers hold entries for the full
/// retention window; logical freshness lives inside the entry, which is
/// what makes the stale-fallback path possible.
pub struct TieredCache<T> {
    l1_cache: Cache<String, CacheEntry<T>>,
    redis_client: Option<redis::Client>,
    cache_name: String,
}

impl<T> TieredCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(cache_name: &str, max_capacity: u64, redis_url: Option<&str>) -> Result<Self, AppError> {
        let l1_cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(RETENTION)
            .build();

        let redis_client = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => {
                    info!("Redis tier initialized for cache '{}'", cache_name);
                    Some(client)
                }
                Err(e) => {
                    warn!(
                        "Failed to initialize Redis for '{}': {}. Falling back to in-memory only.",
                        cache_name, e
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            l1_cache,
            redis_client,
            cache_name: cache_name.to_string(),
        })
    }

    /// Get a *fresh* entry: L1 first, then L2 with promotion.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let now = unix_now();
        self.get_any(key)
            .await
            .filter(|entry| entry.is_fresh_at(now))
    }

    /// Get an entry regardless of logical freshness.
    pub async fn get_stale(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.get_any(key).await
    }

    async fn get_any(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let rendered = key.render();

        if let Some(entry) = self.l1_cache.get(&rendered).await {
            return Some(entry);
        }

        if let Some(redis_client) = &self.redis_client {
            match self.get_from_redis(redis_client, &rendered).await {
                Ok(Some(entry)) => {
                    // Promote into L1 for faster future access
                    self.l1_cache.insert(rendered, entry.clone()).await;
                    return Some(entry);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Redis get error for key '{}' in cache '{}': {}",
                        rendered, self.cache_name, e
                    );
                }
            }
        }

        None
    }

    /// Write both tiers with the category's TTL.
    pub async fn set(&self, key: &CacheKey, data: T, source: CacheSource) -> Result<(), AppError> {
        let entry = CacheEntry::new(data, key.category, source, unix_now());
        let rendered = key.render();

        self.l1_cache.insert(rendered.clone(), entry.clone()).await;

        if let Some(redis_client) = &self.redis_client {
            if let Err(e) = self.set_in_redis(redis_client, &rendered, &entry).await {
                warn!(
                    "Redis set error for key '{}' in cache '{}': {}",
                    rendered, self.cache_name, e
                );
                // L1 is still consistent, keep going
            }
        }

        Ok(())
    }

    /// Fresh hit, or fetch-and-cache, or stale fallback.
    ///
    /// The fallback path is the primary defense against upstream outages:
    /// only when the fetch fails *and* no stale entry exists does the error
    /// reach the caller.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        source: CacheSource,
        fetch_fn: F,
    ) -> Result<CacheEntry<T>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        if let Some(entry) = self.get(key).await {
            return Ok(entry);
        }

        match fetch_fn().await {
            Ok(data) => {
                self.set(key, data.clone(), source).await?;
                Ok(CacheEntry::new(data, key.category, source, unix_now()))
            }
            Err(fetch_error) => {
                if let Some(stale) = self.get_stale(key).await {
                    warn!(
                        cache = %self.cache_name,
                        key = %key.render(),
                        error = %fetch_error,
                        "Fetch failed, serving stale cache entry"
                    );
                    return Ok(stale.as_fallback());
                }
                Err(fetch_error)
            }
        }
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<(), AppError> {
        let rendered = key.render();
        self.l1_cache.remove(&rendered).await;

        if let Some(redis_client) = &self.redis_client {
            if let Err(e) = self.remove_from_redis(redis_client, &rendered).await {
                warn!(
                    "Redis remove error for key '{}' in cache '{}': {}",
                    rendered, self.cache_name, e
                );
            }
        }

        Ok(())
    }

    async fn get_from_redis(
        &self,
        client: &redis::Client,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>, AppError> {
        let mut conn = client
            .get_async_connection()
            .await
            .map_err(|e| AppError::CacheError(format!("Redis connection error: {}", e)))?;

        let redis_key = format!("{}:{}", self.cache_name, key);
        let data: Option<String> = conn
            .get(&redis_key)
            .await
            .map_err(|e| AppError::CacheError(format!("Redis get error: {}", e)))?;

        match data {
            Some(json_data) => {
                let entry: CacheEntry<T> = serde_json::from_str(&json_data)
                    .map_err(|e| AppError::CacheError(format!("Redis deserialization error: {}", e)))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set_in_redis(
        &self,
        client: &redis::Client,
        key: &str,
        entry: &CacheEntry<T>,
    ) -> Result<(), AppError> {
        let mut conn = client
            .get_async_connection()
            .await
            .map_err(|e| AppError::CacheError(format!("Redis connection error: {}", e)))?;

        let redis_key = format!("{}:{}", self.cache_name, key);
        let json_data = serde_json::to_string(entry)
            .map_err(|e| AppError::CacheError(format!("Redis serialization error: {}", e)))?;

        let _: () = conn
            .set_ex(&redis_key, json_data, RETENTION.as_secs())
            .await
            .map_err(|e| AppError::CacheError(format!("Redis set error: {}", e)))?;

        Ok(())
    }

    async fn remove_from_redis(&self, client: &redis::Client, key: &str) -> Result<(), AppError> {
        let mut conn = client
            .get_async_connection()
            .await
            .map_err(|e| AppError::CacheError(format!("Redis connection error: {}", e)))?;

        let redis_key = format!("{}:{}", self.cache_name, key);
        let _: () = conn
            .del(&redis_key)
            .await
            .map_err(|e| AppError::CacheError(format!("Redis delete error: {}", e)))?;

        Ok(())
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_freshness_window() {
        let t0 = 1_700_000_000u64;
        let entry = CacheEntry::new("payload".to_string(), CacheCategory::PositionData, CacheSource::Api, t0);

        // Position TTL is 5 minutes: hit at t0+4m, miss at t0+6m
        assert!(entry.is_fresh_at(t0 + 4 * 60));
        assert!(!entry.is_fresh_at(t0 + 6 * 60));
    }

    #[test]
    fn test_fallback_retag_preserves_payload() {
        let entry = CacheEntry::new(42u64, CacheCategory::PriceData, CacheSource::Onchain, 0);
        let fallback = entry.as_fallback();
        assert_eq!(fallback.data, 42);
        assert_eq!(fallback.source, CacheSource::Fallback);
        assert_eq!(fallback.expires_at, entry.expires_at);
    }

    #[test]
    fn test_key_rendering_scopes_by_chain() {
        let mainnet = CacheKey::new(CacheCategory::MarketData, 1)
            .with_protocol(Protocol::AaveV3)
            .with_asset("USDC");
        let sepolia = CacheKey::new(CacheCategory::MarketData, 11155111)
            .with_protocol(Protocol::AaveV3)
            .with_asset("USDC");

        assert_eq!(mainnet.render(), "market_data:1:aave_v3:usdc");
        assert_ne!(mainnet.render(), sepolia.render());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache: TieredCache<String> = TieredCache::new("test", 100, None).unwrap();
        let key = CacheKey::new(CacheCategory::PriceData, 1).with_asset("WETH");

        cache.set(&key, "2000.0".to_string(), CacheSource::Onchain).await.unwrap();

        let entry = cache.get(&key).await.expect("entry should be fresh");
        assert_eq!(entry.data, "2000.0");
        assert_eq!(entry.source, CacheSource::Onchain);
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_on_miss() {
        let cache: TieredCache<u64> = TieredCache::new("test", 100, None).unwrap();
        let key = CacheKey::new(CacheCategory::MarketData, 1).with_asset("DAI");

        let entry = cache
            .get_or_fetch(&key, CacheSource::Api, || async { Ok(7u64) })
            .await
            .unwrap();
        assert_eq!(entry.data, 7);

        // Second call must hit the cache, not the fetcher
        let entry = cache
            .get_or_fetch(&key, CacheSource::Api, || async {
                Err(AppError::ExternalApiError("should not be called".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(entry.data, 7);
    }

    #[tokio::test]
    async fn test_get_or_fetch_propagates_error_without_stale_entry() {
        let cache: TieredCache<u64> = TieredCache::new("test", 100, None).unwrap();
        let key = CacheKey::new(CacheCategory::PriceData, 1).with_asset("WBTC");

        let result = cache
            .get_or_fetch(&key, CacheSource::Api, || async {
                Err(AppError::ExternalApiError("upstream down".to_string()))
            })
            .await;
        assert!(result.is_err());
    }
}
