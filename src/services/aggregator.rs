use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::adapters::LendingAdapter;
use crate::cache::{unix_now, CacheCategory, CacheKey, CacheSource, TieredCache};
use crate::error::AppError;
use crate::models::{AggregatedPosition, LendingMarket, LendingPosition, MarketFilter, Protocol};

/// Raw result of one fan-out pass, the unit stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedMarkets {
    pub markets: Vec<LendingMarket>,
    pub protocols_attempted: u32,
    pub protocols_succeeded: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPositions {
    pub positions: Vec<LendingPosition>,
    pub protocols_attempted: u32,
    pub protocols_succeeded: u32,
}

/// Markets response with fan-out observability and data provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsSnapshot {
    pub markets: Vec<LendingMarket>,
    pub protocols_attempted: u32,
    pub protocols_succeeded: u32,
    pub source: CacheSource,
}

/// Positions response; the rollup is recomputed from the positions on every
/// query, never cached on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsSnapshot {
    pub positions: Vec<LendingPosition>,
    pub aggregated: AggregatedPosition,
    pub protocols_attempted: u32,
    pub protocols_succeeded: u32,
    pub source: CacheSource,
}

/// Fans out to all protocol adapters concurrently and merges results into
/// the unified model. One failing adapter costs its own slice of the data,
/// never the aggregate.
pub struct LendingAggregator {
    adapters: Arc<Vec<Box<dyn LendingAdapter>>>,
    markets_cache: TieredCache<FetchedMarkets>,
    positions_cache: TieredCache<FetchedPositions>,
    chain_id: u64,
}

impl LendingAggregator {
    pub fn new(
        adapters: Arc<Vec<Box<dyn LendingAdapter>>>,
        markets_cache: TieredCache<FetchedMarkets>,
        positions_cache: TieredCache<FetchedPositions>,
        chain_id: u64,
    ) -> Self {
        Self {
            adapters,
            markets_cache,
            positions_cache,
            chain_id,
        }
    }

    pub fn supported_protocols(&self) -> Vec<Protocol> {
        self.adapters.iter().map(|a| a.protocol()).collect()
    }

    /// All markets across protocols, filtered. Served through the market
    /// cache; a full-fan-out failure falls back to stale data.
    pub async fn get_markets(&self, filter: &MarketFilter) -> Result<MarketsSnapshot, AppError> {
        let key = CacheKey::new(CacheCategory::MarketData, self.chain_id);

        let entry = self
            .markets_cache
            .get_or_fetch(&key, CacheSource::Onchain, || self.fetch_all_markets())
            .await?;

        let mut markets = entry.data.markets;
        markets.retain(|m| filter.matches(m));

        Ok(MarketsSnapshot {
            markets,
            protocols_attempted: entry.data.protocols_attempted,
            protocols_succeeded: entry.data.protocols_succeeded,
            source: entry.source,
        })
    }

    /// All positions for a user across protocols.
    pub async fn get_user_positions(&self, user: Address) -> Result<PositionsSnapshot, AppError> {
        let key = CacheKey::new(CacheCategory::PositionData, self.chain_id)
            .with_user(user.to_string());

        let entry = self
            .positions_cache
            .get_or_fetch(&key, CacheSource::Onchain, || self.fetch_all_positions(user))
            .await?;

        let aggregated = AggregatedPosition::from_positions(&entry.data.positions, unix_now());

        Ok(PositionsSnapshot {
            positions: entry.data.positions,
            aggregated,
            protocols_attempted: entry.data.protocols_attempted,
            protocols_succeeded: entry.data.protocols_succeeded,
            source: entry.source,
        })
    }

    /// Lowest health factor across all protocols, bypassing the cache.
    pub async fn lowest_health_factor(&self, user: Address) -> Result<(f64, Option<Protocol>), AppError> {
        let futures = self
            .adapters
            .iter()
            .map(|adapter| async move { (adapter.protocol(), adapter.calculate_health_factor(user).await) });

        let results = join_all(futures).await;

        let mut lowest = f64::INFINITY;
        let mut riskiest = None;

        for (protocol, result) in results {
            match result {
                Ok(hf) => {
                    if hf < lowest {
                        lowest = hf;
                        riskiest = Some(protocol);
                    }
                }
                Err(e) => {
                    warn!(protocol = %protocol, error = %e, "Health factor fetch failed");
                }
            }
        }

        Ok((lowest, riskiest))
    }

    async fn fetch_all_markets(&self) -> Result<FetchedMarkets, AppError> {
        let attempted = self.adapters.len() as u32;

        info!(
            adapter_count = attempted,
            chain_id = self.chain_id,
            "Starting market fan-out across all adapters"
        );

        let futures = self
            .adapters
            .iter()
            .map(|adapter| async move { (adapter.protocol(), adapter.get_markets().await) });

        let results = join_all(futures).await;

        let mut merged: Vec<LendingMarket> = Vec::new();
        let mut seen: HashMap<(Protocol, String), ()> = HashMap::new();
        let mut succeeded = 0u32;

        for (protocol, result) in results {
            match result {
                Ok(markets) => {
                    succeeded += 1;
                    for market in markets {
                        if !market.risk_params_valid() {
                            // Malformed upstream payload: drop the record,
                            // keep the aggregate
                            error!(
                                protocol = %market.protocol,
                                market_id = %market.market_id,
                                ltv = market.ltv,
                                liquidation_threshold = market.liquidation_threshold,
                                "Market violates risk-parameter invariant, dropping record"
                            );
                            continue;
                        }

                        let key = market.dedup_key();
                        if seen.contains_key(&key) {
                            // Adapters own disjoint namespaces; a collision
                            // means corrupted upstream data. Drop the record,
                            // keep the aggregate.
                            error!(
                                protocol = %key.0,
                                market_id = %key.1,
                                "Duplicate market id across adapters, dropping record"
                            );
                            continue;
                        }
                        seen.insert(key, ());
                        merged.push(market);
                    }
                }
                Err(e) => {
                    warn!(
                        protocol = %protocol,
                        error = %e,
                        "Adapter market fetch failed, omitting from aggregate"
                    );
                }
            }
        }

        if succeeded == 0 && attempted > 0 {
            // Nothing came back; let the cache serve stale data instead of
            // overwriting it with an empty snapshot
            return Err(AppError::ExternalApiError(
                "All adapter market fetches failed".to_string(),
            ));
        }

        info!(
            market_count = merged.len(),
            protocols_attempted = attempted,
            protocols_succeeded = succeeded,
            "Market aggregation completed"
        );

        Ok(FetchedMarkets {
            markets: merged,
            protocols_attempted: attempted,
            protocols_succeeded: succeeded,
        })
    }

    async fn fetch_all_positions(&self, user: Address) -> Result<FetchedPositions, AppError> {
        let attempted = self.adapters.len() as u32;

        let futures = self.adapters.iter().map(|adapter| async move {
            (adapter.protocol(), adapter.get_user_positions(user).await)
        });

        let results = join_all(futures).await;

        let mut positions = Vec::new();
        let mut succeeded = 0u32;

        for (protocol, result) in results {
            match result {
                Ok(protocol_positions) => {
                    succeeded += 1;
                    if !protocol_positions.is_empty() {
                        info!(
                            user = %user,
                            protocol = %protocol,
                            position_count = protocol_positions.len(),
                            "Fetched positions"
                        );
                    }
                    positions.extend(protocol_positions);
                }
                Err(e) => {
                    warn!(
                        user = %user,
                        protocol = %protocol,
                        error = %e,
                        "Adapter position fetch failed, omitting from aggregate"
                    );
                }
            }
        }

        if succeeded == 0 && attempted > 0 {
            return Err(AppError::ExternalApiError(
                "All adapter position fetches failed".to_string(),
            ));
        }

        Ok(FetchedPositions {
            positions,
            protocols_attempted: attempted,
            protocols_succeeded: succeeded,
        })
    }
}
