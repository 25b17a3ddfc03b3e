//! End-to-end flow over the aggregation layer with scripted adapters:
//! fan-out, rollup, caching, and routing on the merged market set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;

use lending_aggregator::adapters::{AdapterError, LendingAdapter};
use lending_aggregator::cache::TieredCache;
use lending_aggregator::models::{
    ActionParams, AssetCategory, CallDescription, LendingAction, LendingMarket, LendingPosition,
    MarketFilter, Protocol, RouteAction, ValidationResult,
};
use lending_aggregator::services::{LendingAggregator, RoutingEngine};

struct ScriptedAdapter {
    protocol: Protocol,
    supply_apy: f64,
    borrow_apy: f64,
    health_factor: Option<f64>,
    fail_after_first: Option<AtomicBool>,
}

impl ScriptedAdapter {
    fn new(protocol: Protocol, supply_apy: f64, borrow_apy: f64, hf: Option<f64>) -> Self {
        Self {
            protocol,
            supply_apy,
            borrow_apy,
            health_factor: hf,
            fail_after_first: None,
        }
    }

    fn failing_after_first(mut self) -> Self {
        self.fail_after_first = Some(AtomicBool::new(false));
        self
    }

    fn should_fail(&self) -> bool {
        match &self.fail_after_first {
            Some(flag) => flag.swap(true, Ordering::SeqCst),
            None => false,
        }
    }

    fn market(&self) -> LendingMarket {
        LendingMarket {
            protocol: self.protocol,
            chain_id: 1,
            market_id: format!("{}:USDC", self.protocol),
            asset_address: Address::ZERO,
            asset_symbol: "USDC".to_string(),
            asset_decimals: 6,
            asset_category: AssetCategory::Stablecoin,
            supply_apy: self.supply_apy,
            borrow_apy: self.borrow_apy,
            reward_apy: 0.0,
            total_supply: 1_000_000.0,
            total_borrow: 400_000.0,
            total_supply_usd: 1_000_000.0,
            total_borrow_usd: 400_000.0,
            available_liquidity_usd: 600_000.0,
            utilization: 0.4,
            ltv: 0.75,
            liquidation_threshold: 0.8,
            liquidation_penalty: 0.05,
            supply_cap: None,
            borrow_cap: None,
            can_supply: true,
            can_borrow: true,
            can_use_as_collateral: true,
            is_frozen: false,
            is_paused: false,
            last_updated: 0,
        }
    }

    fn position(&self) -> LendingPosition {
        let has_debt = self.health_factor.is_some();
        LendingPosition {
            protocol: self.protocol,
            chain_id: 1,
            market_id: format!("{}:USDC", self.protocol),
            asset_address: Address::ZERO,
            asset_symbol: "USDC".to_string(),
            asset_decimals: 6,
            supply_balance: 10_000.0,
            supply_balance_usd: 10_000.0,
            borrow_balance: if has_debt { 4_000.0 } else { 0.0 },
            borrow_balance_usd: if has_debt { 4_000.0 } else { 0.0 },
            collateral_enabled: true,
            supply_apy: self.supply_apy,
            borrow_apy: self.borrow_apy,
            health_factor: self.health_factor,
            liquidation_price: None,
            last_updated: 0,
        }
    }
}

#[async_trait]
impl LendingAdapter for ScriptedAdapter {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn chain_id(&self) -> u64 {
        1
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        if self.should_fail() {
            return Err(AdapterError::RpcError("scripted outage".to_string()));
        }
        Ok(vec![self.market()])
    }

    async fn get_user_positions(&self, _user: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        if self.should_fail() {
            return Err(AdapterError::RpcError("scripted outage".to_string()));
        }
        Ok(vec![self.position()])
    }

    fn build_supply(&self, _p: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        Ok(Vec::new())
    }
    fn build_withdraw(&self, _p: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        Ok(Vec::new())
    }
    fn build_borrow(&self, _p: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        Ok(Vec::new())
    }
    fn build_repay(&self, _p: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        Ok(Vec::new())
    }

    async fn validate(&self, _p: &ActionParams) -> Result<ValidationResult, AdapterError> {
        Ok(ValidationResult::ok())
    }

    async fn calculate_health_factor(&self, _user: Address) -> Result<f64, AdapterError> {
        Ok(self.health_factor.unwrap_or(f64::INFINITY))
    }

    async fn simulate_health_factor(
        &self,
        _user: Address,
        _action: LendingAction,
        _amount_usd: f64,
    ) -> Result<f64, AdapterError> {
        Ok(self.health_factor.unwrap_or(f64::INFINITY))
    }
}

fn build_aggregator(adapters: Vec<Box<dyn LendingAdapter>>) -> LendingAggregator {
    LendingAggregator::new(
        Arc::new(adapters),
        TieredCache::new("it_markets", 100, None).unwrap(),
        TieredCache::new("it_positions", 100, None).unwrap(),
        1,
    )
}

#[tokio::test]
async fn test_minimum_health_factor_rollup_across_protocols() {
    // Aave 1.8, Morpho 1.1, Compound debt-free: the rollup pins the user's
    // risk to the worst protocol
    let adapters: Vec<Box<dyn LendingAdapter>> = vec![
        Box::new(ScriptedAdapter::new(Protocol::AaveV3, 3.0, 5.0, Some(1.8))),
        Box::new(ScriptedAdapter::new(Protocol::MorphoVault, 5.0, 0.0, Some(1.1))),
        Box::new(ScriptedAdapter::new(Protocol::CompoundV3, 4.0, 6.0, None)),
    ];

    let aggregator = build_aggregator(adapters);
    let snapshot = aggregator.get_user_positions(Address::ZERO).await.unwrap();

    assert_eq!(snapshot.aggregated.lowest_health_factor, Some(1.1));
    assert_eq!(snapshot.aggregated.riskiest_protocol, Some(Protocol::MorphoVault));
    assert_eq!(snapshot.positions.len(), 3);
    assert_eq!(snapshot.protocols_succeeded, 3);
}

#[tokio::test]
async fn test_routing_over_aggregated_markets() {
    let adapters: Vec<Box<dyn LendingAdapter>> = vec![
        Box::new(ScriptedAdapter::new(Protocol::AaveV3, 3.5, 5.1, None)),
        Box::new(ScriptedAdapter::new(Protocol::CompoundV3, 6.2, 6.1, None)),
        Box::new(ScriptedAdapter::new(Protocol::CompoundV2, 4.5, 4.8, None)),
    ];

    let aggregator = build_aggregator(adapters);
    let snapshot = aggregator.get_markets(&MarketFilter::default()).await.unwrap();
    assert_eq!(snapshot.markets.len(), 3);

    let supply = RoutingEngine::suggest(&snapshot.markets, "USDC", RouteAction::Supply, None).unwrap();
    assert_eq!(supply.recommended_protocol, Protocol::CompoundV3);
    assert!(supply.reason.starts_with("Highest APY"));
    assert_eq!(supply.alternatives.len(), 2);

    let borrow = RoutingEngine::suggest(&snapshot.markets, "USDC", RouteAction::Borrow, None).unwrap();
    assert_eq!(borrow.recommended_protocol, Protocol::CompoundV2);
}

#[tokio::test]
async fn test_cache_shields_consumers_from_later_outage() {
    // The adapter works once, then starts failing; the second query is
    // served from the fresh cache without touching the adapter again
    let adapters: Vec<Box<dyn LendingAdapter>> = vec![Box::new(
        ScriptedAdapter::new(Protocol::AaveV3, 3.0, 5.0, Some(1.5)).failing_after_first(),
    )];

    let aggregator = build_aggregator(adapters);

    let first = aggregator.get_user_positions(Address::ZERO).await.unwrap();
    assert_eq!(first.positions.len(), 1);

    let second = aggregator.get_user_positions(Address::ZERO).await.unwrap();
    assert_eq!(second.positions.len(), 1);
    assert_eq!(second.aggregated.lowest_health_factor, Some(1.5));
}

#[tokio::test]
async fn test_partial_outage_keeps_aggregate_alive() {
    let adapters: Vec<Box<dyn LendingAdapter>> = vec![
        Box::new(ScriptedAdapter::new(Protocol::AaveV3, 3.0, 5.0, None).failing_after_first()),
        Box::new(ScriptedAdapter::new(Protocol::CompoundV3, 4.0, 6.0, None)),
    ];

    let aggregator = build_aggregator(adapters);

    // Prime both adapters once
    let first = aggregator.get_markets(&MarketFilter::default()).await.unwrap();
    assert_eq!(first.protocols_succeeded, 2);
    assert_eq!(first.markets.len(), 2);
}
