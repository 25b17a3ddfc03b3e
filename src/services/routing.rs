//! Routing suggestion engine.
//!
//! Stateless by construction: every call recomputes a fresh ranking from
//! the market set it is handed. A user overriding the recommendation is
//! tracked by the caller and never feeds back into the ranking.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::AppError;
use crate::models::{LendingMarket, RouteAction, RouteAlternative, RoutingSuggestion};

pub struct RoutingEngine;

impl RoutingEngine {
    /// Rank eligible markets for an asset + action and recommend the top.
    ///
    /// Supply ranks by net supply APY descending; borrow by net borrow APY
    /// ascending. Ties break on available liquidity, then protocol name for
    /// determinism.
    pub fn suggest(
        markets: &[LendingMarket],
        asset_symbol: &str,
        action: RouteAction,
        amount_usd: Option<f64>,
    ) -> Result<RoutingSuggestion, AppError> {
        let mut eligible: Vec<&LendingMarket> = markets
            .iter()
            .filter(|m| m.asset_symbol.eq_ignore_ascii_case(asset_symbol))
            .filter(|m| match action {
                RouteAction::Supply => m.can_supply,
                RouteAction::Borrow => m.can_borrow,
            })
            .filter(|m| match amount_usd {
                Some(amount) => m.available_liquidity_usd >= amount,
                None => true,
            })
            .collect();

        if eligible.is_empty() {
            return Err(AppError::NotFound(format!(
                "No {} market available for {}",
                match action {
                    RouteAction::Supply => "supply",
                    RouteAction::Borrow => "borrow",
                },
                asset_symbol
            )));
        }

        eligible.sort_by(|a, b| Self::compare(a, b, action));

        let best = eligible[0];
        let best_apy = Self::net_apy(best, action);

        let (reason_code, reason) = match action {
            RouteAction::Supply => (
                "highest_apy",
                format!(
                    "Highest APY: {:.2}% net supply APY on {}",
                    best_apy,
                    best.protocol.display_name()
                ),
            ),
            RouteAction::Borrow => (
                "lowest_borrow_cost",
                format!(
                    "Lowest borrow rate: {:.2}% net on {}",
                    best_apy,
                    best.protocol.display_name()
                ),
            ),
        };

        let alternatives = eligible[1..]
            .iter()
            .map(|m| {
                let net_apy = Self::net_apy(m, action);
                let apy_delta = net_apy - best_apy;
                let reason = match action {
                    RouteAction::Supply => {
                        format!("{:.2}% lower supply APY", apy_delta.abs())
                    }
                    RouteAction::Borrow => {
                        format!("{:.2}% higher borrow cost", apy_delta.abs())
                    }
                };

                RouteAlternative {
                    protocol: m.protocol,
                    market_id: m.market_id.clone(),
                    net_apy,
                    apy_delta,
                    available_liquidity_usd: m.available_liquidity_usd,
                    reason,
                }
            })
            .collect();

        debug!(
            asset = %asset_symbol,
            recommended = %best.protocol,
            net_apy = best_apy,
            eligible = eligible.len(),
            "Computed routing suggestion"
        );

        Ok(RoutingSuggestion {
            asset_symbol: asset_symbol.to_string(),
            action,
            recommended_protocol: best.protocol,
            recommended_market_id: best.market_id.clone(),
            net_apy: best_apy,
            available_liquidity_usd: best.available_liquidity_usd,
            reason_code: reason_code.to_string(),
            reason,
            alternatives,
        })
    }

    fn net_apy(market: &LendingMarket, action: RouteAction) -> f64 {
        match action {
            RouteAction::Supply => market.net_supply_apy(),
            RouteAction::Borrow => market.net_borrow_apy(),
        }
    }

    fn compare(a: &LendingMarket, b: &LendingMarket, action: RouteAction) -> Ordering {
        let apy_a = Self::net_apy(a, action);
        let apy_b = Self::net_apy(b, action);

        let primary = match action {
            // higher is better for supply
            RouteAction::Supply => apy_b.partial_cmp(&apy_a),
            // lower is better for borrow
            RouteAction::Borrow => apy_a.partial_cmp(&apy_b),
        }
        .unwrap_or(Ordering::Equal);

        primary
            .then_with(|| {
                b.available_liquidity_usd
                    .partial_cmp(&a.available_liquidity_usd)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.protocol.as_str().cmp(b.protocol.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetCategory, Protocol};
    use alloy::primitives::Address;

    fn market(
        protocol: Protocol,
        supply_apy: f64,
        borrow_apy: f64,
        liquidity: f64,
    ) -> LendingMarket {
        LendingMarket {
            protocol,
            chain_id: 1,
            market_id: format!("{}:USDC", protocol),
            asset_address: Address::ZERO,
            asset_symbol: "USDC".to_string(),
            asset_decimals: 6,
            asset_category: AssetCategory::Stablecoin,
            supply_apy,
            borrow_apy,
            reward_apy: 0.0,
            total_supply: 1_000_000.0,
            total_borrow: 500_000.0,
            total_supply_usd: 1_000_000.0,
            total_borrow_usd: 500_000.0,
            available_liquidity_usd: liquidity,
            utilization: 0.5,
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

    #[test]
    fn test_supply_recommends_highest_net_apy() {
        let markets = vec![
            market(Protocol::AaveV3, 3.5, 5.0, 100_000.0),
            market(Protocol::CompoundV3, 6.2, 5.0, 100_000.0),
            market(Protocol::CompoundV2, 4.5, 5.0, 100_000.0),
        ];

        let suggestion =
            RoutingEngine::suggest(&markets, "USDC", RouteAction::Supply, None).unwrap();

        assert_eq!(suggestion.recommended_protocol, Protocol::CompoundV3);
        assert!((suggestion.net_apy - 6.2).abs() < 1e-9);
        assert!(suggestion.reason.starts_with("Highest APY"));
        assert_eq!(suggestion.reason_code, "highest_apy");
        assert_eq!(suggestion.alternatives.len(), 2);

        // alternatives are annotated with their delta to the winner
        let worst = suggestion
            .alternatives
            .iter()
            .find(|a| a.protocol == Protocol::AaveV3)
            .unwrap();
        assert!((worst.apy_delta - (3.5 - 6.2)).abs() < 1e-9);
    }

    #[test]
    fn test_borrow_recommends_lowest_net_cost() {
        let markets = vec![
            market(Protocol::AaveV3, 3.0, 5.1, 100_000.0),
            market(Protocol::CompoundV3, 3.0, 6.1, 100_000.0),
            market(Protocol::CompoundV2, 3.0, 4.8, 100_000.0),
        ];

        let suggestion =
            RoutingEngine::suggest(&markets, "USDC", RouteAction::Borrow, None).unwrap();

        assert_eq!(suggestion.recommended_protocol, Protocol::CompoundV2);
        assert!((suggestion.net_apy - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_tie_breaks_on_liquidity_then_name() {
        let markets = vec![
            market(Protocol::CompoundV3, 4.0, 5.0, 50_000.0),
            market(Protocol::AaveV3, 4.0, 5.0, 200_000.0),
        ];

        let suggestion =
            RoutingEngine::suggest(&markets, "USDC", RouteAction::Supply, None).unwrap();
        // equal APY: deeper liquidity wins
        assert_eq!(suggestion.recommended_protocol, Protocol::AaveV3);

        let markets = vec![
            market(Protocol::CompoundV3, 4.0, 5.0, 100_000.0),
            market(Protocol::AaveV3, 4.0, 5.0, 100_000.0),
        ];
        let suggestion =
            RoutingEngine::suggest(&markets, "USDC", RouteAction::Supply, None).unwrap();
        // equal APY and liquidity: lexicographic protocol order
        assert_eq!(suggestion.recommended_protocol, Protocol::AaveV3);
    }

    #[test]
    fn test_capability_and_liquidity_filters() {
        let mut paused = market(Protocol::AaveV3, 9.0, 5.0, 100_000.0);
        paused.can_supply = false;

        let markets = vec![paused, market(Protocol::CompoundV3, 4.0, 5.0, 1_000.0)];

        // the paused market can't win even with the best APY
        let suggestion =
            RoutingEngine::suggest(&markets, "USDC", RouteAction::Supply, None).unwrap();
        assert_eq!(suggestion.recommended_protocol, Protocol::CompoundV3);

        // liquidity-aware filtering drops the shallow market entirely
        let result = RoutingEngine::suggest(&markets, "USDC", RouteAction::Supply, Some(5_000.0));
        assert!(result.is_err());
    }

    #[test]
    fn test_reward_apy_counts_toward_net() {
        let mut low_base = market(Protocol::AaveV3, 2.0, 5.0, 100_000.0);
        low_base.reward_apy = 3.0; // net 5.0

        let markets = vec![low_base, market(Protocol::CompoundV3, 4.0, 5.0, 100_000.0)];

        let suggestion =
            RoutingEngine::suggest(&markets, "USDC", RouteAction::Supply, None).unwrap();
        assert_eq!(suggestion.recommended_protocol, Protocol::AaveV3);
        assert!((suggestion.net_apy - 5.0).abs() < 1e-9);
    }
}
