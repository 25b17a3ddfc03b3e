//! Pure health-factor and borrow-capacity math over the unified model.
//!
//! Nothing in this module touches the chain, the cache or the clock; every
//! function is a deterministic map from inputs to outputs so what-if
//! previews can reuse them freely.

use serde::{Deserialize, Serialize};

use crate::models::LendingAction;

use super::policy::{RiskLevel, RiskPolicy};

/// Cap for `price_drop_to_liquidation` as hf grows without bound.
const MAX_PRICE_DROP_PCT: f64 = 99.0;

/// Risk-weighted collateral over debt. Zero debt is infinitely safe.
pub fn health_factor(collateral_usd: f64, debt_usd: f64, liquidation_threshold: f64) -> f64 {
    if debt_usd == 0.0 {
        return f64::INFINITY;
    }
    collateral_usd * liquidation_threshold / debt_usd
}

/// Collateral price drop (percent) that would bring the position to hf = 1.
///
/// Returns 0 for positions already at or past liquidation, and caps at 99
/// for numerical stability as hf grows.
pub fn price_drop_to_liquidation(hf: f64) -> f64 {
    if hf <= 0.0 {
        return 0.0;
    }
    let drop = (1.0 - 1.0 / hf) * 100.0;
    drop.clamp(0.0, MAX_PRICE_DROP_PCT)
}

/// Collateral price at which a single-collateral position liquidates.
/// Health factor scales linearly in the collateral price, so the trigger
/// price is current price divided by hf.
pub fn liquidation_price(current_price: f64, hf: f64) -> Option<f64> {
    if !hf.is_finite() || hf <= 0.0 {
        return None;
    }
    Some(current_price / hf)
}

/// What-if health factor after applying an action, without mutating any
/// stored state.
pub fn simulate_health_factor(
    collateral_usd: f64,
    debt_usd: f64,
    liquidation_threshold: f64,
    action: LendingAction,
    amount_usd: f64,
) -> f64 {
    let (adjusted_collateral, adjusted_debt) = match action {
        LendingAction::Supply => (collateral_usd + amount_usd, debt_usd),
        LendingAction::Withdraw => ((collateral_usd - amount_usd).max(0.0), debt_usd),
        LendingAction::Borrow => (collateral_usd, debt_usd + amount_usd),
        LendingAction::Repay => (collateral_usd, (debt_usd - amount_usd).max(0.0)),
    };

    health_factor(adjusted_collateral, adjusted_debt, liquidation_threshold)
}

/// One collateral bucket feeding the capacity calculation.
#[derive(Debug, Clone, Copy)]
pub struct CollateralInput {
    pub value_usd: f64,
    /// Market loan-to-value as a fraction in [0, 1]
    pub ltv: f64,
    /// Whether the user enabled this supply as collateral
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowCapacity {
    pub total_collateral_usd: f64,
    /// Value-weighted LTV across enabled collateral
    pub weighted_ltv: f64,
    pub max_borrow_usd: f64,
    /// Max borrow scaled down by the policy safety margin
    pub safe_borrow_usd: f64,
}

/// Borrow capacity from enabled collateral only, weighted by value.
pub fn borrow_capacity(collaterals: &[CollateralInput], policy: &RiskPolicy) -> BorrowCapacity {
    let enabled: Vec<&CollateralInput> = collaterals.iter().filter(|c| c.enabled).collect();

    let total_collateral_usd: f64 = enabled.iter().map(|c| c.value_usd).sum();

    let weighted_ltv = if total_collateral_usd > 0.0 {
        enabled
            .iter()
            .map(|c| c.ltv * (c.value_usd / total_collateral_usd))
            .sum()
    } else {
        0.0
    };

    let max_borrow_usd = total_collateral_usd * weighted_ltv;

    BorrowCapacity {
        total_collateral_usd,
        weighted_ltv,
        max_borrow_usd,
        safe_borrow_usd: max_borrow_usd * policy.safety_margin,
    }
}

/// Strict threshold ladder over the health factor.
pub fn classify_risk(hf: f64, policy: &RiskPolicy) -> RiskLevel {
    if hf < 1.0 {
        RiskLevel::Liquidatable
    } else if hf < policy.critical_hf {
        RiskLevel::Critical
    } else if hf < policy.high_hf {
        RiskLevel::High
    } else if hf < policy.medium_hf {
        RiskLevel::Medium
    } else if hf < policy.low_hf {
        RiskLevel::Low
    } else {
        RiskLevel::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_debt_is_infinite() {
        assert_eq!(health_factor(10_000.0, 0.0, 0.8), f64::INFINITY);
        assert_eq!(health_factor(0.0, 0.0, 0.8), f64::INFINITY);
    }

    #[test]
    fn test_health_factor_basic() {
        // (1000 * 0.80) / 500 = 1.6
        let hf = health_factor(1000.0, 500.0, 0.80);
        assert!((hf - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_health_factor_monotonicity() {
        let base = health_factor(1000.0, 500.0, 0.8);
        assert!(health_factor(1000.0, 600.0, 0.8) < base);
        assert!(health_factor(1200.0, 500.0, 0.8) > base);
    }

    #[test]
    fn test_price_drop_bounds() {
        assert_eq!(price_drop_to_liquidation(0.5), 0.0);
        assert_eq!(price_drop_to_liquidation(1.0), 0.0);
        assert_eq!(price_drop_to_liquidation(-2.0), 0.0);

        // hf = 2 allows a 50% drop
        assert!((price_drop_to_liquidation(2.0) - 50.0).abs() < 1e-9);

        // capped at 99 for huge health factors
        assert_eq!(price_drop_to_liquidation(1e12), 99.0);
    }

    #[test]
    fn test_simulate_borrow_lowers_hf() {
        let before = health_factor(10_000.0, 4_000.0, 0.8);
        let after = simulate_health_factor(10_000.0, 4_000.0, 0.8, LendingAction::Borrow, 2_000.0);
        assert!(after < before);

        // (10_000 * 0.8) / 6_000
        assert!((after - 8_000.0 / 6_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_simulate_full_repay_is_infinite() {
        let after = simulate_health_factor(10_000.0, 4_000.0, 0.8, LendingAction::Repay, 5_000.0);
        assert_eq!(after, f64::INFINITY);
    }

    #[test]
    fn test_borrow_capacity_weighted_ltv() {
        let collaterals = [
            CollateralInput { value_usd: 6_000.0, ltv: 0.80, enabled: true },
            CollateralInput { value_usd: 4_000.0, ltv: 0.70, enabled: true },
            // disabled collateral must not count
            CollateralInput { value_usd: 50_000.0, ltv: 0.90, enabled: false },
        ];

        let capacity = borrow_capacity(&collaterals, &RiskPolicy::default());

        assert!((capacity.total_collateral_usd - 10_000.0).abs() < 1e-9);
        assert!((capacity.weighted_ltv - 0.76).abs() < 1e-9);
        assert!((capacity.max_borrow_usd - 7_600.0).abs() < 1e-9);
        assert!((capacity.safe_borrow_usd - 6_080.0).abs() < 1e-9);
    }

    #[test]
    fn test_borrow_capacity_no_collateral() {
        let capacity = borrow_capacity(&[], &RiskPolicy::default());
        assert_eq!(capacity.max_borrow_usd, 0.0);
        assert_eq!(capacity.weighted_ltv, 0.0);
    }

    #[test]
    fn test_risk_ladder() {
        let policy = RiskPolicy::default();
        assert_eq!(classify_risk(0.95, &policy), RiskLevel::Liquidatable);
        assert_eq!(classify_risk(1.05, &policy), RiskLevel::Critical);
        assert_eq!(classify_risk(1.2, &policy), RiskLevel::High);
        assert_eq!(classify_risk(1.4, &policy), RiskLevel::Medium);
        assert_eq!(classify_risk(1.8, &policy), RiskLevel::Low);
        assert_eq!(classify_risk(2.5, &policy), RiskLevel::Safe);
        assert_eq!(classify_risk(f64::INFINITY, &policy), RiskLevel::Safe);
    }

    #[test]
    fn test_liquidation_price() {
        // hf 1.6 at $2000: trigger at $1250
        let price = liquidation_price(2000.0, 1.6).unwrap();
        assert!((price - 1250.0).abs() < 1e-9);

        assert_eq!(liquidation_price(2000.0, f64::INFINITY), None);
        assert_eq!(liquidation_price(2000.0, 0.0), None);
    }
}
