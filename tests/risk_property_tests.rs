use proptest::prelude::*;

use lending_aggregator::models::LendingAction;
use lending_aggregator::risk::{
    borrow_capacity, classify_risk, health_factor, price_drop_to_liquidation,
    simulate_health_factor, CollateralInput, RiskLevel, RiskPolicy,
};

/// Property-based tests for the risk engine. Inputs are generated across
/// the realistic USD ranges the aggregator produces.

fn usd_amount() -> impl Strategy<Value = f64> {
    1.0f64..1_000_000_000.0
}

fn liquidation_threshold() -> impl Strategy<Value = f64> {
    0.01f64..1.0
}

proptest! {
    /// Zero debt is always infinitely safe, regardless of collateral.
    #[test]
    fn prop_zero_debt_is_infinite(collateral in 0.0f64..1e12, lt in liquidation_threshold()) {
        prop_assert_eq!(health_factor(collateral, 0.0, lt), f64::INFINITY);
    }

    /// Health factor decreases monotonically in debt.
    #[test]
    fn prop_hf_monotonic_in_debt(
        collateral in usd_amount(),
        debt in usd_amount(),
        extra in 1.0f64..1_000_000.0,
        lt in liquidation_threshold(),
    ) {
        let base = health_factor(collateral, debt, lt);
        let more_debt = health_factor(collateral, debt + extra, lt);
        prop_assert!(more_debt < base);
    }

    /// Health factor increases monotonically in collateral.
    #[test]
    fn prop_hf_monotonic_in_collateral(
        collateral in usd_amount(),
        debt in usd_amount(),
        extra in 1.0f64..1_000_000.0,
        lt in liquidation_threshold(),
    ) {
        let base = health_factor(collateral, debt, lt);
        let more_collateral = health_factor(collateral + extra, debt, lt);
        prop_assert!(more_collateral > base);
    }

    /// Price drop to liquidation stays inside [0, 99] for any finite
    /// positive health factor, and is zero at or below hf = 1.
    #[test]
    fn prop_price_drop_bounds(hf in 0.0001f64..1e9) {
        let drop = price_drop_to_liquidation(hf);
        prop_assert!((0.0..=99.0).contains(&drop), "drop = {}", drop);

        if hf <= 1.0 {
            prop_assert_eq!(drop, 0.0);
        }
    }

    /// Simulating a borrow can never raise the health factor; simulating a
    /// repay can never lower it.
    #[test]
    fn prop_simulation_direction(
        collateral in usd_amount(),
        debt in usd_amount(),
        amount in 1.0f64..1_000_000.0,
        lt in liquidation_threshold(),
    ) {
        let base = health_factor(collateral, debt, lt);
        let borrowed = simulate_health_factor(collateral, debt, lt, LendingAction::Borrow, amount);
        let repaid = simulate_health_factor(collateral, debt, lt, LendingAction::Repay, amount);

        prop_assert!(borrowed <= base);
        prop_assert!(repaid >= base);
    }

    /// Safe borrow capacity never exceeds max capacity, and both are
    /// non-negative.
    #[test]
    fn prop_borrow_capacity_margin(
        value_a in usd_amount(),
        value_b in usd_amount(),
        ltv_a in 0.0f64..1.0,
        ltv_b in 0.0f64..1.0,
    ) {
        let collaterals = [
            CollateralInput { value_usd: value_a, ltv: ltv_a, enabled: true },
            CollateralInput { value_usd: value_b, ltv: ltv_b, enabled: true },
        ];

        let capacity = borrow_capacity(&collaterals, &RiskPolicy::default());

        prop_assert!(capacity.max_borrow_usd >= 0.0);
        prop_assert!(capacity.safe_borrow_usd <= capacity.max_borrow_usd + 1e-9);
        prop_assert!(capacity.weighted_ltv <= 1.0);
    }

    /// The risk ladder is monotone: a strictly higher health factor never
    /// maps to a strictly riskier band.
    #[test]
    fn prop_risk_ladder_monotone(hf_low in 0.0f64..10.0, bump in 0.0f64..10.0) {
        fn rank(level: RiskLevel) -> u8 {
            match level {
                RiskLevel::Liquidatable => 0,
                RiskLevel::Critical => 1,
                RiskLevel::High => 2,
                RiskLevel::Medium => 3,
                RiskLevel::Low => 4,
                RiskLevel::Safe => 5,
            }
        }

        let policy = RiskPolicy::default();
        let lower = rank(classify_risk(hf_low, &policy));
        let higher = rank(classify_risk(hf_low + bump, &policy));
        prop_assert!(higher >= lower);
    }
}
