pub mod engine;
pub mod policy;

pub use engine::{
    borrow_capacity, classify_risk, health_factor, liquidation_price, price_drop_to_liquidation,
    simulate_health_factor, BorrowCapacity, CollateralInput,
};
pub use policy::{RecommendedAction, RiskLevel, RiskPolicy};
