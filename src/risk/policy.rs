use serde::{Deserialize, Serialize};

/// Policy constants for risk classification and borrow sizing.
///
/// The margin and band edges are operator policy, not protocol truth; they
/// are injected wherever risk math runs instead of being read from globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Fraction of max borrow capacity considered safe
    pub safety_margin: f64,
    /// Band edges of the health-factor ladder, ascending
    pub critical_hf: f64,
    pub high_hf: f64,
    pub medium_hf: f64,
    pub low_hf: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            safety_margin: 0.8,
            critical_hf: 1.1,
            high_hf: 1.3,
            medium_hf: 1.5,
            low_hf: 2.0,
        }
    }
}

impl RiskPolicy {
    pub fn with_safety_margin(safety_margin: f64) -> Self {
        Self {
            safety_margin,
            ..Default::default()
        }
    }
}

/// Position risk band. The ladder is a strict threshold sequence over the
/// health factor; each band maps to one fixed message and action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Liquidatable,
    Critical,
    High,
    Medium,
    Low,
    Safe,
}

impl RiskLevel {
    pub fn message(&self) -> &'static str {
        match self {
            RiskLevel::Liquidatable => "Position is eligible for liquidation",
            RiskLevel::Critical => "Liquidation imminent on small price moves",
            RiskLevel::High => "High liquidation risk",
            RiskLevel::Medium => "Moderate liquidation risk",
            RiskLevel::Low => "Low liquidation risk",
            RiskLevel::Safe => "Position is safe",
        }
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        match self {
            RiskLevel::Liquidatable | RiskLevel::Critical => RecommendedAction::AddCollateral,
            RiskLevel::High => RecommendedAction::RepayDebt,
            RiskLevel::Medium | RiskLevel::Low => RecommendedAction::Monitor,
            RiskLevel::Safe => RecommendedAction::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    AddCollateral,
    RepayDebt,
    Monitor,
    None,
}
