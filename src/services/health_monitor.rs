//! Liquidation-risk alerting with severity escalation and de-duplication.
//!
//! Alerts are not errors: they escalate by severity as a position degrades
//! and are de-duplicated so an unchanged risk state does not re-alert on
//! every polling tick.

use std::collections::HashMap;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{LendingPosition, Protocol};
use crate::risk::{classify_risk, RiskLevel, RiskPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Danger,
    Critical,
}

impl AlertSeverity {
    /// Which risk bands raise an alert at all.
    fn from_risk_level(level: RiskLevel) -> Option<Self> {
        match level {
            RiskLevel::Liquidatable | RiskLevel::Critical => Some(AlertSeverity::Critical),
            RiskLevel::High => Some(AlertSeverity::Danger),
            RiskLevel::Medium => Some(AlertSeverity::Warning),
            RiskLevel::Low | RiskLevel::Safe => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
    pub id: Uuid,
    pub user: Address,
    pub protocol: Protocol,
    pub severity: AlertSeverity,
    pub health_factor: f64,
    pub risk_level: RiskLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Tracks the last alerted severity per (user, protocol) so repeated
/// evaluations of the same risk state stay silent.
pub struct HealthMonitor {
    policy: RiskPolicy,
    last_alerted: RwLock<HashMap<(Address, Protocol), AlertSeverity>>,
}

impl HealthMonitor {
    pub fn new(policy: RiskPolicy) -> Self {
        Self {
            policy,
            last_alerted: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate a user's positions and emit alerts for protocols whose risk
    /// state changed since the last evaluation.
    pub async fn evaluate(&self, user: Address, positions: &[LendingPosition]) -> Vec<HealthAlert> {
        // Worst health factor per protocol drives the alert level
        let mut per_protocol: HashMap<Protocol, f64> = HashMap::new();
        for position in positions {
            let hf = position.effective_health_factor();
            per_protocol
                .entry(position.protocol)
                .and_modify(|current| {
                    if hf < *current {
                        *current = hf;
                    }
                })
                .or_insert(hf);
        }

        let mut alerts = Vec::new();
        let mut state = self.last_alerted.write().await;

        for (protocol, hf) in per_protocol {
            let level = classify_risk(hf, &self.policy);
            let key = (user, protocol);

            match AlertSeverity::from_risk_level(level) {
                Some(severity) => {
                    let unchanged = state.get(&key) == Some(&severity);
                    if unchanged {
                        continue;
                    }
                    state.insert(key, severity);

                    let alert = HealthAlert {
                        id: Uuid::new_v4(),
                        user,
                        protocol,
                        severity,
                        health_factor: hf,
                        risk_level: level,
                        message: format!(
                            "{} on {} (health factor {:.2})",
                            level.message(),
                            protocol.display_name(),
                            hf
                        ),
                        created_at: Utc::now(),
                    };

                    info!(
                        user = %user,
                        protocol = %protocol,
                        severity = ?severity,
                        health_factor = hf,
                        "Raising liquidation-risk alert"
                    );

                    alerts.push(alert);
                }
                None => {
                    // Recovered; forget the old state so a future
                    // degradation alerts again
                    state.remove(&key);
                }
            }
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(protocol: Protocol, hf: f64) -> LendingPosition {
        LendingPosition {
            protocol,
            chain_id: 1,
            market_id: format!("{}:WETH", protocol),
            asset_address: Address::ZERO,
            asset_symbol: "WETH".to_string(),
            asset_decimals: 18,
            supply_balance: 1.0,
            supply_balance_usd: 2_000.0,
            borrow_balance: 0.5,
            borrow_balance_usd: 1_000.0,
            collateral_enabled: true,
            supply_apy: 2.0,
            borrow_apy: 3.0,
            health_factor: Some(hf),
            liquidation_price: None,
            last_updated: 0,
        }
    }

    #[tokio::test]
    async fn test_alert_severity_mapping() {
        let monitor = HealthMonitor::new(RiskPolicy::default());
        let user = Address::ZERO;

        let alerts = monitor.evaluate(user, &[position(Protocol::AaveV3, 1.05)]).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);

        let alerts = monitor.evaluate(user, &[position(Protocol::CompoundV2, 1.2)]).await;
        assert_eq!(alerts[0].severity, AlertSeverity::Danger);

        let alerts = monitor.evaluate(user, &[position(Protocol::CompoundV3, 1.4)]).await;
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_same_state_does_not_realert() {
        let monitor = HealthMonitor::new(RiskPolicy::default());
        let user = Address::ZERO;
        let positions = [position(Protocol::AaveV3, 1.05)];

        let first = monitor.evaluate(user, &positions).await;
        assert_eq!(first.len(), 1);

        // identical risk state on the next tick stays silent
        let second = monitor.evaluate(user, &positions).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_escalation_realerts() {
        let monitor = HealthMonitor::new(RiskPolicy::default());
        let user = Address::ZERO;

        let warning = monitor.evaluate(user, &[position(Protocol::AaveV3, 1.4)]).await;
        assert_eq!(warning[0].severity, AlertSeverity::Warning);

        let critical = monitor.evaluate(user, &[position(Protocol::AaveV3, 1.02)]).await;
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_recovery_clears_dedup_state() {
        let monitor = HealthMonitor::new(RiskPolicy::default());
        let user = Address::ZERO;

        monitor.evaluate(user, &[position(Protocol::AaveV3, 1.05)]).await;

        // healthy tick clears the state
        let healthy = monitor.evaluate(user, &[position(Protocol::AaveV3, 3.0)]).await;
        assert!(healthy.is_empty());

        // degradation after recovery alerts again
        let again = monitor.evaluate(user, &[position(Protocol::AaveV3, 1.05)]).await;
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn test_safe_positions_never_alert() {
        let monitor = HealthMonitor::new(RiskPolicy::default());
        let alerts = monitor
            .evaluate(Address::ZERO, &[position(Protocol::AaveV3, 5.0)])
            .await;
        assert!(alerts.is_empty());
    }
}
