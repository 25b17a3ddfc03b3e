use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::blockchain::EthereumClient;
use crate::error::AppError;
use crate::models::Protocol;
use crate::risk::{classify_risk, price_drop_to_liquidation, RecommendedAction, RiskLevel};
use crate::services::HealthAlert;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthFactorStatus {
    /// Minimum health factor across protocols; `None` when no debt exists
    pub lowest_health_factor: Option<f64>,
    pub riskiest_protocol: Option<Protocol>,
    pub risk_level: RiskLevel,
    pub message: String,
    pub recommended_action: RecommendedAction,
    /// Collateral price drop (percent) that would trigger liquidation
    pub price_drop_to_liquidation_pct: f64,
    pub alerts: Vec<HealthAlert>,
}

/// `GET /api/v1/health-factor/:address` — cross-protocol liquidation risk
/// summary with any newly-raised alerts.
pub async fn get_health_factor(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<HealthFactorStatus>, AppError> {
    let user = EthereumClient::validate_address(&address)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let snapshot = state.aggregator.get_user_positions(user).await?;

    let lowest = snapshot.aggregated.lowest_health_factor;
    let effective_hf = lowest.unwrap_or(f64::INFINITY);

    let risk_level = classify_risk(effective_hf, &state.policy);
    let alerts = state.health_monitor.evaluate(user, &snapshot.positions).await;

    Ok(Json(HealthFactorStatus {
        lowest_health_factor: lowest,
        riskiest_protocol: snapshot.aggregated.riskiest_protocol,
        risk_level,
        message: risk_level.message().to_string(),
        recommended_action: risk_level.recommended_action(),
        price_drop_to_liquidation_pct: if effective_hf.is_finite() {
            price_drop_to_liquidation(effective_hf)
        } else {
            price_drop_to_liquidation(f64::MAX)
        },
        alerts,
    }))
}

/// `GET /health` — liveness probe.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
