use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{MarketFilter, RouteAction, RoutingSuggestion};
use crate::services::RoutingEngine;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RoutingQuery {
    pub asset: String,
    pub action: RouteAction,
    /// Optional amount for liquidity-aware filtering
    pub amount_usd: Option<f64>,
}

/// `GET /api/v1/routing?asset=USDC&action=supply` — best market for the
/// requested intent, with ranked alternatives.
pub async fn get_routing_suggestion(
    State(state): State<AppState>,
    Query(query): Query<RoutingQuery>,
) -> Result<Json<RoutingSuggestion>, AppError> {
    let snapshot = state.aggregator.get_markets(&MarketFilter::default()).await?;

    let suggestion = RoutingEngine::suggest(
        &snapshot.markets,
        &query.asset,
        query.action,
        query.amount_usd,
    )?;

    Ok(Json(suggestion))
}
