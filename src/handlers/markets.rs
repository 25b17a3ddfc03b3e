use axum::extract::{Query, State};
use axum::Json;

use crate::error::AppError;
use crate::models::MarketFilter;
use crate::services::MarketsSnapshot;
use crate::AppState;

/// `GET /api/v1/markets` — unified market list across all protocols.
///
/// The snapshot carries fan-out stats (attempted vs succeeded) and the data
/// provenance tag, so a caller can see when it is looking at stale
/// fallback data.
pub async fn get_markets(
    State(state): State<AppState>,
    Query(filter): Query<MarketFilter>,
) -> Result<Json<MarketsSnapshot>, AppError> {
    let snapshot = state.aggregator.get_markets(&filter).await?;
    Ok(Json(snapshot))
}
