use axum::extract::{Path, State};
use axum::Json;

use crate::blockchain::EthereumClient;
use crate::error::AppError;
use crate::services::PositionsSnapshot;
use crate::AppState;

/// `GET /api/v1/positions/:address` — per-protocol positions plus the
/// cross-protocol rollup.
pub async fn get_positions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<PositionsSnapshot>, AppError> {
    let user = EthereumClient::validate_address(&address)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let snapshot = state.aggregator.get_user_positions(user).await?;
    Ok(Json(snapshot))
}
