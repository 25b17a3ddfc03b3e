use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::models::{ActionParams, LendingAction, SimulationResult};
use crate::AppState;

/// `POST /api/v1/simulate/deposit` — dry-run a deposit before execution.
pub async fn simulate_deposit(
    State(state): State<AppState>,
    Json(mut params): Json<ActionParams>,
) -> Result<Json<SimulationResult>, AppError> {
    params.action = LendingAction::Supply;
    let result = state.simulation.simulate_deposit(&params).await?;
    Ok(Json(result))
}

/// `POST /api/v1/simulate/withdraw` — dry-run a withdrawal before execution.
pub async fn simulate_withdraw(
    State(state): State<AppState>,
    Json(mut params): Json<ActionParams>,
) -> Result<Json<SimulationResult>, AppError> {
    params.action = LendingAction::Withdraw;
    let result = state.simulation.simulate_withdraw(&params).await?;
    Ok(Json(result))
}
