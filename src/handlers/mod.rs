pub mod health;
pub mod markets;
pub mod positions;
pub mod routing;
pub mod simulation;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

/// Downstream interface of the core: plain request/response JSON routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/markets", get(markets::get_markets))
        .route("/positions/:address", get(positions::get_positions))
        .route("/routing", get(routing::get_routing_suggestion))
        .route("/simulate/deposit", post(simulation::simulate_deposit))
        .route("/simulate/withdraw", post(simulation::simulate_withdraw))
        .route("/health-factor/:address", get(health::get_health_factor))
}
