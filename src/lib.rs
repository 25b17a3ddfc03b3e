pub mod adapters;
pub mod blockchain;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod risk;
pub mod services;

use std::sync::Arc;

use crate::config::Settings;
use crate::risk::RiskPolicy;
use crate::services::{HealthMonitor, LendingAggregator, SimulationService};

/// Shared application state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub policy: RiskPolicy,
    pub aggregator: Arc<LendingAggregator>,
    pub simulation: Arc<SimulationService>,
    pub health_monitor: Arc<HealthMonitor>,
}
