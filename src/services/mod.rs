pub mod aggregator;
pub mod health_monitor;
pub mod price_service;
pub mod routing;
pub mod simulation;
pub mod vault_api;
pub mod yields_api;

pub use aggregator::{LendingAggregator, MarketsSnapshot, PositionsSnapshot};
pub use health_monitor::{AlertSeverity, HealthAlert, HealthMonitor};
pub use price_service::{PriceError, PriceService};
pub use routing::RoutingEngine;
pub use simulation::SimulationService;
pub use vault_api::VaultApiClient;
pub use yields_api::YieldsApiClient;
