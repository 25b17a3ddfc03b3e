pub mod action;
pub mod market;
pub mod position;

pub use action::{
    ActionFailure, ActionParams, CallDescription, LendingAction, RouteAction, RouteAlternative,
    RoutingSuggestion, SimulationResult, ValidationResult,
};
pub use market::{AssetCategory, LendingMarket, MarketFilter, Protocol};
pub use position::{AggregatedPosition, LendingPosition};
