use alloy::primitives::Address;
use async_trait::async_trait;

use crate::models::{
    ActionParams, CallDescription, LendingAction, LendingMarket, LendingPosition, Protocol,
    ValidationResult,
};

/// Common error type for all lending protocol adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Contract call failed: {0}")]
    ContractError(String),

    #[error("Invalid position data: {0}")]
    InvalidData(String),

    #[error("Action not supported by this protocol: {0}")]
    UnsupportedAction(String),

    #[error("Chain {0} not supported")]
    UnsupportedChain(u64),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Reward APY contributions are reported separately from base APY and are
/// clamped before they reach the unified model, so a corrupt upstream
/// number cannot masquerade as a sane blended rate.
pub fn clamp_reward_apy(apy: f64) -> f64 {
    if apy.is_finite() {
        apy.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Common interface for all lending protocol adapters.
///
/// Adapters absorb every protocol-specific accounting scheme (1:1 receipt
/// tokens, share/asset vault conversion, exchange-rate-indexed tokens,
/// base-asset ledgers) and hand the rest of the system one unified model.
#[async_trait]
pub trait LendingAdapter: Send + Sync {
    /// Which protocol this adapter speaks for
    fn protocol(&self) -> Protocol;

    fn chain_id(&self) -> u64;

    /// Fetch all markets the protocol currently exposes.
    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError>;

    /// Fetch all positions a user holds in this protocol.
    async fn get_user_positions(&self, user: Address) -> Result<Vec<LendingPosition>, AdapterError>;

    /// Build the call sequence for a supply (may include an approval).
    fn build_supply(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError>;

    fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError>;

    fn build_borrow(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError>;

    fn build_repay(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError>;

    /// Pre-validate action parameters against current chain state. Never
    /// retried; a rejection is a structured result, not an error.
    async fn validate(&self, params: &ActionParams) -> Result<ValidationResult, AdapterError>;

    /// Current account-level health factor for the user.
    async fn calculate_health_factor(&self, user: Address) -> Result<f64, AdapterError>;

    /// What-if health factor after applying `action` for `amount_usd`,
    /// computed without mutating anything.
    async fn simulate_health_factor(
        &self,
        user: Address,
        action: LendingAction,
        amount_usd: f64,
    ) -> Result<f64, AdapterError>;

    /// Dispatch to the right builder for the action in `params`.
    fn build_calls(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        match params.action {
            LendingAction::Supply => self.build_supply(params),
            LendingAction::Withdraw => self.build_withdraw(params),
            LendingAction::Borrow => self.build_borrow(params),
            LendingAction::Repay => self.build_repay(params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_apy_clamping() {
        assert_eq!(clamp_reward_apy(-5.0), 0.0);
        assert_eq!(clamp_reward_apy(12.5), 12.5);
        assert_eq!(clamp_reward_apy(5000.0), 100.0);
        assert_eq!(clamp_reward_apy(f64::NAN), 0.0);
        assert_eq!(clamp_reward_apy(f64::INFINITY), 0.0);
    }
}
