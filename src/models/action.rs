use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use super::market::Protocol;

/// State-changing lending actions the core can describe and pre-validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LendingAction {
    Supply,
    Withdraw,
    Borrow,
    Repay,
}

impl std::fmt::Display for LendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LendingAction::Supply => "supply",
            LendingAction::Withdraw => "withdraw",
            LendingAction::Borrow => "borrow",
            LendingAction::Repay => "repay",
        };
        f.write_str(s)
    }
}

/// Parameters for building/validating/simulating one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParams {
    pub protocol: Protocol,
    pub chain_id: u64,
    pub market_id: String,
    pub action: LendingAction,
    pub asset: Address,
    pub user: Address,
    /// Raw amount in the asset's native decimals
    pub amount: U256,
}

/// One transaction call for an external executor to sign and broadcast.
///
/// The core never signs or broadcasts; this is the entire contract with the
/// execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDescription {
    pub to: Address,
    pub value: U256,
    /// ABI-encoded calldata, 0x-prefixed hex
    pub data: String,
    /// Short human-readable summary, e.g. "approve USDC for Aave pool"
    pub summary: String,
}

impl CallDescription {
    pub fn new(to: Address, data: Vec<u8>, summary: impl Into<String>) -> Self {
        Self {
            to,
            value: U256::ZERO,
            data: format!("0x{}", hex::encode(data)),
            summary: summary.into(),
        }
    }

    /// Decode the calldata back to raw bytes.
    pub fn data_bytes(&self) -> Vec<u8> {
        hex::decode(self.data.trim_start_matches("0x")).unwrap_or_default()
    }
}

/// Fixed classification for validation and simulation failures.
///
/// Revert strings from dry-runs are mapped into this taxonomy; anything
/// unmatched surfaces as `Unclassified` with a truncated raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFailure {
    InsufficientBalance,
    InsufficientAllowance,
    CapExceeded,
    MarketPaused,
    MarketFrozen,
    TransferFailed,
    ZeroAmount,
    InsufficientLiquidity,
    Unclassified,
}

impl ActionFailure {
    /// Fixed user-facing message for each classification.
    pub fn message(&self) -> &'static str {
        match self {
            ActionFailure::InsufficientBalance => "Insufficient wallet balance for this amount",
            ActionFailure::InsufficientAllowance => "Token approval required before this action",
            ActionFailure::CapExceeded => "Amount exceeds the market's deposit capacity",
            ActionFailure::MarketPaused => "Market is currently paused",
            ActionFailure::MarketFrozen => "Market is frozen for new positions",
            ActionFailure::TransferFailed => "Token transfer failed",
            ActionFailure::ZeroAmount => "Amount must be greater than zero",
            ActionFailure::InsufficientLiquidity => "Pool does not have enough liquidity right now",
            ActionFailure::Unclassified => "Transaction would revert",
        }
    }
}

/// Outcome of adapter-level parameter validation. Never retried; the caller
/// decides what to do with a rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub failure: Option<ActionFailure>,
    pub message: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            failure: None,
            message: "ok".to_string(),
        }
    }

    pub fn rejected(failure: ActionFailure) -> Self {
        Self {
            valid: false,
            failure: Some(failure),
            message: failure.message().to_string(),
        }
    }

    pub fn rejected_with(failure: ActionFailure, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            failure: Some(failure),
            message: message.into(),
        }
    }
}

/// Outcome of a single dry-run attempt. Produced synchronously, never
/// retried by this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_estimate: u64,
    /// Shares for vault deposits, asset amount otherwise; raw native units
    pub expected_output: Option<U256>,
    pub failure: Option<ActionFailure>,
    /// Raw (truncated) revert string when the dry run reverted
    pub revert_message: Option<String>,
    /// Non-fatal notes, e.g. "approval required"
    pub warnings: Vec<String>,
}

impl SimulationResult {
    pub fn failed(failure: ActionFailure) -> Self {
        Self {
            success: false,
            gas_estimate: 0,
            expected_output: None,
            failure: Some(failure),
            revert_message: None,
            warnings: Vec::new(),
        }
    }
}

/// Action dimension for routing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Supply,
    Borrow,
}

/// A ranked alternative to the recommended market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteAlternative {
    pub protocol: Protocol,
    pub market_id: String,
    pub net_apy: f64,
    /// Signed APY difference versus the recommendation, percentage points
    pub apy_delta: f64,
    pub available_liquidity_usd: f64,
    pub reason: String,
}

/// Recommendation for a given asset + action, with justification and the
/// full ranked field. Ephemeral: recomputed on every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSuggestion {
    pub asset_symbol: String,
    pub action: RouteAction,
    pub recommended_protocol: Protocol,
    pub recommended_market_id: String,
    pub net_apy: f64,
    pub available_liquidity_usd: f64,
    /// Stable machine-readable reason, e.g. "highest_apy" / "lowest_borrow_cost"
    pub reason_code: String,
    /// Human-readable justification
    pub reason: String,
    pub alternatives: Vec<RouteAlternative>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_description_hex_round_trip() {
        let data = vec![0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x01];
        let call = CallDescription::new(Address::ZERO, data.clone(), "transfer");
        assert!(call.data.starts_with("0x"));
        assert_eq!(call.data_bytes(), data);
    }

    #[test]
    fn test_validation_rejection_carries_fixed_message() {
        let result = ValidationResult::rejected(ActionFailure::ZeroAmount);
        assert!(!result.valid);
        assert_eq!(result.failure, Some(ActionFailure::ZeroAmount));
        assert_eq!(result.message, ActionFailure::ZeroAmount.message());
    }

    #[test]
    fn test_failed_simulation_has_zero_gas() {
        let result = SimulationResult::failed(ActionFailure::InsufficientBalance);
        assert!(!result.success);
        assert_eq!(result.gas_estimate, 0);
        assert!(result.expected_output.is_none());
    }
}
