//! Dry-run simulation for state-changing actions.
//!
//! Every action is pre-validated here immediately before execution, with a
//! single `eth_call` attempt against current chain state. Results are never
//! retried by this layer and the cache is never consulted: a simulation
//! answers "would this exact transaction succeed right now".

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::{info, warn};

use crate::adapters::contracts::{IERC20, IERC4626};
use crate::adapters::{AdapterError, LendingAdapter};
use crate::blockchain::{EthereumClient, EthereumError};
use crate::error::AppError;
use crate::models::{
    ActionFailure, ActionParams, CallDescription, Protocol, SimulationResult,
};

/// Revert strings longer than this are truncated before they reach users.
const MAX_REVERT_LEN: usize = 160;

pub struct SimulationService {
    client: EthereumClient,
    adapters: Arc<Vec<Box<dyn LendingAdapter>>>,
}

impl SimulationService {
    pub fn new(client: EthereumClient, adapters: Arc<Vec<Box<dyn LendingAdapter>>>) -> Self {
        Self { client, adapters }
    }

    fn adapter_for(&self, protocol: Protocol) -> Result<&dyn LendingAdapter, AppError> {
        self.adapters
            .iter()
            .find(|a| a.protocol() == protocol)
            .map(|a| a.as_ref())
            .ok_or_else(|| AppError::NotFound(format!("No adapter for protocol {}", protocol)))
    }

    /// Simulate a deposit end to end: balance, allowance, protocol
    /// pre-checks, dry-run, gas, expected output.
    pub async fn simulate_deposit(&self, params: &ActionParams) -> Result<SimulationResult, AppError> {
        let adapter = self.adapter_for(params.protocol)?;

        // (1) Wallet balance; a shortfall ends the simulation with zero gas
        // and no further calls
        let token = IERC20::new(params.asset, self.client.provider());
        let balance = token
            .balanceOf(params.user)
            .call()
            .await
            .map_err(|e| AppError::BlockchainError(format!("balanceOf failed: {}", e)))?
            ._0;

        if let Some(failed) = check_balance(balance, params.amount) {
            return Ok(failed);
        }

        let calls = adapter
            .build_calls(params)
            .map_err(|e| AppError::ValidationError(e.to_string()))?;
        let action_call = calls
            .last()
            .ok_or_else(|| AppError::InternalError("Adapter produced no calls".to_string()))?;

        // (2) Allowance; insufficient allowance is a warning, not a failure
        let allowance = token
            .allowance(params.user, action_call.to)
            .call()
            .await
            .map_err(|e| AppError::BlockchainError(format!("allowance failed: {}", e)))?
            ._0;

        let mut warnings = Vec::new();
        let approval_missing = allowance < params.amount;
        if approval_missing {
            warnings.push("approval required".to_string());
        }

        // (3) Protocol-specific pre-checks (vault capacity among them)
        match adapter.validate(params).await {
            Ok(validation) if !validation.valid => {
                let failure = validation.failure.unwrap_or(ActionFailure::Unclassified);
                let mut result = SimulationResult::failed(failure);
                result.warnings = warnings;
                return Ok(result);
            }
            Ok(_) => {}
            Err(AdapterError::UnsupportedAction(msg)) => {
                return Err(AppError::ValidationError(msg));
            }
            Err(e) => return Err(AppError::BlockchainError(e.to_string())),
        }

        // (4)+(5) Dry-run and gas. Before approval the action call cannot
        // succeed on-chain, so the dry-run is skipped; capacity checks and
        // expected output above/below still hold.
        let gas_estimate = if approval_missing {
            0
        } else {
            match self.dry_run_call(params, action_call).await? {
                Ok(gas) => gas,
                Err(failed) => {
                    let mut result = *failed;
                    result.warnings = warnings;
                    return Ok(result);
                }
            }
        };

        let expected_output = self.deposit_expected_output(params).await?;

        info!(
            protocol = %params.protocol,
            market = %params.market_id,
            gas_estimate,
            "Deposit simulation succeeded"
        );

        Ok(SimulationResult {
            success: true,
            gas_estimate,
            expected_output: Some(expected_output),
            failure: None,
            revert_message: None,
            warnings,
        })
    }

    /// Simulate a withdrawal. Distinguishes "user lacks the position"
    /// (insufficient balance) from "the pool cannot honor it right now"
    /// (insufficient liquidity).
    pub async fn simulate_withdraw(&self, params: &ActionParams) -> Result<SimulationResult, AppError> {
        let adapter = self.adapter_for(params.protocol)?;

        match adapter.validate(params).await {
            Ok(validation) if !validation.valid => {
                let failure = validation.failure.unwrap_or(ActionFailure::Unclassified);
                return Ok(SimulationResult::failed(failure));
            }
            Ok(_) => {}
            Err(AdapterError::UnsupportedAction(msg)) => {
                return Err(AppError::ValidationError(msg));
            }
            Err(e) => return Err(AppError::BlockchainError(e.to_string())),
        }

        let calls = adapter
            .build_calls(params)
            .map_err(|e| AppError::ValidationError(e.to_string()))?;
        let action_call = calls
            .last()
            .ok_or_else(|| AppError::InternalError("Adapter produced no calls".to_string()))?;

        let gas_estimate = match self.dry_run_call(params, action_call).await? {
            Ok(gas) => gas,
            Err(failed) => return Ok(*failed),
        };

        info!(
            protocol = %params.protocol,
            market = %params.market_id,
            gas_estimate,
            "Withdraw simulation succeeded"
        );

        // A withdrawal pays out the requested asset amount
        Ok(SimulationResult {
            success: true,
            gas_estimate,
            expected_output: Some(params.amount),
            failure: None,
            revert_message: None,
            warnings: Vec::new(),
        })
    }

    /// Dry-run one call and estimate its gas. A revert comes back as a
    /// classified `SimulationResult`, boxed so the happy path stays lean.
    async fn dry_run_call(
        &self,
        params: &ActionParams,
        call: &CallDescription,
    ) -> Result<Result<u64, Box<SimulationResult>>, AppError> {
        match self
            .client
            .dry_run(params.user, call.to, call.data_bytes())
            .await
        {
            Ok(_) => {}
            Err(EthereumError::Reverted(raw)) => {
                let failure = classify_revert(&raw);
                warn!(
                    protocol = %params.protocol,
                    failure = ?failure,
                    "Dry run reverted"
                );
                let mut result = SimulationResult::failed(failure);
                result.revert_message = Some(truncate_revert(&raw));
                return Ok(Err(Box::new(result)));
            }
            Err(e) => return Err(AppError::BlockchainError(e.to_string())),
        }

        let gas = self
            .client
            .estimate_gas(params.user, call.to, call.data_bytes())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Gas estimation failed after successful dry run");
                0
            });

        Ok(Ok(gas))
    }

    /// Shares for vault deposits (via the vault's own preview), the asset
    /// amount for 1:1 protocols.
    async fn deposit_expected_output(&self, params: &ActionParams) -> Result<U256, AppError> {
        if params.protocol != Protocol::MorphoVault {
            return Ok(expected_deposit_output(params.protocol, params.amount, None));
        }

        let vault_address = params
            .market_id
            .strip_prefix("morpho_vault:")
            .and_then(|raw| raw.parse::<Address>().ok())
            .ok_or_else(|| {
                AppError::ValidationError(format!("Bad vault market id: {}", params.market_id))
            })?;

        let vault = IERC4626::new(vault_address, self.client.provider());
        let shares = vault
            .previewDeposit(params.amount)
            .call()
            .await
            .map_err(|e| AppError::BlockchainError(format!("previewDeposit failed: {}", e)))?
            ._0;

        Ok(expected_deposit_output(params.protocol, params.amount, Some(shares)))
    }
}

/// 1:1 protocols pay out exactly the deposited amount; share vaults pay
/// out whatever the vault's own preview says, never an assumed ratio.
fn expected_deposit_output(protocol: Protocol, amount: U256, vault_preview: Option<U256>) -> U256 {
    match protocol {
        Protocol::MorphoVault => vault_preview.unwrap_or(amount),
        _ => amount,
    }
}

/// Balance gate shared by the deposit path: a shortfall produces the fixed
/// insufficient-balance result with a zero gas estimate.
fn check_balance(balance: U256, amount: U256) -> Option<SimulationResult> {
    if balance < amount {
        Some(SimulationResult::failed(ActionFailure::InsufficientBalance))
    } else {
        None
    }
}

/// Map a raw revert string onto the fixed failure taxonomy.
pub fn classify_revert(raw: &str) -> ActionFailure {
    let lower = raw.to_lowercase();

    if lower.contains("allowance") || lower.contains("not approved") {
        ActionFailure::InsufficientAllowance
    } else if lower.contains("insufficient balance")
        || lower.contains("exceeds balance")
        || lower.contains("balance too low")
    {
        ActionFailure::InsufficientBalance
    } else if lower.contains("more than max")
        || lower.contains("supply cap")
        || lower.contains("cap exceeded")
        || lower.contains("deposit limit")
    {
        ActionFailure::CapExceeded
    } else if lower.contains("paused") {
        ActionFailure::MarketPaused
    } else if lower.contains("frozen") {
        ActionFailure::MarketFrozen
    } else if lower.contains("transfer failed") || lower.contains("safetransfer") {
        ActionFailure::TransferFailed
    } else if lower.contains("zero amount")
        || lower.contains("amount is zero")
        || lower.contains("invalid amount")
    {
        ActionFailure::ZeroAmount
    } else if lower.contains("liquidity") || lower.contains("insufficient cash") {
        ActionFailure::InsufficientLiquidity
    } else {
        ActionFailure::Unclassified
    }
}

fn truncate_revert(raw: &str) -> String {
    if raw.len() <= MAX_REVERT_LEN {
        raw.to_string()
    } else {
        let mut end = MAX_REVERT_LEN;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &raw[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_gate() {
        // 0.0001 tokens held, 1.0 requested (18 decimals)
        let balance = U256::from(100_000_000_000_000u64);
        let amount = U256::from(10).pow(U256::from(18));

        let result = check_balance(balance, amount).expect("should fail");
        assert!(!result.success);
        assert_eq!(result.failure, Some(ActionFailure::InsufficientBalance));
        assert_eq!(result.gas_estimate, 0);
        assert!(result.expected_output.is_none());

        // enough balance passes the gate
        assert!(check_balance(amount, amount).is_none());
    }

    #[test]
    fn test_revert_classification_taxonomy() {
        assert_eq!(
            classify_revert("ERC20: transfer amount exceeds allowance"),
            ActionFailure::InsufficientAllowance
        );
        assert_eq!(
            classify_revert("ERC20: transfer amount exceeds balance"),
            ActionFailure::InsufficientBalance
        );
        assert_eq!(
            classify_revert("ERC4626: deposit more than max"),
            ActionFailure::CapExceeded
        );
        assert_eq!(
            classify_revert("execution reverted: SUPPLY CAP exceeded"),
            ActionFailure::CapExceeded
        );
        assert_eq!(classify_revert("Pausable: paused"), ActionFailure::MarketPaused);
        assert_eq!(classify_revert("RESERVE_FROZEN"), ActionFailure::MarketFrozen);
        assert_eq!(
            classify_revert("SafeERC20: transfer failed"),
            ActionFailure::TransferFailed
        );
        assert_eq!(classify_revert("invalid amount"), ActionFailure::ZeroAmount);
        assert_eq!(
            classify_revert("execution reverted: insufficient cash"),
            ActionFailure::InsufficientLiquidity
        );
        assert_eq!(
            classify_revert("something nobody has seen before"),
            ActionFailure::Unclassified
        );
    }

    #[test]
    fn test_vault_deposit_pays_out_preview_not_amount() {
        let amount = U256::from(1_000_000u64);
        let preview = U256::from(950_000u64);

        // share vault: the preview result is the expected output
        assert_eq!(
            expected_deposit_output(Protocol::MorphoVault, amount, Some(preview)),
            preview
        );

        // 1:1 protocols: output equals the deposited amount
        assert_eq!(
            expected_deposit_output(Protocol::AaveV3, amount, None),
            amount
        );
        assert_eq!(
            expected_deposit_output(Protocol::CompoundV3, amount, None),
            amount
        );
    }

    #[test]
    fn test_revert_truncation() {
        let short = "revert: no";
        assert_eq!(truncate_revert(short), short);

        let long = "x".repeat(500);
        let truncated = truncate_revert(&long);
        assert!(truncated.chars().count() <= MAX_REVERT_LEN + 1);
        assert!(truncated.ends_with('…'));
    }
}
