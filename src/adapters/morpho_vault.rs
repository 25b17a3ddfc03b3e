//! ERC-4626 share-vault adapter (Morpho-style).
//!
//! Shares are not assets: every conversion goes through the vault's own
//! preview/convert functions, because fees and strategy slippage make the
//! share/asset ratio non-constant between calls. Vault metadata (names,
//! APYs, TVL) comes from the GraphQL API; balances and conversions always
//! come from the chain.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::warn;

use crate::adapters::contracts::{IERC20, IERC4626};
use crate::adapters::traits::{clamp_reward_apy, AdapterError, LendingAdapter};
use crate::adapters::{scale_down, unix_now};
use crate::blockchain::EthereumClient;
use crate::models::{
    ActionFailure, ActionParams, AssetCategory, CallDescription, LendingAction, LendingMarket,
    LendingPosition, Protocol, ValidationResult,
};
use crate::services::price_service::PriceService;
use crate::services::vault_api::{VaultApiClient, VaultItem};
use crate::services::yields_api::YieldsApiClient;
use alloy::sol_types::SolCall;

const YIELDS_PROJECT: &str = "morpho-blue";

pub struct MorphoVaultAdapter {
    client: EthereumClient,
    chain_id: u64,
    vault_api: Arc<VaultApiClient>,
    price_service: Arc<PriceService>,
    yields: Arc<YieldsApiClient>,
}

impl MorphoVaultAdapter {
    pub fn new(
        client: EthereumClient,
        chain_id: u64,
        vault_api: Arc<VaultApiClient>,
        price_service: Arc<PriceService>,
        yields: Arc<YieldsApiClient>,
    ) -> Self {
        Self {
            client,
            chain_id,
            vault_api,
            price_service,
            yields,
        }
    }

    fn market_id(vault_address: &str) -> String {
        format!("morpho_vault:{}", vault_address.to_lowercase())
    }

    fn parse_vault_address(market_id: &str) -> Result<Address, AdapterError> {
        let raw = market_id
            .strip_prefix("morpho_vault:")
            .ok_or_else(|| AdapterError::InvalidData(format!("Bad market id: {}", market_id)))?;
        Address::from_str(raw)
            .map_err(|e| AdapterError::InvalidData(format!("Bad vault address {}: {}", raw, e)))
    }

    async fn vault_market(&self, vault: &VaultItem) -> Result<LendingMarket, AdapterError> {
        let asset_address = Address::from_str(&vault.asset.address)
            .map_err(|e| AdapterError::InvalidData(format!("Bad asset address: {}", e)))?;

        let price_usd = self
            .price_service
            .price_usd(&vault.asset.symbol)
            .await
            .map_err(|e| AdapterError::InvalidData(format!("Price for {}: {}", vault.asset.symbol, e)))?;

        let reward_apy =
            clamp_reward_apy(self.yields.reward_apy(YIELDS_PROJECT, &vault.asset.symbol).await);

        let total_supply = vault.state.total_assets;
        let total_supply_usd = vault.state.total_assets_usd;

        Ok(LendingMarket {
            protocol: Protocol::MorphoVault,
            chain_id: self.chain_id,
            market_id: Self::market_id(&vault.address),
            asset_address,
            asset_symbol: vault.asset.symbol.clone(),
            asset_decimals: vault.asset.decimals,
            asset_category: AssetCategory::from_symbol(&vault.asset.symbol),
            // netApy is already net of the vault performance fee
            supply_apy: vault.state.net_apy,
            borrow_apy: 0.0,
            reward_apy,
            total_supply,
            total_borrow: 0.0,
            total_supply_usd,
            total_borrow_usd: 0.0,
            // ERC-4626 withdrawals are bounded by vault idle liquidity;
            // full TVL is the upper bound we can state from metadata
            available_liquidity_usd: total_supply_usd,
            utilization: 0.0,
            ltv: 0.0,
            liquidation_threshold: 0.0,
            liquidation_penalty: 0.0,
            supply_cap: None,
            borrow_cap: None,
            can_supply: true,
            can_borrow: false,
            can_use_as_collateral: false,
            is_frozen: false,
            is_paused: false,
            last_updated: unix_now(),
        })
    }

    async fn price_for(&self, symbol: &str) -> Option<f64> {
        match self.price_service.price_usd(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Vault asset price unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl LendingAdapter for MorphoVaultAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::MorphoVault
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        let vaults = self
            .vault_api
            .fetch_vaults(self.chain_id)
            .await
            .map_err(|e| AdapterError::RpcError(format!("Vault API failed: {}", e)))?;

        let mut markets = Vec::new();
        for vault in &vaults {
            match self.vault_market(vault).await {
                Ok(market) => markets.push(market),
                Err(e) => {
                    warn!(vault = %vault.symbol, error = %e, "Failed to build vault market, skipping");
                }
            }
        }

        Ok(markets)
    }

    async fn get_user_positions(&self, user: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let vaults = self
            .vault_api
            .fetch_vaults(self.chain_id)
            .await
            .map_err(|e| AdapterError::RpcError(format!("Vault API failed: {}", e)))?;

        let mut positions = Vec::new();

        for vault in &vaults {
            let vault_address = match Address::from_str(&vault.address) {
                Ok(address) => address,
                Err(_) => continue,
            };

            let vault_contract = IERC4626::new(vault_address, self.client.provider());

            let shares = match vault_contract.balanceOf(user).call().await {
                Ok(result) => result._0,
                Err(e) => {
                    warn!(vault = %vault.symbol, error = %e, "Vault balance read failed, skipping");
                    continue;
                }
            };

            if shares.is_zero() {
                continue;
            }

            // Shares -> assets through the vault itself, never a cached ratio
            let underlying = vault_contract
                .convertToAssets(shares)
                .call()
                .await
                .map_err(|e| {
                    AdapterError::ContractError(format!(
                        "convertToAssets failed for {}: {}",
                        vault.symbol, e
                    ))
                })?
                ._0;

            let asset_address = Address::from_str(&vault.asset.address)
                .map_err(|e| AdapterError::InvalidData(format!("Bad asset address: {}", e)))?;

            let price_usd = match self.price_for(&vault.asset.symbol).await {
                Some(price) => price,
                None => continue,
            };

            let supply_balance = scale_down(underlying, vault.asset.decimals);

            positions.push(LendingPosition {
                protocol: Protocol::MorphoVault,
                chain_id: self.chain_id,
                market_id: Self::market_id(&vault.address),
                asset_address,
                asset_symbol: vault.asset.symbol.clone(),
                asset_decimals: vault.asset.decimals,
                supply_balance,
                supply_balance_usd: supply_balance * price_usd,
                borrow_balance: 0.0,
                borrow_balance_usd: 0.0,
                collateral_enabled: false,
                supply_apy: vault.state.net_apy,
                borrow_apy: 0.0,
                health_factor: None,
                liquidation_price: None,
                last_updated: unix_now(),
            });
        }

        Ok(positions)
    }

    fn build_supply(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let vault = Self::parse_vault_address(&params.market_id)?;

        let approve = IERC20::approveCall {
            spender: vault,
            amount: params.amount,
        };
        let deposit = IERC4626::depositCall {
            assets: params.amount,
            receiver: params.user,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for vault"),
            CallDescription::new(vault, deposit.abi_encode(), "deposit into vault"),
        ])
    }

    fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let vault = Self::parse_vault_address(&params.market_id)?;

        let withdraw = IERC4626::withdrawCall {
            assets: params.amount,
            receiver: params.user,
            owner: params.user,
        };

        Ok(vec![CallDescription::new(
            vault,
            withdraw.abi_encode(),
            "withdraw assets from vault",
        )])
    }

    fn build_borrow(&self, _params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        Err(AdapterError::UnsupportedAction(
            "vaults do not support borrowing".to_string(),
        ))
    }

    fn build_repay(&self, _params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        Err(AdapterError::UnsupportedAction(
            "vaults do not support repaying".to_string(),
        ))
    }

    async fn validate(&self, params: &ActionParams) -> Result<ValidationResult, AdapterError> {
        if params.amount.is_zero() {
            return Ok(ValidationResult::rejected(ActionFailure::ZeroAmount));
        }

        let vault_address = Self::parse_vault_address(&params.market_id)?;
        let vault_contract = IERC4626::new(vault_address, self.client.provider());

        match params.action {
            LendingAction::Supply => {
                let token = IERC20::new(params.asset, self.client.provider());
                let balance = token
                    .balanceOf(params.user)
                    .call()
                    .await
                    .map_err(|e| AdapterError::ContractError(format!("balanceOf failed: {}", e)))?
                    ._0;
                if balance < params.amount {
                    return Ok(ValidationResult::rejected(ActionFailure::InsufficientBalance));
                }

                let max_deposit = vault_contract
                    .maxDeposit(params.user)
                    .call()
                    .await
                    .map_err(|e| AdapterError::ContractError(format!("maxDeposit failed: {}", e)))?
                    ._0;
                if max_deposit < params.amount {
                    return Ok(ValidationResult::rejected(ActionFailure::CapExceeded));
                }
            }
            LendingAction::Withdraw => {
                let shares = vault_contract
                    .balanceOf(params.user)
                    .call()
                    .await
                    .map_err(|e| AdapterError::ContractError(format!("balanceOf failed: {}", e)))?
                    ._0;
                let holdings = vault_contract
                    .convertToAssets(shares)
                    .call()
                    .await
                    .map_err(|e| AdapterError::ContractError(format!("convertToAssets failed: {}", e)))?
                    ._0;

                if holdings < params.amount {
                    return Ok(ValidationResult::rejected(ActionFailure::InsufficientBalance));
                }

                // The position exists; if the vault still cannot honor it,
                // that is a pool liquidity problem, not a user problem
                let max_withdraw = vault_contract
                    .maxWithdraw(params.user)
                    .call()
                    .await
                    .map_err(|e| AdapterError::ContractError(format!("maxWithdraw failed: {}", e)))?
                    ._0;
                if max_withdraw < params.amount {
                    return Ok(ValidationResult::rejected(ActionFailure::InsufficientLiquidity));
                }
            }
            LendingAction::Borrow | LendingAction::Repay => {
                return Err(AdapterError::UnsupportedAction(
                    "vaults do not support debt actions".to_string(),
                ));
            }
        }

        Ok(ValidationResult::ok())
    }

    async fn calculate_health_factor(&self, _user: Address) -> Result<f64, AdapterError> {
        // Vault positions carry no debt
        Ok(f64::INFINITY)
    }

    async fn simulate_health_factor(
        &self,
        _user: Address,
        _action: LendingAction,
        _amount_usd: f64,
    ) -> Result<f64, AdapterError> {
        Ok(f64::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_id_round_trip() {
        let id = MorphoVaultAdapter::market_id("0xBEeF01735c132Ada46AA9aA4c54623cAA92A64CB");
        assert_eq!(id, "morpho_vault:0xbeef01735c132ada46aa9aa4c54623caa92a64cb");

        let parsed = MorphoVaultAdapter::parse_vault_address(&id).unwrap();
        assert_eq!(
            parsed,
            Address::from_str("0xBEeF01735c132Ada46AA9aA4c54623cAA92A64CB").unwrap()
        );
    }

    #[test]
    fn test_bad_market_id_rejected() {
        assert!(MorphoVaultAdapter::parse_vault_address("aave_v3:USDC").is_err());
        assert!(MorphoVaultAdapter::parse_vault_address("morpho_vault:nonsense").is_err());
    }
}
