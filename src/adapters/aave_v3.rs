//! Aave-V3-style pooled market adapter.
//!
//! Receipt tokens (aTokens) are 1:1 with the underlying, so balances need
//! no conversion; the work here is reserve enumeration, ray-rate math and
//! account-level health data.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::warn;

use crate::adapters::contracts::IERC20;
use crate::adapters::traits::{clamp_reward_apy, AdapterError, LendingAdapter};
use crate::adapters::{scale_down, unix_now};
use crate::blockchain::EthereumClient;
use crate::models::{
    ActionFailure, ActionParams, AssetCategory, CallDescription, LendingAction, LendingMarket,
    LendingPosition, Protocol, ValidationResult,
};
use crate::risk;
use crate::services::price_service::PriceService;
use crate::services::yields_api::YieldsApiClient;

sol! {
    #[sol(rpc)]
    interface IAavePoolV3 {
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralBase,
            uint256 totalDebtBase,
            uint256 availableBorrowsBase,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );
        function supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode) external;
        function withdraw(address asset, uint256 amount, address to) external returns (uint256);
        function borrow(address asset, uint256 amount, uint256 interestRateMode, uint16 referralCode, address onBehalfOf) external;
        function repay(address asset, uint256 amount, uint256 interestRateMode, address onBehalfOf) external returns (uint256);
    }

    #[sol(rpc)]
    interface IAaveProtocolDataProvider {
        struct TokenData {
            string symbol;
            address tokenAddress;
        }

        function getAllReservesTokens() external view returns (TokenData[] memory);
        function getReserveConfigurationData(address asset) external view returns (
            uint256 decimals,
            uint256 ltv,
            uint256 liquidationThreshold,
            uint256 liquidationBonus,
            uint256 reserveFactor,
            bool usageAsCollateralEnabled,
            bool borrowingEnabled,
            bool stableBorrowRateEnabled,
            bool isActive,
            bool isFrozen
        );
        function getReserveData(address asset) external view returns (
            uint256 unbacked,
            uint256 accruedToTreasuryScaled,
            uint256 totalAToken,
            uint256 totalStableDebt,
            uint256 totalVariableDebt,
            uint256 liquidityRate,
            uint256 variableBorrowRate,
            uint256 stableBorrowRate,
            uint256 averageStableBorrowRate,
            uint256 liquidityIndex,
            uint256 variableBorrowIndex,
            uint40 lastUpdateTimestamp
        );
        function getUserReserveData(address asset, address user) external view returns (
            uint256 currentATokenBalance,
            uint256 currentStableDebt,
            uint256 currentVariableDebt,
            uint256 principalStableDebt,
            uint256 scaledVariableDebt,
            uint256 stableBorrowRate,
            uint256 liquidityRate,
            uint40 stableRateLastUpdated,
            bool usageAsCollateralEnabled
        );
        function getReserveCaps(address asset) external view returns (uint256 borrowCap, uint256 supplyCap);
        function getPaused(address asset) external view returns (bool isPaused);
    }
}

/// Variable interest rate mode for borrow/repay.
const VARIABLE_RATE_MODE: u64 = 2;

/// Project slug in the yields aggregator.
const YIELDS_PROJECT: &str = "aave-v3";

pub struct AaveV3Adapter {
    client: EthereumClient,
    chain_id: u64,
    pool: Address,
    data_provider: Address,
    price_service: Arc<PriceService>,
    yields: Arc<YieldsApiClient>,
}

impl AaveV3Adapter {
    pub fn new(
        client: EthereumClient,
        chain_id: u64,
        price_service: Arc<PriceService>,
        yields: Arc<YieldsApiClient>,
    ) -> Result<Self, AdapterError> {
        let (pool, data_provider) = Self::addresses(chain_id)?;

        Ok(Self {
            client,
            chain_id,
            pool,
            data_provider,
            price_service,
            yields,
        })
    }

    fn addresses(chain_id: u64) -> Result<(Address, Address), AdapterError> {
        match chain_id {
            1 => Ok((
                Address::from_str("0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2").unwrap(),
                Address::from_str("0x7B4EB56E7CD4b454BA8ff71E4518426369a138a3").unwrap(),
            )),
            _ => Err(AdapterError::UnsupportedChain(chain_id)),
        }
    }

    /// Convert an Aave ray rate (27 decimals, per-second) to a percent APY.
    fn ray_rate_to_apy(rate: U256) -> f64 {
        let rate_decimal = scale_down(rate, 27);
        let seconds_per_year = 365.25 * 24.0 * 3600.0;
        let apy = (1.0 + rate_decimal / seconds_per_year).powf(seconds_per_year) - 1.0;
        apy * 100.0
    }

    fn market_id(symbol: &str) -> String {
        format!("aave_v3:{}", symbol)
    }

    async fn fetch_reserve_market(
        &self,
        symbol: &str,
        asset: Address,
    ) -> Result<LendingMarket, AdapterError> {
        let provider = self.client.provider();
        let data_provider = IAaveProtocolDataProvider::new(self.data_provider, provider);

        let config = data_provider
            .getReserveConfigurationData(asset)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("Config fetch failed for {}: {}", symbol, e)))?;

        let reserve = data_provider
            .getReserveData(asset)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("Reserve fetch failed for {}: {}", symbol, e)))?;

        let caps = data_provider
            .getReserveCaps(asset)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("Caps fetch failed for {}: {}", symbol, e)))?;

        let is_paused = data_provider
            .getPaused(asset)
            .call()
            .await
            .map(|r| r.isPaused)
            .unwrap_or(false);

        let decimals = config.decimals.to::<u64>() as u8;

        let price_usd = self
            .price_service
            .price_usd(symbol)
            .await
            .map_err(|e| AdapterError::InvalidData(format!("Price for {}: {}", symbol, e)))?;

        let total_supply = scale_down(reserve.totalAToken, decimals);
        let total_borrow =
            scale_down(reserve.totalStableDebt, decimals) + scale_down(reserve.totalVariableDebt, decimals);

        let reward_apy = clamp_reward_apy(self.yields.reward_apy(YIELDS_PROJECT, symbol).await);

        // Aave reports ltv / liquidation threshold in basis points, and the
        // liquidation bonus as 1e4 + penalty
        let ltv = config.ltv.to::<u64>() as f64 / 10_000.0;
        let liquidation_threshold = config.liquidationThreshold.to::<u64>() as f64 / 10_000.0;
        let liquidation_bonus = config.liquidationBonus.to::<u64>() as f64 / 10_000.0;
        let liquidation_penalty = (liquidation_bonus - 1.0).max(0.0);

        let supply_cap = caps.supplyCap.to::<u64>();
        let borrow_cap = caps.borrowCap.to::<u64>();

        let is_active = config.isActive;
        let is_frozen = config.isFrozen;

        Ok(LendingMarket {
            protocol: Protocol::AaveV3,
            chain_id: self.chain_id,
            market_id: Self::market_id(symbol),
            asset_address: asset,
            asset_symbol: symbol.to_string(),
            asset_decimals: decimals,
            asset_category: AssetCategory::from_symbol(symbol),
            supply_apy: Self::ray_rate_to_apy(reserve.liquidityRate),
            borrow_apy: Self::ray_rate_to_apy(reserve.variableBorrowRate),
            reward_apy,
            total_supply,
            total_borrow,
            total_supply_usd: total_supply * price_usd,
            total_borrow_usd: total_borrow * price_usd,
            available_liquidity_usd: (total_supply - total_borrow).max(0.0) * price_usd,
            utilization: LendingMarket::compute_utilization(total_supply, total_borrow),
            ltv,
            liquidation_threshold,
            liquidation_penalty,
            supply_cap: (supply_cap > 0).then(|| supply_cap as f64),
            borrow_cap: (borrow_cap > 0).then(|| borrow_cap as f64),
            can_supply: is_active && !is_frozen && !is_paused,
            can_borrow: config.borrowingEnabled && is_active && !is_frozen && !is_paused,
            can_use_as_collateral: config.usageAsCollateralEnabled && ltv > 0.0,
            is_frozen,
            is_paused,
            last_updated: unix_now(),
        })
    }

    async fn account_data(
        &self,
        user: Address,
    ) -> Result<IAavePoolV3::getUserAccountDataReturn, AdapterError> {
        let pool = IAavePoolV3::new(self.pool, self.client.provider());
        pool.getUserAccountData(user)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("getUserAccountData failed: {}", e)))
    }
}

#[async_trait]
impl LendingAdapter for AaveV3Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::AaveV3
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        let data_provider = IAaveProtocolDataProvider::new(self.data_provider, self.client.provider());

        let reserves = data_provider
            .getAllReservesTokens()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("Reserves fetch failed: {}", e)))?
            ._0;

        let mut markets = Vec::new();
        for token in &reserves {
            match self.fetch_reserve_market(&token.symbol, token.tokenAddress).await {
                Ok(market) => markets.push(market),
                Err(e) => {
                    // One bad reserve must not take down the whole market list
                    warn!(
                        symbol = %token.symbol,
                        error = %e,
                        "Failed to fetch Aave reserve, skipping"
                    );
                }
            }
        }

        Ok(markets)
    }

    async fn get_user_positions(&self, user: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let data_provider = IAaveProtocolDataProvider::new(self.data_provider, self.client.provider());

        let reserves = data_provider
            .getAllReservesTokens()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("Reserves fetch failed: {}", e)))?
            ._0;

        let account = self.account_data(user).await?;
        let account_hf = if account.totalDebtBase.is_zero() {
            None
        } else {
            Some(scale_down(account.healthFactor, 18))
        };

        let mut positions = Vec::new();

        for token in &reserves {
            let user_reserve = match data_provider
                .getUserReserveData(token.tokenAddress, user)
                .call()
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    warn!(symbol = %token.symbol, error = %e, "User reserve read failed, skipping");
                    continue;
                }
            };

            let has_supply = !user_reserve.currentATokenBalance.is_zero();
            let has_debt = !user_reserve.currentStableDebt.is_zero()
                || !user_reserve.currentVariableDebt.is_zero();

            if !has_supply && !has_debt {
                continue;
            }

            let reserve = data_provider
                .getReserveData(token.tokenAddress)
                .call()
                .await
                .map_err(|e| {
                    AdapterError::ContractError(format!("Reserve fetch failed for {}: {}", token.symbol, e))
                })?;

            let config = data_provider
                .getReserveConfigurationData(token.tokenAddress)
                .call()
                .await
                .map_err(|e| {
                    AdapterError::ContractError(format!("Config fetch failed for {}: {}", token.symbol, e))
                })?;

            let decimals = config.decimals.to::<u64>() as u8;

            let price_usd = match self.price_service.price_usd(&token.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %token.symbol, error = %e, "Price unavailable, skipping position");
                    continue;
                }
            };

            // aToken balance is 1:1 with the underlying
            let supply_balance = scale_down(user_reserve.currentATokenBalance, decimals);
            let borrow_balance = scale_down(user_reserve.currentStableDebt, decimals)
                + scale_down(user_reserve.currentVariableDebt, decimals);

            let health_factor = if has_debt { account_hf } else { None };
            let liquidation_price = health_factor
                .filter(|_| user_reserve.usageAsCollateralEnabled)
                .and_then(|hf| risk::liquidation_price(price_usd, hf));

            positions.push(LendingPosition {
                protocol: Protocol::AaveV3,
                chain_id: self.chain_id,
                market_id: Self::market_id(&token.symbol),
                asset_address: token.tokenAddress,
                asset_symbol: token.symbol.clone(),
                asset_decimals: decimals,
                supply_balance,
                supply_balance_usd: supply_balance * price_usd,
                borrow_balance,
                borrow_balance_usd: borrow_balance * price_usd,
                collateral_enabled: user_reserve.usageAsCollateralEnabled,
                supply_apy: Self::ray_rate_to_apy(reserve.liquidityRate),
                borrow_apy: Self::ray_rate_to_apy(reserve.variableBorrowRate),
                health_factor,
                liquidation_price,
                last_updated: unix_now(),
            });
        }

        Ok(positions)
    }

    fn build_supply(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let approve = IERC20::approveCall {
            spender: self.pool,
            amount: params.amount,
        };
        let supply = IAavePoolV3::supplyCall {
            asset: params.asset,
            amount: params.amount,
            onBehalfOf: params.user,
            referralCode: 0,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for Aave pool"),
            CallDescription::new(self.pool, supply.abi_encode(), "supply to Aave pool"),
        ])
    }

    fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let withdraw = IAavePoolV3::withdrawCall {
            asset: params.asset,
            amount: params.amount,
            to: params.user,
        };

        Ok(vec![CallDescription::new(
            self.pool,
            withdraw.abi_encode(),
            "withdraw from Aave pool",
        )])
    }

    fn build_borrow(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let borrow = IAavePoolV3::borrowCall {
            asset: params.asset,
            amount: params.amount,
            interestRateMode: U256::from(VARIABLE_RATE_MODE),
            referralCode: 0,
            onBehalfOf: params.user,
        };

        Ok(vec![CallDescription::new(
            self.pool,
            borrow.abi_encode(),
            "borrow from Aave pool",
        )])
    }

    fn build_repay(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let approve = IERC20::approveCall {
            spender: self.pool,
            amount: params.amount,
        };
        let repay = IAavePoolV3::repayCall {
            asset: params.asset,
            amount: params.amount,
            interestRateMode: U256::from(VARIABLE_RATE_MODE),
            onBehalfOf: params.user,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for Aave pool"),
            CallDescription::new(self.pool, repay.abi_encode(), "repay Aave debt"),
        ])
    }

    async fn validate(&self, params: &ActionParams) -> Result<ValidationResult, AdapterError> {
        if params.amount.is_zero() {
            return Ok(ValidationResult::rejected(ActionFailure::ZeroAmount));
        }

        let data_provider = IAaveProtocolDataProvider::new(self.data_provider, self.client.provider());

        let is_paused = data_provider
            .getPaused(params.asset)
            .call()
            .await
            .map(|r| r.isPaused)
            .unwrap_or(false);
        if is_paused {
            return Ok(ValidationResult::rejected(ActionFailure::MarketPaused));
        }

        let config = data_provider
            .getReserveConfigurationData(params.asset)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("Config fetch failed: {}", e)))?;

        if config.isFrozen
            && matches!(params.action, LendingAction::Supply | LendingAction::Borrow)
        {
            return Ok(ValidationResult::rejected(ActionFailure::MarketFrozen));
        }

        if matches!(params.action, LendingAction::Supply | LendingAction::Repay) {
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
        }

        Ok(ValidationResult::ok())
    }

    async fn calculate_health_factor(&self, user: Address) -> Result<f64, AdapterError> {
        let account = self.account_data(user).await?;

        if account.totalDebtBase.is_zero() {
            return Ok(f64::INFINITY);
        }

        Ok(scale_down(account.healthFactor, 18))
    }

    async fn simulate_health_factor(
        &self,
        user: Address,
        action: LendingAction,
        amount_usd: f64,
    ) -> Result<f64, AdapterError> {
        let account = self.account_data(user).await?;

        // Base-currency figures are USD with 8 decimals; threshold is bps
        let collateral_usd = scale_down(account.totalCollateralBase, 8);
        let debt_usd = scale_down(account.totalDebtBase, 8);
        let liquidation_threshold = account.currentLiquidationThreshold.to::<u64>() as f64 / 10_000.0;

        Ok(risk::simulate_health_factor(
            collateral_usd,
            debt_usd,
            liquidation_threshold,
            action,
            amount_usd,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_addresses_resolve() {
        assert!(AaveV3Adapter::addresses(1).is_ok());
        assert!(matches!(
            AaveV3Adapter::addresses(99999),
            Err(AdapterError::UnsupportedChain(99999))
        ));
    }

    #[test]
    fn test_ray_rate_to_apy() {
        // ~5% APR in ray compounds to just over 5% APY
        let rate = U256::from_str("50000000000000000000000000").unwrap(); // 0.05 ray
        let apy = AaveV3Adapter::ray_rate_to_apy(rate);
        assert!(apy > 5.0 && apy < 5.2, "apy = {}", apy);

        assert_eq!(AaveV3Adapter::ray_rate_to_apy(U256::ZERO), 0.0);
    }

    #[test]
    fn test_market_id_namespacing() {
        assert_eq!(AaveV3Adapter::market_id("USDC"), "aave_v3:USDC");
    }
}
