//! Compound-V3-style (Comet) base-asset market adapter.
//!
//! Comet is a base-asset ledger: `balanceOf` already returns underlying
//! units, so supplied/borrowed base amounts need no conversion at all.
//! Collateral lives in a separate per-asset ledger and never earns.

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
    interface IComet {
        struct AssetInfo {
            uint8 offset;
            address asset;
            address priceFeed;
            uint64 scale;
            uint64 borrowCollateralFactor;
            uint64 liquidateCollateralFactor;
            uint64 liquidationFactor;
            uint128 supplyCap;
        }

        function baseToken() external view returns (address);
        function decimals() external view returns (uint8);
        function numAssets() external view returns (uint8);
        function getAssetInfo(uint8 i) external view returns (AssetInfo memory);
        function totalSupply() external view returns (uint256);
        function totalBorrow() external view returns (uint256);
        function getUtilization() external view returns (uint256);
        function getSupplyRate(uint256 utilization) external view returns (uint64);
        function getBorrowRate(uint256 utilization) external view returns (uint64);
        function balanceOf(address account) external view returns (uint256);
        function borrowBalanceOf(address account) external view returns (uint256);
        function collateralBalanceOf(address account, address asset) external view returns (uint128);
        function isSupplyPaused() external view returns (bool);
        function isWithdrawPaused() external view returns (bool);
        function supply(address asset, uint256 amount) external;
        function withdraw(address asset, uint256 amount) external;
    }
}

const YIELDS_PROJECT: &str = "compound-v3";

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

pub struct CompoundV3Adapter {
    client: EthereumClient,
    chain_id: u64,
    comets: Vec<Address>,
    price_service: Arc<PriceService>,
    yields: Arc<YieldsApiClient>,
}

impl CompoundV3Adapter {
    pub fn new(
        client: EthereumClient,
        chain_id: u64,
        price_service: Arc<PriceService>,
        yields: Arc<YieldsApiClient>,
    ) -> Result<Self, AdapterError> {
        let comets = Self::comet_addresses(chain_id)?;

        Ok(Self {
            client,
            chain_id,
            comets,
            price_service,
            yields,
        })
    }

    fn comet_addresses(chain_id: u64) -> Result<Vec<Address>, AdapterError> {
        match chain_id {
            1 => Ok(vec![
                // USDC market
                Address::from_str("0xc3d688B66703497DAA19211EEdff47f25384cdc3").unwrap(),
                // WETH market
                Address::from_str("0xA17581A9E3356d9A858b789D68B4d866e593aE94").unwrap(),
            ]),
            _ => Err(AdapterError::UnsupportedChain(chain_id)),
        }
    }

    /// Comet rates are per-second, scaled 1e18; Comet's own UI reports them
    /// as simple annualized rates, so we do the same.
    fn per_second_rate_to_apy(rate: u64) -> f64 {
        (rate as f64 / 1e18) * SECONDS_PER_YEAR * 100.0
    }

    fn market_id(base_symbol: &str) -> String {
        format!("compound_v3:{}", base_symbol)
    }

    async fn base_token_meta(&self, comet: Address) -> Result<(Address, String, u8), AdapterError> {
        let comet_contract = IComet::new(comet, self.client.provider());

        let base_token = comet_contract
            .baseToken()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("baseToken failed: {}", e)))?
            ._0;

        let token = IERC20::new(base_token, self.client.provider());
        let symbol = token
            .symbol()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("symbol failed: {}", e)))?
            ._0;
        let decimals = token
            .decimals()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("decimals failed: {}", e)))?
            ._0;

        Ok((base_token, symbol, decimals))
    }

    async fn fetch_comet_market(&self, comet: Address) -> Result<LendingMarket, AdapterError> {
        let comet_contract = IComet::new(comet, self.client.provider());

        let (base_token, symbol, decimals) = self.base_token_meta(comet).await?;

        let utilization = comet_contract
            .getUtilization()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("getUtilization failed: {}", e)))?
            ._0;

        let supply_rate = comet_contract
            .getSupplyRate(utilization)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("getSupplyRate failed: {}", e)))?
            ._0;

        let borrow_rate = comet_contract
            .getBorrowRate(utilization)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("getBorrowRate failed: {}", e)))?
            ._0;

        let total_supply_raw = comet_contract
            .totalSupply()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("totalSupply failed: {}", e)))?
            ._0;

        let total_borrow_raw = comet_contract
            .totalBorrow()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("totalBorrow failed: {}", e)))?
            ._0;

        let supply_paused = comet_contract
            .isSupplyPaused()
            .call()
            .await
            .map(|r| r._0)
            .unwrap_or(false);
        let withdraw_paused = comet_contract
            .isWithdrawPaused()
            .call()
            .await
            .map(|r| r._0)
            .unwrap_or(false);

        let price_usd = self
            .price_service
            .price_usd(&symbol)
            .await
            .map_err(|e| AdapterError::InvalidData(format!("Price for {}: {}", symbol, e)))?;

        let total_supply = scale_down(total_supply_raw, decimals);
        let total_borrow = scale_down(total_borrow_raw, decimals);

        let reward_apy = clamp_reward_apy(self.yields.reward_apy(YIELDS_PROJECT, &symbol).await);

        let is_paused = supply_paused || withdraw_paused;

        Ok(LendingMarket {
            protocol: Protocol::CompoundV3,
            chain_id: self.chain_id,
            market_id: Self::market_id(&symbol),
            asset_address: base_token,
            asset_symbol: symbol.clone(),
            asset_decimals: decimals,
            asset_category: AssetCategory::from_symbol(&symbol),
            supply_apy: Self::per_second_rate_to_apy(supply_rate),
            borrow_apy: Self::per_second_rate_to_apy(borrow_rate),
            reward_apy,
            total_supply,
            total_borrow,
            total_supply_usd: total_supply * price_usd,
            total_borrow_usd: total_borrow * price_usd,
            available_liquidity_usd: (total_supply - total_borrow).max(0.0) * price_usd,
            utilization: LendingMarket::compute_utilization(total_supply, total_borrow),
            // The base asset is never collateral in a Comet market;
            // collateral assets have their own factors
            ltv: 0.0,
            liquidation_threshold: 0.0,
            liquidation_penalty: 0.0,
            supply_cap: None,
            borrow_cap: None,
            can_supply: !supply_paused,
            can_borrow: !withdraw_paused,
            can_use_as_collateral: false,
            is_frozen: false,
            is_paused,
            last_updated: unix_now(),
        })
    }

    /// Risk-weighted collateral and raw debt for one comet, in USD.
    async fn account_balances(
        &self,
        comet: Address,
        user: Address,
    ) -> Result<(f64, f64), AdapterError> {
        let comet_contract = IComet::new(comet, self.client.provider());

        let (_, base_symbol, base_decimals) = self.base_token_meta(comet).await?;

        let borrow_raw = comet_contract
            .borrowBalanceOf(user)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("borrowBalanceOf failed: {}", e)))?
            ._0;

        let base_price = self
            .price_service
            .price_usd(&base_symbol)
            .await
            .map_err(|e| AdapterError::InvalidData(format!("Price for {}: {}", base_symbol, e)))?;

        let debt_usd = scale_down(borrow_raw, base_decimals) * base_price;

        let num_assets = comet_contract
            .numAssets()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("numAssets failed: {}", e)))?
            ._0;

        let mut weighted_collateral_usd = 0.0;

        for i in 0..num_assets {
            let info = comet_contract
                .getAssetInfo(i)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("getAssetInfo failed: {}", e)))?
                ._0;

            let balance = comet_contract
                .collateralBalanceOf(user, info.asset)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("collateralBalanceOf failed: {}", e)))?
                ._0;

            if balance == 0 {
                continue;
            }

            let token = IERC20::new(info.asset, self.client.provider());
            let symbol = token.symbol().call().await.map(|r| r._0).unwrap_or_default();
            let decimals = token.decimals().call().await.map(|r| r._0).unwrap_or(18);

            let price = match self.price_service.price_usd(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Collateral price unavailable, skipping");
                    continue;
                }
            };

            let value_usd = scale_down(U256::from(balance), decimals) * price;
            let liquidate_factor = info.liquidateCollateralFactor as f64 / 1e18;
            weighted_collateral_usd += value_usd * liquidate_factor;
        }

        Ok((weighted_collateral_usd, debt_usd))
    }
}

#[async_trait]
impl LendingAdapter for CompoundV3Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::CompoundV3
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        let mut markets = Vec::new();

        for &comet in &self.comets {
            match self.fetch_comet_market(comet).await {
                Ok(market) => markets.push(market),
                Err(e) => {
                    warn!(comet = %comet, error = %e, "Failed to fetch Comet market, skipping");
                }
            }
        }

        Ok(markets)
    }

    async fn get_user_positions(&self, user: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let mut positions = Vec::new();

        for &comet in &self.comets {
            let comet_contract = IComet::new(comet, self.client.provider());

            let (base_token, base_symbol, base_decimals) = self.base_token_meta(comet).await?;

            // balanceOf returns underlying base units directly — that is
            // the whole point of the Comet ledger
            let supply_raw = comet_contract
                .balanceOf(user)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("balanceOf failed: {}", e)))?
                ._0;

            let borrow_raw = comet_contract
                .borrowBalanceOf(user)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("borrowBalanceOf failed: {}", e)))?
                ._0;

            if supply_raw.is_zero() && borrow_raw.is_zero() {
                continue;
            }

            let utilization = comet_contract
                .getUtilization()
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("getUtilization failed: {}", e)))?
                ._0;
            let supply_rate = comet_contract
                .getSupplyRate(utilization)
                .call()
                .await
                .map(|r| r._0)
                .unwrap_or(0);
            let borrow_rate = comet_contract
                .getBorrowRate(utilization)
                .call()
                .await
                .map(|r| r._0)
                .unwrap_or(0);

            let base_price = self
                .price_service
                .price_usd(&base_symbol)
                .await
                .map_err(|e| AdapterError::InvalidData(format!("Price for {}: {}", base_symbol, e)))?;

            let supply_balance = scale_down(supply_raw, base_decimals);
            let borrow_balance = scale_down(borrow_raw, base_decimals);

            let health_factor = if borrow_raw.is_zero() {
                None
            } else {
                let (weighted_collateral_usd, debt_usd) = self.account_balances(comet, user).await?;
                Some(risk::health_factor(weighted_collateral_usd, debt_usd, 1.0))
            };

            positions.push(LendingPosition {
                protocol: Protocol::CompoundV3,
                chain_id: self.chain_id,
                market_id: Self::market_id(&base_symbol),
                asset_address: base_token,
                asset_symbol: base_symbol.clone(),
                asset_decimals: base_decimals,
                supply_balance,
                supply_balance_usd: supply_balance * base_price,
                borrow_balance,
                borrow_balance_usd: borrow_balance * base_price,
                collateral_enabled: false,
                supply_apy: Self::per_second_rate_to_apy(supply_rate),
                borrow_apy: Self::per_second_rate_to_apy(borrow_rate),
                health_factor,
                liquidation_price: None,
                last_updated: unix_now(),
            });
        }

        Ok(positions)
    }

    fn build_supply(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let comet = self.comet_for(params)?;

        let approve = IERC20::approveCall {
            spender: comet,
            amount: params.amount,
        };
        let supply = IComet::supplyCall {
            asset: params.asset,
            amount: params.amount,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for Comet"),
            CallDescription::new(comet, supply.abi_encode(), "supply to Comet"),
        ])
    }

    fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let comet = self.comet_for(params)?;

        let withdraw = IComet::withdrawCall {
            asset: params.asset,
            amount: params.amount,
        };

        Ok(vec![CallDescription::new(
            comet,
            withdraw.abi_encode(),
            "withdraw from Comet",
        )])
    }

    // Borrowing on Comet is withdrawing base you do not hold; repaying is
    // supplying base against the debt. Same calldata, different intent.
    fn build_borrow(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let comet = self.comet_for(params)?;

        let withdraw = IComet::withdrawCall {
            asset: params.asset,
            amount: params.amount,
        };

        Ok(vec![CallDescription::new(
            comet,
            withdraw.abi_encode(),
            "borrow base asset from Comet",
        )])
    }

    fn build_repay(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let comet = self.comet_for(params)?;

        let approve = IERC20::approveCall {
            spender: comet,
            amount: params.amount,
        };
        let supply = IComet::supplyCall {
            asset: params.asset,
            amount: params.amount,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for Comet"),
            CallDescription::new(comet, supply.abi_encode(), "repay Comet debt"),
        ])
    }

    async fn validate(&self, params: &ActionParams) -> Result<ValidationResult, AdapterError> {
        if params.amount.is_zero() {
            return Ok(ValidationResult::rejected(ActionFailure::ZeroAmount));
        }

        let comet = self.comet_for(params)?;
        let comet_contract = IComet::new(comet, self.client.provider());

        match params.action {
            LendingAction::Supply | LendingAction::Repay => {
                let paused = comet_contract
                    .isSupplyPaused()
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(false);
                if paused {
                    return Ok(ValidationResult::rejected(ActionFailure::MarketPaused));
                }

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
            LendingAction::Withdraw | LendingAction::Borrow => {
                let paused = comet_contract
                    .isWithdrawPaused()
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(false);
                if paused {
                    return Ok(ValidationResult::rejected(ActionFailure::MarketPaused));
                }

                let total_supply = comet_contract
                    .totalSupply()
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(U256::ZERO);
                let total_borrow = comet_contract
                    .totalBorrow()
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(U256::ZERO);

                let available = total_supply.saturating_sub(total_borrow);
                if available < params.amount {
                    return Ok(ValidationResult::rejected(ActionFailure::InsufficientLiquidity));
                }
            }
        }

        Ok(ValidationResult::ok())
    }

    async fn calculate_health_factor(&self, user: Address) -> Result<f64, AdapterError> {
        // Worst comet bounds the account; comets are independent markets
        let mut lowest = f64::INFINITY;

        for &comet in &self.comets {
            let (weighted_collateral_usd, debt_usd) = self.account_balances(comet, user).await?;
            let hf = risk::health_factor(weighted_collateral_usd, debt_usd, 1.0);
            if hf < lowest {
                lowest = hf;
            }
        }

        Ok(lowest)
    }

    async fn simulate_health_factor(
        &self,
        user: Address,
        action: LendingAction,
        amount_usd: f64,
    ) -> Result<f64, AdapterError> {
        let mut lowest = f64::INFINITY;

        for &comet in &self.comets {
            let (weighted_collateral_usd, debt_usd) = self.account_balances(comet, user).await?;
            // Collateral here is already risk-weighted, so the threshold is 1
            let hf = risk::simulate_health_factor(weighted_collateral_usd, debt_usd, 1.0, action, amount_usd);
            if hf < lowest {
                lowest = hf;
            }
        }

        Ok(lowest)
    }
}

impl CompoundV3Adapter {
    fn comet_for(&self, params: &ActionParams) -> Result<Address, AdapterError> {
        // market_id is "compound_v3:<BASE>"; calls target the comet whose
        // base symbol matches. With a static address set per chain the
        // first comet is USDC, second WETH.
        let base = params
            .market_id
            .strip_prefix("compound_v3:")
            .ok_or_else(|| AdapterError::InvalidData(format!("Bad market id: {}", params.market_id)))?;

        let index = match base {
            "USDC" => 0,
            "WETH" => 1,
            _ => {
                return Err(AdapterError::InvalidData(format!(
                    "Unknown Comet market: {}",
                    base
                )))
            }
        };

        self.comets
            .get(index)
            .copied()
            .ok_or_else(|| AdapterError::InvalidData(format!("No comet at index {}", index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comet_addresses_mainnet_only() {
        assert_eq!(CompoundV3Adapter::comet_addresses(1).unwrap().len(), 2);
        assert!(CompoundV3Adapter::comet_addresses(137).is_err());
    }

    #[test]
    fn test_per_second_rate_to_apy() {
        // ~3% annual as a per-second 1e18 rate
        let rate = (0.03 / (365.25 * 24.0 * 3600.0) * 1e18) as u64;
        let apy = CompoundV3Adapter::per_second_rate_to_apy(rate);
        assert!((apy - 3.0).abs() < 0.01, "apy = {}", apy);
    }

    #[test]
    fn test_market_id() {
        assert_eq!(CompoundV3Adapter::market_id("USDC"), "compound_v3:USDC");
    }
}
