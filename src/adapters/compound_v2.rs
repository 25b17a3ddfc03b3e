//! cToken-style market adapter (Compound-V2 lineage).
//!
//! Receipt tokens are exchange-rate-indexed: underlying equals
//! `balance * exchangeRate / 1e18`, and the exchange rate compounds
//! continuously, so it is read fresh on every query and never cached
//! across a session.

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
    interface ICToken {
        function exchangeRateStored() external view returns (uint256);
        function supplyRatePerBlock() external view returns (uint256);
        function borrowRatePerBlock() external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function borrowBalanceStored(address account) external view returns (uint256);
        function underlying() external view returns (address);
        function getCash() external view returns (uint256);
        function totalBorrows() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function mint(uint256 mintAmount) external returns (uint256);
        function redeemUnderlying(uint256 redeemAmount) external returns (uint256);
        function borrow(uint256 borrowAmount) external returns (uint256);
        function repayBorrow(uint256 repayAmount) external returns (uint256);
    }

    #[sol(rpc)]
    interface IComptroller {
        function markets(address cToken) external view returns (bool isListed, uint256 collateralFactorMantissa, bool isComped);
        function checkMembership(address account, address cToken) external view returns (bool);
        function mintGuardianPaused(address cToken) external view returns (bool);
        function borrowGuardianPaused(address cToken) external view returns (bool);
        function liquidationIncentiveMantissa() external view returns (uint256);
    }
}

const YIELDS_PROJECT: &str = "compound";

/// 12-second blocks
const BLOCKS_PER_YEAR: f64 = 2_628_000.0;

pub struct CompoundV2Adapter {
    client: EthereumClient,
    chain_id: u64,
    comptroller: Address,
    ctokens: Vec<Address>,
    price_service: Arc<PriceService>,
    yields: Arc<YieldsApiClient>,
}

impl CompoundV2Adapter {
    pub fn new(
        client: EthereumClient,
        chain_id: u64,
        price_service: Arc<PriceService>,
        yields: Arc<YieldsApiClient>,
    ) -> Result<Self, AdapterError> {
        let (comptroller, ctokens) = Self::addresses(chain_id)?;

        Ok(Self {
            client,
            chain_id,
            comptroller,
            ctokens,
            price_service,
            yields,
        })
    }

    fn addresses(chain_id: u64) -> Result<(Address, Vec<Address>), AdapterError> {
        match chain_id {
            1 => Ok((
                Address::from_str("0x3d9819210A31b4961b30EF54bE2aeD79B9c9Cd3B").unwrap(),
                vec![
                    // cUSDC
                    Address::from_str("0x39AA39c021dfbaE8faC545936693aC917d5E7563").unwrap(),
                    // cDAI
                    Address::from_str("0x5d3a536E4D6DbD6114cc1Ead35777bAB948E3643").unwrap(),
                    // cWBTC
                    Address::from_str("0xccF4429DB6322D5C611ee964527D42E5d685DD6a").unwrap(),
                    // cUNI
                    Address::from_str("0x35A18000230DA775CAc24873d00Ff85BccdeD550").unwrap(),
                ],
            )),
            _ => Err(AdapterError::UnsupportedChain(chain_id)),
        }
    }

    /// Per-block mantissa rate to percent APY, compounding per block.
    fn per_block_rate_to_apy(rate: U256) -> f64 {
        let rate_decimal = scale_down(rate, 18);
        ((1.0 + rate_decimal).powf(BLOCKS_PER_YEAR) - 1.0) * 100.0
    }

    /// Underlying amount for a receipt-token balance at the given exchange
    /// rate. This is the cToken accounting identity.
    fn to_underlying(receipt_balance: U256, exchange_rate: U256) -> U256 {
        receipt_balance
            .checked_mul(exchange_rate)
            .map(|product| product / U256::from(10).pow(U256::from(18)))
            .unwrap_or(U256::ZERO)
    }

    fn market_id(symbol: &str) -> String {
        format!("compound_v2:{}", symbol)
    }

    async fn underlying_meta(&self, ctoken: Address) -> Result<(Address, String, u8), AdapterError> {
        let ctoken_contract = ICToken::new(ctoken, self.client.provider());

        let underlying = ctoken_contract
            .underlying()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("underlying failed: {}", e)))?
            ._0;

        let token = IERC20::new(underlying, self.client.provider());
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

        Ok((underlying, symbol, decimals))
    }

    async fn fetch_ctoken_market(&self, ctoken: Address) -> Result<LendingMarket, AdapterError> {
        let ctoken_contract = ICToken::new(ctoken, self.client.provider());
        let comptroller = IComptroller::new(self.comptroller, self.client.provider());

        let (underlying, symbol, decimals) = self.underlying_meta(ctoken).await?;

        // Fresh exchange rate every fetch; it moves with every accrual
        let exchange_rate = ctoken_contract
            .exchangeRateStored()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("exchangeRateStored failed: {}", e)))?
            ._0;

        let total_ctokens = ctoken_contract
            .totalSupply()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("totalSupply failed: {}", e)))?
            ._0;

        let total_borrows_raw = ctoken_contract
            .totalBorrows()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("totalBorrows failed: {}", e)))?
            ._0;

        let cash_raw = ctoken_contract
            .getCash()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("getCash failed: {}", e)))?
            ._0;

        let supply_rate = ctoken_contract
            .supplyRatePerBlock()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("supplyRatePerBlock failed: {}", e)))?
            ._0;

        let borrow_rate = ctoken_contract
            .borrowRatePerBlock()
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("borrowRatePerBlock failed: {}", e)))?
            ._0;

        let market_info = comptroller
            .markets(ctoken)
            .call()
            .await
            .map_err(|e| AdapterError::ContractError(format!("comptroller.markets failed: {}", e)))?;

        let mint_paused = comptroller
            .mintGuardianPaused(ctoken)
            .call()
            .await
            .map(|r| r._0)
            .unwrap_or(false);
        let borrow_paused = comptroller
            .borrowGuardianPaused(ctoken)
            .call()
            .await
            .map(|r| r._0)
            .unwrap_or(false);

        let incentive = comptroller
            .liquidationIncentiveMantissa()
            .call()
            .await
            .map(|r| scale_down(r._0, 18))
            .unwrap_or(1.08);

        let price_usd = self
            .price_service
            .price_usd(&symbol)
            .await
            .map_err(|e| AdapterError::InvalidData(format!("Price for {}: {}", symbol, e)))?;

        let total_supply = scale_down(Self::to_underlying(total_ctokens, exchange_rate), decimals);
        let total_borrow = scale_down(total_borrows_raw, decimals);
        let cash = scale_down(cash_raw, decimals);

        let reward_apy = clamp_reward_apy(self.yields.reward_apy(YIELDS_PROJECT, &symbol).await);

        // V2 has a single collateral factor doing double duty as both LTV
        // and liquidation threshold
        let collateral_factor = scale_down(market_info.collateralFactorMantissa, 18);

        Ok(LendingMarket {
            protocol: Protocol::CompoundV2,
            chain_id: self.chain_id,
            market_id: Self::market_id(&symbol),
            asset_address: underlying,
            asset_symbol: symbol.clone(),
            asset_decimals: decimals,
            asset_category: AssetCategory::from_symbol(&symbol),
            supply_apy: Self::per_block_rate_to_apy(supply_rate),
            borrow_apy: Self::per_block_rate_to_apy(borrow_rate),
            reward_apy,
            total_supply,
            total_borrow,
            total_supply_usd: total_supply * price_usd,
            total_borrow_usd: total_borrow * price_usd,
            available_liquidity_usd: cash * price_usd,
            utilization: LendingMarket::compute_utilization(total_supply, total_borrow),
            ltv: collateral_factor,
            liquidation_threshold: collateral_factor,
            liquidation_penalty: (incentive - 1.0).max(0.0),
            supply_cap: None,
            borrow_cap: None,
            can_supply: market_info.isListed && !mint_paused,
            can_borrow: market_info.isListed && !borrow_paused,
            can_use_as_collateral: collateral_factor > 0.0,
            is_frozen: !market_info.isListed,
            is_paused: mint_paused && borrow_paused,
            last_updated: unix_now(),
        })
    }

    /// Risk-weighted collateral and debt in USD across all cTokens.
    async fn account_balances(&self, user: Address) -> Result<(f64, f64), AdapterError> {
        let comptroller = IComptroller::new(self.comptroller, self.client.provider());

        let mut weighted_collateral_usd = 0.0;
        let mut debt_usd = 0.0;

        for &ctoken in &self.ctokens {
            let ctoken_contract = ICToken::new(ctoken, self.client.provider());

            let balance = ctoken_contract
                .balanceOf(user)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("balanceOf failed: {}", e)))?
                ._0;
            let borrow = ctoken_contract
                .borrowBalanceStored(user)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("borrowBalanceStored failed: {}", e)))?
                ._0;

            if balance.is_zero() && borrow.is_zero() {
                continue;
            }

            let (_, symbol, decimals) = self.underlying_meta(ctoken).await?;
            let price = match self.price_service.price_usd(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Price unavailable, skipping cToken");
                    continue;
                }
            };

            if !borrow.is_zero() {
                debt_usd += scale_down(borrow, decimals) * price;
            }

            if !balance.is_zero() {
                let in_market = comptroller
                    .checkMembership(user, ctoken)
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(false);

                if in_market {
                    let exchange_rate = ctoken_contract
                        .exchangeRateStored()
                        .call()
                        .await
                        .map_err(|e| {
                            AdapterError::ContractError(format!("exchangeRateStored failed: {}", e))
                        })?
                        ._0;

                    let market_info = comptroller
                        .markets(ctoken)
                        .call()
                        .await
                        .map_err(|e| {
                            AdapterError::ContractError(format!("comptroller.markets failed: {}", e))
                        })?;

                    let supplied =
                        scale_down(Self::to_underlying(balance, exchange_rate), decimals) * price;
                    weighted_collateral_usd +=
                        supplied * scale_down(market_info.collateralFactorMantissa, 18);
                }
            }
        }

        Ok((weighted_collateral_usd, debt_usd))
    }
}

#[async_trait]
impl LendingAdapter for CompoundV2Adapter {
    fn protocol(&self) -> Protocol {
        Protocol::CompoundV2
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_markets(&self) -> Result<Vec<LendingMarket>, AdapterError> {
        let mut markets = Vec::new();

        for &ctoken in &self.ctokens {
            match self.fetch_ctoken_market(ctoken).await {
                Ok(market) => markets.push(market),
                Err(e) => {
                    warn!(ctoken = %ctoken, error = %e, "Failed to fetch cToken market, skipping");
                }
            }
        }

        Ok(markets)
    }

    async fn get_user_positions(&self, user: Address) -> Result<Vec<LendingPosition>, AdapterError> {
        let comptroller = IComptroller::new(self.comptroller, self.client.provider());
        let mut positions = Vec::new();

        // Account health is shared across all V2 markets
        let (weighted_collateral_usd, total_debt_usd) = self.account_balances(user).await?;
        let account_hf = if total_debt_usd > 0.0 {
            Some(risk::health_factor(weighted_collateral_usd, total_debt_usd, 1.0))
        } else {
            None
        };

        for &ctoken in &self.ctokens {
            let ctoken_contract = ICToken::new(ctoken, self.client.provider());

            let balance = ctoken_contract
                .balanceOf(user)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("balanceOf failed: {}", e)))?
                ._0;
            let borrow = ctoken_contract
                .borrowBalanceStored(user)
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("borrowBalanceStored failed: {}", e)))?
                ._0;

            if balance.is_zero() && borrow.is_zero() {
                continue;
            }

            let (underlying, symbol, decimals) = self.underlying_meta(ctoken).await?;

            // Exchange rate is read fresh on every query by design
            let exchange_rate = ctoken_contract
                .exchangeRateStored()
                .call()
                .await
                .map_err(|e| AdapterError::ContractError(format!("exchangeRateStored failed: {}", e)))?
                ._0;

            let supply_rate = ctoken_contract
                .supplyRatePerBlock()
                .call()
                .await
                .map(|r| r._0)
                .unwrap_or(U256::ZERO);
            let borrow_rate = ctoken_contract
                .borrowRatePerBlock()
                .call()
                .await
                .map(|r| r._0)
                .unwrap_or(U256::ZERO);

            let price_usd = match self.price_service.price_usd(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Price unavailable, skipping position");
                    continue;
                }
            };

            let collateral_enabled = comptroller
                .checkMembership(user, ctoken)
                .call()
                .await
                .map(|r| r._0)
                .unwrap_or(false);

            let supply_balance = scale_down(Self::to_underlying(balance, exchange_rate), decimals);
            let borrow_balance = scale_down(borrow, decimals);

            let health_factor = if borrow.is_zero() { None } else { account_hf };
            let liquidation_price = health_factor
                .filter(|_| collateral_enabled)
                .and_then(|hf| risk::liquidation_price(price_usd, hf));

            positions.push(LendingPosition {
                protocol: Protocol::CompoundV2,
                chain_id: self.chain_id,
                market_id: Self::market_id(&symbol),
                asset_address: underlying,
                asset_symbol: symbol,
                asset_decimals: decimals,
                supply_balance,
                supply_balance_usd: supply_balance * price_usd,
                borrow_balance,
                borrow_balance_usd: borrow_balance * price_usd,
                collateral_enabled,
                supply_apy: Self::per_block_rate_to_apy(supply_rate),
                borrow_apy: Self::per_block_rate_to_apy(borrow_rate),
                health_factor,
                liquidation_price,
                last_updated: unix_now(),
            });
        }

        Ok(positions)
    }

    fn build_supply(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let ctoken = self.ctoken_for(params)?;

        let approve = IERC20::approveCall {
            spender: ctoken,
            amount: params.amount,
        };
        let mint = ICToken::mintCall {
            mintAmount: params.amount,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for cToken"),
            CallDescription::new(ctoken, mint.abi_encode(), "mint cTokens"),
        ])
    }

    fn build_withdraw(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let ctoken = self.ctoken_for(params)?;

        let redeem = ICToken::redeemUnderlyingCall {
            redeemAmount: params.amount,
        };

        Ok(vec![CallDescription::new(
            ctoken,
            redeem.abi_encode(),
            "redeem underlying from cToken",
        )])
    }

    fn build_borrow(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let ctoken = self.ctoken_for(params)?;

        let borrow = ICToken::borrowCall {
            borrowAmount: params.amount,
        };

        Ok(vec![CallDescription::new(
            ctoken,
            borrow.abi_encode(),
            "borrow from cToken market",
        )])
    }

    fn build_repay(&self, params: &ActionParams) -> Result<Vec<CallDescription>, AdapterError> {
        let ctoken = self.ctoken_for(params)?;

        let approve = IERC20::approveCall {
            spender: ctoken,
            amount: params.amount,
        };
        let repay = ICToken::repayBorrowCall {
            repayAmount: params.amount,
        };

        Ok(vec![
            CallDescription::new(params.asset, approve.abi_encode(), "approve asset for cToken"),
            CallDescription::new(ctoken, repay.abi_encode(), "repay cToken debt"),
        ])
    }

    async fn validate(&self, params: &ActionParams) -> Result<ValidationResult, AdapterError> {
        if params.amount.is_zero() {
            return Ok(ValidationResult::rejected(ActionFailure::ZeroAmount));
        }

        let ctoken = self.ctoken_for(params)?;
        let ctoken_contract = ICToken::new(ctoken, self.client.provider());
        let comptroller = IComptroller::new(self.comptroller, self.client.provider());

        match params.action {
            LendingAction::Supply => {
                let paused = comptroller
                    .mintGuardianPaused(ctoken)
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(false);
                if paused {
                    return Ok(ValidationResult::rejected(ActionFailure::MarketPaused));
                }
            }
            LendingAction::Borrow => {
                let paused = comptroller
                    .borrowGuardianPaused(ctoken)
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(false);
                if paused {
                    return Ok(ValidationResult::rejected(ActionFailure::MarketPaused));
                }
            }
            _ => {}
        }

        match params.action {
            LendingAction::Supply | LendingAction::Repay => {
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
                let cash = ctoken_contract
                    .getCash()
                    .call()
                    .await
                    .map(|r| r._0)
                    .unwrap_or(U256::ZERO);
                if cash < params.amount {
                    return Ok(ValidationResult::rejected(ActionFailure::InsufficientLiquidity));
                }
            }
        }

        Ok(ValidationResult::ok())
    }

    async fn calculate_health_factor(&self, user: Address) -> Result<f64, AdapterError> {
        let (weighted_collateral_usd, debt_usd) = self.account_balances(user).await?;
        Ok(risk::health_factor(weighted_collateral_usd, debt_usd, 1.0))
    }

    async fn simulate_health_factor(
        &self,
        user: Address,
        action: LendingAction,
        amount_usd: f64,
    ) -> Result<f64, AdapterError> {
        let (weighted_collateral_usd, debt_usd) = self.account_balances(user).await?;
        // Collateral is already risk-weighted by collateral factor
        Ok(risk::simulate_health_factor(
            weighted_collateral_usd,
            debt_usd,
            1.0,
            action,
            amount_usd,
        ))
    }
}

impl CompoundV2Adapter {
    fn ctoken_for(&self, params: &ActionParams) -> Result<Address, AdapterError> {
        let symbol = params
            .market_id
            .strip_prefix("compound_v2:")
            .ok_or_else(|| AdapterError::InvalidData(format!("Bad market id: {}", params.market_id)))?;

        let index = match symbol {
            "USDC" => 0,
            "DAI" => 1,
            "WBTC" => 2,
            "UNI" => 3,
            _ => {
                return Err(AdapterError::InvalidData(format!(
                    "Unknown cToken market: {}",
                    symbol
                )))
            }
        };

        self.ctokens
            .get(index)
            .copied()
            .ok_or_else(|| AdapterError::InvalidData(format!("No cToken at index {}", index)))
    }
}
