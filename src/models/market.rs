use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Closed set of lending protocols the aggregator understands.
///
/// Adding a protocol means adding a variant here, which forces every
/// match over `Protocol` to be extended — the registry in
/// `adapters::build_adapters` will not compile until the new adapter
/// is wired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    AaveV3,
    CompoundV3,
    CompoundV2,
    MorphoVault,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::AaveV3 => "aave_v3",
            Protocol::CompoundV3 => "compound_v3",
            Protocol::CompoundV2 => "compound_v2",
            Protocol::MorphoVault => "morpho_vault",
        }
    }

    /// Human-readable protocol name for routing justifications and alerts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Protocol::AaveV3 => "Aave V3",
            Protocol::CompoundV3 => "Compound V3",
            Protocol::CompoundV2 => "Compound V2",
            Protocol::MorphoVault => "Morpho Vaults",
        }
    }

    pub fn all() -> &'static [Protocol] {
        &[
            Protocol::AaveV3,
            Protocol::CompoundV3,
            Protocol::CompoundV2,
            Protocol::MorphoVault,
        ]
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse asset classification used by risk scoring and routing filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Stablecoin,
    Eth,
    Btc,
    Other,
}

impl AssetCategory {
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.to_uppercase().as_str() {
            "USDC" | "USDT" | "DAI" | "FRAX" | "LUSD" | "USDS" | "GHO" => Self::Stablecoin,
            "ETH" | "WETH" | "WSTETH" | "RETH" | "CBETH" => Self::Eth,
            "BTC" | "WBTC" | "TBTC" | "CBBTC" => Self::Btc,
            _ => Self::Other,
        }
    }
}

/// One (protocol, asset) market on one chain.
///
/// Markets are replaced wholesale on every aggregation refresh — nothing
/// mutates them in place, and nothing outlives the cache TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingMarket {
    /// Protocol that owns this market
    pub protocol: Protocol,

    /// Chain the market lives on
    pub chain_id: u64,

    /// Protocol-scoped market identifier (pool reserve, comet address, vault address)
    pub market_id: String,

    /// Underlying asset
    pub asset_address: Address,
    pub asset_symbol: String,
    pub asset_decimals: u8,
    pub asset_category: AssetCategory,

    /// Base supply APY in percent, net of protocol fees
    pub supply_apy: f64,

    /// Base borrow APY in percent, net of protocol fees
    pub borrow_apy: f64,

    /// Incentive/reward APY in percent, reported separately from base so
    /// downstream consumers can reason about sustainability
    pub reward_apy: f64,

    /// Totals in native asset units
    pub total_supply: f64,
    pub total_borrow: f64,

    /// Totals in USD
    pub total_supply_usd: f64,
    pub total_borrow_usd: f64,

    /// Liquidity currently withdrawable/borrowable, USD
    pub available_liquidity_usd: f64,

    /// totalBorrow / totalSupply, 0 when supply is 0
    pub utilization: f64,

    /// Max loan-to-value as a fraction in [0, 1]
    pub ltv: f64,

    /// Liquidation threshold as a fraction in [0, 1]; always >= ltv
    pub liquidation_threshold: f64,

    /// Liquidation penalty as a fraction in [0, 1]
    pub liquidation_penalty: f64,

    /// Protocol-enforced caps in native units, where the protocol has them
    pub supply_cap: Option<f64>,
    pub borrow_cap: Option<f64>,

    pub can_supply: bool,
    pub can_borrow: bool,
    pub can_use_as_collateral: bool,
    pub is_frozen: bool,
    pub is_paused: bool,

    /// Unix timestamp of the fetch that produced this snapshot
    pub last_updated: u64,
}

impl LendingMarket {
    /// Dedup key within an aggregation pass. Each adapter owns a disjoint
    /// namespace, so a collision is an integrity error, not a merge.
    pub fn dedup_key(&self) -> (Protocol, String) {
        (self.protocol, self.market_id.clone())
    }

    /// Net supply APY: base plus rewards, both already fee-adjusted.
    pub fn net_supply_apy(&self) -> f64 {
        self.supply_apy + self.reward_apy
    }

    /// Net borrow APY: base cost minus rewards earned while borrowing.
    pub fn net_borrow_apy(&self) -> f64 {
        self.borrow_apy - self.reward_apy
    }

    /// Utilization with the zero-supply edge case pinned to 0.
    pub fn compute_utilization(total_supply: f64, total_borrow: f64) -> f64 {
        if total_supply > 0.0 {
            total_borrow / total_supply
        } else {
            0.0
        }
    }

    /// Check the risk-parameter invariant `0 <= ltv <= liquidation_threshold <= 1`.
    pub fn risk_params_valid(&self) -> bool {
        self.ltv >= 0.0
            && self.ltv <= self.liquidation_threshold
            && self.liquidation_threshold <= 1.0
    }
}

/// Filter for market queries. All fields are conjunctive; `None` matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketFilter {
    pub protocol: Option<Protocol>,
    pub chain_id: Option<u64>,
    pub asset_symbol: Option<String>,
    pub can_supply: Option<bool>,
    pub can_borrow: Option<bool>,
}

impl MarketFilter {
    pub fn matches(&self, market: &LendingMarket) -> bool {
        if let Some(protocol) = self.protocol {
            if market.protocol != protocol {
                return false;
            }
        }
        if let Some(chain_id) = self.chain_id {
            if market.chain_id != chain_id {
                return false;
            }
        }
        if let Some(symbol) = &self.asset_symbol {
            if !market.asset_symbol.eq_ignore_ascii_case(symbol) {
                return false;
            }
        }
        if let Some(can_supply) = self.can_supply {
            if market.can_supply != can_supply {
                return false;
            }
        }
        if let Some(can_borrow) = self.can_borrow {
            if market.can_borrow != can_borrow {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_market() -> LendingMarket {
        LendingMarket {
            protocol: Protocol::AaveV3,
            chain_id: 1,
            market_id: "aave_v3:USDC".to_string(),
            asset_address: Address::ZERO,
            asset_symbol: "USDC".to_string(),
            asset_decimals: 6,
            asset_category: AssetCategory::Stablecoin,
            supply_apy: 3.2,
            borrow_apy: 4.8,
            reward_apy: 0.4,
            total_supply: 1_000_000.0,
            total_borrow: 600_000.0,
            total_supply_usd: 1_000_000.0,
            total_borrow_usd: 600_000.0,
            available_liquidity_usd: 400_000.0,
            utilization: 0.6,
            ltv: 0.77,
            liquidation_threshold: 0.80,
            liquidation_penalty: 0.05,
            supply_cap: None,
            borrow_cap: None,
            can_supply: true,
            can_borrow: true,
            can_use_as_collateral: true,
            is_frozen: false,
            is_paused: false,
            last_updated: 1_700_000_000,
        }
    }

    #[test]
    fn test_net_apys() {
        let market = sample_market();
        assert!((market.net_supply_apy() - 3.6).abs() < 1e-9);
        assert!((market.net_borrow_apy() - 4.4).abs() < 1e-9);
    }

    #[test]
    fn test_utilization_zero_supply() {
        assert_eq!(LendingMarket::compute_utilization(0.0, 0.0), 0.0);
        assert!((LendingMarket::compute_utilization(100.0, 60.0) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_risk_params_invariant() {
        let mut market = sample_market();
        assert!(market.risk_params_valid());

        // ltv above liquidation threshold violates the invariant
        market.ltv = 0.85;
        assert!(!market.risk_params_valid());
    }

    #[test]
    fn test_filter_matching() {
        let market = sample_market();

        let all = MarketFilter::default();
        assert!(all.matches(&market));

        let by_symbol = MarketFilter {
            asset_symbol: Some("usdc".to_string()),
            ..Default::default()
        };
        assert!(by_symbol.matches(&market));

        let wrong_protocol = MarketFilter {
            protocol: Some(Protocol::CompoundV3),
            ..Default::default()
        };
        assert!(!wrong_protocol.matches(&market));
    }
}
