use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use super::market::Protocol;

/// One (protocol, market, user) position.
///
/// Positions are derived fresh on every query and replaced, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingPosition {
    pub protocol: Protocol,
    pub chain_id: u64,
    pub market_id: String,

    pub asset_address: Address,
    pub asset_symbol: String,
    pub asset_decimals: u8,

    /// Supplied balance in underlying units (already normalized by the
    /// adapter — share/exchange-rate conversion happens before this point)
    pub supply_balance: f64,
    pub supply_balance_usd: f64,

    pub borrow_balance: f64,
    pub borrow_balance_usd: f64,

    pub collateral_enabled: bool,

    pub supply_apy: f64,
    pub borrow_apy: f64,

    /// Defined only while the position carries debt; `None` means no debt,
    /// which risk math treats as infinitely safe
    pub health_factor: Option<f64>,

    /// Asset price at which the position becomes liquidatable, when debt exists
    pub liquidation_price: Option<f64>,

    pub last_updated: u64,
}

impl LendingPosition {
    pub fn has_debt(&self) -> bool {
        self.borrow_balance_usd > 0.0
    }

    /// Health factor with the no-debt case mapped to +inf for comparisons.
    pub fn effective_health_factor(&self) -> f64 {
        match self.health_factor {
            Some(hf) if self.has_debt() => hf,
            _ => f64::INFINITY,
        }
    }
}

/// Per-user cross-protocol rollup.
///
/// Protocols do not share collateral, so the user's overall liquidation risk
/// is bounded by the worst single protocol: the minimum health factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPosition {
    pub total_supply_usd: f64,
    pub total_borrow_usd: f64,
    pub total_collateral_usd: f64,
    pub net_worth_usd: f64,

    /// Minimum finite health factor across protocols; `None` when no
    /// protocol carries debt
    pub lowest_health_factor: Option<f64>,

    /// Protocol holding the minimum health factor
    pub riskiest_protocol: Option<Protocol>,

    pub position_count: u32,
    pub last_updated: u64,
}

impl AggregatedPosition {
    /// Roll up a set of per-protocol positions.
    pub fn from_positions(positions: &[LendingPosition], now: u64) -> Self {
        let total_supply_usd: f64 = positions.iter().map(|p| p.supply_balance_usd).sum();
        let total_borrow_usd: f64 = positions.iter().map(|p| p.borrow_balance_usd).sum();
        let total_collateral_usd: f64 = positions
            .iter()
            .filter(|p| p.collateral_enabled)
            .map(|p| p.supply_balance_usd)
            .sum();

        let mut lowest: Option<(f64, Protocol)> = None;
        for position in positions {
            let hf = position.effective_health_factor();
            if !hf.is_finite() {
                continue;
            }
            match lowest {
                Some((current, _)) if current <= hf => {}
                _ => lowest = Some((hf, position.protocol)),
            }
        }

        Self {
            total_supply_usd,
            total_borrow_usd,
            total_collateral_usd,
            net_worth_usd: total_supply_usd - total_borrow_usd,
            lowest_health_factor: lowest.map(|(hf, _)| hf),
            riskiest_protocol: lowest.map(|(_, protocol)| protocol),
            position_count: positions.len() as u32,
            last_updated: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(protocol: Protocol, supply_usd: f64, borrow_usd: f64, hf: Option<f64>) -> LendingPosition {
        LendingPosition {
            protocol,
            chain_id: 1,
            market_id: format!("{}:WETH", protocol),
            asset_address: Address::ZERO,
            asset_symbol: "WETH".to_string(),
            asset_decimals: 18,
            supply_balance: supply_usd / 2000.0,
            supply_balance_usd: supply_usd,
            borrow_balance: borrow_usd / 2000.0,
            borrow_balance_usd: borrow_usd,
            collateral_enabled: true,
            supply_apy: 2.0,
            borrow_apy: 3.0,
            health_factor: hf,
            liquidation_price: None,
            last_updated: 1_700_000_000,
        }
    }

    #[test]
    fn test_no_debt_is_infinitely_safe() {
        let pos = position(Protocol::AaveV3, 1000.0, 0.0, None);
        assert_eq!(pos.effective_health_factor(), f64::INFINITY);
    }

    #[test]
    fn test_min_health_factor_attribution() {
        let positions = vec![
            position(Protocol::AaveV3, 10_000.0, 4_000.0, Some(1.8)),
            position(Protocol::MorphoVault, 5_000.0, 3_500.0, Some(1.1)),
            position(Protocol::CompoundV3, 2_000.0, 0.0, None),
        ];

        let aggregated = AggregatedPosition::from_positions(&positions, 1_700_000_000);
        assert_eq!(aggregated.lowest_health_factor, Some(1.1));
        assert_eq!(aggregated.riskiest_protocol, Some(Protocol::MorphoVault));
        assert_eq!(aggregated.position_count, 3);
        assert!((aggregated.net_worth_usd - 9_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_debt_free_has_no_lowest() {
        let positions = vec![
            position(Protocol::AaveV3, 10_000.0, 0.0, None),
            position(Protocol::CompoundV2, 3_000.0, 0.0, None),
        ];

        let aggregated = AggregatedPosition::from_positions(&positions, 0);
        assert_eq!(aggregated.lowest_health_factor, None);
        assert_eq!(aggregated.riskiest_protocol, None);
    }
}
