use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::adapters::contracts::IChainlinkAggregator;
use crate::blockchain::EthereumClient;

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("Oracle read failed: {0}")]
    OracleError(String),

    #[error("Price API request failed: {0}")]
    ApiError(String),

    #[error("No price source available for {0}")]
    UnknownAsset(String),
}

#[derive(Debug, Deserialize)]
struct SimplePriceEntry {
    usd: f64,
}

/// USD price lookups: on-chain oracle primary, REST fallback secondary.
///
/// Sources are tried in order; a failure of the oracle is an ordinary
/// fallback trigger, not a hard error. Stablecoins short-circuit to 1.0.
pub struct PriceService {
    client: EthereumClient,
    http_client: Client,
    rest_base_url: String,
    /// symbol -> Chainlink USD feed
    feeds: HashMap<&'static str, Address>,
    /// symbol -> REST API coin id
    coin_ids: HashMap<&'static str, &'static str>,
}

impl PriceService {
    const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(client: EthereumClient, rest_base_url: String) -> Result<Self, PriceError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("lending-aggregator/1.0")
            .build()
            .map_err(|e| PriceError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http_client,
            rest_base_url,
            feeds: Self::mainnet_feeds(),
            coin_ids: Self::coin_id_mappings(),
        })
    }

    /// Chainlink USD aggregators on Ethereum mainnet.
    fn mainnet_feeds() -> HashMap<&'static str, Address> {
        let mut feeds = HashMap::new();
        let mut insert = |symbol: &'static str, addr: &str| {
            if let Ok(address) = Address::from_str(addr) {
                feeds.insert(symbol, address);
            }
        };

        insert("ETH", "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419");
        insert("WETH", "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419");
        insert("BTC", "0xF4030086522a5bEEa4988F8cA5B36dbC97BeE88c");
        insert("WBTC", "0xF4030086522a5bEEa4988F8cA5B36dbC97BeE88c");
        insert("LINK", "0x2c1d072e956AFFC0D435Cb7AC38EF18d24d9127c");
        insert("AAVE", "0x547a514d5e3769680Ce22B2361c10Ea13619e8a9");
        insert("COMP", "0xdbd020CAeF83eFd542f4De03e3cF0C28A4428bd5");
        insert("UNI", "0x553303d460EE0afB37EdFf9bE42922D8FF63220e");

        feeds
    }

    fn coin_id_mappings() -> HashMap<&'static str, &'static str> {
        let mut ids = HashMap::new();
        ids.insert("ETH", "ethereum");
        ids.insert("WETH", "ethereum");
        ids.insert("BTC", "bitcoin");
        ids.insert("WBTC", "wrapped-bitcoin");
        ids.insert("LINK", "chainlink");
        ids.insert("AAVE", "aave");
        ids.insert("COMP", "compound-governance-token");
        ids.insert("UNI", "uniswap");
        ids.insert("WSTETH", "wrapped-steth");
        ids
    }

    fn is_stablecoin(symbol: &str) -> bool {
        matches!(
            symbol.to_uppercase().as_str(),
            "USDC" | "USDT" | "DAI" | "FRAX" | "LUSD" | "USDS" | "GHO" | "BUSD"
        )
    }

    /// Get the USD price for a token symbol.
    pub async fn price_usd(&self, symbol: &str) -> Result<f64, PriceError> {
        let upper = symbol.to_uppercase();

        if Self::is_stablecoin(&upper) {
            return Ok(1.0);
        }

        // Primary: on-chain oracle
        match self.fetch_oracle_price(&upper).await {
            Ok(price) => return Ok(price),
            Err(e) => {
                warn!(symbol = %upper, error = %e, "Oracle price failed, trying REST fallback");
            }
        }

        // Secondary: REST price API
        self.fetch_rest_price(&upper).await
    }

    async fn fetch_oracle_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let feed = self
            .feeds
            .get(symbol)
            .ok_or_else(|| PriceError::UnknownAsset(symbol.to_string()))?;

        let aggregator = IChainlinkAggregator::new(*feed, self.client.provider());

        let round = timeout(Self::SOURCE_TIMEOUT, aggregator.latestRoundData().call())
            .await
            .map_err(|_| PriceError::OracleError("latestRoundData timeout".to_string()))?
            .map_err(|e| PriceError::OracleError(format!("latestRoundData failed: {}", e)))?;

        let decimals = timeout(Self::SOURCE_TIMEOUT, aggregator.decimals().call())
            .await
            .map_err(|_| PriceError::OracleError("decimals timeout".to_string()))?
            .map_err(|e| PriceError::OracleError(format!("decimals failed: {}", e)))?
            ._0;

        if round.answer.is_negative() || round.answer.is_zero() {
            return Err(PriceError::OracleError(format!(
                "Non-positive oracle answer for {}",
                symbol
            )));
        }

        // Positive int256 has the same bit representation as uint256
        let answer = U256::from_limbs(round.answer.into_raw().into_limbs());
        let raw: u128 = answer
            .try_into()
            .map_err(|_| PriceError::OracleError("answer out of range".to_string()))?;

        let price = raw as f64 / 10f64.powi(decimals as i32);
        debug!(symbol = %symbol, price = %price, "Fetched oracle price");
        Ok(price)
    }

    async fn fetch_rest_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let coin_id = self
            .coin_ids
            .get(symbol)
            .ok_or_else(|| PriceError::UnknownAsset(symbol.to_string()))?;

        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.rest_base_url, coin_id
        );

        let response = timeout(Self::SOURCE_TIMEOUT, self.http_client.get(&url).send())
            .await
            .map_err(|_| PriceError::ApiError("Request timeout".to_string()))?
            .map_err(|e| PriceError::ApiError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PriceError::ApiError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let data: HashMap<String, SimplePriceEntry> = response
            .json()
            .await
            .map_err(|e| PriceError::ApiError(format!("JSON parse error: {}", e)))?;

        data.get(*coin_id)
            .map(|entry| entry.usd)
            .ok_or_else(|| PriceError::ApiError(format!("No price in response for {}", coin_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stablecoin_detection() {
        assert!(PriceService::is_stablecoin("USDC"));
        assert!(PriceService::is_stablecoin("dai"));
        assert!(!PriceService::is_stablecoin("WETH"));
    }

    #[test]
    fn test_feed_table_covers_majors() {
        let feeds = PriceService::mainnet_feeds();
        assert!(feeds.contains_key("WETH"));
        assert!(feeds.contains_key("WBTC"));
    }
}
