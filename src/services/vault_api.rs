use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::info;

use crate::error::AppError;

#[derive(Debug, Serialize)]
struct GraphQuery {
    query: String,
    variables: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct GraphResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphError>>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct VaultsData {
    vaults: VaultsConnection,
}

#[derive(Debug, Deserialize)]
struct VaultsConnection {
    items: Vec<VaultItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultItem {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub whitelisted: bool,
    pub asset: VaultAsset,
    pub state: VaultState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultAsset {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultState {
    /// Gross APY before fees
    pub apy: f64,
    /// APY net of the vault's performance fee
    #[serde(rename = "netApy")]
    pub net_apy: f64,
    #[serde(rename = "totalAssets")]
    pub total_assets: f64,
    #[serde(rename = "totalAssetsUsd")]
    pub total_assets_usd: f64,
    pub fee: f64,
}

/// GraphQL client for ERC-4626 vault metadata.
///
/// Only descriptive data (names, APYs, TVL) comes from here; share/asset
/// conversion always goes through the vault contract itself.
#[derive(Debug, Clone)]
pub struct VaultApiClient {
    http_client: Client,
    endpoint: String,
}

impl VaultApiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Vaults below this TVL are noise for routing purposes.
    const MIN_TVL_USD: f64 = 10_000.0;

    pub fn new(endpoint: String) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent("lending-aggregator/1.0")
            .build()
            .map_err(|e| AppError::ExternalApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// Fetch whitelisted vaults for a chain, largest TVL first.
    pub async fn fetch_vaults(&self, chain_id: u64) -> Result<Vec<VaultItem>, AppError> {
        let query = r#"
            query Vaults($chainId: Int!) {
                vaults(first: 100, where: { chainId_in: [$chainId] }) {
                    items {
                        address
                        symbol
                        name
                        whitelisted
                        asset {
                            address
                            symbol
                            decimals
                        }
                        state {
                            apy
                            netApy
                            totalAssets
                            totalAssetsUsd
                            fee
                        }
                    }
                }
            }
        "#
        .to_string();

        let mut variables = HashMap::new();
        variables.insert(
            "chainId".to_string(),
            serde_json::Value::Number(chain_id.into()),
        );

        let graph_query = GraphQuery {
            query,
            variables: Some(variables),
        };

        let response = timeout(
            Self::REQUEST_TIMEOUT,
            self.http_client.post(&self.endpoint).json(&graph_query).send(),
        )
        .await
        .map_err(|_| AppError::ExternalApiError("Vault API request timeout".to_string()))?
        .map_err(|e| AppError::ExternalApiError(format!("Vault API request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Vault API HTTP error: {}",
                response.status()
            )));
        }

        let graph_response: GraphResponse<VaultsData> = response
            .json()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Failed to parse vault response: {}", e)))?;

        if let Some(errors) = graph_response.errors {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(AppError::ExternalApiError(format!(
                "Vault API errors: {}",
                messages.join("; ")
            )));
        }

        let mut vaults = graph_response
            .data
            .map(|d| d.vaults.items)
            .ok_or_else(|| AppError::ExternalApiError("No vault data in response".to_string()))?;

        vaults.retain(|v| v.whitelisted && v.state.total_assets_usd >= Self::MIN_TVL_USD);
        vaults.sort_by(|a, b| {
            b.state
                .total_assets_usd
                .partial_cmp(&a.state.total_assets_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(chain_id, vault_count = vaults.len(), "Fetched vault metadata");

        Ok(vaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vaults_body() -> serde_json::Value {
        serde_json::json!({
            "data": {
                "vaults": {
                    "items": [
                        {
                            "address": "0xBEeF01735c132Ada46AA9aA4c54623cAA92A64CB",
                            "symbol": "steakUSDC",
                            "name": "Steakhouse USDC",
                            "whitelisted": true,
                            "asset": {
                                "address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                                "symbol": "USDC",
                                "decimals": 6
                            },
                            "state": {
                                "apy": 5.4,
                                "netApy": 4.9,
                                "totalAssets": 25_000_000.0,
                                "totalAssetsUsd": 25_000_000.0,
                                "fee": 0.1
                            }
                        },
                        {
                            "address": "0x0000000000000000000000000000000000000dad",
                            "symbol": "dustVault",
                            "name": "Dust",
                            "whitelisted": true,
                            "asset": { "address": "0x0", "symbol": "DUST", "decimals": 18 },
                            "state": {
                                "apy": 900.0,
                                "netApy": 899.0,
                                "totalAssets": 12.0,
                                "totalAssetsUsd": 12.0,
                                "fee": 0.0
                            }
                        }
                    ]
                }
            }
        })
    }

    #[tokio::test]
    async fn test_fetch_vaults_filters_dust() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vaults_body()))
            .mount(&server)
            .await;

        let client = VaultApiClient::new(server.uri()).unwrap();
        let vaults = client.fetch_vaults(1).await.unwrap();

        assert_eq!(vaults.len(), 1);
        assert_eq!(vaults[0].symbol, "steakUSDC");
        assert!((vaults[0].state.net_apy - 4.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_graphql_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{ "message": "rate limited" }]
            })))
            .mount(&server)
            .await;

        let client = VaultApiClient::new(server.uri()).unwrap();
        let result = client.fetch_vaults(1).await;
        assert!(result.is_err());
    }
}
