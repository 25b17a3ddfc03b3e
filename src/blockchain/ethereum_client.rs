use alloy::{
    primitives::{Address, Bytes, TxKind, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{TransactionInput, TransactionRequest},
    transports::http::{Client, Http},
};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct EthereumClient {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EthereumError {
    #[error("RPC connection failed: {0}")]
    RpcError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Contract call failed: {0}")]
    ContractError(String),

    #[error("Call reverted: {0}")]
    Reverted(String),
}

impl EthereumClient {
    /// Create a new Ethereum client with the given RPC URL.
    pub async fn new(rpc_url: &str) -> Result<Self, EthereumError> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse().map_err(|e| {
            EthereumError::RpcError(format!("Invalid RPC URL: {}", e))
        })?);

        let client = Self {
            provider,
            rpc_url: rpc_url.to_string(),
        };

        client.test_connection().await?;

        Ok(client)
    }

    /// Create a new Ethereum client from an existing provider.
    pub fn from_provider(provider: RootProvider<Http<Client>>) -> Self {
        Self {
            provider,
            rpc_url: "from_existing_provider".to_string(),
        }
    }

    /// Test the RPC connection by getting the latest block number.
    pub async fn test_connection(&self) -> Result<(), EthereumError> {
        match self.provider.get_block_number().await {
            Ok(block_number) => {
                tracing::info!(
                    rpc_url = %self.rpc_url,
                    block_number = %block_number,
                    "Ethereum RPC connection established"
                );
                Ok(())
            }
            Err(e) => Err(EthereumError::RpcError(format!(
                "Failed to connect to Ethereum RPC: {}",
                e
            ))),
        }
    }

    /// Validate an Ethereum address string.
    pub fn validate_address(address: &str) -> Result<Address, EthereumError> {
        Address::from_str(address)
            .map_err(|e| EthereumError::InvalidAddress(format!("Invalid address format: {}", e)))
    }

    /// Get the ETH balance for an address.
    pub async fn get_eth_balance(&self, address: Address) -> Result<U256, EthereumError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| EthereumError::RpcError(format!("Failed to get ETH balance: {}", e)))
    }

    /// Get the current block number.
    pub async fn get_block_number(&self) -> Result<u64, EthereumError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| EthereumError::RpcError(format!("Failed to get block number: {}", e)))
    }

    /// Dry-run a call against current chain state without broadcasting.
    ///
    /// A revert comes back as `EthereumError::Reverted` carrying the node's
    /// revert string, which the simulation service classifies.
    pub async fn dry_run(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<Bytes, EthereumError> {
        let tx = Self::call_request(from, to, data);

        self.provider.call(&tx).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("revert") || message.contains("execution reverted") {
                EthereumError::Reverted(message)
            } else {
                EthereumError::RpcError(message)
            }
        })
    }

    /// Estimate gas for a call.
    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<u64, EthereumError> {
        let tx = Self::call_request(from, to, data);

        let gas = self
            .provider
            .estimate_gas(&tx)
            .await
            .map_err(|e| EthereumError::RpcError(format!("Gas estimation failed: {}", e)))?;

        Ok(gas as u64)
    }

    /// Current gas price in wei.
    pub async fn gas_price(&self) -> Result<u128, EthereumError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| EthereumError::RpcError(format!("Failed to get gas price: {}", e)))
    }

    /// Get the underlying provider for contract instantiation.
    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    fn call_request(from: Address, to: Address, data: Vec<u8>) -> TransactionRequest {
        TransactionRequest {
            from: Some(from),
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(data.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        let valid_addr = "0x742d35Cc6634C0532925a3b8D8b7C8b8b8b8b8b8";
        assert!(EthereumClient::validate_address(valid_addr).is_ok());

        let invalid_addr = "0xinvalid";
        assert!(EthereumClient::validate_address(invalid_addr).is_err());
    }

    #[tokio::test]
    async fn test_client_creation_with_invalid_url() {
        let result = EthereumClient::new("invalid-url").await;
        assert!(result.is_err());
    }
}
