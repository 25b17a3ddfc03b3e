pub mod aave_v3;
pub mod compound_v2;
pub mod compound_v3;
pub mod contracts;
pub mod morpho_vault;
pub mod traits;

use std::sync::Arc;

use alloy::primitives::U256;

pub use aave_v3::AaveV3Adapter;
pub use compound_v2::CompoundV2Adapter;
pub use compound_v3::CompoundV3Adapter;
pub use morpho_vault::MorphoVaultAdapter;
pub use traits::{AdapterError, LendingAdapter};

use crate::blockchain::EthereumClient;
use crate::models::Protocol;
use crate::services::price_service::PriceService;
use crate::services::vault_api::VaultApiClient;
use crate::services::yields_api::YieldsApiClient;

/// Construct one adapter for a protocol tag.
///
/// The match is exhaustive over `Protocol`, so adding a variant without an
/// adapter is a compile error — dispatch stays a closed table, not
/// stringly-typed lookup.
pub fn build_adapter(
    protocol: Protocol,
    client: EthereumClient,
    chain_id: u64,
    price_service: Arc<PriceService>,
    vault_api: Arc<VaultApiClient>,
    yields: Arc<YieldsApiClient>,
) -> Result<Box<dyn LendingAdapter>, AdapterError> {
    let adapter: Box<dyn LendingAdapter> = match protocol {
        Protocol::AaveV3 => Box::new(AaveV3Adapter::new(client, chain_id, price_service, yields)?),
        Protocol::CompoundV3 => {
            Box::new(CompoundV3Adapter::new(client, chain_id, price_service, yields)?)
        }
        Protocol::CompoundV2 => {
            Box::new(CompoundV2Adapter::new(client, chain_id, price_service, yields)?)
        }
        Protocol::MorphoVault => Box::new(MorphoVaultAdapter::new(
            client,
            chain_id,
            vault_api,
            price_service,
            yields,
        )),
    };

    Ok(adapter)
}

/// Build the full adapter set for a chain. A protocol without deployments
/// on the chain is skipped with a log line rather than failing the set.
pub fn build_adapters(
    client: EthereumClient,
    chain_id: u64,
    price_service: Arc<PriceService>,
    vault_api: Arc<VaultApiClient>,
    yields: Arc<YieldsApiClient>,
) -> Vec<Box<dyn LendingAdapter>> {
    let mut adapters = Vec::new();

    for &protocol in Protocol::all() {
        match build_adapter(
            protocol,
            client.clone(),
            chain_id,
            price_service.clone(),
            vault_api.clone(),
            yields.clone(),
        ) {
            Ok(adapter) => {
                tracing::info!(protocol = %protocol, chain_id, "Initialized adapter");
                adapters.push(adapter);
            }
            Err(e) => {
                tracing::warn!(protocol = %protocol, chain_id, error = %e, "Skipping adapter");
            }
        }
    }

    adapters
}

/// Scale a raw integer amount down by `decimals` into an f64.
pub(crate) fn scale_down(value: U256, decimals: u8) -> f64 {
    let raw: f64 = match TryInto::<u128>::try_into(value) {
        Ok(v) => v as f64,
        // Values beyond u128 lose precision anyway; string parse keeps the
        // magnitude right
        Err(_) => value.to_string().parse().unwrap_or(f64::MAX),
    };
    raw / 10f64.powi(decimals as i32)
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_down() {
        assert_eq!(scale_down(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(scale_down(U256::ZERO, 18), 0.0);

        // 1 ether
        let wei = U256::from(10).pow(U256::from(18));
        assert_eq!(scale_down(wei, 18), 1.0);
    }

    #[test]
    fn test_scale_down_beyond_u128() {
        let huge = U256::MAX;
        let scaled = scale_down(huge, 18);
        assert!(scaled.is_finite() || scaled == f64::MAX);
        assert!(scaled > 0.0);
    }
}
