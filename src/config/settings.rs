use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,
    pub blockchain: BlockchainSettings,
    pub sources: SourceSettings,
    pub cache: CacheSettings,
    pub risk: RiskSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainSettings {
    pub rpc_url: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// GraphQL endpoint for vault metadata
    pub vault_api_url: String,
    /// REST yields aggregator base URL
    pub yields_api_url: String,
    /// REST price fallback base URL
    pub price_api_url: String,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Fraction of max borrow capacity considered safe, (0, 1]
    pub safety_margin: f64,
    pub markets_refresh_seconds: u64,
    pub positions_refresh_seconds: u64,
    pub health_check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api: ApiSettings::default(),
            blockchain: BlockchainSettings::default(),
            sources: SourceSettings::default(),
            cache: CacheSettings::default(),
            risk: RiskSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for BlockchainSettings {
    fn default() -> Self {
        BlockchainSettings {
            rpc_url: "https://eth-mainnet.alchemyapi.io/v2/test".to_string(),
            chain_id: 1,
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            vault_api_url: "https://blue-api.morpho.org/graphql".to_string(),
            yields_api_url: "https://yields.llama.fi".to_string(),
            price_api_url: "https://api.coingecko.com/api/v3".to_string(),
            http_timeout_seconds: 15,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            redis_url: None,
            max_capacity: 10_000,
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        RiskSettings {
            safety_margin: 0.8,
            markets_refresh_seconds: 30,
            positions_refresh_seconds: 15,
            health_check_interval_seconds: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let _settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Ok(Settings {
            api: ApiSettings {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("API_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
            },
            blockchain: BlockchainSettings {
                rpc_url: env::var("ETHEREUM_RPC_URL")
                    .unwrap_or_else(|_| BlockchainSettings::default().rpc_url),
                chain_id: env::var("CHAIN_ID")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1),
            },
            sources: SourceSettings {
                vault_api_url: env::var("VAULT_API_URL")
                    .unwrap_or_else(|_| SourceSettings::default().vault_api_url),
                yields_api_url: env::var("YIELDS_API_URL")
                    .unwrap_or_else(|_| SourceSettings::default().yields_api_url),
                price_api_url: env::var("PRICE_API_URL")
                    .unwrap_or_else(|_| SourceSettings::default().price_api_url),
                http_timeout_seconds: env::var("HTTP_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15),
            },
            cache: CacheSettings {
                redis_url: env::var("REDIS_URL").ok(),
                max_capacity: env::var("CACHE_MAX_CAPACITY")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .unwrap_or(10_000),
            },
            risk: RiskSettings {
                safety_margin: env::var("SAFE_BORROW_MARGIN")
                    .unwrap_or_else(|_| "0.8".to_string())
                    .parse()
                    .unwrap_or(0.8),
                markets_refresh_seconds: env::var("MARKETS_REFRESH_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                positions_refresh_seconds: env::var("POSITIONS_REFRESH_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15),
                health_check_interval_seconds: env::var("HEALTH_CHECK_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            logging: LoggingSettings {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        })
    }
}
