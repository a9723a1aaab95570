//! Application configuration loaded from environment variables.

use qf_engine::{Address, PredictionConfig};

use crate::errors::{IndexerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint
    pub rpc_url: String,
    /// Round manager contract emitting `GrantDonation` logs
    pub round_manager_address: Address,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) to poll the RPC for new blocks
    pub poll_interval_secs: u64,
    /// Maximum block span per `eth_getLogs` request
    pub blocks_per_page: u64,
    /// Block to start from if no cursor is saved
    pub start_block: u64,
    /// JSON file listing rounds, grants and tokens
    pub rounds_file: String,
    /// Price API base URL (CoinGecko-compatible `simple/token_price`)
    pub quote_api_url: String,
    /// Asset platform segment of the price API path
    pub quote_platform: String,
    /// Reference currency quotes are expressed in
    pub quote_currency: String,
    /// Trust bonus endpoint; scores fall back to the default when unset
    pub trust_api_url: Option<String>,
    /// Trust score for payers the trust API does not know
    pub default_trust_score: f64,
    /// Trust score of the hypothetical donor behind prediction points
    pub synthetic_trust_score: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            round_manager_address: env_var("ROUND_MANAGER_ADDRESS")
                .map_err(|_| {
                    IndexerError::Config(
                        "ROUND_MANAGER_ADDRESS environment variable is required".to_string(),
                    )
                })?
                .parse()
                .map_err(|_| IndexerError::Config("Invalid ROUND_MANAGER_ADDRESS".to_string()))?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./grants_indexer.db?mode=rwc".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| IndexerError::Config("Invalid API_PORT".to_string()))?,
            poll_interval_secs: env_var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()
                .map_err(|_| IndexerError::Config("Invalid POLL_INTERVAL_SECS".to_string()))?,
            blocks_per_page: env_var("BLOCKS_PER_PAGE")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .ok()
                .filter(|n: &u64| *n > 0)
                .ok_or_else(|| IndexerError::Config("Invalid BLOCKS_PER_PAGE".to_string()))?,
            start_block: env_var("START_BLOCK")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| IndexerError::Config("Invalid START_BLOCK".to_string()))?,
            rounds_file: env_var("ROUNDS_FILE").unwrap_or_else(|_| "./rounds.json".to_string()),
            quote_api_url: env_var("QUOTE_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            quote_platform: env_var("QUOTE_PLATFORM").unwrap_or_else(|_| "ethereum".to_string()),
            quote_currency: env_var("QUOTE_CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            trust_api_url: env_var("TRUST_API_URL").ok().filter(|s| !s.trim().is_empty()),
            default_trust_score: trust_score("DEFAULT_TRUST_SCORE", "0")?,
            synthetic_trust_score: trust_score("SYNTHETIC_TRUST_SCORE", "1")?,
        })
    }

    pub fn prediction_config(&self) -> PredictionConfig {
        PredictionConfig {
            synthetic_trust: self.synthetic_trust_score,
            default_trust: self.default_trust_score,
        }
    }
}

#[cfg(test)]
impl Config {
    /// Offline defaults; only the RPC endpoint is set.
    pub fn for_tests(rpc_url: &str) -> Self {
        Config {
            rpc_url: rpc_url.to_string(),
            round_manager_address: Address::from_bytes([0xaa; 20]),
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            poll_interval_secs: 60,
            blocks_per_page: 2000,
            start_block: 0,
            rounds_file: String::new(),
            quote_api_url: String::new(),
            quote_platform: "ethereum".to_string(),
            quote_currency: "usd".to_string(),
            trust_api_url: None,
            default_trust_score: 0.0,
            synthetic_trust_score: 1.0,
        }
    }
}

fn trust_score(key: &str, default: &str) -> Result<f64> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .ok()
        .filter(|s| (0.0..=1.0).contains(s))
        .ok_or_else(|| IndexerError::Config(format!("{key} must be between 0 and 1")))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| IndexerError::Config(format!("Missing env var: {key}")))
}
