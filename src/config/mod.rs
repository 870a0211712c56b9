//! Configuration from environment variables. Stored per-model credentials
//! always take precedence over the env overrides here.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_COINS: &str = "BTC,ETH,SOL,BNB,XRP,DOGE";
const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the SQLite database and any operator artifacts.
    pub data_dir: PathBuf,
    pub database_url: String,
    /// The fixed basket of coins every cycle asks the AI about.
    pub coins: Vec<String>,
    /// Optional exchange credential overrides (stored credentials win).
    pub binance_api_key: Option<String>,
    pub binance_secret_key: Option<String>,
    /// AI provider endpoint (OpenAI-compatible) and key override.
    pub ai_base_url: String,
    pub ai_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(
            env::var("AITRADER_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        let database_url = match env::var("AITRADER_DB_URL") {
            Ok(url) => url,
            Err(_) => {
                let path = data_dir.join("aitrader.db");
                format!(
                    "sqlite://{}",
                    path.to_str().context("Data directory path is not UTF-8")?
                )
            }
        };

        let coins: Vec<String> = env::var("AITRADER_COINS")
            .unwrap_or_else(|_| DEFAULT_COINS.to_string())
            .split(',')
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        if coins.is_empty() {
            anyhow::bail!("AITRADER_COINS resolved to an empty basket");
        }

        Ok(Self {
            data_dir,
            database_url,
            coins,
            binance_api_key: env::var("BINANCE_API_KEY").ok(),
            binance_secret_key: env::var("BINANCE_SECRET_KEY").ok(),
            ai_base_url: env::var("AI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_AI_BASE_URL.to_string()),
            ai_api_key: env::var("AI_API_KEY").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_basket_parsing() {
        let coins: Vec<String> = DEFAULT_COINS
            .split(',')
            .map(|c| c.trim().to_uppercase())
            .collect();
        assert_eq!(coins.len(), 6);
        assert_eq!(coins[0], "BTC");
    }
}
