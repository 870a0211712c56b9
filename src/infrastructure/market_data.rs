//! Market data over the Binance public 24h ticker endpoint, with a short
//! in-process cache so several models ticking together share one fetch.

use crate::domain::ports::{CoinTicker, IndicatorSet, MarketDataService, MarketSnapshot};
use crate::domain::types::{coin_from_symbol, spot_symbol};
use crate::infrastructure::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

const CACHE_TTL: Duration = Duration::from_secs(10);

pub struct BinanceMarketData {
    client: ClientWithMiddleware,
    base_url: String,
    cache: RwLock<Option<(MarketSnapshot, Instant)>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    price_change_percent: String,
}

impl BinanceMarketData {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self, coins: &[String]) -> Result<MarketSnapshot> {
        let symbols: Vec<String> = coins
            .iter()
            .map(|c| format!("\"{}\"", spot_symbol(c)))
            .collect();
        let url = format!(
            "{}/api/v3/ticker/24hr?symbols=[{}]",
            self.base_url,
            symbols.join(",")
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch 24h tickers")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Ticker fetch failed: {} - {}", status, body);
        }

        let tickers: Vec<Ticker24h> = response
            .json()
            .await
            .context("Unparseable ticker response")?;

        let mut map = HashMap::new();
        for ticker in tickers {
            let Some(coin) = coin_from_symbol(&ticker.symbol) else {
                continue;
            };
            map.insert(
                coin.to_string(),
                CoinTicker {
                    coin: coin.to_string(),
                    price: Decimal::from_str(&ticker.last_price)
                        .with_context(|| format!("Bad price for {}", ticker.symbol))?,
                    change_24h_pct: Decimal::from_str(&ticker.price_change_percent)
                        .unwrap_or(Decimal::ZERO),
                    indicators: IndicatorSet::default(),
                },
            );
        }

        debug!("Fetched {} tickers", map.len());
        Ok(MarketSnapshot {
            tickers: map,
            fetched_at: Utc::now().timestamp(),
        })
    }
}

#[async_trait]
impl MarketDataService for BinanceMarketData {
    async fn snapshot(&self, coins: &[String]) -> Result<MarketSnapshot> {
        {
            let cache = self.cache.read().await;
            if let Some((snapshot, fetched)) = cache.as_ref()
                && fetched.elapsed() < CACHE_TTL
                && coins.iter().all(|c| snapshot.tickers.contains_key(c))
            {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.fetch(coins).await?;
        *self.cache.write().await = Some((snapshot.clone(), Instant::now()));
        Ok(snapshot)
    }
}
