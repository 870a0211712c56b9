//! Mock service implementations for tests: settable prices, scripted
//! decisions and a scripted exchange behind the same ports the real
//! implementations use.

use crate::domain::errors::ExchangeError;
use crate::domain::model::{Model, ModelSettings};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::ports::{
    AssetBalance, CoinTicker, DecisionService, ExchangeClient, IndicatorSet, MarketDataService,
    MarketSnapshot, OrderAck, OrderFill, SymbolRules, TimeInForce,
};
use crate::domain::types::{Decision, OrderSide};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MockMarketData {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    fail: Arc<RwLock<bool>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, coin: &str, price: Decimal) {
        self.prices.write().await.insert(coin.to_string(), price);
    }

    pub async fn set_failing(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl MarketDataService for MockMarketData {
    async fn snapshot(&self, coins: &[String]) -> Result<MarketSnapshot> {
        if *self.fail.read().await {
            anyhow::bail!("market data unavailable");
        }
        let prices = self.prices.read().await;
        let mut tickers = HashMap::new();
        for coin in coins {
            if let Some(&price) = prices.get(coin) {
                tickers.insert(
                    coin.clone(),
                    CoinTicker {
                        coin: coin.clone(),
                        price,
                        change_24h_pct: Decimal::ZERO,
                        indicators: IndicatorSet::default(),
                    },
                );
            }
        }
        Ok(MarketSnapshot {
            tickers,
            fetched_at: Utc::now().timestamp(),
        })
    }
}

#[derive(Clone, Default)]
pub struct MockDecider {
    decisions: Arc<RwLock<HashMap<String, Decision>>>,
    fail: Arc<RwLock<bool>>,
}

impl MockDecider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_decision(&self, coin: &str, decision: Decision) {
        self.decisions
            .write()
            .await
            .insert(coin.to_string(), decision);
    }

    pub async fn clear(&self) {
        self.decisions.write().await.clear();
    }

    pub async fn set_failing(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl DecisionService for MockDecider {
    async fn decide(
        &self,
        _model: &Model,
        _settings: &ModelSettings,
        _market: &MarketSnapshot,
        _portfolio: &PortfolioSnapshot,
    ) -> Result<HashMap<String, Decision>> {
        if *self.fail.read().await {
            anyhow::bail!("decider unavailable");
        }
        Ok(self.decisions.read().await.clone())
    }
}

/// One order the mock exchange accepted.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

#[derive(Clone)]
pub struct MockExchange {
    pub orders: Arc<RwLock<Vec<PlacedOrder>>>,
    fill_price: Arc<RwLock<Decimal>>,
    commission_rate: Arc<RwLock<Decimal>>,
    fail_next: Arc<RwLock<Option<ExchangeError>>>,
    next_order_id: Arc<RwLock<i64>>,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self {
            orders: Arc::new(RwLock::new(Vec::new())),
            fill_price: Arc::new(RwLock::new(dec!(40000))),
            commission_rate: Arc::new(RwLock::new(dec!(0.001))),
            fail_next: Arc::new(RwLock::new(None)),
            next_order_id: Arc::new(RwLock::new(1)),
        }
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fill_price(&self, price: Decimal) {
        *self.fill_price.write().await = price;
    }

    pub async fn fail_next_with(&self, error: ExchangeError) {
        *self.fail_next.write().await = Some(error);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    async fn take_failure(&self) -> Option<ExchangeError> {
        self.fail_next.write().await.take()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn ping(&self) -> Result<bool, ExchangeError> {
        Ok(true)
    }

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError> {
        Ok(AssetBalance {
            asset: asset.to_string(),
            free: dec!(100000),
            locked: Decimal::ZERO,
        })
    }

    async fn get_ticker_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(*self.fill_price.read().await)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        Ok(SymbolRules {
            symbol: symbol.to_string(),
            step_size: dec!(0.00001),
            tick_size: dec!(0.01),
            min_notional: dec!(10),
        })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        if let Some(error) = self.take_failure().await {
            return Err(error);
        }

        self.orders.write().await.push(PlacedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
        });

        let price = *self.fill_price.read().await;
        let commission = quantity * price * *self.commission_rate.read().await;
        let mut next_id = self.next_order_id.write().await;
        let order_id = *next_id;
        *next_id += 1;

        Ok(OrderAck {
            order_id: order_id.to_string(),
            status: "FILLED".to_string(),
            executed_quantity: quantity,
            fills: vec![OrderFill {
                price,
                quantity,
                commission,
            }],
        })
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        _price: Decimal,
        _tif: TimeInForce,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_market_order(symbol, side, quantity).await
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: Option<&str>) -> Result<(), ExchangeError> {
        Ok(())
    }
}
