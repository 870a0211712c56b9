use crate::domain::errors::ExchangeError;
use crate::domain::model::{Model, ModelSettings};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::types::{Decision, OrderSide};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Named technical indicators the AI prompt references. The math is supplied
/// by the market-data provider when available; absent values stay None.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub rsi_14: Option<Decimal>,
    pub macd: Option<Decimal>,
    pub macd_signal: Option<Decimal>,
    pub ema_20: Option<Decimal>,
    pub ema_50: Option<Decimal>,
    pub atr_14: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct CoinTicker {
    pub coin: String,
    pub price: Decimal,
    pub change_24h_pct: Decimal,
    pub indicators: IndicatorSet,
}

/// Market view for one cycle: spot price and 24h change per basket coin.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub tickers: HashMap<String, CoinTicker>,
    pub fetched_at: i64,
}

impl MarketSnapshot {
    pub fn price(&self, coin: &str) -> Option<Decimal> {
        self.tickers.get(coin).map(|t| t.price)
    }

    pub fn price_map(&self) -> HashMap<String, Decimal> {
        self.tickers
            .iter()
            .map(|(coin, ticker)| (coin.clone(), ticker.price))
            .collect()
    }
}

#[async_trait]
pub trait MarketDataService: Send + Sync {
    /// Current snapshot for the given coins. Implementations may serve a
    /// briefly cached view.
    async fn snapshot(&self, coins: &[String]) -> Result<MarketSnapshot>;
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    /// One decision per coin. Stateless with respect to the core; the
    /// returned map may omit coins (treated as hold).
    async fn decide(
        &self,
        model: &Model,
        settings: &ModelSettings,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> Result<HashMap<String, Decision>>;
}

#[derive(Debug, Clone)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Exchange trading rules for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolRules {
    pub symbol: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_notional: Decimal,
}

impl SymbolRules {
    /// Round a quantity down to the symbol's step size.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        if self.step_size <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.step_size).floor() * self.step_size
    }

    /// Round a price down to the symbol's tick size.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        (price / self.tick_size).floor() * self.tick_size
    }
}

#[derive(Debug, Clone)]
pub struct OrderFill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub executed_quantity: Decimal,
    pub fills: Vec<OrderFill>,
}

impl OrderAck {
    /// Quantity-weighted average fill price, if any fills were reported.
    pub fn avg_fill_price(&self) -> Option<Decimal> {
        let total_qty: Decimal = self.fills.iter().map(|f| f.quantity).sum();
        if total_qty <= Decimal::ZERO {
            return None;
        }
        let notional: Decimal = self.fills.iter().map(|f| f.price * f.quantity).sum();
        Some(notional / total_qty)
    }

    pub fn total_commission(&self) -> Decimal {
        self.fills.iter().map(|f| f.commission).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// Thin wrapper around a spot exchange. One per (model, exchange environment).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn ping(&self) -> Result<bool, ExchangeError>;

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance, ExchangeError>;

    async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolRules, ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        tif: TimeInForce,
    ) -> Result<OrderAck, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    async fn cancel_all_orders(&self, symbol: Option<&str>) -> Result<(), ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_quantity_to_step() {
        let rules = SymbolRules {
            symbol: "BTCUSDT".to_string(),
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_notional: dec!(10),
        };
        assert_eq!(rules.round_quantity(dec!(0.0234)), dec!(0.023));
        assert_eq!(rules.round_quantity(dec!(0.02)), dec!(0.020));
    }

    #[test]
    fn test_avg_fill_price_weighted() {
        let ack = OrderAck {
            order_id: "1".to_string(),
            status: "FILLED".to_string(),
            executed_quantity: dec!(0.03),
            fills: vec![
                OrderFill {
                    price: dec!(40000),
                    quantity: dec!(0.02),
                    commission: dec!(0.4),
                },
                OrderFill {
                    price: dec!(40100),
                    quantity: dec!(0.01),
                    commission: dec!(0.2),
                },
            ],
        };
        // (40000*0.02 + 40100*0.01) / 0.03
        let avg = ack.avg_fill_price().unwrap();
        assert!(avg > dec!(40033) && avg < dec!(40034));
        assert_eq!(ack.total_commission(), dec!(0.6));
    }

    #[test]
    fn test_avg_fill_price_empty() {
        let ack = OrderAck {
            order_id: "1".to_string(),
            status: "FILLED".to_string(),
            executed_quantity: Decimal::ZERO,
            fills: vec![],
        };
        assert_eq!(ack.avg_fill_price(), None);
    }
}
