use crate::application::execution::{EnvironmentExecutor, ExecutionOutcome, ExecutionStatus};
use crate::domain::errors::ExchangeError;
use crate::domain::model::{Model, ModelSettings};
use crate::domain::ports::{ExchangeClient, MarketSnapshot};
use crate::domain::types::{
    Decision, IncidentType, OrderSide, PositionSide, Severity, Signal, TradingEnvironment,
    spot_symbol,
};
use crate::infrastructure::persistence::Store;
use crate::infrastructure::persistence::store::FillRequest;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Live execution: format the order per the symbol's exchange rules, place a
/// market order, and fold the exchange-reported fills into the ledger. A
/// failed call writes an incident and mutates nothing; the next cycle
/// re-evaluates rather than retrying.
pub struct LiveExecutor {
    store: Arc<Store>,
    exchange: Arc<dyn ExchangeClient>,
}

impl LiveExecutor {
    pub fn new(store: Arc<Store>, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { store, exchange }
    }

    async fn record_failure(
        &self,
        model: &Model,
        coin: &str,
        error: &ExchangeError,
    ) -> Result<ExecutionOutcome> {
        let (severity, reason) = if error.is_timeout() {
            (Severity::Critical, "TIMEOUT".to_string())
        } else {
            (Severity::High, error.to_string())
        };

        error!(
            "Live execution failed for model {} {}: {}",
            model.id, coin, error
        );
        self.store
            .append_incident(
                Some(model.id),
                IncidentType::ExecutionError,
                severity,
                &format!("Live order for {} failed: {}", coin, reason),
                json!({
                    "coin": coin,
                    "error": error.to_string(),
                    "kind": match error {
                        ExchangeError::Auth(_) => "auth",
                        ExchangeError::InsufficientFunds(_) => "insufficient_funds",
                        ExchangeError::SymbolFilter(_) => "symbol_filter",
                        ExchangeError::RateLimit(_) => "rate_limit",
                        ExchangeError::Network(_) => "network",
                        ExchangeError::Other { .. } => "other",
                    },
                }),
            )
            .await?;

        Ok(ExecutionOutcome::failed(reason))
    }
}

#[async_trait]
impl EnvironmentExecutor for LiveExecutor {
    fn environment(&self) -> TradingEnvironment {
        TradingEnvironment::Live
    }

    async fn execute(
        &self,
        model: &Model,
        settings: &ModelSettings,
        coin: &str,
        decision: &Decision,
        market: &MarketSnapshot,
    ) -> Result<ExecutionOutcome> {
        let symbol = spot_symbol(coin);

        // Resolve the wire side and quantity. Closes trade opposite to the
        // open position's direction.
        let (side, requested_qty) = match decision.signal {
            Signal::BuyToEnter => (OrderSide::Buy, decision.quantity),
            Signal::SellToEnter => (OrderSide::Sell, decision.quantity),
            Signal::ClosePosition => {
                let portfolio = self.store.portfolio_snapshot(model.id).await?;
                let position = portfolio
                    .any_position(coin)
                    .with_context(|| format!("No open position for {}", coin))?;
                let qty = if decision.quantity > Decimal::ZERO
                    && decision.quantity < position.quantity
                {
                    decision.quantity
                } else {
                    position.quantity
                };
                let side = match position.side {
                    PositionSide::Long => OrderSide::Sell,
                    PositionSide::Short => OrderSide::Buy,
                };
                (side, qty)
            }
            Signal::Hold => bail!("Hold decisions are not executable"),
        };

        let rules = match self.exchange.get_symbol_info(&symbol).await {
            Ok(rules) => rules,
            Err(e) => return self.record_failure(model, coin, &e).await,
        };

        let quantity = rules.round_quantity(requested_qty);
        if quantity <= Decimal::ZERO {
            return self
                .record_failure(
                    model,
                    coin,
                    &ExchangeError::SymbolFilter(format!(
                        "quantity {} rounds to zero at step {}",
                        requested_qty, rules.step_size
                    )),
                )
                .await;
        }

        let ack = match self.exchange.place_market_order(&symbol, side, quantity).await {
            Ok(ack) => ack,
            Err(e) => return self.record_failure(model, coin, &e).await,
        };

        // Prefer exchange-reported fill economics; fall back to the snapshot
        // price when the ack carries no fills.
        let fill_price = match ack.avg_fill_price() {
            Some(price) => price,
            None => market
                .price(coin)
                .with_context(|| format!("No market price for {}", coin))?,
        };
        let fee = {
            let reported = ack.total_commission();
            if reported > Decimal::ZERO {
                reported
            } else {
                quantity * fill_price * settings.fee_rate
            }
        };
        let filled_qty = if ack.executed_quantity > Decimal::ZERO {
            rules.round_quantity(ack.executed_quantity)
        } else {
            quantity
        };

        let outcome = self
            .store
            .apply_fill(
                model.id,
                &FillRequest {
                    coin: coin.to_string(),
                    signal: decision.signal,
                    quantity: filled_qty,
                    price: fill_price,
                    fee,
                    exchange_order_id: Some(ack.order_id.clone()),
                    stop_loss: decision.stop_loss,
                    take_profit: decision.take_profit,
                    timestamp: Utc::now().timestamp(),
                },
            )
            .await?;

        info!(
            "Executed {} {} {} @ {} on exchange (order {}, model {})",
            decision.signal, filled_qty, coin, fill_price, ack.order_id, model.id
        );

        Ok(ExecutionOutcome {
            status: ExecutionStatus::Executed,
            trades: outcome.trades,
            exchange_order_id: Some(ack.order_id),
            failure: None,
        })
    }
}
