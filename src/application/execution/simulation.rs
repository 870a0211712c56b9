use crate::application::execution::{EnvironmentExecutor, ExecutionOutcome, ExecutionStatus};
use crate::domain::model::{Model, ModelSettings};
use crate::domain::ports::MarketSnapshot;
use crate::domain::types::{Decision, Signal, TradingEnvironment};
use crate::infrastructure::persistence::Store;
use crate::infrastructure::persistence::store::FillRequest;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Simulation fills at the current market price with fee = notional x
/// fee_rate. No external calls; the store transaction is the whole trade.
pub struct SimulationExecutor {
    store: Arc<Store>,
}

impl SimulationExecutor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EnvironmentExecutor for SimulationExecutor {
    fn environment(&self) -> TradingEnvironment {
        TradingEnvironment::Simulation
    }

    async fn execute(
        &self,
        model: &Model,
        settings: &ModelSettings,
        coin: &str,
        decision: &Decision,
        market: &MarketSnapshot,
    ) -> Result<ExecutionOutcome> {
        let price = market
            .price(coin)
            .with_context(|| format!("No market price for {}", coin))?;

        let quantity = match decision.signal {
            Signal::ClosePosition => {
                let portfolio = self.store.portfolio_snapshot(model.id).await?;
                let position = portfolio
                    .any_position(coin)
                    .with_context(|| format!("No open position for {}", coin))?;
                if decision.quantity > Decimal::ZERO && decision.quantity < position.quantity {
                    decision.quantity
                } else {
                    position.quantity
                }
            }
            Signal::BuyToEnter | Signal::SellToEnter => decision.quantity,
            Signal::Hold => bail!("Hold decisions are not executable"),
        };

        let fee = quantity * price * settings.fee_rate;
        let outcome = self
            .store
            .apply_fill(
                model.id,
                &FillRequest {
                    coin: coin.to_string(),
                    signal: decision.signal,
                    quantity,
                    price,
                    fee,
                    exchange_order_id: None,
                    stop_loss: decision.stop_loss,
                    take_profit: decision.take_profit,
                    timestamp: Utc::now().timestamp(),
                },
            )
            .await?;

        info!(
            "Simulated {} {} {} @ {} for model {} (fee {}, realized {})",
            decision.signal, quantity, coin, price, model.id, fee, outcome.realized_pnl
        );

        Ok(ExecutionOutcome {
            status: ExecutionStatus::Simulated,
            trades: outcome.trades,
            exchange_order_id: None,
            failure: None,
        })
    }
}
