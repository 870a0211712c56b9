//! Live-environment execution through the mock exchange: fills fold into
//! the ledger with exchange economics, failures write classified incidents
//! and leave positions untouched, and timeouts escalate to critical.

mod common;

use aitrader::application::trading_executor::CycleOutcome;
use aitrader::domain::errors::ExchangeError;
use aitrader::domain::types::{
    AutomationLevel, IncidentType, Severity, Signal, TradingEnvironment,
};
use aitrader::infrastructure::mock::MockExchange;
use common::{decision, harness};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn live_fill_records_exchange_order_id() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("live", TradingEnvironment::Live, AutomationLevel::Full)
        .await;
    let exchange = Arc::new(MockExchange::new());
    h.registry
        .install_live_executor(model.id, model.exchange_environment, exchange.clone())
        .await;

    h.market.set_price("BTC", dec!(40000)).await;
    exchange.set_fill_price(dec!(40010)).await;
    h.decider
        .set_decision("BTC", decision(Signal::BuyToEnter, dec!(0.02), dec!(40000)))
        .await;

    let report = h.executor.run_cycle(model.id).await.unwrap();
    assert_eq!(report.executed(), 1);
    assert!(matches!(
        &report.entries[0].outcome,
        CycleOutcome::Executed { simulated: false, exchange_order_id: Some(_) }
    ));
    assert_eq!(exchange.order_count().await, 1);

    // The ledger carries the exchange's fill price and order id.
    let trades = h.store.recent_trades(model.id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, dec!(40010));
    assert!(trades[0].exchange_order_id.is_some());
}

#[tokio::test]
async fn exchange_rejection_writes_incident_and_mutates_nothing() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("live", TradingEnvironment::Live, AutomationLevel::Full)
        .await;
    let exchange = Arc::new(MockExchange::new());
    h.registry
        .install_live_executor(model.id, model.exchange_environment, exchange.clone())
        .await;

    h.market.set_price("BTC", dec!(40000)).await;
    exchange
        .fail_next_with(ExchangeError::InsufficientFunds(
            "Account has insufficient balance.".to_string(),
        ))
        .await;
    h.decider
        .set_decision("BTC", decision(Signal::BuyToEnter, dec!(0.02), dec!(40000)))
        .await;

    let report = h.executor.run_cycle(model.id).await.unwrap();
    assert_eq!(report.executed(), 0);
    assert!(matches!(
        &report.entries[0].outcome,
        CycleOutcome::Failed { .. }
    ));

    // No ledger mutation.
    let portfolio = h.store.portfolio_snapshot(model.id).await.unwrap();
    assert_eq!(portfolio.cash, dec!(10000));
    assert!(portfolio.positions.is_empty());

    let incidents = h
        .store
        .incidents_of_type(IncidentType::ExecutionError, 10)
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].severity, Severity::High);
    assert_eq!(incidents[0].details["kind"], "insufficient_funds");
}

#[tokio::test]
async fn network_timeout_escalates_to_critical() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("live", TradingEnvironment::Live, AutomationLevel::Full)
        .await;
    let exchange = Arc::new(MockExchange::new());
    h.registry
        .install_live_executor(model.id, model.exchange_environment, exchange.clone())
        .await;

    h.market.set_price("BTC", dec!(40000)).await;
    exchange
        .fail_next_with(ExchangeError::Network("request timed out".to_string()))
        .await;
    h.decider
        .set_decision("BTC", decision(Signal::BuyToEnter, dec!(0.02), dec!(40000)))
        .await;

    let report = h.executor.run_cycle(model.id).await.unwrap();
    assert!(matches!(
        &report.entries[0].outcome,
        CycleOutcome::Failed { reason } if reason == "TIMEOUT"
    ));

    let incidents = h
        .store
        .incidents_of_type(IncidentType::ExecutionError, 10)
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].severity, Severity::Critical);

    // The next cycle re-evaluates; no retry happened inside the failed one.
    assert_eq!(exchange.order_count().await, 0);
    let report = h.executor.run_cycle(model.id).await.unwrap();
    assert_eq!(report.executed(), 1);
    assert_eq!(exchange.order_count().await, 1);
}

#[tokio::test]
async fn live_model_without_credentials_aborts_cycle() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("live", TradingEnvironment::Live, AutomationLevel::Full)
        .await;
    // No installed executor, no stored credentials, no overrides.

    h.market.set_price("BTC", dec!(40000)).await;
    h.decider
        .set_decision("BTC", decision(Signal::BuyToEnter, dec!(0.02), dec!(40000)))
        .await;

    let report = h.executor.run_cycle(model.id).await.unwrap();
    assert!(report.aborted.is_some());

    let incidents = h
        .store
        .incidents_of_type(IncidentType::ExecutionError, 10)
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);
}
