//! Store-level ledger invariants: trade/position/cash consistency, the
//! daily rollover of the risk state, and operator setters with their
//! incident types.

mod common;

use aitrader::application::model_service::ModelService;
use aitrader::domain::errors::ValidationError;
use aitrader::domain::types::{
    AutomationLevel, ExchangeEnvironment, IncidentType, ModelStatus, PositionSide, Signal,
    TradeSide, TradingEnvironment,
};
use aitrader::infrastructure::persistence::store::FillRequest;
use chrono::Utc;
use common::harness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn fill(coin: &str, signal: Signal, qty: Decimal, price: Decimal, fee: Decimal) -> FillRequest {
    FillRequest {
        coin: coin.to_string(),
        signal,
        quantity: qty,
        price,
        fee,
        exchange_order_id: None,
        stop_loss: None,
        take_profit: None,
        timestamp: Utc::now().timestamp(),
    }
}

#[tokio::test]
async fn long_round_trip_conserves_cash() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;

    // Open long 0.02 @ 40000 ($0.80 fee), close at 41000 ($0.82 fee).
    h.store
        .apply_fill(model.id, &fill("BTC", Signal::BuyToEnter, dec!(0.02), dec!(40000), dec!(0.80)))
        .await
        .unwrap();
    let outcome = h
        .store
        .apply_fill(
            model.id,
            &fill("BTC", Signal::ClosePosition, dec!(0.02), dec!(41000), dec!(0.82)),
        )
        .await
        .unwrap();

    // Realized: (41000-40000)*0.02 - 0.82.
    assert_eq!(outcome.realized_pnl, dec!(19.18));
    // Cash: 10000 - 800 - 0.80 + 820 - 0.82.
    assert_eq!(outcome.cash_after, dec!(10018.38));

    // Position gone; signed trade quantities sum to zero.
    let portfolio = h.store.portfolio_snapshot(model.id).await.unwrap();
    assert!(portfolio.positions.is_empty());
    let trades = h.store.recent_trades(model.id, 10).await.unwrap();
    let net: Decimal = trades
        .iter()
        .map(|t| match t.side {
            TradeSide::Buy => t.quantity,
            TradeSide::Sell | TradeSide::Close => -t.quantity,
        })
        .sum();
    assert_eq!(net, Decimal::ZERO);
}

#[tokio::test]
async fn short_round_trip_books_pnl() {
    let h = harness(&["ETH"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;

    // Short 0.4 @ 2000, cover at 1900.
    h.store
        .apply_fill(model.id, &fill("ETH", Signal::SellToEnter, dec!(0.4), dec!(2000), dec!(0.80)))
        .await
        .unwrap();
    let portfolio = h.store.portfolio_snapshot(model.id).await.unwrap();
    assert_eq!(portfolio.positions[0].side, PositionSide::Short);
    // Proceeds credited at open: 10000 + 800 - 0.80.
    assert_eq!(portfolio.cash, dec!(10799.20));

    let outcome = h
        .store
        .apply_fill(
            model.id,
            &fill("ETH", Signal::ClosePosition, dec!(0.4), dec!(1900), dec!(0.76)),
        )
        .await
        .unwrap();
    // Realized: (2000-1900)*0.4 - 0.76.
    assert_eq!(outcome.realized_pnl, dec!(39.24));
    // Buy-back: 10799.20 - 760 - 0.76.
    assert_eq!(outcome.cash_after, dec!(10038.44));
}

#[tokio::test]
async fn averaging_into_a_position() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;

    h.store
        .apply_fill(model.id, &fill("BTC", Signal::BuyToEnter, dec!(0.01), dec!(40000), dec!(0.40)))
        .await
        .unwrap();
    h.store
        .apply_fill(model.id, &fill("BTC", Signal::BuyToEnter, dec!(0.01), dec!(42000), dec!(0.42)))
        .await
        .unwrap();

    let portfolio = h.store.portfolio_snapshot(model.id).await.unwrap();
    assert_eq!(portfolio.positions.len(), 1);
    assert_eq!(portfolio.positions[0].quantity, dec!(0.02));
    assert_eq!(portfolio.positions[0].avg_entry_price, dec!(41000));
}

#[tokio::test]
async fn fill_never_drives_cash_negative() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;

    // $12,000 notional against $10,000 cash.
    let result = h
        .store
        .apply_fill(model.id, &fill("BTC", Signal::BuyToEnter, dec!(0.3), dec!(40000), dec!(12)))
        .await;
    assert!(result.is_err());

    // Ledger unchanged.
    let portfolio = h.store.portfolio_snapshot(model.id).await.unwrap();
    assert_eq!(portfolio.cash, dec!(10000));
    assert!(portfolio.positions.is_empty());
    assert!(h.store.recent_trades(model.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_inputs_surface_typed_validation_errors() {
    let h = harness(&["BTC"]).await;

    let err = h.store.get_model(999).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ValidationError>(),
        Some(ValidationError::UnknownModel(999))
    ));

    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;
    let err = h
        .store
        .apply_fill(model.id, &fill("BTC", Signal::BuyToEnter, dec!(0), dec!(40000), dec!(0)))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ValidationError>(),
        Some(ValidationError::InvalidQuantity(_))
    ));
}

#[tokio::test]
async fn close_without_position_is_rejected() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;
    let result = h
        .store
        .apply_fill(model.id, &fill("BTC", Signal::ClosePosition, dec!(0.01), dec!(40000), dec!(0.4)))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn risk_state_rolls_at_utc_day_boundary() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;

    // Day one: baseline and high-water mark initialize.
    let day_one = 1_705_300_000; // 2024-01-15 UTC
    let state = h
        .store
        .roll_risk_state(model.id, dec!(10000), day_one)
        .await
        .unwrap();
    assert_eq!(state.day_start_value, dec!(10000));
    assert_eq!(state.value_high_water_mark, dec!(10000));

    // Later the same day: baseline holds, HWM ratchets.
    let state = h
        .store
        .roll_risk_state(model.id, dec!(10500), day_one + 3600)
        .await
        .unwrap();
    assert_eq!(state.day_start_value, dec!(10000));
    assert_eq!(state.value_high_water_mark, dec!(10500));

    // Next UTC day: baseline resets to the current value; HWM never drops.
    let state = h
        .store
        .roll_risk_state(model.id, dec!(10200), day_one + 86_400)
        .await
        .unwrap();
    assert_eq!(state.day_start_value, dec!(10200));
    assert_eq!(state.value_high_water_mark, dec!(10500));
}

#[tokio::test]
async fn operator_setters_write_their_incident_types() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Manual)
        .await;
    let service = ModelService::new(h.store.clone());

    service
        .set_trading_environment(model.id, TradingEnvironment::Live)
        .await
        .unwrap();
    service
        .set_automation_level(model.id, AutomationLevel::Semi)
        .await
        .unwrap();
    service
        .set_status(model.id, ModelStatus::Paused)
        .await
        .unwrap();
    service
        .set_exchange_environment(model.id, ExchangeEnvironment::Mainnet)
        .await
        .unwrap();

    let stored = h.store.get_model(model.id).await.unwrap();
    assert_eq!(stored.trading_environment, TradingEnvironment::Live);
    assert_eq!(stored.automation_level, AutomationLevel::Semi);
    assert_eq!(stored.status, ModelStatus::Paused);
    assert_eq!(stored.exchange_environment, ExchangeEnvironment::Mainnet);

    // Environment changes (trading + exchange) share a type; automation and
    // status have their own.
    assert_eq!(
        h.store
            .incidents_of_type(IncidentType::EnvironmentChange, 10)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        h.store
            .incidents_of_type(IncidentType::AutomationChange, 10)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        h.store
            .incidents_of_type(IncidentType::ModeChange, 10)
            .await
            .unwrap()
            .len(),
        1
    );

    // Re-applying the same value is a no-op and writes nothing.
    service
        .set_automation_level(model.id, AutomationLevel::Semi)
        .await
        .unwrap();
    assert_eq!(
        h.store
            .incidents_of_type(IncidentType::AutomationChange, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn emergency_pause_reduces_automation() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Live, AutomationLevel::Full)
        .await;

    h.scheduler
        .emergency_pause(model.id, AutomationLevel::Semi)
        .await
        .unwrap();

    let stored = h.store.get_model(model.id).await.unwrap();
    assert_eq!(stored.automation_level, AutomationLevel::Semi);
    // Environment untouched: pause is automation-only.
    assert_eq!(stored.trading_environment, TradingEnvironment::Live);

    let incidents = h
        .store
        .incidents_of_type(IncidentType::EmergencyPause, 10)
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);

    // Full is not a legal pause target.
    assert!(
        h.scheduler
            .emergency_pause(model.id, AutomationLevel::Full)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn paused_model_cycles_are_noops() {
    let h = harness(&["BTC"]).await;
    let model = h
        .create_model("m", TradingEnvironment::Simulation, AutomationLevel::Full)
        .await;
    h.store
        .set_status(model.id, ModelStatus::Paused)
        .await
        .unwrap();

    h.market.set_price("BTC", dec!(40000)).await;
    let report = h.executor.run_cycle(model.id).await.unwrap();
    assert!(report.aborted.is_some());
    assert!(report.entries.is_empty());
}
