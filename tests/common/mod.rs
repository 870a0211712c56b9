//! Shared test harness: the full object graph over an in-memory SQLite store
//! and mock ports.

use aitrader::application::pending_queue::PendingQueue;
use aitrader::application::registry::{CredentialOverrides, ModelRegistry};
use aitrader::application::risk_manager::RiskManager;
use aitrader::application::scheduler::Scheduler;
use aitrader::application::trading_executor::TradingExecutor;
use aitrader::domain::model::Model;
use aitrader::domain::types::{
    AutomationLevel, Decision, ExchangeEnvironment, Signal, TradeSide, TradingEnvironment,
};
use aitrader::infrastructure::mock::{MockDecider, MockMarketData};
use aitrader::infrastructure::persistence::store::NewModel;
use aitrader::infrastructure::persistence::{Database, Store};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct Harness {
    pub store: Arc<Store>,
    pub market: Arc<MockMarketData>,
    pub decider: Arc<MockDecider>,
    pub registry: Arc<ModelRegistry>,
    pub risk: Arc<RiskManager>,
    pub queue: Arc<PendingQueue>,
    pub executor: Arc<TradingExecutor>,
    pub scheduler: Arc<Scheduler>,
}

pub async fn harness(coins: &[&str]) -> Harness {
    let database = Database::in_memory().await.expect("in-memory database");
    let store = Arc::new(Store::new(database.pool.clone()));
    store.seed_system_profiles().await.expect("seed profiles");

    let market = Arc::new(MockMarketData::new());
    let decider = Arc::new(MockDecider::new());
    let registry = Arc::new(ModelRegistry::new(
        store.clone(),
        CredentialOverrides::default(),
    ));
    let risk = Arc::new(RiskManager::new(store.clone()));
    let queue = Arc::new(PendingQueue::new(
        store.clone(),
        risk.clone(),
        market.clone(),
        registry.clone(),
    ));
    let executor = Arc::new(TradingExecutor::new(
        store.clone(),
        market.clone(),
        decider.clone(),
        risk.clone(),
        queue.clone(),
        registry.clone(),
        coins.iter().map(|c| c.to_string()).collect(),
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        registry.clone(),
        executor.clone(),
        queue.clone(),
    );

    Harness {
        store,
        market,
        decider,
        registry,
        risk,
        queue,
        executor,
        scheduler,
    }
}

impl Harness {
    pub async fn create_model(
        &self,
        name: &str,
        environment: TradingEnvironment,
        automation: AutomationLevel,
    ) -> Model {
        self.store
            .create_model(&NewModel {
                name: name.to_string(),
                provider_id: None,
                ai_model: "gpt-4o".to_string(),
                initial_capital: dec!(10000),
                trading_environment: environment,
                automation_level: automation,
                exchange_environment: ExchangeEnvironment::Testnet,
            })
            .await
            .expect("create model")
    }

    /// Insert a raw trade row, bypassing the executor (history seeding).
    pub async fn seed_trade(
        &self,
        model_id: i64,
        coin: &str,
        side: TradeSide,
        realized_pnl: Decimal,
        timestamp: i64,
    ) {
        sqlx::query(
            r#"
            INSERT INTO trades (model_id, coin, side, quantity, price, fee, realized_pnl, timestamp)
            VALUES (?, ?, ?, '0.01', '40000', '0.4', ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(coin)
        .bind(side.to_string())
        .bind(realized_pnl.to_string())
        .bind(timestamp)
        .execute(self.store.pool())
        .await
        .expect("seed trade");
    }
}

pub fn decision(signal: Signal, quantity: Decimal, entry_price: Decimal) -> Decision {
    Decision {
        signal,
        quantity,
        entry_price,
        leverage: None,
        stop_loss: None,
        take_profit: None,
        confidence: 0.7,
        justification: "test signal".to_string(),
    }
}
