pub mod live;
pub mod simulation;

pub use live::LiveExecutor;
pub use simulation::SimulationExecutor;

use crate::domain::model::{Model, ModelSettings};
use crate::domain::ports::MarketSnapshot;
use crate::domain::trade::Trade;
use crate::domain::types::{Decision, TradingEnvironment};
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Simulated,
    Executed,
    Failed,
}

/// What one execution attempt produced. `Failed` carries the classified
/// reason and leaves the ledger untouched.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub trades: Vec<Trade>,
    pub exchange_order_id: Option<String>,
    pub failure: Option<String>,
}

impl ExecutionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            trades: Vec::new(),
            exchange_order_id: None,
            failure: Some(reason.into()),
        }
    }
}

/// Performs the position mutation for one risk-approved decision: DB-only in
/// simulation, exchange call plus DB in live.
#[async_trait]
pub trait EnvironmentExecutor: Send + Sync {
    fn environment(&self) -> TradingEnvironment;

    async fn execute(
        &self,
        model: &Model,
        settings: &ModelSettings,
        coin: &str,
        decision: &Decision,
        market: &MarketSnapshot,
    ) -> Result<ExecutionOutcome>;
}
