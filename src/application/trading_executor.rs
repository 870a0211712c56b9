//! One trading cycle for one model: market and portfolio snapshots, AI
//! decisions, then per coin (alphabetically) risk gate -> automation handler
//! -> execution or queueing. The cycle returns a structured report and never
//! fail-fasts on per-coin issues; unrecoverable step failures write an
//! incident and abort the cycle.

use crate::application::automation::{
    AutomationHandler, FullHandler, HandlerAction, ManualHandler, SemiHandler,
};
use crate::application::execution::ExecutionStatus;
use crate::application::pending_queue::PendingQueue;
use crate::application::registry::ModelRegistry;
use crate::application::risk_manager::{RiskManager, RiskVerdict};
use crate::domain::errors::QueueError;
use crate::domain::ports::{DecisionService, MarketDataService};
use crate::domain::types::{AutomationLevel, IncidentType, Severity, Signal};
use crate::infrastructure::persistence::Store;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const DECIDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Executed {
        simulated: bool,
        exchange_order_id: Option<String>,
    },
    Queued {
        pending_id: i64,
    },
    LoggedOnly,
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct CycleEntry {
    pub coin: String,
    pub outcome: CycleOutcome,
}

/// Per-cycle report consumed by the scheduler and the manual-trigger path.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub model_id: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub entries: Vec<CycleEntry>,
    pub aborted: Option<String>,
}

impl CycleReport {
    fn noop(model_id: i64, reason: Option<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            model_id,
            started_at: now,
            finished_at: now,
            entries: Vec::new(),
            aborted: reason,
        }
    }

    pub fn executed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, CycleOutcome::Executed { .. }))
            .count()
    }

    pub fn queued(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, CycleOutcome::Queued { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.outcome,
                    CycleOutcome::Skipped { .. } | CycleOutcome::Failed { .. }
                )
            })
            .count()
    }
}

pub struct TradingExecutor {
    store: Arc<Store>,
    market: Arc<dyn MarketDataService>,
    decider: Arc<dyn DecisionService>,
    risk: Arc<RiskManager>,
    queue: Arc<PendingQueue>,
    registry: Arc<ModelRegistry>,
    coins: Vec<String>,
}

impl TradingExecutor {
    pub fn new(
        store: Arc<Store>,
        market: Arc<dyn MarketDataService>,
        decider: Arc<dyn DecisionService>,
        risk: Arc<RiskManager>,
        queue: Arc<PendingQueue>,
        registry: Arc<ModelRegistry>,
        coins: Vec<String>,
    ) -> Self {
        Self {
            store,
            market,
            decider,
            risk,
            queue,
            registry,
            coins,
        }
    }

    pub async fn run_cycle(&self, model_id: i64) -> Result<CycleReport> {
        let model = self.store.get_model(model_id).await?;
        if !model.is_active() {
            return Ok(CycleReport::noop(model_id, Some("model paused".to_string())));
        }

        // One cycle per model at a time.
        let _guard = self.registry.lock_model(model_id).await;
        let started_at = Utc::now().timestamp();
        let settings = self.store.get_settings(model_id).await?;

        let market = match self.market.snapshot(&self.coins).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Cycle for model {} aborted: market data: {:#}", model_id, e);
                self.store
                    .append_incident(
                        Some(model_id),
                        IncidentType::ApiError,
                        Severity::High,
                        "Cycle aborted: market data unavailable",
                        json!({ "error": format!("{:#}", e) }),
                    )
                    .await?;
                return Ok(CycleReport::noop(model_id, Some("market data unavailable".into())));
            }
        };

        let portfolio = match self.store.portfolio_snapshot(model_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // A broken portfolio read is an invariant violation: pause
                // the model and leave it to the operator.
                error!("Cycle for model {} aborted: portfolio: {:#}", model_id, e);
                self.store
                    .append_incident(
                        Some(model_id),
                        IncidentType::ExecutionError,
                        Severity::Critical,
                        "Cycle aborted: inconsistent portfolio state; model paused",
                        json!({ "error": format!("{:#}", e) }),
                    )
                    .await?;
                self.store
                    .set_status(model_id, crate::domain::types::ModelStatus::Paused)
                    .await?;
                return Ok(CycleReport::noop(model_id, Some("inconsistent portfolio".into())));
            }
        };

        let decisions = match tokio::time::timeout(
            DECIDER_TIMEOUT,
            self.decider.decide(&model, &settings, &market, &portfolio),
        )
        .await
        {
            Ok(Ok(decisions)) => decisions,
            Ok(Err(e)) => {
                self.store
                    .append_incident(
                        Some(model_id),
                        IncidentType::ApiError,
                        Severity::High,
                        "Cycle aborted: AI decider failed",
                        json!({ "error": format!("{:#}", e) }),
                    )
                    .await?;
                return Ok(CycleReport::noop(model_id, Some("decider failed".into())));
            }
            Err(_) => {
                self.store
                    .append_incident(
                        Some(model_id),
                        IncidentType::ApiError,
                        Severity::High,
                        "Cycle aborted: AI decider timed out",
                        json!({ "timeout_secs": DECIDER_TIMEOUT.as_secs() }),
                    )
                    .await?;
                return Ok(CycleReport::noop(model_id, Some("decider timeout".into())));
            }
        };

        // One environment and one automation value for the whole cycle;
        // changes apply from the next cycle.
        let executor = match self.registry.executor_for(&model).await {
            Ok(executor) => executor,
            Err(e) => {
                self.store
                    .append_incident(
                        Some(model_id),
                        IncidentType::ExecutionError,
                        Severity::High,
                        "Cycle aborted: no executor for model",
                        json!({ "error": format!("{:#}", e) }),
                    )
                    .await?;
                return Ok(CycleReport::noop(model_id, Some("no executor".into())));
            }
        };
        let handler: Box<dyn AutomationHandler> = match model.automation_level {
            AutomationLevel::Manual => Box::new(ManualHandler),
            AutomationLevel::Semi => Box::new(SemiHandler),
            AutomationLevel::Full => Box::new(FullHandler::new(self.store.clone())),
        };

        let prices = market.price_map();
        let mut coins: Vec<&String> = decisions.keys().collect();
        coins.sort();

        let mut entries = Vec::with_capacity(coins.len());
        for coin in coins {
            let mut decision = decisions[coin].clone();

            if !decision.signal.is_actionable() {
                entries.push(CycleEntry {
                    coin: coin.clone(),
                    outcome: CycleOutcome::Skipped {
                        reason: "hold".to_string(),
                    },
                });
                continue;
            }
            if decision.entry_price <= Decimal::ZERO {
                match market.price(coin) {
                    Some(price) => decision.entry_price = price,
                    None => {
                        entries.push(CycleEntry {
                            coin: coin.clone(),
                            outcome: CycleOutcome::Skipped {
                                reason: "no market price".to_string(),
                            },
                        });
                        continue;
                    }
                }
            }
            if decision.signal.is_opener() && decision.quantity <= Decimal::ZERO {
                entries.push(CycleEntry {
                    coin: coin.clone(),
                    outcome: CycleOutcome::Skipped {
                        reason: "non-positive quantity".to_string(),
                    },
                });
                continue;
            }
            if decision.signal == Signal::ClosePosition && portfolio.any_position(coin).is_none() {
                entries.push(CycleEntry {
                    coin: coin.clone(),
                    outcome: CycleOutcome::Skipped {
                        reason: "no open position".to_string(),
                    },
                });
                continue;
            }

            let verdict = self
                .risk
                .review(&model, &settings, coin, &decision, &portfolio, &prices)
                .await?;
            if let RiskVerdict::Denied { code, .. } = verdict {
                entries.push(CycleEntry {
                    coin: coin.clone(),
                    outcome: CycleOutcome::Skipped {
                        reason: code.to_string(),
                    },
                });
                continue;
            }

            let action = handler.process(&model, &settings, coin, &decision).await?;
            let outcome = match action {
                HandlerAction::LogOnly => {
                    info!(
                        "Model {} {} {}: logged only (manual mode)",
                        model_id, decision.signal, coin
                    );
                    CycleOutcome::LoggedOnly
                }
                HandlerAction::Queued => {
                    let explanation = if decision.justification.is_empty() {
                        None
                    } else {
                        Some(decision.justification.clone())
                    };
                    match self
                        .queue
                        .create(&model, coin, &decision, explanation.as_deref())
                        .await
                    {
                        Ok(pending) => CycleOutcome::Queued {
                            pending_id: pending.id,
                        },
                        Err(e) => match e.downcast_ref::<QueueError>() {
                            Some(QueueError::DuplicatePending { .. }) => CycleOutcome::Skipped {
                                reason: "duplicate pending".to_string(),
                            },
                            _ => return Err(e),
                        },
                    }
                }
                HandlerAction::ExecuteNow => {
                    match executor
                        .execute(&model, &settings, coin, &decision, &market)
                        .await
                    {
                        Ok(result) => match result.status {
                            ExecutionStatus::Simulated => CycleOutcome::Executed {
                                simulated: true,
                                exchange_order_id: None,
                            },
                            ExecutionStatus::Executed => CycleOutcome::Executed {
                                simulated: false,
                                exchange_order_id: result.exchange_order_id,
                            },
                            ExecutionStatus::Failed => CycleOutcome::Failed {
                                reason: result.failure.unwrap_or_else(|| "unknown".to_string()),
                            },
                        },
                        Err(e) => {
                            warn!(
                                "Execution error for model {} {}: {:#}",
                                model_id, coin, e
                            );
                            self.store
                                .append_incident(
                                    Some(model_id),
                                    IncidentType::ExecutionError,
                                    Severity::High,
                                    &format!("Execution failed for {}", coin),
                                    json!({ "coin": coin, "error": format!("{:#}", e) }),
                                )
                                .await?;
                            CycleOutcome::Failed {
                                reason: format!("{:#}", e),
                            }
                        }
                    }
                }
            };

            entries.push(CycleEntry {
                coin: coin.clone(),
                outcome,
            });
        }

        let report = CycleReport {
            model_id,
            started_at,
            finished_at: Utc::now().timestamp(),
            entries,
            aborted: None,
        };
        info!(
            "Cycle for model {}: {} executed, {} queued, {} skipped",
            model_id,
            report.executed(),
            report.queued(),
            report.skipped()
        );
        Ok(report)
    }
}
