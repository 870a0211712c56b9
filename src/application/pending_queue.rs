//! The semi-automation approval queue.
//!
//! Pending decisions are a durable state machine; only this module
//! transitions rows. Transitions are guarded updates on the pending status,
//! so a second approval of the same id fails cleanly instead of replaying.

use crate::application::execution::ExecutionStatus;
use crate::application::registry::ModelRegistry;
use crate::application::risk_manager::{RiskManager, RiskVerdict};
use crate::domain::errors::QueueError;
use crate::domain::model::Model;
use crate::domain::pending::{PendingDecision, PendingStatus};
use crate::domain::ports::MarketDataService;
use crate::domain::trade::Trade;
use crate::domain::types::{Decision, IncidentType, Severity};
use crate::infrastructure::persistence::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operator-supplied overrides at approval time. Only quantity and leverage
/// may change; every other field of the decision is immutable.
#[derive(Debug, Clone, Default)]
pub struct ApprovalModifications {
    pub quantity: Option<Decimal>,
    pub leverage: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub enum ApprovalOutcome {
    Executed {
        pending: PendingDecision,
        trades: Vec<Trade>,
        exchange_order_id: Option<String>,
    },
    RejectedByRisk {
        reason: String,
    },
    ExecutionFailed {
        reason: String,
    },
}

pub struct PendingQueue {
    store: Arc<Store>,
    risk: Arc<RiskManager>,
    market: Arc<dyn MarketDataService>,
    registry: Arc<ModelRegistry>,
}

impl PendingQueue {
    pub fn new(
        store: Arc<Store>,
        risk: Arc<RiskManager>,
        market: Arc<dyn MarketDataService>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            store,
            risk,
            market,
            registry,
        }
    }

    /// Queue a decision for approval. A second pending decision for the same
    /// (model, coin) is rejected with an incident.
    pub async fn create(
        &self,
        model: &Model,
        coin: &str,
        decision: &Decision,
        explanation: Option<&str>,
    ) -> Result<PendingDecision> {
        if self.store.has_pending(model.id, coin).await? {
            self.store
                .append_incident(
                    Some(model.id),
                    IncidentType::TradeRejected,
                    Severity::Medium,
                    &format!("Decision for {} dropped: duplicate pending", coin),
                    json!({
                        "coin": coin,
                        "reason": "duplicate pending",
                        "signal": decision.signal.to_string(),
                    }),
                )
                .await?;
            return Err(QueueError::DuplicatePending {
                model_id: model.id,
                coin: coin.to_string(),
            }
            .into());
        }

        let pending = self
            .store
            .insert_pending(model.id, coin, decision, explanation, Utc::now().timestamp())
            .await?;
        info!(
            "Queued pending decision {} for model {} {} (expires {})",
            pending.id, model.id, coin, pending.expires_at
        );
        Ok(pending)
    }

    /// Approve a pending decision, optionally modifying quantity/leverage.
    /// Risk is re-checked against current state before execution; a risk or
    /// execution failure transitions the row to rejected with the reason.
    pub async fn approve(
        &self,
        id: i64,
        modifications: Option<ApprovalModifications>,
    ) -> Result<ApprovalOutcome> {
        let now = Utc::now().timestamp();
        let mods = modifications.unwrap_or_default();

        let transitioned = self
            .store
            .transition_pending(
                id,
                &[PendingStatus::Pending],
                PendingStatus::Approved,
                Some(now),
                None,
                mods.quantity,
                mods.leverage,
            )
            .await?;
        if !transitioned {
            return Err(self.state_error(id, "approve").await?.into());
        }

        let pending = self
            .store
            .get_pending(id)
            .await?
            .with_context(|| format!("Pending decision {} vanished after approval", id))?;
        let model = self.store.get_model(pending.model_id).await?;
        let settings = self.store.get_settings(pending.model_id).await?;
        let decision = pending.effective_decision();

        // Serialize with the model's trading cycles.
        let _guard = self.registry.lock_model(model.id).await;

        let market = self
            .market
            .snapshot(std::slice::from_ref(&pending.coin))
            .await
            .context("Market snapshot failed during approval")?;
        let portfolio = self.store.portfolio_snapshot(model.id).await?;
        let prices = market.price_map();

        let verdict = self
            .risk
            .review(&model, &settings, &pending.coin, &decision, &portfolio, &prices)
            .await?;
        if let RiskVerdict::Denied { code, detail } = verdict {
            let note = format!("risk re-check failed: {}", code);
            self.store
                .transition_pending(
                    id,
                    &[PendingStatus::Approved],
                    PendingStatus::Rejected,
                    Some(now),
                    Some(&note),
                    None,
                    None,
                )
                .await?;
            warn!("Approval of pending {} rejected by risk: {}", id, detail);
            return Ok(ApprovalOutcome::RejectedByRisk { reason: note });
        }

        let executor = self.registry.executor_for(&model).await?;
        let outcome = executor
            .execute(&model, &settings, &pending.coin, &decision, &market)
            .await?;

        if outcome.status == ExecutionStatus::Failed {
            let note = format!(
                "execution failed: {}",
                outcome.failure.as_deref().unwrap_or("unknown")
            );
            self.store
                .transition_pending(
                    id,
                    &[PendingStatus::Approved],
                    PendingStatus::Rejected,
                    Some(now),
                    Some(&note),
                    None,
                    None,
                )
                .await?;
            return Ok(ApprovalOutcome::ExecutionFailed { reason: note });
        }

        self.store
            .transition_pending(
                id,
                &[PendingStatus::Approved],
                PendingStatus::Executed,
                Some(now),
                Some("approved and executed"),
                None,
                None,
            )
            .await?;

        let pending = self
            .store
            .get_pending(id)
            .await?
            .with_context(|| format!("Pending decision {} vanished after execution", id))?;
        info!("Pending decision {} executed", id);
        Ok(ApprovalOutcome::Executed {
            pending,
            trades: outcome.trades,
            exchange_order_id: outcome.exchange_order_id,
        })
    }

    /// Reject a pending decision; the reason is stored verbatim.
    pub async fn reject(&self, id: i64, reason: &str) -> Result<PendingDecision> {
        let transitioned = self
            .store
            .transition_pending(
                id,
                &[PendingStatus::Pending],
                PendingStatus::Rejected,
                Some(Utc::now().timestamp()),
                Some(reason),
                None,
                None,
            )
            .await?;
        if !transitioned {
            return Err(self.state_error(id, "reject").await?.into());
        }
        self.store
            .get_pending(id)
            .await?
            .with_context(|| format!("Pending decision {} vanished after rejection", id))
    }

    /// Expire every pending row whose deadline has strictly passed. Runs at
    /// least once per minute from the scheduler.
    pub async fn expire_sweep(&self) -> Result<u64> {
        let expired = self.store.expire_pending(Utc::now().timestamp()).await?;
        if expired > 0 {
            info!("Expired {} pending decisions", expired);
        } else {
            debug!("Expire sweep found nothing to do");
        }
        Ok(expired)
    }

    pub async fn list(&self, model_id: Option<i64>) -> Result<Vec<PendingDecision>> {
        self.store.list_pending(model_id).await
    }

    async fn state_error(&self, id: i64, action: &'static str) -> Result<QueueError> {
        match self.store.get_pending(id).await? {
            Some(pending) => Ok(QueueError::InvalidState {
                id,
                status: pending.status.to_string(),
                action,
            }),
            None => Ok(QueueError::NotFound(id)),
        }
    }
}
