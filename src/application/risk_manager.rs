//! Pre-trade risk gate.
//!
//! Assembles the risk context from the store (portfolio, today's counters,
//! daily baseline, high-water mark) and runs the fixed check pipeline. Every
//! deny writes exactly one TRADE_REJECTED incident; allows write nothing so
//! the audit log stays scannable.

use crate::domain::model::{Model, ModelSettings};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::risk::{CheckResult, DenyCode, RiskCheck, RiskContext, standard_checks};
use crate::domain::types::{Decision, IncidentType, Severity};
use crate::infrastructure::persistence::Store;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of the gate for one candidate decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    Allowed,
    Denied { code: DenyCode, detail: String },
}

impl RiskVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskVerdict::Allowed)
    }
}

pub struct RiskManager {
    store: Arc<Store>,
    checks: Vec<Box<dyn RiskCheck>>,
}

impl RiskManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            checks: standard_checks(),
        }
    }

    /// Run the pipeline for one candidate decision. The portfolio snapshot
    /// and price map come from the caller so one cycle evaluates every coin
    /// against a consistent view.
    pub async fn review(
        &self,
        model: &Model,
        settings: &ModelSettings,
        coin: &str,
        decision: &Decision,
        portfolio: &PortfolioSnapshot,
        prices: &HashMap<String, Decimal>,
    ) -> Result<RiskVerdict> {
        let now = Utc::now().timestamp();
        let total_value = portfolio.total_value(prices);
        let trades_today = self.store.trades_today(model.id, now).await?;
        let realized_pnl_today = self.store.realized_pnl_today(model.id, now).await?;
        let risk_state = self.store.roll_risk_state(model.id, total_value, now).await?;

        let ctx = RiskContext {
            decision,
            settings,
            portfolio,
            total_value,
            trades_today,
            realized_pnl_today,
            day_start_value: risk_state.day_start_value,
            value_high_water_mark: risk_state.value_high_water_mark,
            automation: model.automation_level,
        };

        for check in &self.checks {
            if let CheckResult::Deny { code, detail } = check.check(&ctx) {
                warn!(
                    "Model {} {} denied by {}: {}",
                    model.id,
                    coin,
                    check.name(),
                    detail
                );
                self.store
                    .append_incident(
                        Some(model.id),
                        IncidentType::TradeRejected,
                        Severity::Medium,
                        &format!("Trade rejected for {}: {}", coin, code),
                        json!({
                            "coin": coin,
                            "reason": code.to_string(),
                            "detail": detail,
                            "signal": decision.signal.to_string(),
                            "quantity": decision.quantity.to_string(),
                        }),
                    )
                    .await?;
                return Ok(RiskVerdict::Denied { code, detail });
            }
        }

        debug!("Model {} {} passed risk gate", model.id, coin);
        Ok(RiskVerdict::Allowed)
    }
}
