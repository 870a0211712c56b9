//! Automation handlers: what happens to a risk-approved decision.
//!
//! Manual logs only, semi queues for approval, full executes — unless one of
//! the auto-pause triggers fires first, in which case the model is downgraded
//! to semi and the current decision joins the queue.

use crate::domain::model::{Model, ModelSettings};
use crate::domain::trade::{Trade, consecutive_losses, win_rate_last};
use crate::domain::types::{AutomationLevel, Decision, IncidentType, Severity};
use crate::infrastructure::persistence::Store;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Manual mode: surface the decision, persist nothing.
    LogOnly,
    /// Queue the decision for human approval.
    Queued,
    /// Execute immediately through the environment executor.
    ExecuteNow,
}

#[async_trait]
pub trait AutomationHandler: Send + Sync {
    fn level(&self) -> AutomationLevel;

    async fn process(
        &self,
        model: &Model,
        settings: &ModelSettings,
        coin: &str,
        decision: &Decision,
    ) -> Result<HandlerAction>;
}

pub struct ManualHandler;

#[async_trait]
impl AutomationHandler for ManualHandler {
    fn level(&self) -> AutomationLevel {
        AutomationLevel::Manual
    }

    async fn process(
        &self,
        _model: &Model,
        _settings: &ModelSettings,
        _coin: &str,
        _decision: &Decision,
    ) -> Result<HandlerAction> {
        Ok(HandlerAction::LogOnly)
    }
}

pub struct SemiHandler;

#[async_trait]
impl AutomationHandler for SemiHandler {
    fn level(&self) -> AutomationLevel {
        AutomationLevel::Semi
    }

    async fn process(
        &self,
        _model: &Model,
        _settings: &ModelSettings,
        _coin: &str,
        _decision: &Decision,
    ) -> Result<HandlerAction> {
        Ok(HandlerAction::Queued)
    }
}

/// Which auto-pause trigger fired, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoPauseTrigger {
    ConsecutiveLosses { count: i64, limit: i64 },
    WinRate { rate: Decimal, threshold: Decimal },
    DailyLoss { pnl_pct: Decimal, limit_pct: Decimal },
}

impl AutoPauseTrigger {
    pub fn describe(&self) -> String {
        match self {
            AutoPauseTrigger::ConsecutiveLosses { count, limit } => {
                format!("{} consecutive losses (limit {})", count, limit)
            }
            AutoPauseTrigger::WinRate { rate, threshold } => {
                format!(
                    "win rate {}% over last 10 closes below {}%",
                    rate.round_dp(1),
                    threshold
                )
            }
            AutoPauseTrigger::DailyLoss { pnl_pct, limit_pct } => {
                format!(
                    "today's realized pnl {}% at or below -{}%",
                    pnl_pct.round_dp(2),
                    limit_pct
                )
            }
        }
    }
}

/// Evaluate the auto-pause triggers over recent trade history. `trades` must
/// be ordered most-recent-first.
pub fn evaluate_auto_pause(
    settings: &ModelSettings,
    trades: &[Trade],
    realized_pnl_today: Decimal,
    day_start_value: Decimal,
) -> Option<AutoPauseTrigger> {
    let losses = consecutive_losses(trades);
    if settings.auto_pause_consecutive_losses > 0 && losses >= settings.auto_pause_consecutive_losses
    {
        return Some(AutoPauseTrigger::ConsecutiveLosses {
            count: losses,
            limit: settings.auto_pause_consecutive_losses,
        });
    }

    // Requires at least 10 closed trades by construction.
    if let Some(rate) = win_rate_last(trades, 10)
        && rate < settings.auto_pause_win_rate_threshold
    {
        return Some(AutoPauseTrigger::WinRate {
            rate,
            threshold: settings.auto_pause_win_rate_threshold,
        });
    }

    if day_start_value > Decimal::ZERO {
        let pnl_pct = realized_pnl_today / day_start_value * Decimal::from(100);
        if pnl_pct <= -settings.max_daily_loss_pct {
            return Some(AutoPauseTrigger::DailyLoss {
                pnl_pct,
                limit_pct: settings.max_daily_loss_pct,
            });
        }
    }

    None
}

/// Fully-automated handler. Evaluates the auto-pause triggers on every
/// decision before allowing execution; a firing trigger downgrades the model
/// to semi and routes the current decision into the approval queue.
pub struct FullHandler {
    store: Arc<Store>,
}

impl FullHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AutomationHandler for FullHandler {
    fn level(&self) -> AutomationLevel {
        AutomationLevel::Full
    }

    async fn process(
        &self,
        model: &Model,
        settings: &ModelSettings,
        coin: &str,
        decision: &Decision,
    ) -> Result<HandlerAction> {
        if !settings.auto_pause_enabled {
            return Ok(HandlerAction::ExecuteNow);
        }

        let now = Utc::now().timestamp();
        let trades = self.store.recent_trades(model.id, 50).await?;
        let realized_today = self.store.realized_pnl_today(model.id, now).await?;
        // The risk gate rolled the baseline with market-valued totals earlier
        // in this cycle; read it as-is rather than re-rolling without prices.
        let day_start_value = self
            .store
            .get_risk_state(model.id)
            .await?
            .map(|state| state.day_start_value)
            .unwrap_or(Decimal::ZERO);

        let Some(trigger) = evaluate_auto_pause(settings, &trades, realized_today, day_start_value)
        else {
            return Ok(HandlerAction::ExecuteNow);
        };

        warn!(
            "Auto-pause for model {}: {}; downgrading to semi",
            model.id,
            trigger.describe()
        );
        self.store
            .set_automation_level(model.id, AutomationLevel::Semi)
            .await?;
        self.store
            .append_incident(
                Some(model.id),
                IncidentType::AutoPause,
                Severity::High,
                &format!("Automation downgraded to semi: {}", trigger.describe()),
                json!({
                    "trigger": trigger.describe(),
                    "coin": coin,
                    "signal": decision.signal.to_string(),
                }),
            )
            .await?;

        Ok(HandlerAction::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TradeSide;
    use rust_decimal_macros::dec;

    fn close(pnl: Decimal) -> Trade {
        Trade {
            id: 0,
            model_id: 1,
            coin: "BTC".to_string(),
            side: TradeSide::Close,
            quantity: dec!(0.01),
            price: dec!(40000),
            fee: dec!(0.4),
            realized_pnl: pnl,
            timestamp: 0,
            exchange_order_id: None,
        }
    }

    fn settings() -> ModelSettings {
        ModelSettings::default_for(1)
    }

    #[test]
    fn test_consecutive_loss_trigger() {
        let trades = vec![close(dec!(-1)), close(dec!(-2)), close(dec!(-3))];
        let trigger = evaluate_auto_pause(&settings(), &trades, Decimal::ZERO, dec!(10000));
        assert!(matches!(
            trigger,
            Some(AutoPauseTrigger::ConsecutiveLosses { count: 3, limit: 3 })
        ));
    }

    #[test]
    fn test_no_trigger_below_loss_streak() {
        let trades = vec![close(dec!(-1)), close(dec!(-2)), close(dec!(3))];
        assert_eq!(
            evaluate_auto_pause(&settings(), &trades, Decimal::ZERO, dec!(10000)),
            None
        );
    }

    #[test]
    fn test_win_rate_trigger_needs_ten_closes() {
        // 9 closes, 2 wins: under threshold but not enough history.
        let mut trades: Vec<Trade> = (0..7).map(|_| close(dec!(-1))).collect();
        trades.push(close(dec!(1)));
        trades.push(close(dec!(1)));
        // Interleave so the streak rule does not fire first.
        trades.reverse();
        assert_eq!(
            evaluate_auto_pause(&settings(), &trades, Decimal::ZERO, dec!(10000)),
            None
        );
    }

    #[test]
    fn test_win_rate_trigger_fires() {
        // 10 closes, most recent a win (no streak), 20% wins < 30% threshold.
        let mut trades = vec![close(dec!(5))];
        for i in 0..9 {
            trades.push(close(if i == 0 { dec!(5) } else { dec!(-1) }));
        }
        let trigger = evaluate_auto_pause(&settings(), &trades, Decimal::ZERO, dec!(10000));
        assert!(matches!(trigger, Some(AutoPauseTrigger::WinRate { .. })));
    }

    #[test]
    fn test_daily_loss_trigger() {
        // -3% on the day with default 3% limit; no closes in history.
        let trigger = evaluate_auto_pause(&settings(), &[], dec!(-300), dec!(10000));
        assert!(matches!(trigger, Some(AutoPauseTrigger::DailyLoss { .. })));
    }
}
