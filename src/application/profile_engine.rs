//! Risk-profile presets: atomic apply with session attribution, plus a
//! deterministic rule-based recommendation over recent trade history.

use crate::domain::errors::ValidationError;
use crate::domain::profile::{
    AGGRESSIVE, BALANCED, CONSERVATIVE, ProfileSession, RiskProfile, SCALPER, ULTRA_SAFE,
};
use crate::domain::trade::{Trade, consecutive_losses, win_rate_last};
use crate::domain::types::{IncidentType, Severity};
use crate::infrastructure::persistence::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Result of applying a profile.
#[derive(Debug, Clone)]
pub struct AppliedProfile {
    pub profile: RiskProfile,
    pub closed_session: Option<ProfileSession>,
    pub session: ProfileSession,
}

#[derive(Debug, Clone)]
pub struct ProfileScore {
    pub profile_name: String,
    pub score: u8,
}

#[derive(Debug, Clone)]
pub struct ProfileRecommendation {
    pub profile_id: i64,
    pub profile_name: String,
    pub confidence: u8,
    pub reason: String,
    pub should_switch: bool,
    pub alternatives: Vec<ProfileScore>,
}

/// Deterministic inputs to the recommendation rules.
#[derive(Debug, Clone)]
pub struct RecommendInputs {
    /// Closed trades, most-recent-first (at most 30 considered).
    pub closed_pnls: Vec<Decimal>,
    pub win_rate_10: Option<Decimal>,
    pub win_rate_30: Option<Decimal>,
    pub drawdown_pct: Decimal,
    pub consecutive_losses: i64,
    pub pnl_today_pct: Decimal,
    pub trades_today: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityBand {
    Low,
    Normal,
    High,
}

/// Dispersion of recent realized pnl, as a deterministic volatility proxy:
/// the coefficient of variation of absolute pnl over the considered closes.
pub fn volatility_band(closed_pnls: &[Decimal]) -> VolatilityBand {
    if closed_pnls.len() < 5 {
        return VolatilityBand::Normal;
    }
    let abs: Vec<f64> = closed_pnls
        .iter()
        .map(|p| p.abs().to_f64().unwrap_or(0.0))
        .collect();
    let mean = abs.iter().sum::<f64>() / abs.len() as f64;
    if mean <= f64::EPSILON {
        return VolatilityBand::Low;
    }
    let variance = abs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / abs.len() as f64;
    let cv = variance.sqrt() / mean;
    if cv > 1.5 {
        VolatilityBand::High
    } else if cv < 0.5 {
        VolatilityBand::Low
    } else {
        VolatilityBand::Normal
    }
}

const PROFILE_ORDER: [&str; 5] = [ULTRA_SAFE, CONSERVATIVE, BALANCED, AGGRESSIVE, SCALPER];

fn alternatives_for(recommended: &str, confidence: u8) -> Vec<ProfileScore> {
    let rec_idx = PROFILE_ORDER
        .iter()
        .position(|p| *p == recommended)
        .unwrap_or(2) as i64;
    PROFILE_ORDER
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let distance = (idx as i64 - rec_idx).unsigned_abs() as u8;
            let score = if *name == recommended {
                confidence
            } else {
                80u8.saturating_sub(20 * distance)
            };
            ProfileScore {
                profile_name: name.to_string(),
                score,
            }
        })
        .collect()
}

/// First-match rule table. Pure so the rules are testable in isolation.
pub fn recommend_from(inputs: &RecommendInputs) -> (&'static str, u8, String) {
    if inputs.closed_pnls.len() < 5 {
        return (BALANCED, 30, "insufficient data".to_string());
    }

    let volatility = volatility_band(&inputs.closed_pnls);
    let dd = inputs.drawdown_pct;

    // Emergency posture.
    if dd > Decimal::from(15)
        || inputs.win_rate_10.is_some_and(|r| r < Decimal::from(30))
        || inputs.consecutive_losses >= 5
    {
        return (
            ULTRA_SAFE,
            90,
            format!(
                "emergency posture: drawdown {}%, {} consecutive losses",
                dd.round_dp(1),
                inputs.consecutive_losses
            ),
        );
    }

    // Cautious posture.
    let win30_in_caution = inputs
        .win_rate_30
        .is_some_and(|r| r >= Decimal::from(30) && r <= Decimal::from(45));
    if (dd >= Decimal::from(8) && dd <= Decimal::from(15))
        || (win30_in_caution && volatility == VolatilityBand::High)
    {
        return (
            CONSERVATIVE,
            75,
            format!("elevated risk: drawdown {}%", dd.round_dp(1)),
        );
    }

    // Normal posture.
    if inputs
        .win_rate_30
        .is_some_and(|r| r >= Decimal::from(45) && r <= Decimal::from(60))
        && dd < Decimal::from(8)
    {
        return (BALANCED, 70, "steady performance".to_string());
    }

    // Winning streak.
    if inputs.win_rate_30.is_some_and(|r| r > Decimal::from(60)) && dd < Decimal::from(5) {
        return (AGGRESSIVE, 80, "strong recent win rate".to_string());
    }

    // High-frequency day with calm pnl dispersion.
    if inputs.trades_today >= 15 && volatility == VolatilityBand::Low {
        return (SCALPER, 65, "high trade frequency, low volatility".to_string());
    }

    (BALANCED, 50, "no strong signal".to_string())
}

pub struct ProfileEngine {
    store: Arc<Store>,
}

impl ProfileEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Apply a profile to a model: close any open session (with aggregates),
    /// overwrite the preset-owned settings fields, open a new session, and
    /// log the change.
    pub async fn apply(&self, model_id: i64, profile_id: i64) -> Result<AppliedProfile> {
        let profile = match self.store.get_profile(profile_id).await? {
            Some(profile) => profile,
            None => return Err(ValidationError::UnknownProfile(profile_id).into()),
        };

        let now = Utc::now().timestamp();
        let (closed_session, session) = self.store.apply_profile(model_id, &profile, now).await?;

        self.store
            .append_incident(
                Some(model_id),
                IncidentType::ProfileChange,
                Severity::Low,
                &format!("Risk profile set to {}", profile.name),
                json!({
                    "profile_id": profile.id,
                    "profile": profile.name,
                    "closed_session": closed_session.as_ref().map(|s| s.id),
                }),
            )
            .await?;

        info!("Applied profile {} to model {}", profile.name, model_id);
        Ok(AppliedProfile {
            profile,
            closed_session,
            session,
        })
    }

    /// Rule-based recommendation from the model's recent trade history. No
    /// external calls; same inputs always produce the same answer.
    pub async fn recommend(&self, model_id: i64) -> Result<ProfileRecommendation> {
        let now = Utc::now().timestamp();
        let settings = self.store.get_settings(model_id).await?;
        let recent = self.store.recent_trades(model_id, 100).await?;

        let closed_pnls: Vec<Decimal> = recent
            .iter()
            .filter(|t| t.is_close())
            .take(30)
            .map(|t| t.realized_pnl)
            .collect();

        let model = self.store.get_model(model_id).await?;
        let drawdown_pct = realized_drawdown_pct(&recent, model.initial_capital);

        // Recommendations are advisory: read the baseline the risk gate
        // rolled with market-valued totals, never install one here.
        let realized_today = self.store.realized_pnl_today(model_id, now).await?;
        let pnl_today_pct = match self.store.get_risk_state(model_id).await? {
            Some(state) if state.day_start_value > Decimal::ZERO => {
                realized_today / state.day_start_value * Decimal::from(100)
            }
            _ => Decimal::ZERO,
        };

        let inputs = RecommendInputs {
            win_rate_10: win_rate_last(&recent, 10),
            win_rate_30: win_rate_last(&recent, 30),
            drawdown_pct,
            consecutive_losses: consecutive_losses(&recent),
            pnl_today_pct,
            trades_today: self.store.trades_today(model_id, now).await?,
            closed_pnls,
        };

        let (name, confidence, reason) = recommend_from(&inputs);
        let profile = self
            .store
            .get_profile_by_name(name)
            .await?
            .with_context(|| format!("System profile {} missing", name))?;

        let should_switch =
            confidence >= 60 && settings.active_profile_id != Some(profile.id);

        Ok(ProfileRecommendation {
            profile_id: profile.id,
            profile_name: profile.name,
            confidence,
            reason,
            should_switch,
            alternatives: alternatives_for(name, confidence),
        })
    }
}

/// Current drawdown of the realized-pnl equity curve: peak-to-last over
/// `initial + cumulative realized pnl`, in percent of the peak.
fn realized_drawdown_pct(recent_desc: &[Trade], initial_capital: Decimal) -> Decimal {
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    // Oldest first.
    for trade in recent_desc.iter().rev() {
        if trade.is_close() {
            equity += trade.realized_pnl;
            if equity > peak {
                peak = equity;
            }
        }
    }
    if peak <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (peak - equity) / peak * Decimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inputs() -> RecommendInputs {
        RecommendInputs {
            closed_pnls: vec![dec!(10), dec!(-5), dec!(8), dec!(12), dec!(-3), dec!(7)],
            win_rate_10: Some(dec!(50)),
            win_rate_30: Some(dec!(50)),
            drawdown_pct: dec!(2),
            consecutive_losses: 0,
            pnl_today_pct: Decimal::ZERO,
            trades_today: 3,
        }
    }

    #[test]
    fn test_insufficient_data_caps_confidence() {
        let mut i = inputs();
        i.closed_pnls = vec![dec!(5), dec!(-2)];
        let (name, confidence, reason) = recommend_from(&i);
        assert_eq!(name, BALANCED);
        assert!(confidence <= 40);
        assert_eq!(reason, "insufficient data");
    }

    #[test]
    fn test_emergency_on_drawdown() {
        let mut i = inputs();
        i.drawdown_pct = dec!(16);
        assert_eq!(recommend_from(&i).0, ULTRA_SAFE);
    }

    #[test]
    fn test_emergency_on_consecutive_losses() {
        let mut i = inputs();
        i.consecutive_losses = 5;
        assert_eq!(recommend_from(&i).0, ULTRA_SAFE);
    }

    #[test]
    fn test_emergency_on_low_win_rate() {
        let mut i = inputs();
        i.win_rate_10 = Some(dec!(20));
        assert_eq!(recommend_from(&i).0, ULTRA_SAFE);
    }

    #[test]
    fn test_cautious_on_moderate_drawdown() {
        let mut i = inputs();
        i.drawdown_pct = dec!(10);
        assert_eq!(recommend_from(&i).0, CONSERVATIVE);
    }

    #[test]
    fn test_balanced_on_steady_performance() {
        let (name, confidence, _) = recommend_from(&inputs());
        assert_eq!(name, BALANCED);
        assert_eq!(confidence, 70);
    }

    #[test]
    fn test_aggressive_on_win_streak() {
        let mut i = inputs();
        i.win_rate_30 = Some(dec!(65));
        i.drawdown_pct = dec!(2);
        assert_eq!(recommend_from(&i).0, AGGRESSIVE);
    }

    #[test]
    fn test_scalper_on_busy_calm_day() {
        let mut i = inputs();
        i.win_rate_30 = Some(dec!(65));
        i.drawdown_pct = dec!(6); // blocks the aggressive rule
        i.trades_today = 20;
        i.closed_pnls = vec![dec!(5), dec!(5), dec!(5), dec!(5), dec!(5), dec!(5)];
        assert_eq!(recommend_from(&i).0, SCALPER);
    }

    #[test]
    fn test_determinism() {
        let i = inputs();
        assert_eq!(recommend_from(&i), recommend_from(&i));
    }

    #[test]
    fn test_alternatives_scored_by_distance() {
        let alts = alternatives_for(BALANCED, 70);
        assert_eq!(alts.len(), 5);
        assert_eq!(alts[2].profile_name, BALANCED);
        assert_eq!(alts[2].score, 70);
        assert_eq!(alts[1].score, 60);
        assert_eq!(alts[0].score, 40);
    }

    #[test]
    fn test_volatility_bands() {
        let calm = vec![dec!(5), dec!(5), dec!(5), dec!(5), dec!(5)];
        assert_eq!(volatility_band(&calm), VolatilityBand::Low);
        let wild = vec![dec!(1), dec!(1), dec!(1), dec!(1), dec!(200)];
        assert_eq!(volatility_band(&wild), VolatilityBand::High);
    }
}
