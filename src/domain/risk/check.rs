use crate::domain::model::ModelSettings;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::types::{AutomationLevel, Decision};
use rust_decimal::Decimal;
use std::fmt;

/// Outcome of a single pre-trade check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    Allow,
    Deny { code: DenyCode, detail: String },
}

impl CheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CheckResult::Allow)
    }

    pub fn deny(code: DenyCode, detail: impl Into<String>) -> Self {
        CheckResult::Deny {
            code,
            detail: detail.into(),
        }
    }
}

/// Stable reason codes surfaced in incidents and cycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyCode {
    PositionSize,
    MaxOpenPositions,
    MaxDailyTrades,
    MinCashReserve,
    DailyLossLimit,
    MaxDrawdown,
}

impl fmt::Display for DenyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenyCode::PositionSize => "POSITION_SIZE",
            DenyCode::MaxOpenPositions => "MAX_OPEN_POSITIONS",
            DenyCode::MaxDailyTrades => "MAX_DAILY_TRADES",
            DenyCode::MinCashReserve => "MIN_CASH_RESERVE",
            DenyCode::DailyLossLimit => "DAILY_LOSS_LIMIT",
            DenyCode::MaxDrawdown => "MAX_DRAWDOWN",
        };
        write!(f, "{}", s)
    }
}

/// Everything a check needs, assembled once per candidate decision. Checks
/// themselves never touch storage.
#[derive(Debug)]
pub struct RiskContext<'a> {
    pub decision: &'a Decision,
    pub settings: &'a ModelSettings,
    pub portfolio: &'a PortfolioSnapshot,
    /// Cash + open positions at current prices.
    pub total_value: Decimal,
    /// Trades logged for the model in the current UTC day.
    pub trades_today: i64,
    /// Realized P&L of today's closes.
    pub realized_pnl_today: Decimal,
    /// Total value at the UTC day boundary.
    pub day_start_value: Decimal,
    /// Highest observed total value for the model.
    pub value_high_water_mark: Decimal,
    pub automation: AutomationLevel,
}

impl RiskContext<'_> {
    /// Notional cost of the candidate decision.
    pub fn decision_cost(&self) -> Decimal {
        self.decision.quantity * self.decision.entry_price
    }
}

/// One synchronous pre-trade invariant.
pub trait RiskCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::portfolio::Position;
    use crate::domain::types::{PositionSide, Signal};
    use rust_decimal_macros::dec;

    pub fn decision(signal: Signal, quantity: Decimal, entry_price: Decimal) -> Decision {
        Decision {
            signal,
            quantity,
            entry_price,
            leverage: None,
            stop_loss: None,
            take_profit: None,
            confidence: 0.7,
            justification: "test".to_string(),
        }
    }

    pub fn portfolio(cash: Decimal, positions: usize) -> PortfolioSnapshot {
        let positions = (0..positions)
            .map(|i| Position {
                id: i as i64,
                model_id: 1,
                coin: format!("C{}", i),
                side: PositionSide::Long,
                quantity: dec!(1),
                avg_entry_price: dec!(100),
                stop_loss: None,
                take_profit: None,
                opened_at: 0,
            })
            .collect();
        PortfolioSnapshot {
            model_id: 1,
            cash,
            positions,
        }
    }

    pub struct ContextFixture {
        pub decision: Decision,
        pub settings: crate::domain::model::ModelSettings,
        pub portfolio: PortfolioSnapshot,
        pub total_value: Decimal,
        pub trades_today: i64,
        pub realized_pnl_today: Decimal,
        pub day_start_value: Decimal,
        pub value_high_water_mark: Decimal,
        pub automation: AutomationLevel,
    }

    impl ContextFixture {
        pub fn new(decision: Decision, cash: Decimal, open_positions: usize) -> Self {
            let portfolio = portfolio(cash, open_positions);
            let total_value = cash + Decimal::from(open_positions as i64) * dec!(100);
            Self {
                decision,
                settings: crate::domain::model::ModelSettings::default_for(1),
                portfolio,
                total_value,
                trades_today: 0,
                realized_pnl_today: Decimal::ZERO,
                day_start_value: total_value,
                value_high_water_mark: total_value,
                automation: AutomationLevel::Full,
            }
        }

        pub fn ctx(&self) -> RiskContext<'_> {
            RiskContext {
                decision: &self.decision,
                settings: &self.settings,
                portfolio: &self.portfolio,
                total_value: self.total_value,
                trades_today: self.trades_today,
                realized_pnl_today: self.realized_pnl_today,
                day_start_value: self.day_start_value,
                value_high_water_mark: self.value_high_water_mark,
                automation: self.automation,
            }
        }
    }
}
