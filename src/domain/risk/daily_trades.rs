use crate::domain::risk::check::{CheckResult, DenyCode, RiskCheck, RiskContext};

/// Enforces `max_daily_trades` at "= N": the N-th trade of the UTC day is
/// allowed, the (N+1)-th denied.
pub struct DailyTradesCheck;

impl RiskCheck for DailyTradesCheck {
    fn name(&self) -> &'static str {
        "daily_trades"
    }

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult {
        if ctx.trades_today >= ctx.settings.max_daily_trades {
            return CheckResult::deny(
                DenyCode::MaxDailyTrades,
                format!(
                    "{} trades today, limit {}",
                    ctx.trades_today, ctx.settings.max_daily_trades
                ),
            );
        }
        CheckResult::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::check::test_support::{ContextFixture, decision};
    use crate::domain::types::Signal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_nth_trade_allowed() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.001), dec!(40000)),
            dec!(10000),
            0,
        );
        fixture.settings.max_daily_trades = 20;
        fixture.trades_today = 19;
        assert!(DailyTradesCheck.check(&fixture.ctx()).is_allowed());
    }

    #[test]
    fn test_n_plus_first_denied() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.001), dec!(40000)),
            dec!(10000),
            0,
        );
        fixture.settings.max_daily_trades = 20;
        fixture.trades_today = 20;
        let result = DailyTradesCheck.check(&fixture.ctx());
        match result {
            CheckResult::Deny { code, .. } => assert_eq!(code, DenyCode::MaxDailyTrades),
            CheckResult::Allow => panic!("expected deny"),
        }
    }
}
