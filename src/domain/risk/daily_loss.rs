use crate::domain::risk::check::{CheckResult, DenyCode, RiskCheck, RiskContext};
use rust_decimal::Decimal;

/// Circuit breaker on today's realized P&L as a percentage of the
/// start-of-day total value. Applies to all automation levels.
pub struct DailyLossCheck;

impl RiskCheck for DailyLossCheck {
    fn name(&self) -> &'static str {
        "daily_loss"
    }

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult {
        if ctx.day_start_value <= Decimal::ZERO {
            return CheckResult::Allow;
        }

        let pnl_pct = ctx.realized_pnl_today / ctx.day_start_value * Decimal::from(100);
        if pnl_pct <= -ctx.settings.max_daily_loss_pct {
            return CheckResult::deny(
                DenyCode::DailyLossLimit,
                format!(
                    "today's realized pnl {}% breaches -{}% limit",
                    pnl_pct.round_dp(2),
                    ctx.settings.max_daily_loss_pct
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
    fn test_trips_at_limit() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.001), dec!(40000)),
            dec!(10000),
            0,
        );
        fixture.settings.max_daily_loss_pct = dec!(3);
        fixture.realized_pnl_today = dec!(-300); // exactly -3%
        assert!(!DailyLossCheck.check(&fixture.ctx()).is_allowed());
    }

    #[test]
    fn test_passes_inside_limit() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.001), dec!(40000)),
            dec!(10000),
            0,
        );
        fixture.realized_pnl_today = dec!(-299);
        assert!(DailyLossCheck.check(&fixture.ctx()).is_allowed());
    }
}
