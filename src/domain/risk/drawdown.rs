use crate::domain::risk::check::{CheckResult, DenyCode, RiskCheck, RiskContext};
use crate::domain::types::AutomationLevel;
use rust_decimal::Decimal;

/// Peak-to-current equity drop gate. Only fully-automated models are held to
/// it; manual and semi decisions already pass through a human.
pub struct DrawdownCheck;

impl RiskCheck for DrawdownCheck {
    fn name(&self) -> &'static str {
        "drawdown"
    }

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult {
        if ctx.automation != AutomationLevel::Full {
            return CheckResult::Allow;
        }
        if ctx.value_high_water_mark <= Decimal::ZERO {
            return CheckResult::Allow;
        }

        let drawdown_pct = (ctx.value_high_water_mark - ctx.total_value)
            / ctx.value_high_water_mark
            * Decimal::from(100);

        if drawdown_pct >= ctx.settings.max_drawdown_pct {
            return CheckResult::deny(
                DenyCode::MaxDrawdown,
                format!(
                    "drawdown {}% from peak {} reaches {}% limit",
                    drawdown_pct.round_dp(2),
                    ctx.value_high_water_mark,
                    ctx.settings.max_drawdown_pct
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
    fn test_trips_for_full_auto() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.001), dec!(40000)),
            dec!(8000),
            0,
        );
        fixture.value_high_water_mark = dec!(10000);
        fixture.settings.max_drawdown_pct = dec!(15);
        // 20% drawdown >= 15%.
        assert!(!DrawdownCheck.check(&fixture.ctx()).is_allowed());
    }

    #[test]
    fn test_semi_not_gated() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.001), dec!(40000)),
            dec!(8000),
            0,
        );
        fixture.value_high_water_mark = dec!(10000);
        fixture.automation = AutomationLevel::Semi;
        assert!(DrawdownCheck.check(&fixture.ctx()).is_allowed());
    }
}
