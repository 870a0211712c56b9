use crate::domain::risk::check::{CheckResult, DenyCode, RiskCheck, RiskContext};
use rust_decimal::Decimal;

/// Openers must leave `min_cash_reserve_pct` of total value in cash after
/// paying the decision's notional cost.
pub struct CashReserveCheck;

impl RiskCheck for CashReserveCheck {
    fn name(&self) -> &'static str {
        "cash_reserve"
    }

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult {
        if !ctx.decision.signal.is_opener() {
            return CheckResult::Allow;
        }
        if ctx.total_value <= Decimal::ZERO {
            return CheckResult::Allow;
        }

        let remaining = ctx.portfolio.cash - ctx.decision_cost();
        let remaining_pct = remaining / ctx.total_value * Decimal::from(100);

        if remaining_pct < ctx.settings.min_cash_reserve_pct {
            return CheckResult::deny(
                DenyCode::MinCashReserve,
                format!(
                    "cash after trade {} ({}% of total) below reserve floor {}%",
                    remaining,
                    remaining_pct.round_dp(2),
                    ctx.settings.min_cash_reserve_pct
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
    fn test_allows_when_reserve_kept() {
        // $800 out of $10,000 leaves 92% in cash; floor is 20%.
        let fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.02), dec!(40000)),
            dec!(10000),
            0,
        );
        assert!(CashReserveCheck.check(&fixture.ctx()).is_allowed());
    }

    #[test]
    fn test_denies_when_reserve_broken() {
        let mut fixture = ContextFixture::new(
            decision(Signal::BuyToEnter, dec!(0.22), dec!(40000)),
            dec!(10000),
            0,
        );
        fixture.settings.max_position_size_pct = dec!(100);
        // $8,800 out leaves 12% in cash, under the 20% floor.
        let result = CashReserveCheck.check(&fixture.ctx());
        match result {
            CheckResult::Deny { code, .. } => assert_eq!(code, DenyCode::MinCashReserve),
            CheckResult::Allow => panic!("expected deny"),
        }
    }

    #[test]
    fn test_close_ignored() {
        let fixture = ContextFixture::new(
            decision(Signal::ClosePosition, dec!(10), dec!(40000)),
            dec!(100),
            1,
        );
        assert!(CashReserveCheck.check(&fixture.ctx()).is_allowed());
    }
}
