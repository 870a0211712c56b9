use crate::domain::risk::check::{CheckResult, DenyCode, RiskCheck, RiskContext};
use rust_decimal::Decimal;

/// Caps the candidate's notional at `max_position_size_pct` of total value.
/// A notional exactly at the cap is allowed.
pub struct PositionSizeCheck;

impl RiskCheck for PositionSizeCheck {
    fn name(&self) -> &'static str {
        "position_size"
    }

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult {
        if ctx.total_value <= Decimal::ZERO {
            return CheckResult::deny(
                DenyCode::PositionSize,
                "total value is zero; nothing to size against",
            );
        }

        let notional = ctx.decision_cost();
        let cap = ctx.total_value * ctx.settings.max_position_size_pct / Decimal::from(100);

        if notional > cap {
            return CheckResult::deny(
                DenyCode::PositionSize,
                format!(
                    "notional {} exceeds {}% cap of {} (total value {})",
                    notional, ctx.settings.max_position_size_pct, cap, ctx.total_value
                ),
            );
        }

        CheckResult::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::check::test_support::ContextFixture;
    use crate::domain::types::Signal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_allows_under_cap() {
        let fixture = ContextFixture::new(
            super::super::check::test_support::decision(Signal::BuyToEnter, dec!(0.02), dec!(40000)),
            dec!(10000),
            0,
        );
        // $800 notional against a 10% cap of $10,000.
        assert!(PositionSizeCheck.check(&fixture.ctx()).is_allowed());
    }

    #[test]
    fn test_allows_exactly_at_cap() {
        let fixture = ContextFixture::new(
            super::super::check::test_support::decision(Signal::BuyToEnter, dec!(0.025), dec!(40000)),
            dec!(10000),
            0,
        );
        // $1,000 notional == 10% of $10,000.
        assert!(PositionSizeCheck.check(&fixture.ctx()).is_allowed());
    }

    #[test]
    fn test_denies_over_cap() {
        let fixture = ContextFixture::new(
            super::super::check::test_support::decision(Signal::BuyToEnter, dec!(1), dec!(2000)),
            dec!(10000),
            0,
        );
        // $2,000 > $1,000 cap.
        let result = PositionSizeCheck.check(&fixture.ctx());
        match result {
            CheckResult::Deny { code, .. } => assert_eq!(code, DenyCode::PositionSize),
            CheckResult::Allow => panic!("expected deny"),
        }
    }
}
