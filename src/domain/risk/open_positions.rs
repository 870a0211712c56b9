use crate::domain::risk::check::{CheckResult, DenyCode, RiskCheck, RiskContext};

/// Openers are denied once the model already holds `max_open_positions`.
/// Closes always pass: they reduce exposure.
pub struct OpenPositionsCheck;

impl RiskCheck for OpenPositionsCheck {
    fn name(&self) -> &'static str {
        "open_positions"
    }

    fn check(&self, ctx: &RiskContext<'_>) -> CheckResult {
        if !ctx.decision.signal.is_opener() {
            return CheckResult::Allow;
        }

        let open = ctx.portfolio.open_positions() as i64;
        if open >= ctx.settings.max_open_positions {
            return CheckResult::deny(
                DenyCode::MaxOpenPositions,
                format!(
                    "{} positions open, limit {}",
                    open, ctx.settings.max_open_positions
                ),
            );
        }

        CheckResult::Allow
    }
}
