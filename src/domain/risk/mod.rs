pub mod cash_reserve;
pub mod check;
pub mod daily_loss;
pub mod daily_trades;
pub mod drawdown;
pub mod open_positions;
pub mod position_size;

pub use cash_reserve::CashReserveCheck;
pub use check::{CheckResult, DenyCode, RiskCheck, RiskContext};
pub use daily_loss::DailyLossCheck;
pub use daily_trades::DailyTradesCheck;
pub use drawdown::DrawdownCheck;
pub use open_positions::OpenPositionsCheck;
pub use position_size::PositionSizeCheck;

/// The pre-trade checks in their mandated evaluation order. The first deny
/// short-circuits the pipeline.
pub fn standard_checks() -> Vec<Box<dyn RiskCheck>> {
    vec![
        Box::new(PositionSizeCheck),
        Box::new(OpenPositionsCheck),
        Box::new(DailyTradesCheck),
        Box::new(CashReserveCheck),
        Box::new(DailyLossCheck),
        Box::new(DrawdownCheck),
    ]
}
