use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The risk parameters a preset owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileParams {
    pub max_position_size_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_daily_trades: i64,
    pub max_open_positions: i64,
    pub min_cash_reserve_pct: Decimal,
    pub max_drawdown_pct: Decimal,
}

impl ProfileParams {
    pub fn ultra_safe() -> Self {
        Self {
            max_position_size_pct: dec!(5),
            max_daily_loss_pct: dec!(1),
            max_daily_trades: 5,
            max_open_positions: 2,
            min_cash_reserve_pct: dec!(40),
            max_drawdown_pct: dec!(8),
        }
    }

    pub fn conservative() -> Self {
        Self {
            max_position_size_pct: dec!(8),
            max_daily_loss_pct: dec!(2),
            max_daily_trades: 10,
            max_open_positions: 3,
            min_cash_reserve_pct: dec!(30),
            max_drawdown_pct: dec!(10),
        }
    }

    pub fn balanced() -> Self {
        Self {
            max_position_size_pct: dec!(10),
            max_daily_loss_pct: dec!(3),
            max_daily_trades: 20,
            max_open_positions: 5,
            min_cash_reserve_pct: dec!(20),
            max_drawdown_pct: dec!(15),
        }
    }

    pub fn aggressive() -> Self {
        Self {
            max_position_size_pct: dec!(15),
            max_daily_loss_pct: dec!(5),
            max_daily_trades: 40,
            max_open_positions: 7,
            min_cash_reserve_pct: dec!(10),
            max_drawdown_pct: dec!(20),
        }
    }

    pub fn scalper() -> Self {
        Self {
            max_position_size_pct: dec!(12),
            max_daily_loss_pct: dec!(4),
            max_daily_trades: 100,
            max_open_positions: 8,
            min_cash_reserve_pct: dec!(15),
            max_drawdown_pct: dec!(18),
        }
    }
}

/// Canonical system profile names.
pub const ULTRA_SAFE: &str = "Ultra-Safe";
pub const CONSERVATIVE: &str = "Conservative";
pub const BALANCED: &str = "Balanced";
pub const AGGRESSIVE: &str = "Aggressive";
pub const SCALPER: &str = "Scalper";

/// A named bundle of risk parameters. System profiles are immutable and
/// undeletable; custom profiles are operator-owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfile {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub is_system: bool,
    pub params: ProfileParams,
    pub created_at: i64,
}

/// Definition rows used to seed the five system presets.
pub fn system_presets() -> Vec<(&'static str, &'static str, &'static str, ProfileParams)> {
    vec![
        (
            ULTRA_SAFE,
            "shield",
            "Capital preservation first: tiny positions, deep cash reserve.",
            ProfileParams::ultra_safe(),
        ),
        (
            CONSERVATIVE,
            "umbrella",
            "Cautious sizing with room to trade daily.",
            ProfileParams::conservative(),
        ),
        (
            BALANCED,
            "scales",
            "Default risk posture: moderate sizing and limits.",
            ProfileParams::balanced(),
        ),
        (
            AGGRESSIVE,
            "fire",
            "Larger positions and looser daily limits.",
            ProfileParams::aggressive(),
        ),
        (
            SCALPER,
            "zap",
            "High trade count, moderate sizing, tight attention required.",
            ProfileParams::scalper(),
        ),
    ]
}

/// Attribution record for the interval a profile was active on a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSession {
    pub id: i64,
    pub model_id: i64,
    pub profile_id: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub trades_executed: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_pnl: Decimal,
    pub max_drawdown_pct: Decimal,
}

impl ProfileSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}
