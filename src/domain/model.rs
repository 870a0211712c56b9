use crate::domain::profile::ProfileParams;
use crate::domain::types::{AutomationLevel, ExchangeEnvironment, ModelStatus, TradingEnvironment};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Bounds for the per-model cycle interval.
pub const MIN_INTERVAL_MINUTES: i64 = 5;
pub const MAX_INTERVAL_MINUTES: i64 = 1440;
pub const DEFAULT_INTERVAL_MINUTES: i64 = 60;

/// The unit of trading: one AI decision source with its own capital,
/// environment and automation level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub provider_id: Option<i64>,
    pub ai_model: String,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub status: ModelStatus,
    pub trading_environment: TradingEnvironment,
    pub automation_level: AutomationLevel,
    pub exchange_environment: ExchangeEnvironment,
    pub created_at: i64,
}

impl Model {
    pub fn is_active(&self) -> bool {
        self.status == ModelStatus::Active
    }
}

/// Per-model risk parameters and cycle configuration (1:1 with [`Model`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model_id: i64,
    pub max_position_size_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_daily_trades: i64,
    pub max_open_positions: i64,
    pub min_cash_reserve_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub trading_interval_minutes: i64,
    pub fee_rate: Decimal,
    pub auto_pause_enabled: bool,
    pub auto_pause_consecutive_losses: i64,
    pub auto_pause_win_rate_threshold: Decimal,
    pub ai_temperature: f64,
    pub notify_on_trade: bool,
    pub active_profile_id: Option<i64>,
}

impl ModelSettings {
    /// Defaults match the Balanced preset with a 60-minute cycle and 0.1% fee.
    pub fn default_for(model_id: i64) -> Self {
        let params = ProfileParams::balanced();
        Self {
            model_id,
            max_position_size_pct: params.max_position_size_pct,
            max_daily_loss_pct: params.max_daily_loss_pct,
            max_daily_trades: params.max_daily_trades,
            max_open_positions: params.max_open_positions,
            min_cash_reserve_pct: params.min_cash_reserve_pct,
            max_drawdown_pct: params.max_drawdown_pct,
            trading_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            fee_rate: dec!(0.001),
            auto_pause_enabled: true,
            auto_pause_consecutive_losses: 3,
            auto_pause_win_rate_threshold: dec!(30),
            ai_temperature: 0.7,
            notify_on_trade: false,
            active_profile_id: None,
        }
    }

    /// Overwrite the preset-owned fields, leaving cycle and AI config alone.
    pub fn apply_params(&mut self, params: &ProfileParams) {
        self.max_position_size_pct = params.max_position_size_pct;
        self.max_daily_loss_pct = params.max_daily_loss_pct;
        self.max_daily_trades = params.max_daily_trades;
        self.max_open_positions = params.max_open_positions;
        self.min_cash_reserve_pct = params.min_cash_reserve_pct;
        self.max_drawdown_pct = params.max_drawdown_pct;
    }

    /// Cycle interval clamped to the [5, 1440] minute window.
    pub fn effective_interval_minutes(&self) -> i64 {
        self.trading_interval_minutes
            .clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_balanced_preset() {
        let settings = ModelSettings::default_for(1);
        assert_eq!(settings.max_position_size_pct, dec!(10));
        assert_eq!(settings.max_daily_loss_pct, dec!(3));
        assert_eq!(settings.max_daily_trades, 20);
        assert_eq!(settings.max_open_positions, 5);
        assert_eq!(settings.min_cash_reserve_pct, dec!(20));
        assert_eq!(settings.max_drawdown_pct, dec!(15));
        assert_eq!(settings.trading_interval_minutes, 60);
        assert_eq!(settings.fee_rate, dec!(0.001));
    }

    #[test]
    fn test_interval_clamping() {
        let mut settings = ModelSettings::default_for(1);
        settings.trading_interval_minutes = 1;
        assert_eq!(settings.effective_interval_minutes(), 5);
        settings.trading_interval_minutes = 10_000;
        assert_eq!(settings.effective_interval_minutes(), 1440);
        settings.trading_interval_minutes = 240;
        assert_eq!(settings.effective_interval_minutes(), 240);
    }

    #[test]
    fn test_apply_params_leaves_cycle_config() {
        let mut settings = ModelSettings::default_for(1);
        settings.trading_interval_minutes = 15;
        settings.ai_temperature = 0.2;
        settings.apply_params(&ProfileParams::aggressive());
        assert_eq!(settings.max_position_size_pct, dec!(15));
        assert_eq!(settings.max_daily_trades, 40);
        assert_eq!(settings.trading_interval_minutes, 15);
        assert_eq!(settings.ai_temperature, 0.2);
    }
}
