//! Single source of truth for all durable state.
//!
//! Every mutation the trading core performs lands here. Writers hold the
//! per-model cycle lock (or the scheduler's global lock for cross-model
//! operations), so each method can assume it is the only writer for the rows
//! it touches. Money and quantities are persisted as decimal strings.

use crate::domain::errors::ValidationError;
use crate::domain::incident::Incident;
use crate::domain::model::{Model, ModelSettings};
use crate::domain::pending::{PENDING_TTL_SECS, PendingDecision, PendingStatus};
use crate::domain::portfolio::{PortfolioSnapshot, Position};
use crate::domain::profile::{ProfileParams, ProfileSession, RiskProfile, system_presets};
use crate::domain::trade::Trade;
use crate::domain::types::{
    AutomationLevel, Decision, ExchangeEnvironment, IncidentType, ModelStatus, PositionSide,
    Severity, Signal, TradeSide, TradingEnvironment,
};
use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEDULER_ENABLED_KEY: &str = "scheduler_enabled";

/// Fields needed to create a model.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub name: String,
    pub provider_id: Option<i64>,
    pub ai_model: String,
    pub initial_capital: Decimal,
    pub trading_environment: TradingEnvironment,
    pub automation_level: AutomationLevel,
    pub exchange_environment: ExchangeEnvironment,
}

/// One executed fill to be folded into the ledger.
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub coin: String,
    pub signal: Signal,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub exchange_order_id: Option<String>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub timestamp: i64,
}

/// Result of folding a fill into trades/positions/cash.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub trades: Vec<Trade>,
    pub realized_pnl: Decimal,
    pub cash_after: Decimal,
}

/// Per-model daily baseline and equity high-water mark.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub model_id: i64,
    pub day_start_value: Decimal,
    pub value_high_water_mark: Decimal,
    pub reference_date: NaiveDate,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

fn dec_col(row: &SqliteRow, name: &str) -> Result<Decimal> {
    let raw: String = row.try_get(name)?;
    Decimal::from_str(&raw).with_context(|| format!("Bad decimal in column {}: {}", name, raw))
}

fn dec_col_opt(row: &SqliteRow, name: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.try_get(name)?;
    match raw {
        Some(s) => Ok(Some(
            Decimal::from_str(&s).with_context(|| format!("Bad decimal in column {}", name))?,
        )),
        None => Ok(None),
    }
}

/// Start of the current UTC calendar day as a unix timestamp.
pub fn utc_day_start(now: i64) -> i64 {
    let date = Utc
        .timestamp_opt(now, 0)
        .single()
        .unwrap_or_else(Utc::now)
        .date_naive();
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(now)
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    pub async fn create_model(&self, new: &NewModel) -> Result<Model> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO models
                (name, provider_id, ai_model, initial_capital, cash, status,
                 trading_environment, automation_level, exchange_environment, created_at)
            VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(new.provider_id)
        .bind(&new.ai_model)
        .bind(new.initial_capital.to_string())
        .bind(new.initial_capital.to_string())
        .bind(new.trading_environment.to_string())
        .bind(new.automation_level.to_string())
        .bind(new.exchange_environment.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create model")?;

        let model_id = result.last_insert_rowid();
        self.insert_default_settings(model_id).await?;

        info!("Created model {} ({})", model_id, new.name);
        self.get_model(model_id).await
    }

    async fn insert_default_settings(&self, model_id: i64) -> Result<()> {
        let s = ModelSettings::default_for(model_id);
        sqlx::query(
            r#"
            INSERT INTO model_settings
                (model_id, max_position_size_pct, max_daily_loss_pct, max_daily_trades,
                 max_open_positions, min_cash_reserve_pct, max_drawdown_pct,
                 trading_interval_minutes, fee_rate, auto_pause_enabled,
                 auto_pause_consecutive_losses, auto_pause_win_rate_threshold,
                 ai_temperature, notify_on_trade, active_profile_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(model_id)
        .bind(s.max_position_size_pct.to_string())
        .bind(s.max_daily_loss_pct.to_string())
        .bind(s.max_daily_trades)
        .bind(s.max_open_positions)
        .bind(s.min_cash_reserve_pct.to_string())
        .bind(s.max_drawdown_pct.to_string())
        .bind(s.trading_interval_minutes)
        .bind(s.fee_rate.to_string())
        .bind(s.auto_pause_enabled)
        .bind(s.auto_pause_consecutive_losses)
        .bind(s.auto_pause_win_rate_threshold.to_string())
        .bind(s.ai_temperature)
        .bind(s.notify_on_trade)
        .execute(&self.pool)
        .await
        .context("Failed to insert default settings")?;
        Ok(())
    }

    pub async fn get_model(&self, model_id: i64) -> Result<Model> {
        let row = sqlx::query("SELECT * FROM models WHERE id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::map_model(&row),
            None => Err(ValidationError::UnknownModel(model_id).into()),
        }
    }

    pub async fn list_models(&self) -> Result<Vec<Model>> {
        let rows = sqlx::query("SELECT * FROM models ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_model).collect()
    }

    pub async fn list_active_models(&self) -> Result<Vec<Model>> {
        let rows = sqlx::query("SELECT * FROM models WHERE status = 'active' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_model).collect()
    }

    fn map_model(row: &SqliteRow) -> Result<Model> {
        Ok(Model {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            provider_id: row.try_get("provider_id")?,
            ai_model: row.try_get("ai_model")?,
            initial_capital: dec_col(row, "initial_capital")?,
            cash: dec_col(row, "cash")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            trading_environment: row.try_get::<String, _>("trading_environment")?.parse()?,
            automation_level: row.try_get::<String, _>("automation_level")?.parse()?,
            exchange_environment: row.try_get::<String, _>("exchange_environment")?.parse()?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn set_status(&self, model_id: i64, status: ModelStatus) -> Result<()> {
        self.update_model_field(model_id, "status", &status.to_string())
            .await
    }

    pub async fn set_trading_environment(
        &self,
        model_id: i64,
        environment: TradingEnvironment,
    ) -> Result<()> {
        self.update_model_field(model_id, "trading_environment", &environment.to_string())
            .await
    }

    pub async fn set_automation_level(
        &self,
        model_id: i64,
        level: AutomationLevel,
    ) -> Result<()> {
        self.update_model_field(model_id, "automation_level", &level.to_string())
            .await
    }

    pub async fn set_exchange_environment(
        &self,
        model_id: i64,
        environment: ExchangeEnvironment,
    ) -> Result<()> {
        self.update_model_field(model_id, "exchange_environment", &environment.to_string())
            .await
    }

    async fn update_model_field(&self, model_id: i64, field: &str, value: &str) -> Result<()> {
        // field is a compile-time constant at every call site
        let query = format!("UPDATE models SET {} = ? WHERE id = ?", field);
        let result = sqlx::query(&query)
            .bind(value)
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ValidationError::UnknownModel(model_id).into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub async fn get_settings(&self, model_id: i64) -> Result<ModelSettings> {
        let row = sqlx::query("SELECT * FROM model_settings WHERE model_id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::map_settings(&row),
            None => bail!("No settings for model: {}", model_id),
        }
    }

    fn map_settings(row: &SqliteRow) -> Result<ModelSettings> {
        Ok(ModelSettings {
            model_id: row.try_get("model_id")?,
            max_position_size_pct: dec_col(row, "max_position_size_pct")?,
            max_daily_loss_pct: dec_col(row, "max_daily_loss_pct")?,
            max_daily_trades: row.try_get("max_daily_trades")?,
            max_open_positions: row.try_get("max_open_positions")?,
            min_cash_reserve_pct: dec_col(row, "min_cash_reserve_pct")?,
            max_drawdown_pct: dec_col(row, "max_drawdown_pct")?,
            trading_interval_minutes: row.try_get("trading_interval_minutes")?,
            fee_rate: dec_col(row, "fee_rate")?,
            auto_pause_enabled: row.try_get("auto_pause_enabled")?,
            auto_pause_consecutive_losses: row.try_get("auto_pause_consecutive_losses")?,
            auto_pause_win_rate_threshold: dec_col(row, "auto_pause_win_rate_threshold")?,
            ai_temperature: row.try_get("ai_temperature")?,
            notify_on_trade: row.try_get("notify_on_trade")?,
            active_profile_id: row.try_get("active_profile_id")?,
        })
    }

    pub async fn update_settings(&self, settings: &ModelSettings) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE model_settings SET
                max_position_size_pct = ?, max_daily_loss_pct = ?, max_daily_trades = ?,
                max_open_positions = ?, min_cash_reserve_pct = ?, max_drawdown_pct = ?,
                trading_interval_minutes = ?, fee_rate = ?, auto_pause_enabled = ?,
                auto_pause_consecutive_losses = ?, auto_pause_win_rate_threshold = ?,
                ai_temperature = ?, notify_on_trade = ?, active_profile_id = ?
            WHERE model_id = ?
            "#,
        )
        .bind(settings.max_position_size_pct.to_string())
        .bind(settings.max_daily_loss_pct.to_string())
        .bind(settings.max_daily_trades)
        .bind(settings.max_open_positions)
        .bind(settings.min_cash_reserve_pct.to_string())
        .bind(settings.max_drawdown_pct.to_string())
        .bind(settings.trading_interval_minutes)
        .bind(settings.fee_rate.to_string())
        .bind(settings.auto_pause_enabled)
        .bind(settings.auto_pause_consecutive_losses)
        .bind(settings.auto_pause_win_rate_threshold.to_string())
        .bind(settings.ai_temperature)
        .bind(settings.notify_on_trade)
        .bind(settings.active_profile_id)
        .bind(settings.model_id)
        .execute(&self.pool)
        .await
        .context("Failed to update settings")?;
        if result.rows_affected() == 0 {
            bail!("No settings for model: {}", settings.model_id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Portfolio, trades, fills
    // ------------------------------------------------------------------

    pub async fn portfolio_snapshot(&self, model_id: i64) -> Result<PortfolioSnapshot> {
        let model = self.get_model(model_id).await?;
        let positions = self.list_positions(model_id).await?;
        Ok(PortfolioSnapshot {
            model_id,
            cash: model.cash,
            positions,
        })
    }

    pub async fn list_positions(&self, model_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE model_id = ? ORDER BY coin ASC")
            .bind(model_id)
            .fetch_all(&self.pool)
            .await?;
        let positions: Result<Vec<Position>> = rows.iter().map(Self::map_position).collect();
        let positions = positions?;
        for position in &positions {
            if position.quantity <= Decimal::ZERO {
                bail!(
                    "Inconsistent position for model {} {} {}: quantity {}",
                    model_id,
                    position.coin,
                    position.side,
                    position.quantity
                );
            }
        }
        Ok(positions)
    }

    fn map_position(row: &SqliteRow) -> Result<Position> {
        Ok(Position {
            id: row.try_get("id")?,
            model_id: row.try_get("model_id")?,
            coin: row.try_get("coin")?,
            side: row.try_get::<String, _>("side")?.parse()?,
            quantity: dec_col(row, "quantity")?,
            avg_entry_price: dec_col(row, "avg_entry_price")?,
            stop_loss: dec_col_opt(row, "stop_loss")?,
            take_profit: dec_col_opt(row, "take_profit")?,
            opened_at: row.try_get("opened_at")?,
        })
    }

    fn map_trade(row: &SqliteRow) -> Result<Trade> {
        Ok(Trade {
            id: row.try_get("id")?,
            model_id: row.try_get("model_id")?,
            coin: row.try_get("coin")?,
            side: row.try_get::<String, _>("side")?.parse()?,
            quantity: dec_col(row, "quantity")?,
            price: dec_col(row, "price")?,
            fee: dec_col(row, "fee")?,
            realized_pnl: dec_col(row, "realized_pnl")?,
            timestamp: row.try_get("timestamp")?,
            exchange_order_id: row.try_get("exchange_order_id")?,
        })
    }

    /// Fold one executed fill into the ledger: append trade rows, net the
    /// position (an opposite-side open closes the existing position first),
    /// and adjust cash — all in one transaction.
    pub async fn apply_fill(&self, model_id: i64, fill: &FillRequest) -> Result<FillOutcome> {
        if fill.quantity <= Decimal::ZERO {
            return Err(ValidationError::InvalidQuantity(format!(
                "fill quantity must be positive, got {}",
                fill.quantity
            ))
            .into());
        }
        if fill.price <= Decimal::ZERO {
            bail!("Fill price must be positive, got {}", fill.price);
        }

        let mut tx = self.pool.begin().await?;

        let cash_row = sqlx::query("SELECT cash FROM models WHERE id = ?")
            .bind(model_id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut cash = match cash_row {
            Some(row) => dec_col(&row, "cash")?,
            None => bail!("Unknown model: {}", model_id),
        };

        let mut trades: Vec<Trade> = Vec::new();
        let mut realized_total = Decimal::ZERO;

        match fill.signal {
            Signal::BuyToEnter | Signal::SellToEnter => {
                let open_side = fill
                    .signal
                    .position_side()
                    .expect("opener signals map to a position side");
                let mut remaining = fill.quantity;

                // Net against an existing opposite-side position first.
                if let Some(opposite) = Self::fetch_position_tx(
                    &mut tx,
                    model_id,
                    &fill.coin,
                    open_side.opposite(),
                )
                .await?
                {
                    let close_qty = remaining.min(opposite.quantity);
                    let fee_part = fill.fee * close_qty / fill.quantity;
                    let (realized, cash_delta) = close_deltas(
                        opposite.side,
                        opposite.avg_entry_price,
                        fill.price,
                        close_qty,
                        fee_part,
                    );
                    cash += cash_delta;
                    realized_total += realized;

                    let trade = Self::insert_trade_tx(
                        &mut tx,
                        model_id,
                        &fill.coin,
                        TradeSide::Close,
                        close_qty,
                        fill.price,
                        fee_part,
                        realized,
                        fill.timestamp,
                        fill.exchange_order_id.as_deref(),
                    )
                    .await?;
                    trades.push(trade);

                    Self::reduce_position_tx(&mut tx, opposite.id, opposite.quantity - close_qty)
                        .await?;
                    remaining -= close_qty;
                }

                if remaining > Decimal::ZERO {
                    let fee_part = fill.fee * remaining / fill.quantity;
                    let side = match open_side {
                        PositionSide::Long => {
                            cash -= remaining * fill.price + fee_part;
                            TradeSide::Buy
                        }
                        PositionSide::Short => {
                            cash += remaining * fill.price - fee_part;
                            TradeSide::Sell
                        }
                    };

                    let trade = Self::insert_trade_tx(
                        &mut tx,
                        model_id,
                        &fill.coin,
                        side,
                        remaining,
                        fill.price,
                        fee_part,
                        Decimal::ZERO,
                        fill.timestamp,
                        fill.exchange_order_id.as_deref(),
                    )
                    .await?;
                    trades.push(trade);

                    Self::upsert_position_tx(&mut tx, model_id, fill, open_side, remaining).await?;
                }
            }
            Signal::ClosePosition => {
                let position_row =
                    sqlx::query("SELECT * FROM positions WHERE model_id = ? AND coin = ?")
                        .bind(model_id)
                        .bind(&fill.coin)
                        .fetch_optional(&mut *tx)
                        .await?;
                let position = match position_row {
                    Some(row) => Self::map_position(&row)?,
                    None => bail!("No open position for model {} {}", model_id, fill.coin),
                };
                if fill.quantity > position.quantity {
                    bail!(
                        "Close quantity {} exceeds open position {}",
                        fill.quantity,
                        position.quantity
                    );
                }

                let (realized, cash_delta) = close_deltas(
                    position.side,
                    position.avg_entry_price,
                    fill.price,
                    fill.quantity,
                    fill.fee,
                );
                cash += cash_delta;
                realized_total += realized;

                let trade = Self::insert_trade_tx(
                    &mut tx,
                    model_id,
                    &fill.coin,
                    TradeSide::Close,
                    fill.quantity,
                    fill.price,
                    fill.fee,
                    realized,
                    fill.timestamp,
                    fill.exchange_order_id.as_deref(),
                )
                .await?;
                trades.push(trade);

                Self::reduce_position_tx(&mut tx, position.id, position.quantity - fill.quantity)
                    .await?;
            }
            Signal::Hold => bail!("Hold signals carry no fill"),
        }

        if cash < Decimal::ZERO {
            bail!(
                "Fill would drive model {} cash negative ({}); ledger unchanged",
                model_id,
                cash
            );
        }

        sqlx::query("UPDATE models SET cash = ? WHERE id = ?")
            .bind(cash.to_string())
            .bind(model_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("Failed to commit fill")?;

        debug!(
            "Applied fill for model {} {} {:?}: {} trade rows, realized {}",
            model_id,
            fill.coin,
            fill.signal,
            trades.len(),
            realized_total
        );

        Ok(FillOutcome {
            trades,
            realized_pnl: realized_total,
            cash_after: cash,
        })
    }

    async fn fetch_position_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        model_id: i64,
        coin: &str,
        side: PositionSide,
    ) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE model_id = ? AND coin = ? AND side = ?")
            .bind(model_id)
            .bind(coin)
            .bind(side.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(Self::map_position).transpose()
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_trade_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        model_id: i64,
        coin: &str,
        side: TradeSide,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        realized_pnl: Decimal,
        timestamp: i64,
        exchange_order_id: Option<&str>,
    ) -> Result<Trade> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades
                (model_id, coin, side, quantity, price, fee, realized_pnl, timestamp, exchange_order_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(coin)
        .bind(side.to_string())
        .bind(quantity.to_string())
        .bind(price.to_string())
        .bind(fee.to_string())
        .bind(realized_pnl.to_string())
        .bind(timestamp)
        .bind(exchange_order_id)
        .execute(&mut **tx)
        .await
        .context("Failed to insert trade")?;

        Ok(Trade {
            id: result.last_insert_rowid(),
            model_id,
            coin: coin.to_string(),
            side,
            quantity,
            price,
            fee,
            realized_pnl,
            timestamp,
            exchange_order_id: exchange_order_id.map(str::to_string),
        })
    }

    async fn reduce_position_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        position_id: i64,
        remaining: Decimal,
    ) -> Result<()> {
        if remaining <= Decimal::ZERO {
            sqlx::query("DELETE FROM positions WHERE id = ?")
                .bind(position_id)
                .execute(&mut **tx)
                .await?;
        } else {
            sqlx::query("UPDATE positions SET quantity = ? WHERE id = ?")
                .bind(remaining.to_string())
                .bind(position_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn upsert_position_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        model_id: i64,
        fill: &FillRequest,
        side: PositionSide,
        quantity: Decimal,
    ) -> Result<()> {
        let existing = Self::fetch_position_tx(tx, model_id, &fill.coin, side).await?;
        match existing {
            Some(position) => {
                let total_qty = position.quantity + quantity;
                let avg = (position.quantity * position.avg_entry_price
                    + quantity * fill.price)
                    / total_qty;
                sqlx::query(
                    r#"
                    UPDATE positions SET quantity = ?, avg_entry_price = ?,
                        stop_loss = COALESCE(?, stop_loss),
                        take_profit = COALESCE(?, take_profit)
                    WHERE id = ?
                    "#,
                )
                .bind(total_qty.to_string())
                .bind(avg.to_string())
                .bind(fill.stop_loss.map(|d| d.to_string()))
                .bind(fill.take_profit.map(|d| d.to_string()))
                .bind(position.id)
                .execute(&mut **tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO positions
                        (model_id, coin, side, quantity, avg_entry_price, stop_loss, take_profit, opened_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(model_id)
                .bind(&fill.coin)
                .bind(side.to_string())
                .bind(quantity.to_string())
                .bind(fill.price.to_string())
                .bind(fill.stop_loss.map(|d| d.to_string()))
                .bind(fill.take_profit.map(|d| d.to_string()))
                .bind(fill.timestamp)
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn recent_trades(&self, model_id: i64, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE model_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(model_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_trade).collect()
    }

    pub async fn trades_between(&self, model_id: i64, start: i64, end: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE model_id = ? AND timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(model_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_trade).collect()
    }

    /// Trades logged for the model in the current UTC day.
    pub async fn trades_today(&self, model_id: i64, now: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM trades WHERE model_id = ? AND timestamp >= ?",
        )
        .bind(model_id)
        .bind(utc_day_start(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    /// Sum of today's realized P&L (closes only; opens carry zero).
    pub async fn realized_pnl_today(&self, model_id: i64, now: i64) -> Result<Decimal> {
        let rows = sqlx::query(
            "SELECT realized_pnl FROM trades WHERE model_id = ? AND side = 'close' AND timestamp >= ?",
        )
        .bind(model_id)
        .bind(utc_day_start(now))
        .fetch_all(&self.pool)
        .await?;
        let mut total = Decimal::ZERO;
        for row in rows {
            total += dec_col(&row, "realized_pnl")?;
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Risk state (daily baseline + high-water mark)
    // ------------------------------------------------------------------

    /// Load the model's risk state, rolling the daily baseline at the UTC day
    /// boundary and ratcheting the high-water mark against `current_value`.
    pub async fn roll_risk_state(
        &self,
        model_id: i64,
        current_value: Decimal,
        now: i64,
    ) -> Result<RiskState> {
        let today = Utc
            .timestamp_opt(now, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .date_naive();

        let row = sqlx::query("SELECT * FROM risk_state WHERE model_id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;

        let state = match row {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO risk_state
                        (model_id, day_start_value, value_high_water_mark, reference_date, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(model_id)
                .bind(current_value.to_string())
                .bind(current_value.to_string())
                .bind(today.to_string())
                .bind(now)
                .execute(&self.pool)
                .await?;
                RiskState {
                    model_id,
                    day_start_value: current_value,
                    value_high_water_mark: current_value,
                    reference_date: today,
                }
            }
            Some(row) => {
                let stored = Self::map_risk_state(&row)?;
                let mut day_start = stored.day_start_value;
                let mut hwm = stored.value_high_water_mark;

                if stored.reference_date != today {
                    day_start = current_value;
                }
                if current_value > hwm {
                    hwm = current_value;
                }

                sqlx::query(
                    r#"
                    UPDATE risk_state SET day_start_value = ?, value_high_water_mark = ?,
                        reference_date = ?, updated_at = ?
                    WHERE model_id = ?
                    "#,
                )
                .bind(day_start.to_string())
                .bind(hwm.to_string())
                .bind(today.to_string())
                .bind(now)
                .bind(model_id)
                .execute(&self.pool)
                .await?;

                RiskState {
                    model_id,
                    day_start_value: day_start,
                    value_high_water_mark: hwm,
                    reference_date: today,
                }
            }
        };

        Ok(state)
    }

    /// Read the model's risk state as-is, without rolling the daily baseline
    /// or ratcheting the high-water mark. Consumers that cannot supply a
    /// properly market-valued total (recommendations, auto-pause) use this so
    /// they never install a degraded baseline.
    pub async fn get_risk_state(&self, model_id: i64) -> Result<Option<RiskState>> {
        let row = sqlx::query("SELECT * FROM risk_state WHERE model_id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_risk_state).transpose()
    }

    fn map_risk_state(row: &SqliteRow) -> Result<RiskState> {
        let stored_date: String = row.try_get("reference_date")?;
        let reference_date = NaiveDate::from_str(&stored_date)
            .with_context(|| format!("Bad reference_date: {}", stored_date))?;
        Ok(RiskState {
            model_id: row.try_get("model_id")?,
            day_start_value: dec_col(row, "day_start_value")?,
            value_high_water_mark: dec_col(row, "value_high_water_mark")?,
            reference_date,
        })
    }

    // ------------------------------------------------------------------
    // Pending decisions
    // ------------------------------------------------------------------

    pub async fn has_pending(&self, model_id: i64, coin: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM pending_decisions WHERE model_id = ? AND coin = ? AND status = 'pending'",
        )
        .bind(model_id)
        .bind(coin)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    pub async fn insert_pending(
        &self,
        model_id: i64,
        coin: &str,
        decision: &Decision,
        explanation: Option<&str>,
        now: i64,
    ) -> Result<PendingDecision> {
        let decision_json = serde_json::to_string(decision)?;
        let expires_at = now + PENDING_TTL_SECS;
        let result = sqlx::query(
            r#"
            INSERT INTO pending_decisions
                (model_id, coin, decision_json, explanation, status, created_at, expires_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(coin)
        .bind(&decision_json)
        .bind(explanation)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert pending decision")?;

        Ok(PendingDecision {
            id: result.last_insert_rowid(),
            model_id,
            coin: coin.to_string(),
            decision: decision.clone(),
            explanation: explanation.map(str::to_string),
            status: PendingStatus::Pending,
            created_at: now,
            expires_at,
            resolved_at: None,
            resolution_note: None,
            resolved_quantity: None,
            resolved_leverage: None,
        })
    }

    pub async fn get_pending(&self, id: i64) -> Result<Option<PendingDecision>> {
        let row = sqlx::query("SELECT * FROM pending_decisions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_pending).transpose()
    }

    pub async fn list_pending(&self, model_id: Option<i64>) -> Result<Vec<PendingDecision>> {
        let rows = match model_id {
            Some(model_id) => {
                sqlx::query(
                    "SELECT * FROM pending_decisions WHERE status = 'pending' AND model_id = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(model_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM pending_decisions WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::map_pending).collect()
    }

    fn map_pending(row: &SqliteRow) -> Result<PendingDecision> {
        let decision_json: String = row.try_get("decision_json")?;
        Ok(PendingDecision {
            id: row.try_get("id")?,
            model_id: row.try_get("model_id")?,
            coin: row.try_get("coin")?,
            decision: serde_json::from_str(&decision_json)
                .context("Bad decision payload in pending row")?,
            explanation: row.try_get("explanation")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution_note: row.try_get("resolution_note")?,
            resolved_quantity: dec_col_opt(row, "resolved_quantity")?,
            resolved_leverage: dec_col_opt(row, "resolved_leverage")?,
        })
    }

    /// Guarded status transition; returns false when the row was not in one
    /// of `from` (the caller maps that to a queue error).
    pub async fn transition_pending(
        &self,
        id: i64,
        from: &[PendingStatus],
        to: PendingStatus,
        resolved_at: Option<i64>,
        note: Option<&str>,
        resolved_quantity: Option<Decimal>,
        resolved_leverage: Option<Decimal>,
    ) -> Result<bool> {
        let from_list: Vec<String> = from.iter().map(|s| s.to_string()).collect();
        // Bounded set of statuses, expanded to placeholders.
        let placeholders = vec!["?"; from_list.len()].join(", ");
        let query = format!(
            r#"
            UPDATE pending_decisions SET status = ?,
                resolved_at = COALESCE(?, resolved_at),
                resolution_note = COALESCE(?, resolution_note),
                resolved_quantity = COALESCE(?, resolved_quantity),
                resolved_leverage = COALESCE(?, resolved_leverage)
            WHERE id = ? AND status IN ({})
            "#,
            placeholders
        );

        let mut q = sqlx::query(&query)
            .bind(to.to_string())
            .bind(resolved_at)
            .bind(note)
            .bind(resolved_quantity.map(|d| d.to_string()))
            .bind(resolved_leverage.map(|d| d.to_string()))
            .bind(id);
        for status in &from_list {
            q = q.bind(status);
        }

        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Expire every pending row whose deadline has strictly passed.
    pub async fn expire_pending(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE pending_decisions SET status = 'expired', resolved_at = ? WHERE status = 'pending' AND expires_at < ?",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Incidents
    // ------------------------------------------------------------------

    pub async fn append_incident(
        &self,
        model_id: Option<i64>,
        incident_type: IncidentType,
        severity: Severity,
        message: &str,
        details: serde_json::Value,
    ) -> Result<Incident> {
        let now = Utc::now().timestamp();
        let details_json = details.to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO incidents (model_id, incident_type, severity, message, details, resolved, timestamp)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(model_id)
        .bind(incident_type.to_string())
        .bind(severity.to_string())
        .bind(message)
        .bind(&details_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to append incident")?;

        Ok(Incident {
            id: result.last_insert_rowid(),
            model_id,
            incident_type,
            severity,
            message: message.to_string(),
            details,
            resolved: false,
            timestamp: now,
        })
    }

    pub async fn list_incidents(&self, model_id: Option<i64>, limit: i64) -> Result<Vec<Incident>> {
        let rows = match model_id {
            Some(model_id) => {
                sqlx::query(
                    "SELECT * FROM incidents WHERE model_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
                )
                .bind(model_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM incidents ORDER BY timestamp DESC, id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::map_incident).collect()
    }

    pub async fn incidents_of_type(
        &self,
        incident_type: IncidentType,
        limit: i64,
    ) -> Result<Vec<Incident>> {
        let rows = sqlx::query(
            "SELECT * FROM incidents WHERE incident_type = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(incident_type.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_incident).collect()
    }

    pub async fn resolve_incident(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE incidents SET resolved = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn map_incident(row: &SqliteRow) -> Result<Incident> {
        let details: String = row.try_get("details")?;
        Ok(Incident {
            id: row.try_get("id")?,
            model_id: row.try_get("model_id")?,
            incident_type: row.try_get::<String, _>("incident_type")?.parse()?,
            severity: row.try_get::<String, _>("severity")?.parse()?,
            message: row.try_get("message")?,
            details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
            resolved: row.try_get("resolved")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    // ------------------------------------------------------------------
    // Risk profiles
    // ------------------------------------------------------------------

    /// Seed the five system presets; safe to call on every startup.
    pub async fn seed_system_profiles(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        for (name, icon, description, params) in system_presets() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO risk_profiles
                    (name, icon, description, is_system, max_position_size_pct,
                     max_daily_loss_pct, max_daily_trades, max_open_positions,
                     min_cash_reserve_pct, max_drawdown_pct, created_at)
                VALUES (?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(icon)
            .bind(description)
            .bind(params.max_position_size_pct.to_string())
            .bind(params.max_daily_loss_pct.to_string())
            .bind(params.max_daily_trades)
            .bind(params.max_open_positions)
            .bind(params.min_cash_reserve_pct.to_string())
            .bind(params.max_drawdown_pct.to_string())
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to seed system profile")?;
        }
        Ok(())
    }

    pub async fn get_profile(&self, id: i64) -> Result<Option<RiskProfile>> {
        let row = sqlx::query("SELECT * FROM risk_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_profile).transpose()
    }

    pub async fn get_profile_by_name(&self, name: &str) -> Result<Option<RiskProfile>> {
        let row = sqlx::query("SELECT * FROM risk_profiles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_profile).transpose()
    }

    pub async fn list_profiles(&self) -> Result<Vec<RiskProfile>> {
        let rows = sqlx::query("SELECT * FROM risk_profiles ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_profile).collect()
    }

    pub async fn create_profile(
        &self,
        name: &str,
        icon: &str,
        description: &str,
        params: &ProfileParams,
    ) -> Result<RiskProfile> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO risk_profiles
                (name, icon, description, is_system, max_position_size_pct,
                 max_daily_loss_pct, max_daily_trades, max_open_positions,
                 min_cash_reserve_pct, max_drawdown_pct, created_at)
            VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(icon)
        .bind(description)
        .bind(params.max_position_size_pct.to_string())
        .bind(params.max_daily_loss_pct.to_string())
        .bind(params.max_daily_trades)
        .bind(params.max_open_positions)
        .bind(params.min_cash_reserve_pct.to_string())
        .bind(params.max_drawdown_pct.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create profile")?;

        Ok(RiskProfile {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            icon: icon.to_string(),
            description: description.to_string(),
            is_system: false,
            params: params.clone(),
            created_at: now,
        })
    }

    /// Delete a custom profile. System profiles are undeletable.
    pub async fn delete_profile(&self, id: i64) -> Result<()> {
        let profile = match self.get_profile(id).await? {
            Some(profile) => profile,
            None => return Err(ValidationError::UnknownProfile(id).into()),
        };
        if profile.is_system {
            return Err(ValidationError::SystemProfileImmutable(profile.name).into());
        }
        sqlx::query("DELETE FROM risk_profiles WHERE id = ? AND is_system = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn map_profile(row: &SqliteRow) -> Result<RiskProfile> {
        Ok(RiskProfile {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            icon: row.try_get("icon")?,
            description: row.try_get("description")?,
            is_system: row.try_get("is_system")?,
            params: ProfileParams {
                max_position_size_pct: dec_col(row, "max_position_size_pct")?,
                max_daily_loss_pct: dec_col(row, "max_daily_loss_pct")?,
                max_daily_trades: row.try_get("max_daily_trades")?,
                max_open_positions: row.try_get("max_open_positions")?,
                min_cash_reserve_pct: dec_col(row, "min_cash_reserve_pct")?,
                max_drawdown_pct: dec_col(row, "max_drawdown_pct")?,
            },
            created_at: row.try_get("created_at")?,
        })
    }

    // ------------------------------------------------------------------
    // Profile sessions
    // ------------------------------------------------------------------

    pub async fn current_session(&self, model_id: i64) -> Result<Option<ProfileSession>> {
        let row = sqlx::query(
            "SELECT * FROM profile_sessions WHERE model_id = ? AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        )
        .bind(model_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_session).transpose()
    }

    pub async fn list_sessions(&self, model_id: i64) -> Result<Vec<ProfileSession>> {
        let rows = sqlx::query(
            "SELECT * FROM profile_sessions WHERE model_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_session).collect()
    }

    fn map_session(row: &SqliteRow) -> Result<ProfileSession> {
        Ok(ProfileSession {
            id: row.try_get("id")?,
            model_id: row.try_get("model_id")?,
            profile_id: row.try_get("profile_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            trades_executed: row.try_get("trades_executed")?,
            wins: row.try_get("wins")?,
            losses: row.try_get("losses")?,
            total_pnl: dec_col(row, "total_pnl")?,
            max_drawdown_pct: dec_col(row, "max_drawdown_pct")?,
        })
    }

    /// Atomically close any open session (computing its aggregates from the
    /// trades in its window), overwrite the preset-owned settings fields, and
    /// open a new session for `profile`.
    pub async fn apply_profile(
        &self,
        model_id: i64,
        profile: &RiskProfile,
        now: i64,
    ) -> Result<(Option<ProfileSession>, ProfileSession)> {
        let model = self.get_model(model_id).await?;
        let open = self.current_session(model_id).await?;

        let closed = match &open {
            Some(session) => {
                let trades = self.trades_between(model_id, session.started_at, now).await?;
                let aggregates = session_aggregates(&trades, model.initial_capital);
                Some((session.id, aggregates))
            }
            None => None,
        };

        let mut settings = self.get_settings(model_id).await?;
        settings.apply_params(&profile.params);
        settings.active_profile_id = Some(profile.id);

        let mut tx = self.pool.begin().await?;

        if let Some((session_id, agg)) = &closed {
            sqlx::query(
                r#"
                UPDATE profile_sessions SET ended_at = ?, trades_executed = ?, wins = ?,
                    losses = ?, total_pnl = ?, max_drawdown_pct = ?
                WHERE id = ? AND ended_at IS NULL
                "#,
            )
            .bind(now)
            .bind(agg.trades_executed)
            .bind(agg.wins)
            .bind(agg.losses)
            .bind(agg.total_pnl.to_string())
            .bind(agg.max_drawdown_pct.to_string())
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE model_settings SET
                max_position_size_pct = ?, max_daily_loss_pct = ?, max_daily_trades = ?,
                max_open_positions = ?, min_cash_reserve_pct = ?, max_drawdown_pct = ?,
                active_profile_id = ?
            WHERE model_id = ?
            "#,
        )
        .bind(settings.max_position_size_pct.to_string())
        .bind(settings.max_daily_loss_pct.to_string())
        .bind(settings.max_daily_trades)
        .bind(settings.max_open_positions)
        .bind(settings.min_cash_reserve_pct.to_string())
        .bind(settings.max_drawdown_pct.to_string())
        .bind(profile.id)
        .bind(model_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT INTO profile_sessions (model_id, profile_id, started_at) VALUES (?, ?, ?)",
        )
        .bind(model_id)
        .bind(profile.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let new_session_id = result.last_insert_rowid();

        tx.commit().await.context("Failed to commit profile apply")?;

        let closed_session = match open {
            Some(session) => Some(
                self.get_session(session.id)
                    .await?
                    .context("Closed session vanished")?,
            ),
            None => None,
        };
        let new_session = self
            .get_session(new_session_id)
            .await?
            .context("New session vanished")?;

        Ok((closed_session, new_session))
    }

    async fn get_session(&self, id: i64) -> Result<Option<ProfileSession>> {
        let row = sqlx::query("SELECT * FROM profile_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_session).transpose()
    }

    // ------------------------------------------------------------------
    // Providers and exchange credentials
    // ------------------------------------------------------------------

    pub async fn create_provider(
        &self,
        name: &str,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO providers (name, base_url, api_key, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(base_url)
        .bind(api_key)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create provider")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_provider(&self, id: i64) -> Result<Option<(String, String, Option<String>)>> {
        let row = sqlx::query("SELECT name, base_url, api_key FROM providers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((
                row.try_get("name")?,
                row.try_get("base_url")?,
                row.try_get("api_key")?,
            ))),
            None => Ok(None),
        }
    }

    pub async fn set_credentials(
        &self,
        model_id: i64,
        environment: ExchangeEnvironment,
        api_key: &str,
        api_secret: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchange_credentials (model_id, environment, api_key, api_secret, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (model_id, environment) DO UPDATE SET
                api_key = excluded.api_key,
                api_secret = excluded.api_secret,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(model_id)
        .bind(environment.to_string())
        .bind(api_key)
        .bind(api_secret)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to store credentials")?;
        Ok(())
    }

    /// Returns (api_key, api_secret, updated_at); `updated_at` drives client
    /// cache invalidation in the registry.
    pub async fn get_credentials(
        &self,
        model_id: i64,
        environment: ExchangeEnvironment,
    ) -> Result<Option<(String, String, i64)>> {
        let row = sqlx::query(
            "SELECT api_key, api_secret, updated_at FROM exchange_credentials WHERE model_id = ? AND environment = ?",
        )
        .bind(model_id)
        .bind(environment.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some((
                row.try_get("api_key")?,
                row.try_get("api_secret")?,
                row.try_get("updated_at")?,
            ))),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // App state
    // ------------------------------------------------------------------

    pub async fn scheduler_enabled(&self) -> Result<bool> {
        let row = sqlx::query("SELECT value FROM app_state WHERE key = ?")
            .bind(SCHEDULER_ENABLED_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<String, _>("value")? == "1"),
            None => Ok(true),
        }
    }

    pub async fn set_scheduler_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_state (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(SCHEDULER_ENABLED_KEY)
        .bind(if enabled { "1" } else { "0" })
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Realized pnl and cash delta for closing `quantity` of a position.
fn close_deltas(
    side: PositionSide,
    avg_entry: Decimal,
    exit_price: Decimal,
    quantity: Decimal,
    fee: Decimal,
) -> (Decimal, Decimal) {
    match side {
        PositionSide::Long => {
            let realized = (exit_price - avg_entry) * quantity - fee;
            // Return of cost basis plus net pnl == exit proceeds minus fee.
            (realized, exit_price * quantity - fee)
        }
        PositionSide::Short => {
            let realized = (avg_entry - exit_price) * quantity - fee;
            // Proceeds were credited at open; buying back costs exit notional.
            (realized, -(exit_price * quantity) - fee)
        }
    }
}

/// Aggregates for a closing profile session.
#[derive(Debug, Clone)]
pub struct SessionAggregates {
    pub trades_executed: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_pnl: Decimal,
    pub max_drawdown_pct: Decimal,
}

/// Compute session aggregates from the trades inside its window. Drawdown is
/// peak-to-trough of cumulative realized pnl, expressed against the model's
/// initial capital.
pub fn session_aggregates(trades: &[Trade], initial_capital: Decimal) -> SessionAggregates {
    let mut wins = 0;
    let mut losses = 0;
    let mut total_pnl = Decimal::ZERO;
    let mut cumulative = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = Decimal::ZERO;

    for trade in trades {
        if trade.is_close() {
            if trade.realized_pnl > Decimal::ZERO {
                wins += 1;
            } else if trade.realized_pnl < Decimal::ZERO {
                losses += 1;
            }
            total_pnl += trade.realized_pnl;
            cumulative += trade.realized_pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let drawdown = peak - cumulative;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }

    let max_drawdown_pct = if initial_capital > Decimal::ZERO {
        max_drawdown / initial_capital * Decimal::from(100)
    } else {
        Decimal::ZERO
    };

    SessionAggregates {
        trades_executed: trades.len() as i64,
        wins,
        losses,
        total_pnl,
        max_drawdown_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn close_trade(pnl: Decimal, ts: i64) -> Trade {
        Trade {
            id: 0,
            model_id: 1,
            coin: "BTC".to_string(),
            side: TradeSide::Close,
            quantity: dec!(0.01),
            price: dec!(40000),
            fee: dec!(0.4),
            realized_pnl: pnl,
            timestamp: ts,
            exchange_order_id: None,
        }
    }

    #[test]
    fn test_close_deltas_long() {
        // Long 0.02 @ 40000 closed at 41000 with $0.82 fee.
        let (realized, cash_delta) =
            close_deltas(PositionSide::Long, dec!(40000), dec!(41000), dec!(0.02), dec!(0.82));
        assert_eq!(realized, dec!(19.18));
        // Exit proceeds 820 minus fee.
        assert_eq!(cash_delta, dec!(819.18));
    }

    #[test]
    fn test_close_deltas_short() {
        let (realized, cash_delta) =
            close_deltas(PositionSide::Short, dec!(2000), dec!(1900), dec!(1), dec!(1.9));
        assert_eq!(realized, dec!(98.1));
        assert_eq!(cash_delta, dec!(-1901.9));
    }

    #[test]
    fn test_session_aggregates() {
        let trades = vec![
            close_trade(dec!(50), 10),
            close_trade(dec!(-120), 20),
            close_trade(dec!(30), 30),
            close_trade(dec!(10), 40),
        ];
        let agg = session_aggregates(&trades, dec!(10000));
        assert_eq!(agg.trades_executed, 4);
        assert_eq!(agg.wins, 3);
        assert_eq!(agg.losses, 1);
        assert_eq!(agg.total_pnl, dec!(-30));
        // Peak 50, trough -70 -> drawdown 120 == 1.2% of 10k.
        assert_eq!(agg.max_drawdown_pct, dec!(1.2));
    }

    #[test]
    fn test_utc_day_start() {
        // 2024-01-15T13:45:00Z -> 2024-01-15T00:00:00Z
        let ts = 1705326300;
        assert_eq!(utc_day_start(ts), 1705276800);
    }
}
