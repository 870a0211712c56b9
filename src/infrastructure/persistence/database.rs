use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper owning the SQLite pool.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                provider_id INTEGER,
                ai_model TEXT NOT NULL,
                initial_capital TEXT NOT NULL,
                cash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                trading_environment TEXT NOT NULL DEFAULT 'simulation',
                automation_level TEXT NOT NULL DEFAULT 'manual',
                exchange_environment TEXT NOT NULL DEFAULT 'testnet',
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create models table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_settings (
                model_id INTEGER PRIMARY KEY REFERENCES models(id),
                max_position_size_pct TEXT NOT NULL,
                max_daily_loss_pct TEXT NOT NULL,
                max_daily_trades INTEGER NOT NULL,
                max_open_positions INTEGER NOT NULL,
                min_cash_reserve_pct TEXT NOT NULL,
                max_drawdown_pct TEXT NOT NULL,
                trading_interval_minutes INTEGER NOT NULL,
                fee_rate TEXT NOT NULL,
                auto_pause_enabled BOOLEAN NOT NULL DEFAULT 1,
                auto_pause_consecutive_losses INTEGER NOT NULL,
                auto_pause_win_rate_threshold TEXT NOT NULL,
                ai_temperature REAL NOT NULL,
                notify_on_trade BOOLEAN NOT NULL DEFAULT 0,
                active_profile_id INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create model_settings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_profiles (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                icon TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                is_system BOOLEAN NOT NULL DEFAULT 0,
                max_position_size_pct TEXT NOT NULL,
                max_daily_loss_pct TEXT NOT NULL,
                max_daily_trades INTEGER NOT NULL,
                max_open_positions INTEGER NOT NULL,
                min_cash_reserve_pct TEXT NOT NULL,
                max_drawdown_pct TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_profiles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profile_sessions (
                id INTEGER PRIMARY KEY,
                model_id INTEGER NOT NULL REFERENCES models(id),
                profile_id INTEGER NOT NULL REFERENCES risk_profiles(id),
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                trades_executed INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                total_pnl TEXT NOT NULL DEFAULT '0',
                max_drawdown_pct TEXT NOT NULL DEFAULT '0'
            );
            CREATE INDEX IF NOT EXISTS idx_profile_sessions_model
            ON profile_sessions (model_id, started_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create profile_sessions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY,
                model_id INTEGER NOT NULL REFERENCES models(id),
                coin TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                fee TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                exchange_order_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_model_time
            ON trades (model_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_trades_model_coin
            ON trades (model_id, coin);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                model_id INTEGER NOT NULL REFERENCES models(id),
                coin TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                avg_entry_price TEXT NOT NULL,
                stop_loss TEXT,
                take_profit TEXT,
                opened_at INTEGER NOT NULL,
                UNIQUE (model_id, coin, side)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_decisions (
                id INTEGER PRIMARY KEY,
                model_id INTEGER NOT NULL REFERENCES models(id),
                coin TEXT NOT NULL,
                decision_json TEXT NOT NULL,
                explanation TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                resolved_at INTEGER,
                resolution_note TEXT,
                resolved_quantity TEXT,
                resolved_leverage TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_unique_open
            ON pending_decisions (model_id, coin) WHERE status = 'pending';
            CREATE INDEX IF NOT EXISTS idx_pending_status
            ON pending_decisions (status, expires_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create pending_decisions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY,
                model_id INTEGER,
                incident_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                resolved BOOLEAN NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_model_time
            ON incidents (model_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_incidents_type_time
            ON incidents (incident_type, timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create incidents table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS providers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                base_url TEXT NOT NULL,
                api_key TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create providers table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_credentials (
                model_id INTEGER NOT NULL REFERENCES models(id),
                environment TEXT NOT NULL,
                api_key TEXT NOT NULL,
                api_secret TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (model_id, environment)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create exchange_credentials table")?;

        // Per-model daily baseline and high-water mark
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_state (
                model_id INTEGER PRIMARY KEY REFERENCES models(id),
                day_start_value TEXT NOT NULL,
                value_high_water_mark TEXT NOT NULL,
                reference_date TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create app_state table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
