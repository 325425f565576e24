use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::forecast::ForecastRow;
use crate::indicators::TickerAnalysis;
use crate::models::{parse_utc_timestamp, AccountSummary, BrokerPosition, ProposedAction};
use crate::Result;

/// Every journal table
pub const TABLES: [&str; 11] = [
    "account_snapshots",
    "open_positions",
    "ai_contexts",
    "indicators_contexts",
    "news_contexts",
    "sentiment_contexts",
    "forecasts_contexts",
    "bot_operations",
    "real_positions",
    "trades_history",
    "errors",
];

/// Children before parents
pub const TRUNCATE_ORDER: [&str; 11] = [
    "trades_history",
    "real_positions",
    "errors",
    "bot_operations",
    "forecasts_contexts",
    "sentiment_contexts",
    "news_contexts",
    "indicators_contexts",
    "ai_contexts",
    "open_positions",
    "account_snapshots",
];

fn dec(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
}

fn dec_opt(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64)
}

fn to_f64(value: Option<Decimal>) -> f64 {
    value.and_then(|d| d.to_f64()).unwrap_or(0.0)
}

fn known_table(table: &str) -> Result<&'static str> {
    TABLES
        .iter()
        .find(|t| **t == table)
        .copied()
        .ok_or_else(|| format!("unknown table {}", table).into())
}

/// Everything journaled for one decision cycle
pub struct OperationLog<'a> {
    pub action: &'a ProposedAction,
    pub system_prompt: &'a str,
    pub indicators: &'a [TickerAnalysis],
    pub forecasts: &'a [ForecastRow],
    pub execution_status: Option<&'a str>,
}

/// Row for the `errors` table
#[derive(Debug, Clone)]
pub struct ErrorLog {
    pub error_type: String,
    pub message: String,
    pub details: Option<String>,
    pub context: Value,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Closed-trade statistics for one day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyPerformance {
    pub day: NaiveDate,
    pub trades: i64,
    pub total_pnl: f64,
    pub wins: i64,
    pub losses: i64,
}

impl DailyPerformance {
    pub fn win_rate(&self) -> f64 {
        if self.trades > 0 {
            self.wins as f64 / self.trades as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationCount {
    pub day: NaiveDate,
    pub operation: String,
    pub count: i64,
}

/// Mean gap in minutes between consecutive timestamps (sorted ascending)
pub fn average_interval_minutes(times: &[DateTime<Utc>]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }
    let total: f64 = times
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64 / 60.0)
        .sum();
    Some(total / (times.len() - 1) as f64)
}

/// Postgres trading journal
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Connect to Postgres and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Connect without running migrations (maintenance tools)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Save an account snapshot with its open positions; returns the snapshot id
    pub async fn log_account_status(&self, summary: &AccountSummary) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let account = &summary.account;

        let row = sqlx::query(
            r#"
            INSERT INTO account_snapshots (
                balance_usd, equity_usd, pnl_usd, available_usd,
                currency, account_name, raw_payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(dec(account.balance))
        .bind(dec(account.equity))
        .bind(dec(account.pnl))
        .bind(dec(account.available))
        .bind(&account.currency)
        .bind(&account.account_name)
        .bind(serde_json::to_value(summary)?)
        .fetch_one(&mut *tx)
        .await?;
        let snapshot_id: i64 = row.get("id");

        for pos in &summary.positions {
            sqlx::query(
                r#"
                INSERT INTO open_positions (
                    snapshot_id, deal_id, symbol, side, size, entry_price,
                    mark_price, pnl_usd, leverage, opened_at, raw_payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(snapshot_id)
            .bind(&pos.deal_id)
            .bind(&pos.epic)
            .bind(pos.side().as_str())
            .bind(dec(pos.size))
            .bind(dec(pos.entry_price))
            .bind(dec_opt(pos.mark_price))
            .bind(dec(pos.upl))
            .bind(dec_opt(pos.leverage))
            .bind(pos.created_at.as_deref().and_then(parse_utc_timestamp))
            .bind(serde_json::to_value(pos)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Saved account snapshot {} with {} positions",
            snapshot_id,
            summary.positions.len()
        );
        Ok(snapshot_id)
    }

    /// Mirror the broker's open positions; rows for closed deals are removed
    pub async fn sync_real_positions(&self, positions: &[BrokerPosition]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let deal_ids: Vec<String> = positions.iter().map(|p| p.deal_id.clone()).collect();

        sqlx::query("DELETE FROM real_positions WHERE NOT (deal_id = ANY($1))")
            .bind(&deal_ids)
            .execute(&mut *tx)
            .await?;

        for pos in positions {
            sqlx::query(
                r#"
                INSERT INTO real_positions (
                    deal_id, symbol, side, size, entry_price, mark_price,
                    pnl_usd, pnl_pct, leverage, stop_level, profit_level,
                    opened_at, raw_payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (deal_id) DO UPDATE SET
                    size = EXCLUDED.size,
                    mark_price = EXCLUDED.mark_price,
                    pnl_usd = EXCLUDED.pnl_usd,
                    pnl_pct = EXCLUDED.pnl_pct,
                    stop_level = EXCLUDED.stop_level,
                    profit_level = EXCLUDED.profit_level,
                    raw_payload = EXCLUDED.raw_payload,
                    updated_at = NOW()
                "#,
            )
            .bind(&pos.deal_id)
            .bind(&pos.epic)
            .bind(pos.side().as_str())
            .bind(dec(pos.size))
            .bind(dec(pos.entry_price))
            .bind(dec_opt(pos.mark_price))
            .bind(dec(pos.upl))
            .bind(dec_opt(pos.pnl_percent()))
            .bind(dec_opt(pos.leverage))
            .bind(dec_opt(pos.stop_level))
            .bind(dec_opt(pos.profit_level))
            .bind(pos.created_at.as_deref().and_then(parse_utc_timestamp))
            .bind(serde_json::to_value(pos)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(positions.len())
    }

    /// Save a decision with its prompt, indicators and forecasts; returns the operation id
    pub async fn log_bot_operation(&self, log: &OperationLog<'_>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("INSERT INTO ai_contexts (system_prompt) VALUES ($1) RETURNING id")
            .bind(log.system_prompt)
            .fetch_one(&mut *tx)
            .await?;
        let context_id: i64 = row.get("id");

        for analysis in log.indicators {
            sqlx::query(
                r#"
                INSERT INTO indicators_contexts (
                    context_id, ticker, price, ema20, macd, rsi_7, pivot_pp, raw
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(context_id)
            .bind(&analysis.ticker)
            .bind(dec(analysis.current.price))
            .bind(dec_opt(analysis.current.ema20))
            .bind(dec_opt(analysis.current.macd))
            .bind(dec_opt(analysis.current.rsi_7))
            .bind(dec(analysis.pivot_points.pp))
            .bind(serde_json::to_value(analysis)?)
            .execute(&mut *tx)
            .await?;
        }

        for fc in log.forecasts {
            sqlx::query(
                r#"
                INSERT INTO forecasts_contexts (
                    context_id, ticker, timeframe, last_price, prediction,
                    lower_bound, upper_bound, change_pct, forecast_timestamp, raw
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(context_id)
            .bind(&fc.ticker)
            .bind(&fc.timeframe)
            .bind(dec_opt(fc.last_price))
            .bind(dec_opt(fc.forecast))
            .bind(dec_opt(fc.lower))
            .bind(dec_opt(fc.upper))
            .bind(dec_opt(fc.change_pct))
            .bind(fc.forecast_time)
            .bind(serde_json::to_value(fc)?)
            .execute(&mut *tx)
            .await?;
        }

        let action = log.action;
        let row = sqlx::query(
            r#"
            INSERT INTO bot_operations (
                context_id, operation, symbol, direction,
                target_portion_of_balance, leverage, reason,
                execution_status, raw_payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(context_id)
        .bind(action.operation.as_str())
        .bind(&action.symbol)
        .bind(action.direction.as_str())
        .bind(dec(action.target_portion_of_balance))
        .bind(action.leverage as i32)
        .bind(&action.reason)
        .bind(log.execution_status)
        .bind(serde_json::to_value(action)?)
        .fetch_one(&mut *tx)
        .await?;
        let operation_id: i64 = row.get("id");

        tx.commit().await?;
        Ok(operation_id)
    }

    /// Record a position that was just closed
    pub async fn log_trade_close(&self, position: &BrokerPosition, reason: &str) -> Result<i64> {
        let opened_at = position.created_at.as_deref().and_then(parse_utc_timestamp);
        let duration_minutes =
            opened_at.map(|t| (Utc::now() - t).num_seconds() as f64 / 60.0);
        let exit_price = position.mark_price.unwrap_or(position.entry_price);

        let row = sqlx::query(
            r#"
            INSERT INTO trades_history (
                deal_id, symbol, side, size, entry_price, exit_price,
                pnl_usd, pnl_pct, opened_at, duration_minutes, close_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&position.deal_id)
        .bind(&position.epic)
        .bind(position.side().as_str())
        .bind(dec(position.size))
        .bind(dec(position.entry_price))
        .bind(dec(exit_price))
        .bind(dec(position.upl))
        .bind(dec_opt(position.pnl_percent()))
        .bind(opened_at)
        .bind(dec_opt(duration_minutes))
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    pub async fn log_error(&self, error: &ErrorLog) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO errors (error_type, error_message, details, context, source)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&error.error_type)
        .bind(&error.message)
        .bind(&error.details)
        .bind(&error.context)
        .bind(&error.source)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    // ---------- maintenance ----------

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let table = known_table(table)?;
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Row count per table; `None` when the table is missing
    pub async fn table_counts(&self) -> Vec<(&'static str, Option<i64>)> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            counts.push((table, self.count_rows(table).await.ok()));
        }
        counts
    }

    /// Truncate every journal table in FK-safe order; returns tables cleared
    pub async fn truncate_all(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut cleared = 0;

        for table in TRUNCATE_ORDER {
            sqlx::query(&format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", table))
                .execute(&mut *tx)
                .await?;
            tracing::info!("✅ {} cleared", table);
            cleared += 1;
        }

        tx.commit().await?;
        Ok(cleared)
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT table_name::TEXT AS table_name
            FROM information_schema.tables
            WHERE table_schema = 'public'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("table_name")).collect())
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::TEXT AS column_name,
                   data_type::TEXT AS data_type,
                   is_nullable::TEXT AS is_nullable
            FROM information_schema.columns
            WHERE table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ColumnInfo {
                name: r.get("column_name"),
                data_type: r.get("data_type"),
                nullable: r.get::<String, _>("is_nullable") == "YES",
            })
            .collect())
    }

    /// Closed trades per day over the last `days`, newest first
    pub async fn daily_performance(&self, days: i64) -> Result<Vec<DailyPerformance>> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let rows = sqlx::query(
            r#"
            SELECT DATE(closed_at) AS day,
                   COUNT(*) AS trades,
                   SUM(pnl_usd) AS total_pnl,
                   SUM(CASE WHEN pnl_usd > 0 THEN 1 ELSE 0 END) AS wins,
                   SUM(CASE WHEN pnl_usd < 0 THEN 1 ELSE 0 END) AS losses
            FROM trades_history
            WHERE closed_at >= $1
            GROUP BY DATE(closed_at)
            ORDER BY day DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DailyPerformance {
                day: r.get("day"),
                trades: r.get("trades"),
                total_pnl: to_f64(r.get("total_pnl")),
                wins: r.get::<Option<i64>, _>("wins").unwrap_or(0),
                losses: r.get::<Option<i64>, _>("losses").unwrap_or(0),
            })
            .collect())
    }

    /// Decisions per day and operation over the last `days`, holds included
    pub async fn operations_by_day(&self, days: i64) -> Result<Vec<OperationCount>> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let rows = sqlx::query(
            r#"
            SELECT DATE(created_at) AS day, operation, COUNT(*) AS cnt
            FROM bot_operations
            WHERE created_at >= $1
            GROUP BY DATE(created_at), operation
            ORDER BY day DESC, operation
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| OperationCount {
                day: r.get("day"),
                operation: r.get("operation"),
                count: r.get("cnt"),
            })
            .collect())
    }

    /// Decision timestamps over the last `hours`, oldest first
    pub async fn operation_timestamps(&self, hours: i64) -> Result<Vec<DateTime<Utc>>> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let rows = sqlx::query(
            "SELECT created_at FROM bot_operations WHERE created_at >= $1 ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("created_at")).collect())
    }
}
