use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite pool wrapper
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
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("Invalid database URL: {}", db_url))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Database: connected to {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection that never idles out keeps
    /// the schema and rows alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
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

        // 1. Tracked instruments
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                symbol TEXT PRIMARY KEY,
                class TEXT NOT NULL,
                added_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create instruments table")?;

        // 2. Daily equity prices and crypto prices share one layout
        for table in ["daily_prices", "crypto_prices"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    symbol TEXT NOT NULL,
                    market_timestamp INTEGER NOT NULL,
                    open TEXT,
                    high TEXT,
                    low TEXT,
                    close TEXT NOT NULL,
                    volume TEXT,
                    source TEXT NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{{}}',
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (symbol, market_timestamp)
                );
                "#
            ))
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create {} table", table))?;
        }

        // 3. Intraday equity bars
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intraday_prices (
                symbol TEXT NOT NULL,
                market_timestamp INTEGER NOT NULL,
                interval_minutes INTEGER NOT NULL,
                open TEXT,
                high TEXT,
                low TEXT,
                close TEXT NOT NULL,
                volume TEXT,
                source TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (symbol, market_timestamp, interval_minutes)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create intraday_prices table")?;

        info!("Database: schema initialized");
        Ok(())
    }
}
