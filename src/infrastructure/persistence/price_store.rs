use crate::domain::observation::{Metadata, PriceObservation};
use crate::domain::repositories::{BulkInsertSummary, Coverage, Instrument, PriceStore, StoreStats};
use crate::domain::symbol::{SymbolClass, SymbolId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Intraday rows are bucketed to this width
pub const INTRADAY_INTERVAL_MINUTES: i64 = 5;

const INTRADAY_TABLE: &str = "intraday_prices";

pub struct SqlitePriceStore {
    pool: SqlitePool,
}

impl SqlitePriceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn table_for(class: SymbolClass) -> &'static str {
        match class {
            SymbolClass::Equity => "daily_prices",
            SymbolClass::Crypto => "crypto_prices",
        }
    }

    async fn write<'e, E>(executor: E, table: &str, obs: &PriceObservation) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let metadata = serde_json::to_string(obs.metadata())?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (symbol, market_timestamp, open, high, low, close, volume, source, metadata, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, market_timestamp) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                source = excluded.source,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#
        ))
        .bind(obs.symbol())
        .bind(obs.timestamp().timestamp_millis())
        .bind(obs.open().map(|d| d.to_string()))
        .bind(obs.high().map(|d| d.to_string()))
        .bind(obs.low().map(|d| d.to_string()))
        .bind(obs.close().to_string())
        .bind(obs.volume().map(|d| d.to_string()))
        .bind(obs.source())
        .bind(metadata)
        .bind(Utc::now().timestamp_millis())
        .execute(executor)
        .await
        .with_context(|| format!("Failed to upsert {} into {}", obs.symbol(), table))?;
        Ok(())
    }

    fn bucket_millis(timestamp: DateTime<Utc>) -> i64 {
        let width = INTRADAY_INTERVAL_MINUTES * 60_000;
        timestamp.timestamp_millis().div_euclid(width) * width
    }

    fn decimal_column(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
        let raw: Option<String> = row.try_get(column)?;
        raw.map(|s| {
            Decimal::from_str(&s).with_context(|| format!("Invalid decimal in {}: {}", column, s))
        })
        .transpose()
    }

    fn map_row(row: &SqliteRow) -> Result<PriceObservation> {
        let symbol: String = row.try_get("symbol")?;
        let millis: i64 = row.try_get("market_timestamp")?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .with_context(|| format!("Invalid timestamp {} for {}", millis, symbol))?;
        let close = Self::decimal_column(row, "close")?
            .with_context(|| format!("Missing close for {}", symbol))?;
        let source: String = row.try_get("source")?;
        let metadata_json: String = row.try_get("metadata")?;
        let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        // Rows were validated on write; their age is checked against their own instant
        // so old history stays readable.
        let obs = PriceObservation::builder(&symbol, close, timestamp, &source)
            .open(Self::decimal_column(row, "open")?)
            .high(Self::decimal_column(row, "high")?)
            .low(Self::decimal_column(row, "low")?)
            .volume(Self::decimal_column(row, "volume")?)
            .metadata(metadata)
            .build_at(timestamp)?;
        Ok(obs)
    }

    async fn count_table(&self, table: &str) -> Result<u64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", table))?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl PriceStore for SqlitePriceStore {
    async fn upsert(&self, observation: &PriceObservation) -> Result<()> {
        let table = Self::table_for(observation.class());
        Self::write(&self.pool, table, observation).await?;
        debug!(
            symbol = observation.symbol(),
            source = observation.source(),
            "PriceStore: upserted into {}",
            table
        );
        Ok(())
    }

    async fn upsert_intraday(&self, observation: &PriceObservation) -> Result<()> {
        let metadata = serde_json::to_string(observation.metadata())?;
        sqlx::query(
            r#"
            INSERT INTO intraday_prices (symbol, market_timestamp, interval_minutes, open, high, low, close, volume, source, metadata, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, market_timestamp, interval_minutes) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                source = excluded.source,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(observation.symbol())
        .bind(Self::bucket_millis(observation.timestamp()))
        .bind(INTRADAY_INTERVAL_MINUTES)
        .bind(observation.open().map(|d| d.to_string()))
        .bind(observation.high().map(|d| d.to_string()))
        .bind(observation.low().map(|d| d.to_string()))
        .bind(observation.close().to_string())
        .bind(observation.volume().map(|d| d.to_string()))
        .bind(observation.source())
        .bind(metadata)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert {} into {}", observation.symbol(), INTRADAY_TABLE))?;
        Ok(())
    }

    async fn coverage(&self, symbol: &str) -> Result<Coverage> {
        let id = SymbolId::parse(symbol);
        let table = Self::table_for(id.class());
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n, MIN(market_timestamp) AS earliest, MAX(market_timestamp) AS latest FROM {table} WHERE symbol = ?"
        ))
        .bind(id.canonical())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to read coverage for {}", id))?;

        let rows: i64 = row.try_get("n")?;
        let earliest: Option<i64> = row.try_get("earliest")?;
        let latest: Option<i64> = row.try_get("latest")?;

        Ok(Coverage {
            rows: rows.max(0) as u64,
            earliest: earliest.and_then(DateTime::from_timestamp_millis),
            latest: latest.and_then(DateTime::from_timestamp_millis),
        })
    }

    async fn bulk_insert(
        &self,
        symbol: &str,
        observations: &[PriceObservation],
    ) -> Result<BulkInsertSummary> {
        let id = SymbolId::parse(symbol);
        let table = Self::table_for(id.class());
        let mut summary = BulkInsertSummary::default();
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin bulk insert transaction")?;

        for obs in observations {
            if obs.symbol() != id.canonical() {
                summary.skipped += 1;
                summary
                    .errors
                    .push(format!("{}: does not belong to {}", obs.symbol(), id));
                continue;
            }
            if let Err(e) = obs.validate_at(now) {
                summary.skipped += 1;
                summary.errors.push(e.to_string());
                continue;
            }
            match Self::write(&mut *tx, table, obs).await {
                Ok(()) => summary.stored += 1,
                Err(e) => {
                    summary.skipped += 1;
                    summary.errors.push(format!("{:#}", e));
                }
            }
        }

        tx.commit()
            .await
            .context("Failed to commit bulk insert transaction")?;

        info!(
            symbol = id.canonical(),
            stored = summary.stored,
            skipped = summary.skipped,
            "PriceStore: bulk insert into {} complete",
            table
        );
        Ok(summary)
    }

    async fn find(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        let id = SymbolId::parse(symbol);
        let table = Self::table_for(id.class());
        let row = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE symbol = ? AND market_timestamp = ?"
        ))
        .bind(id.canonical())
        .bind(timestamp.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn latest(&self, symbol: &str) -> Result<Option<PriceObservation>> {
        let id = SymbolId::parse(symbol);
        let table = Self::table_for(id.class());
        let row = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE symbol = ? ORDER BY market_timestamp DESC LIMIT 1"
        ))
        .bind(id.canonical())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn count(&self, symbol: &str) -> Result<u64> {
        Ok(self.coverage(symbol).await?.rows)
    }

    async fn upsert_instrument(&self, symbol: &str, class: SymbolClass) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instruments (symbol, class, added_at)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET class = excluded.class
            "#,
        )
        .bind(symbol)
        .bind(class.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist instrument {}", symbol))?;
        Ok(())
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = sqlx::query("SELECT symbol, class, added_at FROM instruments ORDER BY symbol")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list instruments")?;

        let mut instruments = Vec::with_capacity(rows.len());
        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            let class_str: String = row.try_get("class")?;
            let added_at: i64 = row.try_get("added_at")?;
            let class = match class_str.as_str() {
                "CRYPTO" => SymbolClass::Crypto,
                _ => SymbolClass::Equity,
            };
            instruments.push(Instrument {
                symbol,
                class,
                added_at: DateTime::from_timestamp_millis(added_at).unwrap_or_default(),
            });
        }
        Ok(instruments)
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            instruments: self.count_table("instruments").await?,
            daily_prices: self.count_table("daily_prices").await?,
            intraday_prices: self.count_table(INTRADAY_TABLE).await?,
            crypto_prices: self.count_table("crypto_prices").await?,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    async fn store() -> SqlitePriceStore {
        let db = Database::in_memory().await.unwrap();
        SqlitePriceStore::new(db.pool)
    }

    fn obs(symbol: &str, close: Decimal, ts: DateTime<Utc>) -> PriceObservation {
        PriceObservation::builder(symbol, close, ts, "yahoo")
            .high(Some(close + dec!(1)))
            .low(Some(close - dec!(1)))
            .volume(Some(dec!(1000)))
            .meta("interval", "1d")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = store().await;
        // Stored at millisecond precision
        let ts = DateTime::from_timestamp_millis((Utc::now() - Duration::hours(1)).timestamp_millis())
            .unwrap();
        let o = obs("AAPL", dec!(190.25), ts);

        store.upsert(&o).await.unwrap();
        store.upsert(&o).await.unwrap();

        assert_eq!(store.count("AAPL").await.unwrap(), 1);
        assert_eq!(store.find("AAPL", ts).await.unwrap(), Some(o));
    }

    #[tokio::test]
    async fn test_second_write_replaces_fields() {
        let store = store().await;
        let ts = Utc::now() - Duration::hours(1);
        store.upsert(&obs("SPY", dec!(500), ts)).await.unwrap();
        store.upsert(&obs("SPY", dec!(502.5), ts)).await.unwrap();

        let latest = store.latest("SPY").await.unwrap().unwrap();
        assert_eq!(latest.close(), dec!(502.5));
        assert_eq!(store.count("SPY").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_crypto_routes_to_crypto_partition() {
        let store = store().await;
        store
            .upsert(&obs("btc-usd", dec!(65000), Utc::now()))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.crypto_prices, 1);
        assert_eq!(stats.daily_prices, 0);
        assert_eq!(store.count("BTC/USD").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_intraday_buckets_to_five_minutes() {
        let store = store().await;
        let base = Utc.with_ymd_and_hms(2024, 3, 13, 15, 0, 0).unwrap();
        for offset in [0, 61, 179, 299] {
            let o = obs("QQQ", dec!(440), base + Duration::seconds(offset));
            store.upsert_intraday(&o).await.unwrap();
        }
        store
            .upsert_intraday(&obs("QQQ", dec!(441), base + Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(store.stats().await.unwrap().intraday_prices, 2);
    }

    #[tokio::test]
    async fn test_bulk_insert_skips_invalid_records() {
        let store = store().await;
        let now = Utc::now();
        let mut batch: Vec<_> = (1..=5)
            .map(|d| obs("IWM", dec!(200), now - Duration::days(d)))
            .collect();
        // Valid on its own, but far outside the accepted window today
        let ancient = PriceObservation::builder("IWM", dec!(1), now - Duration::days(3000), "yahoo")
            .build_at(now - Duration::days(3000))
            .unwrap();
        batch.push(ancient);
        batch.push(obs("SPY", dec!(500), now));

        let summary = store.bulk_insert("IWM", &batch).await.unwrap();
        assert_eq!(summary.stored, 5);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(store.count("IWM").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_coverage_and_backfill_need() {
        let store = store().await;
        assert!(store.needs_backfill("AAPL", 90).await.unwrap());

        let now = Utc::now();
        let batch: Vec<_> = (0..100)
            .map(|d| obs("AAPL", dec!(180), now - Duration::days(d)))
            .collect();
        store.bulk_insert("AAPL", &batch).await.unwrap();

        let coverage = store.coverage("AAPL").await.unwrap();
        assert_eq!(coverage.rows, 100);
        assert_eq!(coverage.span_days(), 99);
        assert!(!store.needs_backfill("AAPL", 90).await.unwrap());
    }

    #[tokio::test]
    async fn test_instruments_roundtrip() {
        let store = store().await;
        store
            .upsert_instrument("ETH/USD", SymbolClass::Crypto)
            .await
            .unwrap();
        store
            .upsert_instrument("AAPL", SymbolClass::Equity)
            .await
            .unwrap();
        store
            .upsert_instrument("AAPL", SymbolClass::Equity)
            .await
            .unwrap();

        let instruments = store.list_instruments().await.unwrap();
        assert_eq!(instruments.len(), 2);
        assert_eq!(instruments[0].symbol, "AAPL");
        assert_eq!(instruments[1].class, SymbolClass::Crypto);
        assert!(store.ping().await.is_ok());
    }
}
