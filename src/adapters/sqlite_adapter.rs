//! SQLite data adapter over the `daily_data` table.
//!
//! Price columns are nullable in the stored schema; a NULL is read as NaN so
//! bar validation rejects that symbol instead of the whole query failing.

use crate::domain::error::ScreenerError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn pool_error(e: r2d2::Error) -> ScreenerError {
    ScreenerError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> ScreenerError {
    ScreenerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, ScreenerError> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(pool_error)?;
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, ScreenerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, ScreenerError> {
        self.pool.get().map_err(pool_error)
    }

    pub fn initialize_schema(&self) -> Result<(), ScreenerError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS daily_data (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    code TEXT NOT NULL,
                    date TEXT NOT NULL,
                    open REAL,
                    high REAL,
                    low REAL,
                    close REAL,
                    volume REAL,
                    UNIQUE(code, date)
                );
                CREATE INDEX IF NOT EXISTS idx_daily_data_code_date ON daily_data(code, date);",
            )
            .map_err(query_error)
    }

    pub fn insert_bars(&self, code: &str, bars: &[OhlcvBar]) -> Result<(), ScreenerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO daily_data (code, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    code,
                    bar.date.format(DATE_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_ohlcv(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, ScreenerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, open, high, low, close, volume
                 FROM daily_data
                 WHERE code = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map(
                params![
                    code,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    let date_str: String = row.get(0)?;
                    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    let price = |i: usize| -> rusqlite::Result<f64> {
                        Ok(row.get::<_, Option<f64>>(i)?.unwrap_or(f64::NAN))
                    };
                    Ok(OhlcvBar {
                        date,
                        open: price(1)?,
                        high: price(2)?,
                        low: price(3)?,
                        close: price(4)?,
                        volume: price(5)?,
                    })
                },
            )
            .map_err(query_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ScreenerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT code FROM daily_data ORDER BY code")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::validate_bars;

    fn bar(day: u32, close: f64) -> OhlcvBar {
        OhlcvBar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0 * day as f64,
        }
    }

    fn seeded() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
            .insert_bars("600000", &[bar(3, 12.0), bar(1, 10.0), bar(2, 11.0)])
            .unwrap();
        adapter.insert_bars("000001", &[bar(1, 20.0)]).unwrap();
        adapter
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn fetch_ohlcv_orders_by_date() {
        let adapter = seeded();
        let bars = adapter.fetch_ohlcv("600000", day(1), day(31)).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, day(1));
        assert_eq!(bars[2].close, 12.0);
        assert_eq!(bars[1].volume, 2000.0);
    }

    #[test]
    fn fetch_ohlcv_respects_range() {
        let adapter = seeded();
        let bars = adapter.fetch_ohlcv("600000", day(2), day(2)).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, day(2));
    }

    #[test]
    fn unknown_code_is_empty() {
        let adapter = seeded();
        assert!(adapter.fetch_ohlcv("999999", day(1), day(31)).unwrap().is_empty());
    }

    #[test]
    fn null_price_fails_validation() {
        let adapter = seeded();
        adapter
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO daily_data (code, date, open, high, low, close, volume)
                 VALUES ('300750', '2024-01-01', 1.0, 1.0, 1.0, NULL, 10.0)",
                [],
            )
            .unwrap();
        let bars = adapter.fetch_ohlcv("300750", day(1), day(31)).unwrap();
        assert!(bars[0].close.is_nan());
        assert!(validate_bars(&bars).is_err());
    }

    #[test]
    fn list_symbols_distinct_sorted() {
        let adapter = seeded();
        assert_eq!(adapter.list_symbols().unwrap(), vec!["000001", "600000"]);
    }
}
