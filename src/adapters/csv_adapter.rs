//! CSV file data adapter: one `{CODE}.csv` per symbol with a
//! `date,open,high,low,close,volume` header.

use crate::domain::error::ScreenerError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<CsvRow> for OhlcvBar {
    fn from(row: CsvRow) -> Self {
        OhlcvBar {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
    }
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, code: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", code))
    }
}

impl DataPort for CsvAdapter {
    fn fetch_ohlcv(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, ScreenerError> {
        let path = self.csv_path(code);
        let file = fs::File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ScreenerError::NoData {
                code: code.to_string(),
            },
            _ => ScreenerError::Database {
                reason: format!("failed to read {}: {}", path.display(), e),
            },
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file);
        let mut bars = Vec::new();

        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| ScreenerError::DatabaseQuery {
                reason: format!("{} row {}: {}", path.display(), line + 1, e),
            })?;
            if row.date < start_date || row.date > end_date {
                continue;
            }
            bars.push(OhlcvBar::from(row));
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ScreenerError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| ScreenerError::Database {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ScreenerError::Database {
                reason: format!("directory entry error: {}", e),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                symbols.push(stem.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "date,open,high,low,close,volume\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000.5\n\
            2024-01-16, 105.0 ,115.0,100.0,110.0,60000\n";

        fs::write(path.join("600000.csv"), csv_content).unwrap();
        fs::write(path.join("000001.csv"), "date,open,high,low,close,volume\n").unwrap();
        fs::write(path.join("notes.txt"), "ignored").unwrap();

        (dir, path)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn fetch_ohlcv_returns_sorted_bars() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_ohlcv("600000", day(1), day(31)).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, day(15));
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.5);
        assert_eq!(bars[1].open, 105.0);
        assert_eq!(bars[2].date, day(17));
    }

    #[test]
    fn fetch_ohlcv_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_ohlcv("600000", day(16), day(16)).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, day(16));
    }

    #[test]
    fn missing_file_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let err = adapter.fetch_ohlcv("XYZ", day(1), day(31)).unwrap_err();
        assert!(matches!(err, ScreenerError::NoData { ref code } if code == "XYZ"));
    }

    #[test]
    fn bad_row_reports_line() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("BAD.csv"),
            "date,open,high,low,close,volume\n2024-01-15,1,2,1,x,10\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);

        let err = adapter.fetch_ohlcv("BAD", day(1), day(31)).unwrap_err();
        assert!(matches!(err, ScreenerError::DatabaseQuery { ref reason } if reason.contains("row 1")));
    }

    #[test]
    fn list_symbols_returns_csv_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(adapter.list_symbols().unwrap(), vec!["000001", "600000"]);
    }
}
