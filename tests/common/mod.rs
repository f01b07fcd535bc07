#![allow(dead_code)]

use chrono::NaiveDate;
use stockscreen::domain::error::ScreenerError;
pub use stockscreen::domain::ohlcv::OhlcvBar;
use stockscreen::ports::data_port::DataPort;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory data port. Codes with an entry in `errors` fail; codes with a
/// delay sleep on the calling (blocking pool) thread before answering.
pub struct MockDataPort {
    pub data: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
    pub delays: HashMap<String, Duration>,
    pub fetches: AtomicUsize,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            delays: HashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_bars(mut self, code: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(code.to_string(), bars);
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.errors.insert(code.to_string(), reason.to_string());
        self
    }

    pub fn with_delay(mut self, code: &str, delay: Duration) -> Self {
        self.delays.insert(code.to_string(), delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DataPort for MockDataPort {
    fn fetch_ohlcv(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, ScreenerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(code) {
            std::thread::sleep(*delay);
        }
        if let Some(reason) = self.errors.get(code) {
            return Err(ScreenerError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(code)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start_date && b.date <= end_date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, ScreenerError> {
        let mut codes: Vec<String> = self.data.keys().cloned().collect();
        codes.sort();
        Ok(codes)
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn make_bar(date_str: &str, close: f64) -> OhlcvBar {
    OhlcvBar {
        date: date(date_str),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

/// Daily bars from 2024-01-01, one per close, flat intraday.
pub fn bars_from_closes(closes: &[f64]) -> Vec<OhlcvBar> {
    let start = date("2024-01-01");
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| OhlcvBar {
            date: start + chrono::Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}

/// `n` closes rising linearly from `from` to `to`.
pub fn linear_closes(n: usize, from: f64, to: f64) -> Vec<f64> {
    let step = if n > 1 { (to - from) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(|i| from + step * i as f64).collect()
}

/// 30 closes where SMA(5) crosses above SMA(20) at index 25 and nowhere else.
pub fn golden_cross_closes() -> Vec<f64> {
    (0..30)
        .map(|i| if i < 25 { 100.0 - 0.5 * i as f64 } else { 200.0 })
        .collect()
}

pub fn screen_start() -> NaiveDate {
    date("2024-01-01")
}

pub fn screen_end() -> NaiveDate {
    date("2024-12-31")
}
