//! OHLCV bar representation and series sanity checks.

use crate::domain::error::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvBar {
    fn check(&self) -> Result<(), String> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(format!("{} is not finite", name));
            }
            if value < 0.0 {
                return Err(format!("{} is negative ({})", name, value));
            }
        }
        if self.high < self.open.max(self.close) {
            return Err(format!(
                "high {} below max(open, close) {}",
                self.high,
                self.open.max(self.close)
            ));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!(
                "low {} above min(open, close) {}",
                self.low,
                self.open.min(self.close)
            ));
        }
        Ok(())
    }
}

/// Reject series the indicator folds cannot trust: bad prices or dates that
/// do not strictly increase. An empty series is valid here; callers decide
/// whether that is an error.
pub fn validate_bars(bars: &[OhlcvBar]) -> Result<(), DataError> {
    for (index, bar) in bars.iter().enumerate() {
        bar.check()
            .map_err(|reason| DataError::Malformed { index, reason })?;
        if index > 0 && bar.date <= bars[index - 1].date {
            return Err(DataError::NonMonotonic { index });
        }
    }
    Ok(())
}
