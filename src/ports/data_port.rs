//! Data access port trait.

use crate::domain::error::ScreenerError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;

/// Source of daily history. Implementations are shared across screening
/// tasks and called from the blocking pool, so they must be `Send + Sync`.
pub trait DataPort: Send + Sync {
    /// Bars for `code` with `start_date <= date <= end_date`, ascending.
    fn fetch_ohlcv(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, ScreenerError>;

    fn list_symbols(&self) -> Result<Vec<String>, ScreenerError>;
}

impl<T: DataPort + ?Sized> DataPort for std::sync::Arc<T> {
    fn fetch_ohlcv(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, ScreenerError> {
        (**self).fetch_ohlcv(code, start_date, end_date)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ScreenerError> {
        (**self).list_symbols()
    }
}

impl<T: DataPort + ?Sized> DataPort for Box<T> {
    fn fetch_ohlcv(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, ScreenerError> {
        (**self).fetch_ohlcv(code, start_date, end_date)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ScreenerError> {
        (**self).list_symbols()
    }
}
