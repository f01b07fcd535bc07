//! Technical indicator implementations.
//!
//! Every indicator is a pure fold over the bar slice that returns one
//! [`IndicatorPoint`] per bar. A point whose `value` is `None` is undefined
//! (not enough history yet); callers must never read it as zero.

pub mod bollinger;
pub mod ema;
pub mod kdj;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stddev;

pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use kdj::calculate_kdj;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use sma::{calculate_sma, calculate_volume_sma};

use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub value: Option<IndicatorValue>,
}

impl IndicatorPoint {
    pub fn defined(date: NaiveDate, value: IndicatorValue) -> Self {
        Self {
            date,
            value: Some(value),
        }
    }

    pub fn undefined(date: NaiveDate) -> Self {
        Self { date, value: None }
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }

    /// The scalar of a `Simple` point, `None` when undefined or multi-valued.
    pub fn simple(&self) -> Option<f64> {
        match self.value {
            Some(IndicatorValue::Simple(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Kdj {
        k: f64,
        d: f64,
        j: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    VolumeSma(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Kdj {
        period: usize,
        k_smooth: usize,
        d_smooth: usize,
    },
    Bollinger {
        period: usize,
        width_x100: u32,
    },
}

impl IndicatorType {
    /// Number of bars needed before the first defined point.
    pub fn required_bars(&self) -> usize {
        match *self {
            IndicatorType::Sma(n) | IndicatorType::Ema(n) | IndicatorType::VolumeSma(n) => n,
            IndicatorType::Rsi(n) => n + 1,
            IndicatorType::Macd { fast, slow, signal } => fast.max(slow) + signal - 1,
            IndicatorType::Kdj { period, .. } => period,
            IndicatorType::Bollinger { period, .. } => period,
        }
    }

    pub fn compute(&self, bars: &[OhlcvBar]) -> IndicatorSeries {
        match *self {
            IndicatorType::Sma(n) => calculate_sma(bars, n),
            IndicatorType::Ema(n) => calculate_ema(bars, n),
            IndicatorType::Rsi(n) => calculate_rsi(bars, n),
            IndicatorType::VolumeSma(n) => calculate_volume_sma(bars, n),
            IndicatorType::Macd { fast, slow, signal } => calculate_macd(bars, fast, slow, signal),
            IndicatorType::Kdj {
                period,
                k_smooth,
                d_smooth,
            } => calculate_kdj(bars, period, k_smooth, d_smooth),
            IndicatorType::Bollinger { period, width_x100 } => {
                calculate_bollinger(bars, period, width_x100)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&IndicatorValue> {
        self.values.get(index).and_then(|p| p.value.as_ref())
    }

    /// Index of the first defined point, if any.
    pub fn first_defined(&self) -> Option<usize> {
        self.values.iter().position(IndicatorPoint::is_defined)
    }
}

/// Series of all-undefined points, used when parameters make a value impossible.
pub(crate) fn undefined_series(bars: &[OhlcvBar], indicator_type: IndicatorType) -> IndicatorSeries {
    IndicatorSeries {
        indicator_type,
        values: bars.iter().map(|b| IndicatorPoint::undefined(b.date)).collect(),
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::VolumeSma(period) => write!(f, "VOLUME_SMA({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Kdj {
                period,
                k_smooth,
                d_smooth,
            } => write!(f, "KDJ({},{},{})", period, k_smooth, d_smooth),
            IndicatorType::Bollinger { period, width_x100 } => {
                let width = *width_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, width)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ohlcv::OhlcvBar;
    use chrono::NaiveDate;

    /// Flat bars (open = high = low = close) on consecutive days.
    pub fn make_bars(prices: &[f64]) -> Vec<OhlcvBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        prices
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
}
