//! RSI (Relative Strength Index) indicator.
//!
//! Uses Wilder's smoothing for average gain/loss calculation:
//! - First average: simple mean of gains/losses over the first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100 (this wins over avg_gain == 0, so a flat
//! window reads 100).
//!
//! Warmup: first n bars are undefined (need n price changes).

use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, undefined_series,
};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_rsi(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    if period == 0 || bars.len() <= period {
        return undefined_series(bars, IndicatorType::Rsi(period));
    }

    let changes: Vec<(f64, f64)> = bars
        .windows(2)
        .map(|w| {
            let change = w[1].close - w[0].close;
            (change.max(0.0), (-change).max(0.0))
        })
        .collect();

    let n = period as f64;
    let mut avg_gain = changes[..period].iter().map(|c| c.0).sum::<f64>() / n;
    let mut avg_loss = changes[..period].iter().map(|c| c.1).sum::<f64>() / n;

    let mut values = Vec::with_capacity(bars.len());
    for bar in &bars[..period] {
        values.push(IndicatorPoint::undefined(bar.date));
    }
    values.push(IndicatorPoint::defined(
        bars[period].date,
        IndicatorValue::Simple(rsi_from(avg_gain, avg_loss)),
    ));

    for (i, bar) in bars.iter().enumerate().skip(period + 1) {
        let (gain, loss) = changes[i - 1];
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
        values.push(IndicatorPoint::defined(
            bar.date,
            IndicatorValue::Simple(rsi_from(avg_gain, avg_loss)),
        ));
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Rsi(period),
        values,
    }
}

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}
