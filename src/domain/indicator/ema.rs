//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars are undefined.

use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, undefined_series,
};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_ema(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    if period == 0 {
        return undefined_series(bars, IndicatorType::Ema(period));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let values = bars
        .iter()
        .zip(ema_fold(&closes, period))
        .map(|(bar, ema)| match ema {
            Some(v) => IndicatorPoint::defined(bar.date, IndicatorValue::Simple(v)),
            None => IndicatorPoint::undefined(bar.date),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

/// EMA over a plain slice, aligned with the input. Shared with MACD, whose
/// signal line is an EMA of the MACD line rather than of closes.
pub(crate) fn ema_fold(input: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(input.len());
    if period == 0 {
        out.resize(input.len(), None);
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, &x) in input.iter().enumerate() {
        if i < period - 1 {
            sum += x;
            out.push(None);
        } else if i == period - 1 {
            sum += x;
            ema = sum / period as f64;
            out.push(Some(ema));
        } else {
            ema = x * k + ema * (1.0 - k);
            out.push(Some(ema));
        }
    }
    out
}
