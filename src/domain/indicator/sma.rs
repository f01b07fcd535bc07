//! Simple moving averages over close and volume.
//!
//! SMA(n)[i] = mean of the trailing n values; undefined for i < n-1.

use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, undefined_series,
};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_sma(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    rolling_mean(bars, period, |b| b.close, IndicatorType::Sma(period))
}

pub fn calculate_volume_sma(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    rolling_mean(bars, period, |b| b.volume, IndicatorType::VolumeSma(period))
}

fn rolling_mean(
    bars: &[OhlcvBar],
    period: usize,
    select: fn(&OhlcvBar) -> f64,
    indicator_type: IndicatorType,
) -> IndicatorSeries {
    if period == 0 {
        return undefined_series(bars, indicator_type);
    }

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i + 1 < period {
                return IndicatorPoint::undefined(bar.date);
            }
            let window = &bars[i + 1 - period..=i];
            let mean = window.iter().map(select).sum::<f64>() / period as f64;
            IndicatorPoint::defined(bar.date, IndicatorValue::Simple(mean))
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}
