//! KDJ stochastic oscillator.
//!
//! RSV = 100 × (close - lowest low(n)) / (highest high(n) - lowest low(n)),
//! or [`RSV_FLAT`] when the window has no range.
//! K[i] = ((m1-1) × K[i-1] + RSV[i]) / m1, D[i] = ((m2-1) × D[i-1] + K[i]) / m2,
//! both starting from [`KDJ_SEED`]. J = 3K - 2D.
//!
//! Default parameters: n=9, m1=3, m2=3. Warmup: first (n-1) bars are undefined.

use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, undefined_series,
};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_PERIOD: usize = 9;
pub const DEFAULT_K_SMOOTH: usize = 3;
pub const DEFAULT_D_SMOOTH: usize = 3;

/// Previous K and D assumed at the first defined bar.
pub const KDJ_SEED: f64 = 50.0;

/// RSV when highest high equals lowest low.
pub const RSV_FLAT: f64 = 50.0;

pub fn calculate_kdj(
    bars: &[OhlcvBar],
    period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Kdj {
        period,
        k_smooth,
        d_smooth,
    };
    if period == 0 || k_smooth == 0 || d_smooth == 0 {
        return undefined_series(bars, indicator_type);
    }

    let m1 = k_smooth as f64;
    let m2 = d_smooth as f64;
    let mut k = KDJ_SEED;
    let mut d = KDJ_SEED;

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i + 1 < period {
                return IndicatorPoint::undefined(bar.date);
            }
            let rsv = rsv(&bars[i + 1 - period..=i]);
            k = ((m1 - 1.0) * k + rsv) / m1;
            d = ((m2 - 1.0) * d + k) / m2;
            IndicatorPoint::defined(
                bar.date,
                IndicatorValue::Kdj {
                    k,
                    d,
                    j: 3.0 * k - 2.0 * d,
                },
            )
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

fn rsv(window: &[OhlcvBar]) -> f64 {
    let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let highest = window
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = highest - lowest;
    match window.last() {
        Some(last) if range > 0.0 => 100.0 * (last.close - lowest) / range,
        _ => RSV_FLAT,
    }
}
