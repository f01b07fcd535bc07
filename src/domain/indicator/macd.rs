//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line, seeded once the line is defined
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: max(fast, slow) - 1 + signal - 1 bars.

use crate::domain::indicator::ema::ema_fold;
use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, undefined_series,
};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[OhlcvBar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if fast == 0 || slow == 0 || signal_period == 0 {
        return undefined_series(bars, indicator_type);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema_fold(&closes, fast);
    let ema_slow = ema_fold(&closes, slow);

    let line_start = fast.max(slow) - 1;
    let line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .skip(line_start)
        .filter_map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = ema_fold(&line, signal_period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let offset = match i.checked_sub(line_start) {
                Some(o) => o,
                None => return IndicatorPoint::undefined(bar.date),
            };
            match signal.get(offset).copied().flatten() {
                Some(sig) => {
                    let macd = line[offset];
                    IndicatorPoint::defined(
                        bar.date,
                        IndicatorValue::Macd {
                            line: macd,
                            signal: sig,
                            histogram: macd - sig,
                        },
                    )
                }
                None => IndicatorPoint::undefined(bar.date),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[OhlcvBar]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}
