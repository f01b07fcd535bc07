//! Bollinger Bands indicator.
//!
//! - Middle: SMA over n periods
//! - Upper: Middle + (width × StdDev)
//! - Lower: Middle - (width × StdDev)
//!
//! StdDev follows [`BOLLINGER_STDDEV`]. Width is carried as hundredths so the
//! indicator type stays hashable. Warmup: first (period-1) bars are undefined.

use crate::domain::indicator::stddev::{BOLLINGER_STDDEV, StddevKind, stddev};
use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, undefined_series,
};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_WIDTH_X100: u32 = 200;

pub fn calculate_bollinger(bars: &[OhlcvBar], period: usize, width_x100: u32) -> IndicatorSeries {
    calculate_bollinger_with(bars, period, width_x100, BOLLINGER_STDDEV)
}

pub fn calculate_bollinger_with(
    bars: &[OhlcvBar],
    period: usize,
    width_x100: u32,
    kind: StddevKind,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Bollinger { period, width_x100 };
    if period == 0 {
        return undefined_series(bars, indicator_type);
    }

    let width = width_x100 as f64 / 100.0;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i + 1 < period {
                return IndicatorPoint::undefined(bar.date);
            }
            let window = &closes[i + 1 - period..=i];
            let middle = window.iter().sum::<f64>() / period as f64;
            match stddev(window, middle, kind) {
                Some(sd) => IndicatorPoint::defined(
                    bar.date,
                    IndicatorValue::Bollinger {
                        upper: middle + width * sd,
                        middle,
                        lower: middle - width * sd,
                    },
                ),
                None => IndicatorPoint::undefined(bar.date),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use approx::assert_relative_eq;

    fn bands(point: &IndicatorPoint) -> (f64, f64, f64) {
        match point.value {
            Some(IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            }) => (upper, middle, lower),
            ref other => panic!("expected Bollinger value, got {:?}", other),
        }
    }

    #[test]
    fn bollinger_warmup() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_bollinger(&bars, 3, 200);

        assert!(!series.values[0].is_defined());
        assert!(!series.values[1].is_defined());
        assert!(series.values[2].is_defined());
    }

    #[test]
    fn bollinger_population_bands() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_bollinger(&bars, 3, 200);
        let (upper, middle, lower) = bands(&series.values[2]);

        let sd = (200.0_f64 / 3.0).sqrt();
        assert_relative_eq!(middle, 20.0);
        assert_relative_eq!(upper, 20.0 + 2.0 * sd);
        assert_relative_eq!(lower, 20.0 - 2.0 * sd);
    }

    #[test]
    fn bollinger_sample_is_wider() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let pop = calculate_bollinger_with(&bars, 3, 200, StddevKind::Population);
        let sample = calculate_bollinger_with(&bars, 3, 200, StddevKind::Sample);
        assert!(bands(&sample.values[2]).0 > bands(&pop.values[2]).0);
        assert_relative_eq!(bands(&sample.values[2]).0, 40.0);
    }

    #[test]
    fn bollinger_constant_prices_collapse() {
        let bars = make_bars(&[50.0; 5]);
        let series = calculate_bollinger(&bars, 5, 200);
        let (upper, middle, lower) = bands(&series.values[4]);
        assert_relative_eq!(upper, 50.0);
        assert_relative_eq!(middle, 50.0);
        assert_relative_eq!(lower, 50.0);
    }

    #[test]
    fn bollinger_fractional_width() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_bollinger(&bars, 3, 150);
        assert_eq!(
            series.indicator_type,
            IndicatorType::Bollinger {
                period: 3,
                width_x100: 150
            }
        );
        let (upper, middle, _) = bands(&series.values[2]);
        assert_relative_eq!(
            upper - middle,
            1.5 * (200.0_f64 / 3.0).sqrt(),
            max_relative = 1e-12
        );
    }
}
