//! Rolling standard deviation.
//!
//! Indicator libraries disagree on the divisor, so the convention is a
//! named constant rather than an inline literal.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StddevKind {
    /// Divide by N.
    Population,
    /// Divide by N - 1.
    Sample,
}

/// Divisor used by Bollinger bands.
pub const BOLLINGER_STDDEV: StddevKind = StddevKind::Population;

/// Standard deviation of `window` around `mean`. `None` when the sample
/// divisor would be zero.
pub fn stddev(window: &[f64], mean: f64, kind: StddevKind) -> Option<f64> {
    let divisor = match kind {
        StddevKind::Population => window.len(),
        StddevKind::Sample => window.len().checked_sub(1)?,
    };
    if divisor == 0 {
        return None;
    }
    let sum_sq: f64 = window.iter().map(|x| (x - mean) * (x - mean)).sum();
    Some((sum_sq / divisor as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn population_divides_by_n() {
        let w = [10.0, 20.0, 30.0];
        let v = stddev(&w, 20.0, StddevKind::Population).unwrap();
        assert_relative_eq!(v, (200.0_f64 / 3.0).sqrt());
    }

    #[test]
    fn sample_divides_by_n_minus_1() {
        let w = [10.0, 20.0, 30.0];
        let v = stddev(&w, 20.0, StddevKind::Sample).unwrap();
        assert_relative_eq!(v, 10.0);
    }

    #[test]
    fn degenerate_windows() {
        assert_eq!(stddev(&[], 0.0, StddevKind::Population), None);
        assert_eq!(stddev(&[5.0], 5.0, StddevKind::Sample), None);
        assert_eq!(stddev(&[5.0], 5.0, StddevKind::Population), Some(0.0));
    }

    #[test]
    fn bollinger_uses_population() {
        assert_eq!(BOLLINGER_STDDEV, StddevKind::Population);
    }
}
