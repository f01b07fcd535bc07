//! Signal detection over aligned series.
//!
//! Crossings use the two-sample rule: an up-cross at `i` needs
//! `a[i-1] <= b[i-1]` and `a[i] > b[i]`; a down-cross is the mirror image.
//! Any undefined sample means no event, never a false one.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Two derived series crossing (golden / death cross).
    Crossover,
    /// A raw price crossing a level or band.
    Breakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub index: usize,
    pub kind: SignalKind,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Overbought,
    Oversold,
    Neutral,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Overbought => write!(f, "OVERBOUGHT"),
            Zone::Oversold => write!(f, "OVERSOLD"),
            Zone::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Direction of the crossing between two consecutive samples of `a` and `b`.
pub fn crossing(prev: (f64, f64), cur: (f64, f64)) -> Option<Direction> {
    let (a_prev, b_prev) = prev;
    let (a_cur, b_cur) = cur;
    if a_prev <= b_prev && a_cur > b_cur {
        Some(Direction::Up)
    } else if a_prev >= b_prev && a_cur < b_cur {
        Some(Direction::Down)
    } else {
        None
    }
}

/// Crossing at `index`, `None` if either series is undefined at `index` or
/// `index - 1`.
pub fn cross_at(a: &[Option<f64>], b: &[Option<f64>], index: usize) -> Option<Direction> {
    let prev = index.checked_sub(1)?;
    let a_prev = (*a.get(prev)?)?;
    let b_prev = (*b.get(prev)?)?;
    let a_cur = (*a.get(index)?)?;
    let b_cur = (*b.get(index)?)?;
    crossing((a_prev, b_prev), (a_cur, b_cur))
}

/// Every crossing event of `a` against `b`, in index order.
pub fn crossovers(a: &[Option<f64>], b: &[Option<f64>], kind: SignalKind) -> Vec<SignalEvent> {
    (1..a.len().min(b.len()))
        .filter_map(|index| {
            cross_at(a, b, index).map(|direction| SignalEvent {
                index,
                kind,
                direction,
            })
        })
        .collect()
}

/// Threshold classification: above `high` is overbought, below `low` oversold.
pub fn classify(value: f64, low: f64, high: f64) -> Zone {
    if value > high {
        Zone::Overbought
    } else if value < low {
        Zone::Oversold
    } else {
        Zone::Neutral
    }
}

/// The zone entered at this sample, `None` when the zone did not change.
pub fn zone_entered(prev: f64, cur: f64, low: f64, high: f64) -> Option<Zone> {
    let before = classify(prev, low, high);
    let after = classify(cur, low, high);
    (before != after).then_some(after)
}

pub fn zones(values: &[Option<f64>], low: f64, high: f64) -> Vec<Option<Zone>> {
    values
        .iter()
        .map(|v| v.map(|x| classify(x, low, high)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn crossing_up_from_equal() {
        assert_eq!(crossing((1.0, 1.0), (2.0, 1.0)), Some(Direction::Up));
    }

    #[test]
    fn crossing_down() {
        assert_eq!(crossing((2.0, 1.0), (0.5, 1.0)), Some(Direction::Down));
    }

    #[test]
    fn touching_is_not_a_cross() {
        assert_eq!(crossing((1.0, 2.0), (2.0, 2.0)), None);
        assert_eq!(crossing((3.0, 2.0), (3.0, 2.0)), None);
    }

    #[test]
    fn cross_at_needs_both_samples() {
        let a = vec![None, Some(2.0), Some(3.0)];
        let b = some(&[1.5, 2.5, 2.5]);
        assert_eq!(cross_at(&a, &b, 0), None);
        assert_eq!(cross_at(&a, &b, 1), None);
        assert_eq!(cross_at(&a, &b, 2), Some(Direction::Up));
        assert_eq!(cross_at(&a, &b, 3), None);
    }

    #[test]
    fn crossovers_are_antisymmetric() {
        let a = some(&[1.0, 3.0, 2.0, 0.5, 4.0]);
        let b = some(&[2.0, 2.0, 2.0, 2.0, 2.0]);
        let ab = crossovers(&a, &b, SignalKind::Crossover);
        let ba = crossovers(&b, &a, SignalKind::Crossover);

        assert_eq!(ab.len(), 3);
        assert_eq!(ab.len(), ba.len());
        for (x, y) in ab.iter().zip(&ba) {
            assert_eq!(x.index, y.index);
            assert_ne!(x.direction, y.direction);
        }
        assert_eq!(ab[0].direction, Direction::Up);
        assert_eq!(ab[0].index, 1);
    }

    #[test]
    fn classify_bounds_are_neutral() {
        assert_eq!(classify(80.0, 20.0, 80.0), Zone::Neutral);
        assert_eq!(classify(20.0, 20.0, 80.0), Zone::Neutral);
        assert_eq!(classify(80.1, 20.0, 80.0), Zone::Overbought);
        assert_eq!(classify(19.9, 20.0, 80.0), Zone::Oversold);
    }

    #[test]
    fn entering_vs_residing() {
        assert_eq!(zone_entered(75.0, 85.0, 20.0, 80.0), Some(Zone::Overbought));
        assert_eq!(zone_entered(85.0, 90.0, 20.0, 80.0), None);
        assert_eq!(zone_entered(85.0, 50.0, 20.0, 80.0), Some(Zone::Neutral));
    }

    #[test]
    fn zones_keep_undefined() {
        let z = zones(&[None, Some(10.0), Some(50.0)], 20.0, 80.0);
        assert_eq!(z, vec![None, Some(Zone::Oversold), Some(Zone::Neutral)]);
    }
}
