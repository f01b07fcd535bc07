//! Property tests for indicator, signal and evaluator invariants.

mod common;

use approx::assert_relative_eq;
use common::*;
use proptest::prelude::*;
use stockscreen::domain::code_data::CodeData;
use stockscreen::domain::filter::{FilterExpr, IndicatorField};
use stockscreen::domain::filter_eval::evaluate;
use stockscreen::domain::filter_parser::parse;
use stockscreen::domain::indicator::{
    IndicatorValue, calculate_bollinger, calculate_ema, calculate_macd, calculate_rsi,
    calculate_sma,
};
use stockscreen::domain::indicator_helpers::{extract_indicators, field_values};
use stockscreen::domain::signal::{SignalKind, crossovers};

fn closes_strategy(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0f64..500.0, min_len..max_len)
}

const CHILDREN: [&str; 5] = [
    "ABOVE(close, SMA(10))",
    "BELOW(RSI(14), 60)",
    "CROSS_ABOVE(EMA(5), SMA(20))",
    "AT_LEAST(MACD_HISTOGRAM(12,26,9), 0)",
    "IN_ZONE(KDJ_K(9,3,3), 20, 80, NEUTRAL)",
];

fn combine(op: &str, order: &[usize]) -> FilterExpr {
    let children: Vec<&str> = order.iter().map(|&i| CHILDREN[i]).collect();
    parse(&format!("{}({})", op, children.join(", "))).unwrap()
}

proptest! {
    #[test]
    fn sma_of_identical_values(value in 0.01f64..1000.0, period in 1usize..40) {
        let bars = bars_from_closes(&vec![value; period]);
        let series = calculate_sma(&bars, period);
        match series.get(period - 1) {
            Some(IndicatorValue::Simple(v)) => assert_relative_eq!(*v, value, max_relative = 1e-12),
            other => panic!("expected a defined SMA, got {other:?}"),
        }
    }

    #[test]
    fn ema_and_sma_equal_a_constant(value in 0.01f64..1000.0, period in 1usize..20, extra in 0usize..30) {
        let bars = bars_from_closes(&vec![value; period + extra]);
        let ema = calculate_ema(&bars, period);
        let sma = calculate_sma(&bars, period);
        for i in (period - 1)..bars.len() {
            for series in [&ema, &sma] {
                match series.get(i) {
                    Some(IndicatorValue::Simple(v)) => assert_relative_eq!(*v, value, max_relative = 1e-9),
                    other => panic!("undefined at {i}: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn rsi_is_bounded(closes in closes_strategy(16, 80), period in 2usize..15) {
        let bars = bars_from_closes(&closes);
        let series = calculate_rsi(&bars, period);
        for v in field_values(&series, IndicatorField::Value).into_iter().flatten() {
            prop_assert!((0.0..=100.0).contains(&v), "rsi {v} out of range");
        }
        prop_assert!(series.get(period).is_some());
    }

    #[test]
    fn rsi_of_strictly_rising_window_is_100(start in 1.0f64..100.0, step in 0.01f64..5.0, period in 2usize..20) {
        let closes: Vec<f64> = (0..=period).map(|i| start + step * i as f64).collect();
        let series = calculate_rsi(&bars_from_closes(&closes), period);
        match series.get(period) {
            Some(IndicatorValue::Simple(v)) => assert_relative_eq!(*v, 100.0),
            other => panic!("expected RSI, got {other:?}"),
        }
    }

    #[test]
    fn macd_histogram_is_zero_on_constant(value in 0.01f64..1000.0) {
        let bars = bars_from_closes(&vec![value; 60]);
        let series = calculate_macd(&bars, 12, 26, 9);
        for h in field_values(&series, IndicatorField::MacdHistogram).into_iter().flatten() {
            prop_assert!(h.abs() < 1e-9 * value.max(1.0));
        }
    }

    #[test]
    fn bollinger_collapses_on_constant(value in 0.01f64..1000.0) {
        let bars = bars_from_closes(&vec![value; 25]);
        let series = calculate_bollinger(&bars, 20, 200);
        match series.get(24) {
            Some(IndicatorValue::Bollinger { upper, middle, lower }) => {
                assert_relative_eq!(*upper, value, max_relative = 1e-9);
                assert_relative_eq!(*middle, value, max_relative = 1e-9);
                assert_relative_eq!(*lower, value, max_relative = 1e-9);
            }
            other => panic!("expected bands, got {other:?}"),
        }
    }

    #[test]
    fn bollinger_bands_are_ordered(closes in closes_strategy(20, 60)) {
        let bars = bars_from_closes(&closes);
        let series = calculate_bollinger(&bars, 10, 250);
        for i in 9..bars.len() {
            if let Some(IndicatorValue::Bollinger { upper, middle, lower }) = series.get(i) {
                prop_assert!(lower <= middle && middle <= upper);
            }
        }
    }

    #[test]
    fn crossovers_are_antisymmetric(a in closes_strategy(2, 60), b in closes_strategy(2, 60)) {
        let n = a.len().min(b.len());
        let a: Vec<Option<f64>> = a[..n].iter().copied().map(Some).collect();
        let b: Vec<Option<f64>> = b[..n].iter().copied().map(Some).collect();

        let ab = crossovers(&a, &b, SignalKind::Crossover);
        let ba = crossovers(&b, &a, SignalKind::Crossover);
        prop_assert_eq!(ab.len(), ba.len());
        for (x, y) in ab.iter().zip(&ba) {
            prop_assert_eq!(x.index, y.index);
            prop_assert_ne!(x.direction, y.direction);
        }
        let mut indices: Vec<usize> = ab.iter().map(|e| e.index).collect();
        indices.dedup();
        prop_assert_eq!(indices.len(), ab.len());
    }

    #[test]
    fn child_order_does_not_change_the_match(
        closes in closes_strategy(10, 60),
        order in Just(vec![0usize, 1, 2, 3, 4]).prop_shuffle(),
    ) {
        let identity = [0usize, 1, 2, 3, 4];
        for op in ["AND", "OR"] {
            let base = combine(op, &identity);
            let shuffled = combine(op, &order);
            let data = CodeData::new("P".into(), bars_from_closes(&closes))
                .with_indicators(extract_indicators(&base));
            let index = data.bar_count() - 1;

            let a = evaluate(&base, &data, index);
            let b = evaluate(&shuffled, &data, index);
            prop_assert_eq!(a.outcome.is_match(), b.outcome.is_match(), "{} differs", op);
            if op == "OR" {
                prop_assert_eq!(a.outcome, b.outcome);
            }
        }
    }

    #[test]
    fn not_keeps_insufficient_and_inverts_the_rest(closes in closes_strategy(1, 40)) {
        let inner = parse("ABOVE(close, SMA(20))").unwrap();
        let negated = FilterExpr::Not(Box::new(inner.clone()));
        let data = CodeData::new("P".into(), bars_from_closes(&closes))
            .with_indicators(extract_indicators(&inner));
        let index = data.bar_count() - 1;

        let a = evaluate(&inner, &data, index).outcome;
        let b = evaluate(&negated, &data, index).outcome;
        if closes.len() < 20 {
            prop_assert_eq!(a, b);
        } else {
            prop_assert_ne!(a.is_match(), b.is_match());
        }
    }

    #[test]
    fn evaluation_is_deterministic(closes in closes_strategy(30, 60)) {
        let expr = combine("OR", &[4, 3, 2, 1, 0]);
        let data = CodeData::new("P".into(), bars_from_closes(&closes))
            .with_indicators(extract_indicators(&expr));
        let index = data.bar_count() - 1;
        prop_assert_eq!(evaluate(&expr, &data, index), evaluate(&expr, &data, index));
    }
}
