//! Glue between filter expressions and indicator series.

use crate::domain::code_data::CodeData;
use crate::domain::filter::{FilterExpr, IndicatorField, Operand};
use crate::domain::filter_eval::resolve_operand;
use crate::domain::indicator::{
    IndicatorSeries, IndicatorType, IndicatorValue, bollinger, kdj, macd,
};
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::preset::{KDJ_OVERBOUGHT, KDJ_OVERSOLD};
use crate::domain::signal::{self, SignalEvent, SignalKind, Zone};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// Every indicator the expression reads, deduplicated.
pub fn extract_indicators(expr: &FilterExpr) -> BTreeSet<IndicatorType> {
    expr.criteria()
        .iter()
        .flat_map(|node| node.criterion.operands())
        .filter_map(|operand| match operand {
            Operand::Indicator(r) => Some(r.indicator_type),
            _ => None,
        })
        .collect()
}

pub fn compute_indicators(
    bars: &[OhlcvBar],
    types: &[IndicatorType],
) -> HashMap<IndicatorType, IndicatorSeries> {
    types.iter().map(|t| (*t, t.compute(bars))).collect()
}

/// Read one field out of an indicator value. `None` for a field the value
/// does not carry.
pub fn extract_field(value: &IndicatorValue, field: IndicatorField) -> Option<f64> {
    use IndicatorField as F;
    match (*value, field) {
        (IndicatorValue::Simple(v), F::Value) => Some(v),
        (IndicatorValue::Macd { line, .. }, F::MacdLine) => Some(line),
        (IndicatorValue::Macd { signal, .. }, F::MacdSignal) => Some(signal),
        (IndicatorValue::Macd { histogram, .. }, F::MacdHistogram) => Some(histogram),
        (IndicatorValue::Kdj { k, .. }, F::KdjK) => Some(k),
        (IndicatorValue::Kdj { d, .. }, F::KdjD) => Some(d),
        (IndicatorValue::Kdj { j, .. }, F::KdjJ) => Some(j),
        (IndicatorValue::Bollinger { upper, .. }, F::BollingerUpper) => Some(upper),
        (IndicatorValue::Bollinger { middle, .. }, F::BollingerMiddle) => Some(middle),
        (IndicatorValue::Bollinger { lower, .. }, F::BollingerLower) => Some(lower),
        (IndicatorValue::Bollinger { upper, lower, .. }, F::BollingerWidth) => Some(upper - lower),
        _ => None,
    }
}

/// The fields a value of this indicator type carries.
pub fn fields_for(indicator_type: IndicatorType) -> &'static [IndicatorField] {
    use IndicatorField as F;
    match indicator_type {
        IndicatorType::Sma(_)
        | IndicatorType::Ema(_)
        | IndicatorType::Rsi(_)
        | IndicatorType::VolumeSma(_) => &[F::Value],
        IndicatorType::Macd { .. } => &[F::MacdLine, F::MacdSignal, F::MacdHistogram],
        IndicatorType::Kdj { .. } => &[F::KdjK, F::KdjD, F::KdjJ],
        IndicatorType::Bollinger { .. } => &[
            F::BollingerUpper,
            F::BollingerMiddle,
            F::BollingerLower,
            F::BollingerWidth,
        ],
    }
}

/// The indicators shown by a symbol snapshot.
pub fn default_indicator_set() -> Vec<IndicatorType> {
    vec![
        IndicatorType::Sma(5),
        IndicatorType::Sma(10),
        IndicatorType::Sma(20),
        IndicatorType::Sma(60),
        IndicatorType::Ema(12),
        IndicatorType::Ema(26),
        IndicatorType::Rsi(14),
        IndicatorType::Macd {
            fast: macd::DEFAULT_FAST,
            slow: macd::DEFAULT_SLOW,
            signal: macd::DEFAULT_SIGNAL,
        },
        IndicatorType::Kdj {
            period: kdj::DEFAULT_PERIOD,
            k_smooth: kdj::DEFAULT_K_SMOOTH,
            d_smooth: kdj::DEFAULT_D_SMOOTH,
        },
        IndicatorType::Bollinger {
            period: bollinger::DEFAULT_PERIOD,
            width_x100: bollinger::DEFAULT_WIDTH_X100,
        },
        IndicatorType::VolumeSma(5),
    ]
}

/// Every computed field at `index`, keyed by its DSL operand name
/// (`"MACD_LINE(12,26,9)"`). Undefined values map to `None`.
pub fn snapshot(data: &CodeData, index: usize) -> BTreeMap<String, Option<f64>> {
    let mut out = BTreeMap::new();
    for (indicator_type, series) in &data.indicators {
        let value = series.get(index);
        for &field in fields_for(*indicator_type) {
            let name = Operand::indicator(*indicator_type, field).to_string();
            out.insert(name, value.and_then(|v| extract_field(v, field)));
        }
    }
    out
}

/// An operand over every bar of `data`, aligned with the bars.
pub fn operand_values(operand: &Operand, data: &CodeData) -> Vec<Option<f64>> {
    (0..data.bar_count())
        .map(|i| resolve_operand(operand, data, i))
        .collect()
}

fn default_cross_pairs() -> [(Operand, Operand); 2] {
    let macd = IndicatorType::Macd {
        fast: macd::DEFAULT_FAST,
        slow: macd::DEFAULT_SLOW,
        signal: macd::DEFAULT_SIGNAL,
    };
    [
        (Operand::sma(5), Operand::sma(20)),
        (
            Operand::indicator(macd, IndicatorField::MacdLine),
            Operand::indicator(macd, IndicatorField::MacdSignal),
        ),
    ]
}

/// Most recent crossing at or before `index` for the golden/death cross
/// pairs (SMA 5 over 20, MACD line over signal), keyed `"A/B"`. Pairs that
/// never crossed are absent.
pub fn recent_crosses(data: &CodeData, index: usize) -> BTreeMap<String, SignalEvent> {
    let end = (index + 1).min(data.bar_count());
    default_cross_pairs()
        .into_iter()
        .filter_map(|(a, b)| {
            let left = operand_values(&a, data);
            let right = operand_values(&b, data);
            signal::crossovers(&left[..end], &right[..end], SignalKind::Crossover)
                .pop()
                .map(|event| (format!("{}/{}", a, b), event))
        })
        .collect()
}

/// Oscillator zones at `index`: RSI(14) against 30/70 and the default KDJ K
/// line against its oversold/overbought levels. Undefined readings are absent.
pub fn zone_readings(data: &CodeData, index: usize) -> BTreeMap<String, Zone> {
    let kdj_k = Operand::indicator(
        IndicatorType::Kdj {
            period: kdj::DEFAULT_PERIOD,
            k_smooth: kdj::DEFAULT_K_SMOOTH,
            d_smooth: kdj::DEFAULT_D_SMOOTH,
        },
        IndicatorField::KdjK,
    );
    [
        (
            Operand::indicator(IndicatorType::Rsi(14), IndicatorField::Value),
            RSI_OVERSOLD,
            RSI_OVERBOUGHT,
        ),
        (kdj_k, KDJ_OVERSOLD, KDJ_OVERBOUGHT),
    ]
    .into_iter()
    .filter_map(|(operand, low, high)| {
        let zone = signal::zones(&operand_values(&operand, data), low, high)
            .get(index)
            .copied()
            .flatten()?;
        Some((operand.to_string(), zone))
    })
    .collect()
}

/// One field of a series, flattened to aligned optionals.
pub fn field_values(series: &IndicatorSeries, field: IndicatorField) -> Vec<Option<f64>> {
    series
        .values
        .iter()
        .map(|p| p.value.as_ref().and_then(|v| extract_field(v, field)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter_parser::parse;
    use crate::domain::indicator::test_support::make_bars;

    #[test]
    fn extract_indicators_walks_whole_tree() {
        let expr = parse(
            "OR(AND(ABOVE(RSI(14), 70), ABOVE(close, SMA(20))), NOT(CROSS_ABOVE(SMA(5), SMA(20))), SQUEEZE(20, 2, 0.9), VOLUME_UP(1, 1.2))",
        )
        .unwrap();
        let types = extract_indicators(&expr);
        assert_eq!(
            types,
            BTreeSet::from([
                IndicatorType::Sma(5),
                IndicatorType::Sma(20),
                IndicatorType::Rsi(14),
                IndicatorType::Bollinger {
                    period: 20,
                    width_x100: 200
                },
            ])
        );
    }

    #[test]
    fn extract_field_matches_variant() {
        let macd = IndicatorValue::Macd {
            line: 1.0,
            signal: 0.5,
            histogram: 0.5,
        };
        assert_eq!(extract_field(&macd, IndicatorField::MacdSignal), Some(0.5));
        assert_eq!(extract_field(&macd, IndicatorField::KdjK), None);

        let boll = IndicatorValue::Bollinger {
            upper: 12.0,
            middle: 10.0,
            lower: 8.0,
        };
        assert_eq!(extract_field(&boll, IndicatorField::BollingerWidth), Some(4.0));
    }

    #[test]
    fn field_values_keep_warmup_undefined() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let series = IndicatorType::Sma(2).compute(&bars);
        assert_eq!(
            field_values(&series, IndicatorField::Value),
            vec![None, Some(1.5), Some(2.5)]
        );
    }

    #[test]
    fn snapshot_names_are_operands() {
        let bars = make_bars(&(1..=40).map(|i| i as f64).collect::<Vec<_>>());
        let data = CodeData::new("X".into(), bars).with_indicators(default_indicator_set());
        let snap = snapshot(&data, 39);

        assert_eq!(snap["SMA(5)"], Some(38.0));
        assert_eq!(snap["SMA(60)"], None);
        assert!(snap.contains_key("MACD_HISTOGRAM(12,26,9)"));
        assert!(snap.contains_key("KDJ_J(9,3,3)"));
        assert!(snap.contains_key("BOLLINGER_WIDTH(20,2)"));
        for name in snap.keys() {
            assert!(crate::domain::filter_parser::parse_operand(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn recent_cross_reports_golden_cross() {
        let closes: Vec<f64> = (0..30)
            .map(|i| if i < 25 { 100.0 - 0.5 * i as f64 } else { 200.0 })
            .collect();
        let data =
            CodeData::new("X".into(), make_bars(&closes)).with_indicators(default_indicator_set());

        let crosses = recent_crosses(&data, 29);
        assert_eq!(crosses.len(), 1);
        let event = crosses["SMA(5)/SMA(20)"];
        assert_eq!(event.index, 25);
        assert_eq!(event.direction, signal::Direction::Up);
        assert_eq!(event.kind, SignalKind::Crossover);

        assert!(recent_crosses(&data, 24).is_empty());
    }

    #[test]
    fn zone_readings_on_rising_series() {
        let bars = make_bars(&(1..=40).map(|i| i as f64).collect::<Vec<_>>());
        let data = CodeData::new("X".into(), bars).with_indicators(default_indicator_set());

        let zones = zone_readings(&data, 39);
        assert_eq!(zones["RSI(14)"], Zone::Overbought);
        assert_eq!(zones["KDJ_K(9,3,3)"], Zone::Overbought);

        assert!(zone_readings(&data, 5).is_empty());
    }

    #[test]
    fn compute_indicators_keys_by_type() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let map = compute_indicators(&bars, &[IndicatorType::Sma(2), IndicatorType::Ema(2)]);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&IndicatorType::Ema(2)].len(), 3);
    }
}
