//! Per-symbol time series plus the indicator series computed over it.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::indicator_helpers::compute_indicators;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CodeData {
    pub code: String,
    pub ohlcv: Vec<OhlcvBar>,
    pub indicators: HashMap<IndicatorType, IndicatorSeries>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl CodeData {
    pub fn new(code: String, ohlcv: Vec<OhlcvBar>) -> Self {
        let date_index = ohlcv
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            code,
            ohlcv,
            indicators: HashMap::new(),
            date_index,
        }
    }

    /// Compute any of `types` not already present.
    pub fn with_indicators<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = IndicatorType>,
    {
        let missing: Vec<IndicatorType> = types
            .into_iter()
            .filter(|t| !self.indicators.contains_key(t))
            .collect();
        self.indicators
            .extend(compute_indicators(&self.ohlcv, &missing));
        self
    }

    pub fn bar_count(&self) -> usize {
        self.ohlcv.len()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&OhlcvBar> {
        self.date_index.get(&date).map(|&i| &self.ohlcv[i])
    }

    pub fn get_bar_index(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    /// Index `offset` bars back from the latest bar.
    pub fn index_from_end(&self, offset: usize) -> Option<usize> {
        self.ohlcv.len().checked_sub(offset + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bar(date: &str, close: f64) -> OhlcvBar {
        OhlcvBar {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn code_data_new_builds_date_index() {
        let bars = vec![
            make_bar("2024-01-01", 100.0),
            make_bar("2024-01-02", 101.0),
            make_bar("2024-01-03", 102.0),
        ];
        let cd = CodeData::new("600000".into(), bars);

        assert_eq!(cd.date_index.len(), 3);
        assert_eq!(
            cd.get_bar_index(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
            Some(1)
        );
    }

    #[test]
    fn code_data_get_bar() {
        let bars = vec![make_bar("2024-01-01", 100.0), make_bar("2024-01-02", 101.0)];
        let cd = CodeData::new("600000".into(), bars);

        let bar = cd.get_bar(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!((bar.unwrap().close - 101.0).abs() < f64::EPSILON);
        assert!(
            cd.get_bar(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap())
                .is_none()
        );
    }

    #[test]
    fn index_from_end() {
        let bars = vec![make_bar("2024-01-01", 100.0), make_bar("2024-01-02", 101.0)];
        let cd = CodeData::new("600000".into(), bars);
        assert_eq!(cd.index_from_end(0), Some(1));
        assert_eq!(cd.index_from_end(1), Some(0));
        assert_eq!(cd.index_from_end(2), None);
        assert_eq!(CodeData::new("X".into(), vec![]).index_from_end(0), None);
    }

    #[test]
    fn with_indicators_computes_aligned_series() {
        let bars = vec![
            make_bar("2024-01-01", 100.0),
            make_bar("2024-01-02", 101.0),
            make_bar("2024-01-03", 102.0),
        ];
        let cd = CodeData::new("600000".into(), bars)
            .with_indicators([IndicatorType::Sma(2), IndicatorType::Sma(2)]);
        assert_eq!(cd.indicators.len(), 1);
        assert_eq!(cd.indicators[&IndicatorType::Sma(2)].len(), 3);
    }
}
