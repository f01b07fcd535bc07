//! Per-category filter form accepted by the original screening API.
//!
//! Each present section becomes one criterion (or a small AND of criteria),
//! keyed by the section name in the evidence map, and the sections are
//! joined with the preset's `logic`.

use crate::domain::error::ScreenerError;
use crate::domain::filter::{
    Comparator, Criterion, CriterionNode, FilterExpr, IndicatorField, Operand,
};
use crate::domain::indicator::{IndicatorType, bollinger, kdj, macd};
use crate::domain::signal::Direction;
use serde::{Deserialize, Serialize};

pub const KDJ_OVERSOLD: f64 = 20.0;
pub const KDJ_OVERBOUGHT: f64 = 80.0;
pub const SQUEEZE_RATIO: f64 = 0.9;
pub const DEFAULT_VOLUME_CHANGE_PCT: f64 = 20.0;
pub const DEFAULT_VOLUME_MA_DAYS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterPreset {
    #[serde(default)]
    pub price: Option<PriceFilter>,
    #[serde(default)]
    pub ma: Option<MaFilter>,
    #[serde(default)]
    pub rsi: Option<RsiFilter>,
    #[serde(default)]
    pub macd: Option<MacdFilter>,
    #[serde(default)]
    pub kdj: Option<KdjFilter>,
    #[serde(default)]
    pub volume: Option<VolumeFilter>,
    #[serde(default)]
    pub bollinger: Option<BollingerFilter>,
    #[serde(default)]
    pub logic: Logic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceFilter {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

fn default_ma_period() -> usize {
    20
}

fn default_rsi_period() -> usize {
    14
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaFilter {
    #[serde(default = "default_ma_period")]
    pub period: usize,
    #[serde(default)]
    pub relation: MaRelation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaRelation {
    #[default]
    Above,
    Below,
    CrossAbove,
    CrossBelow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiFilter {
    #[serde(default = "default_rsi_period")]
    pub period: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdFilter {
    #[serde(default)]
    pub condition: MacdCondition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdCondition {
    #[default]
    GoldenCross,
    DeadCross,
    Positive,
    Negative,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KdjFilter {
    #[serde(default)]
    pub condition: KdjCondition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdjCondition {
    #[default]
    GoldenCross,
    DeadCross,
    Oversold,
    Overbought,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeFilter {
    #[serde(default)]
    pub condition: VolumeCondition,
    /// Percent change for increase/decrease, average length in days for
    /// above_ma/below_ma.
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeCondition {
    #[default]
    Increase,
    Decrease,
    AboveMa,
    BelowMa,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BollingerFilter {
    #[serde(default)]
    pub condition: BollingerCondition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BollingerCondition {
    #[default]
    UpperBreak,
    LowerBreak,
    MiddleCrossAbove,
    MiddleCrossBelow,
    Squeeze,
}

fn macd_default(field: IndicatorField) -> Operand {
    Operand::indicator(
        IndicatorType::Macd {
            fast: macd::DEFAULT_FAST,
            slow: macd::DEFAULT_SLOW,
            signal: macd::DEFAULT_SIGNAL,
        },
        field,
    )
}

fn kdj_default(field: IndicatorField) -> Operand {
    Operand::indicator(
        IndicatorType::Kdj {
            period: kdj::DEFAULT_PERIOD,
            k_smooth: kdj::DEFAULT_K_SMOOTH,
            d_smooth: kdj::DEFAULT_D_SMOOTH,
        },
        field,
    )
}

fn bollinger_default(field: IndicatorField) -> Operand {
    Operand::indicator(
        IndicatorType::Bollinger {
            period: bollinger::DEFAULT_PERIOD,
            width_x100: bollinger::DEFAULT_WIDTH_X100,
        },
        field,
    )
}

fn compare(left: Operand, comparator: Comparator, right: f64) -> Criterion {
    Criterion::Compare {
        left,
        comparator,
        right: Operand::Constant(right),
    }
}

fn cross(left: Operand, right: Operand, direction: Direction) -> Criterion {
    Criterion::Cross {
        left,
        right,
        direction,
    }
}

fn leaf(id: &str, criterion: Criterion) -> FilterExpr {
    FilterExpr::Criterion(CriterionNode::with_id(id, criterion))
}

fn both(id: &str, first: Criterion, second: Criterion) -> FilterExpr {
    FilterExpr::And(vec![
        leaf(&format!("{}.1", id), first),
        leaf(&format!("{}.2", id), second),
    ])
}

fn out_of_range(field: &str, reason: String) -> ScreenerError {
    ScreenerError::FilterInvalid {
        reason: format!("preset {}: {}", field, reason),
    }
}

impl FilterPreset {
    pub fn to_expr(&self) -> Result<FilterExpr, ScreenerError> {
        let mut parts = Vec::new();

        if let Some(price) = &self.price {
            if price.min.is_some() || price.max.is_some() {
                parts.push(leaf(
                    "price",
                    Criterion::Range {
                        operand: Operand::Close,
                        low: price.min,
                        high: price.max,
                    },
                ));
            }
        }

        if let Some(ma) = &self.ma {
            if !(5..=120).contains(&ma.period) {
                return Err(out_of_range("ma.period", format!("{} not in 5..=120", ma.period)));
            }
            let sma = Operand::sma(ma.period);
            let criterion = match ma.relation {
                MaRelation::Above => Criterion::Compare {
                    left: Operand::Close,
                    comparator: Comparator::Gt,
                    right: sma,
                },
                MaRelation::Below => Criterion::Compare {
                    left: Operand::Close,
                    comparator: Comparator::Lt,
                    right: sma,
                },
                MaRelation::CrossAbove => cross(Operand::Close, sma, Direction::Up),
                MaRelation::CrossBelow => cross(Operand::Close, sma, Direction::Down),
            };
            parts.push(leaf("ma", criterion));
        }

        if let Some(rsi) = &self.rsi {
            if !(6..=24).contains(&rsi.period) {
                return Err(out_of_range("rsi.period", format!("{} not in 6..=24", rsi.period)));
            }
            for bound in rsi.min.iter().chain(rsi.max.iter()) {
                if !(0.0..=100.0).contains(bound) {
                    return Err(out_of_range("rsi", format!("bound {} not in 0..=100", bound)));
                }
            }
            if rsi.min.is_some() || rsi.max.is_some() {
                parts.push(leaf(
                    "rsi",
                    Criterion::Range {
                        operand: Operand::indicator(
                            IndicatorType::Rsi(rsi.period),
                            IndicatorField::Value,
                        ),
                        low: rsi.min,
                        high: rsi.max,
                    },
                ));
            }
        }

        if let Some(m) = &self.macd {
            let line = macd_default(IndicatorField::MacdLine);
            let signal = macd_default(IndicatorField::MacdSignal);
            let histogram = macd_default(IndicatorField::MacdHistogram);
            parts.push(match m.condition {
                MacdCondition::GoldenCross => leaf("macd", cross(line, signal, Direction::Up)),
                MacdCondition::DeadCross => leaf("macd", cross(line, signal, Direction::Down)),
                MacdCondition::Positive => both(
                    "macd",
                    compare(line, Comparator::Gt, 0.0),
                    compare(histogram, Comparator::Gt, 0.0),
                ),
                MacdCondition::Negative => both(
                    "macd",
                    compare(line, Comparator::Lt, 0.0),
                    compare(histogram, Comparator::Lt, 0.0),
                ),
            });
        }

        if let Some(k) = &self.kdj {
            let k_line = kdj_default(IndicatorField::KdjK);
            let d_line = kdj_default(IndicatorField::KdjD);
            parts.push(match k.condition {
                KdjCondition::GoldenCross => leaf("kdj", cross(k_line, d_line, Direction::Up)),
                KdjCondition::DeadCross => leaf("kdj", cross(k_line, d_line, Direction::Down)),
                KdjCondition::Oversold => both(
                    "kdj",
                    compare(k_line, Comparator::Lt, KDJ_OVERSOLD),
                    compare(d_line, Comparator::Lt, KDJ_OVERSOLD),
                ),
                KdjCondition::Overbought => both(
                    "kdj",
                    compare(k_line, Comparator::Gt, KDJ_OVERBOUGHT),
                    compare(d_line, Comparator::Gt, KDJ_OVERBOUGHT),
                ),
            });
        }

        if let Some(v) = &self.volume {
            let criterion = match v.condition {
                VolumeCondition::Increase | VolumeCondition::Decrease => {
                    let pct = v.threshold.unwrap_or(DEFAULT_VOLUME_CHANGE_PCT);
                    let (factor, direction) = if v.condition == VolumeCondition::Increase {
                        (1.0 + pct / 100.0, Direction::Up)
                    } else {
                        (1.0 - pct / 100.0, Direction::Down)
                    };
                    Criterion::VolumeChange {
                        lag: 1,
                        factor,
                        direction,
                    }
                }
                VolumeCondition::AboveMa | VolumeCondition::BelowMa => {
                    let days = match v.threshold {
                        Some(t) if t >= 1.0 => t.round() as usize,
                        _ => DEFAULT_VOLUME_MA_DAYS,
                    };
                    let comparator = if v.condition == VolumeCondition::AboveMa {
                        Comparator::Gt
                    } else {
                        Comparator::Lt
                    };
                    Criterion::Compare {
                        left: Operand::Volume,
                        comparator,
                        right: Operand::indicator(
                            IndicatorType::VolumeSma(days),
                            IndicatorField::Value,
                        ),
                    }
                }
            };
            parts.push(leaf("volume", criterion));
        }

        if let Some(b) = &self.bollinger {
            let criterion = match b.condition {
                BollingerCondition::UpperBreak => cross(
                    Operand::Close,
                    bollinger_default(IndicatorField::BollingerUpper),
                    Direction::Up,
                ),
                BollingerCondition::LowerBreak => cross(
                    Operand::Close,
                    bollinger_default(IndicatorField::BollingerLower),
                    Direction::Down,
                ),
                BollingerCondition::MiddleCrossAbove => cross(
                    Operand::Close,
                    bollinger_default(IndicatorField::BollingerMiddle),
                    Direction::Up,
                ),
                BollingerCondition::MiddleCrossBelow => cross(
                    Operand::Close,
                    bollinger_default(IndicatorField::BollingerMiddle),
                    Direction::Down,
                ),
                BollingerCondition::Squeeze => Criterion::Squeeze {
                    period: bollinger::DEFAULT_PERIOD,
                    width: bollinger::DEFAULT_WIDTH_X100 as f64 / 100.0,
                    ratio: SQUEEZE_RATIO,
                },
            };
            parts.push(leaf("bollinger", criterion));
        }

        let expr = match parts.len() {
            0 => {
                return Err(ScreenerError::FilterInvalid {
                    reason: "preset selects no filters".into(),
                });
            }
            1 => parts.remove(0),
            _ => match self.logic {
                Logic::And => FilterExpr::And(parts),
                Logic::Or => FilterExpr::Or(parts),
            },
        };
        expr.validate()?;
        Ok(expr)
    }
}

/// A JSON filter file holds either a filter tree or a preset.
pub fn parse_filter_json(json: &str) -> Result<FilterExpr, ScreenerError> {
    match FilterExpr::from_json(json) {
        Ok(expr) => Ok(expr),
        Err(tree_err) => match serde_json::from_str::<FilterPreset>(json) {
            Ok(preset) => preset.to_expr(),
            Err(_) => Err(tree_err),
        },
    }
}
