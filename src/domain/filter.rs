//! Filter expression AST.
//!
//! - `Operand`: what can be compared (price fields, constants, indicators)
//! - `IndicatorRef`: an indicator with the field to read from it
//! - `Criterion`: a leaf predicate
//! - `FilterExpr`: the logical tree over criteria
//!
//! The JSON wire form is the serde representation of these types. Operands
//! travel as DSL strings (`"RSI(14)"`, `"close"`, `"70"`), so the same parser
//! backs both the text and JSON forms.

use crate::domain::error::{ParseError, ScreenerError};
use crate::domain::filter_parser;
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator_helpers::fields_for;
use crate::domain::signal::{Direction, Zone};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operand {
    Open,
    High,
    Low,
    Close,
    Volume,
    Constant(f64),
    Indicator(IndicatorRef),
}

impl Operand {
    pub fn is_price(&self) -> bool {
        matches!(
            self,
            Operand::Open | Operand::High | Operand::Low | Operand::Close
        )
    }

    pub fn sma(period: usize) -> Self {
        Operand::Indicator(IndicatorRef {
            indicator_type: IndicatorType::Sma(period),
            field: IndicatorField::Value,
        })
    }

    pub fn indicator(indicator_type: IndicatorType, field: IndicatorField) -> Self {
        Operand::Indicator(IndicatorRef {
            indicator_type,
            field,
        })
    }

    /// Bars this operand needs before it is defined.
    pub fn required_bars(&self) -> usize {
        match self {
            Operand::Indicator(r) => r.indicator_type.required_bars(),
            _ => 1,
        }
    }
}

impl TryFrom<String> for Operand {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        filter_parser::parse_operand(&value)
    }
}

impl From<Operand> for String {
    fn from(value: Operand) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndicatorRef {
    pub indicator_type: IndicatorType,
    pub field: IndicatorField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    KdjK,
    KdjD,
    KdjJ,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
    /// upper - lower
    BollingerWidth,
}

impl IndicatorRef {
    fn field_matches(&self) -> bool {
        fields_for(self.indicator_type).contains(&self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Comparator::Gt => left > right,
            Comparator::Ge => left >= right,
            Comparator::Lt => left < right,
            Comparator::Le => left <= right,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Comparator::Gt => "ABOVE",
            Comparator::Ge => "AT_LEAST",
            Comparator::Lt => "BELOW",
            Comparator::Le => "AT_MOST",
        }
    }
}

fn default_squeeze_period() -> usize {
    20
}

fn default_squeeze_width() -> f64 {
    2.0
}

fn default_squeeze_ratio() -> f64 {
    0.9
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum Criterion {
    Compare {
        left: Operand,
        comparator: Comparator,
        right: Operand,
    },
    Range {
        operand: Operand,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        high: Option<f64>,
    },
    Cross {
        left: Operand,
        right: Operand,
        direction: Direction,
    },
    Zone {
        operand: Operand,
        low: f64,
        high: f64,
        zone: Zone,
        #[serde(default)]
        entered: bool,
    },
    VolumeChange {
        lag: usize,
        factor: f64,
        direction: Direction,
    },
    Squeeze {
        #[serde(default = "default_squeeze_period")]
        period: usize,
        #[serde(default = "default_squeeze_width")]
        width: f64,
        #[serde(default = "default_squeeze_ratio")]
        ratio: f64,
    },
}

/// Band width multiplier in hundredths. Widths must be positive, finite and
/// an exact number of hundredths.
pub fn bollinger_width_x100(width: f64) -> Result<u32, String> {
    if !(width.is_finite() && width > 0.0) {
        return Err(format!("band width {} must be positive", width));
    }
    let scaled = width * 100.0;
    if scaled > u32::MAX as f64 {
        return Err(format!("band width {} is out of range", width));
    }
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 {
        return Err(format!("band width {} must be a whole number of hundredths", width));
    }
    Ok(rounded as u32)
}

/// Bollinger indicator key for a band width given as a float multiplier.
/// Callers check the width with [`bollinger_width_x100`] first; an invalid
/// width maps to zero, which validation rejects.
pub fn bollinger_type(period: usize, width: f64) -> IndicatorType {
    IndicatorType::Bollinger {
        period,
        width_x100: bollinger_width_x100(width).unwrap_or(0),
    }
}

impl Criterion {
    /// Every operand the criterion reads, including implied ones.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Criterion::Compare { left, right, .. } | Criterion::Cross { left, right, .. } => {
                vec![left.clone(), right.clone()]
            }
            Criterion::Range { operand, .. } | Criterion::Zone { operand, .. } => {
                vec![operand.clone()]
            }
            Criterion::VolumeChange { .. } => vec![Operand::Volume],
            Criterion::Squeeze { period, width, .. } => vec![Operand::indicator(
                bollinger_type(*period, *width),
                IndicatorField::BollingerWidth,
            )],
        }
    }

    /// Bars of history needed to evaluate at a single index.
    pub fn required_bars(&self) -> usize {
        let widest = self
            .operands()
            .iter()
            .map(Operand::required_bars)
            .max()
            .unwrap_or(1);
        match self {
            Criterion::Compare { .. } | Criterion::Range { .. } => widest,
            Criterion::Zone { entered: false, .. } => widest,
            Criterion::Cross { .. } | Criterion::Zone { entered: true, .. } => widest + 1,
            Criterion::Squeeze { .. } => widest + 1,
            Criterion::VolumeChange { lag, .. } => lag + 1,
        }
    }

    pub fn validate(&self) -> Result<(), ScreenerError> {
        for operand in self.operands() {
            validate_operand(&operand)?;
        }
        match self {
            Criterion::Compare { .. } | Criterion::Cross { .. } => Ok(()),
            Criterion::Range { low, high, .. } => {
                if low.is_none() && high.is_none() {
                    return Err(ScreenerError::FilterInvalid {
                        reason: format!("{}: range needs at least one bound", self),
                    });
                }
                for bound in low.iter().chain(high.iter()) {
                    finite(*bound, self)?;
                }
                if let (Some(lo), Some(hi)) = (low, high) {
                    check_order(*lo, *hi, self)?;
                }
                Ok(())
            }
            Criterion::Zone { low, high, .. } => {
                finite(*low, self)?;
                finite(*high, self)?;
                check_order(*low, *high, self)
            }
            Criterion::VolumeChange { lag, factor, .. } => {
                if *lag == 0 {
                    return invalid(self, "lag must be at least 1");
                }
                if !(factor.is_finite() && *factor > 0.0) {
                    return invalid(self, "factor must be positive");
                }
                Ok(())
            }
            Criterion::Squeeze { width, ratio, .. } => {
                if let Err(reason) = bollinger_width_x100(*width) {
                    return invalid(self, &reason);
                }
                if !(ratio.is_finite() && *ratio > 0.0) {
                    return invalid(self, "ratio must be positive");
                }
                Ok(())
            }
        }
    }
}

fn invalid(criterion: &Criterion, reason: &str) -> Result<(), ScreenerError> {
    Err(ScreenerError::FilterInvalid {
        reason: format!("{}: {}", criterion, reason),
    })
}

fn finite(value: f64, criterion: &Criterion) -> Result<(), ScreenerError> {
    if value.is_finite() {
        Ok(())
    } else {
        invalid(criterion, "bounds must be finite")
    }
}

fn check_order(low: f64, high: f64, criterion: &Criterion) -> Result<(), ScreenerError> {
    if low > high {
        return Err(ScreenerError::FilterConflict {
            criterion: criterion.to_string(),
            reason: format!("low bound {} exceeds high bound {}", low, high),
        });
    }
    Ok(())
}

fn validate_operand(operand: &Operand) -> Result<(), ScreenerError> {
    let bad = |reason: String| {
        Err(ScreenerError::FilterInvalid {
            reason: format!("{}: {}", operand, reason),
        })
    };
    match operand {
        Operand::Constant(v) if !v.is_finite() => bad("constant must be finite".into()),
        Operand::Indicator(r) => {
            if !r.field_matches() {
                return bad(format!("{:?} is not a field of {}", r.field, r.indicator_type));
            }
            match r.indicator_type {
                IndicatorType::Sma(n)
                | IndicatorType::Ema(n)
                | IndicatorType::Rsi(n)
                | IndicatorType::VolumeSma(n)
                    if n == 0 =>
                {
                    bad("period must be positive".into())
                }
                IndicatorType::Macd { fast, slow, signal } => {
                    if fast == 0 || slow == 0 || signal == 0 {
                        bad("periods must be positive".into())
                    } else if fast >= slow {
                        bad(format!("fast period {} must be below slow period {}", fast, slow))
                    } else {
                        Ok(())
                    }
                }
                IndicatorType::Kdj {
                    period,
                    k_smooth,
                    d_smooth,
                } if period == 0 || k_smooth == 0 || d_smooth == 0 => {
                    bad("periods must be positive".into())
                }
                IndicatorType::Bollinger { period, width_x100 } => {
                    if period == 0 {
                        bad("period must be positive".into())
                    } else if width_x100 == 0 {
                        bad("band width must be positive".into())
                    } else {
                        Ok(())
                    }
                }
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub criterion: Criterion,
}

impl CriterionNode {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            id: None,
            criterion,
        }
    }

    pub fn with_id(id: impl Into<String>, criterion: Criterion) -> Self {
        Self {
            id: Some(id.into()),
            criterion,
        }
    }

    /// Evidence key: the explicit id, else the canonical DSL rendering.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self.criterion.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Consecutive { expr: Box<FilterExpr>, bars: usize },
    AnyOf { expr: Box<FilterExpr>, bars: usize },
    Criterion(CriterionNode),
}

impl FilterExpr {
    pub fn leaf(criterion: Criterion) -> Self {
        FilterExpr::Criterion(CriterionNode::new(criterion))
    }

    pub fn from_json(json: &str) -> Result<Self, ScreenerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ScreenerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Leaves in depth-first order.
    pub fn criteria(&self) -> Vec<&CriterionNode> {
        let mut out = Vec::new();
        self.collect_criteria(&mut out);
        out
    }

    fn collect_criteria<'a>(&'a self, out: &mut Vec<&'a CriterionNode>) {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for child in children {
                    child.collect_criteria(out);
                }
            }
            FilterExpr::Not(inner) => inner.collect_criteria(out),
            FilterExpr::Consecutive { expr, .. } | FilterExpr::AnyOf { expr, .. } => {
                expr.collect_criteria(out)
            }
            FilterExpr::Criterion(node) => out.push(node),
        }
    }

    /// Bars of history needed for every leaf to be defined at the target bar.
    pub fn required_bars(&self) -> usize {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => children
                .iter()
                .map(FilterExpr::required_bars)
                .max()
                .unwrap_or(0),
            FilterExpr::Not(inner) => inner.required_bars(),
            FilterExpr::Consecutive { expr, bars } | FilterExpr::AnyOf { expr, bars } => {
                expr.required_bars() + bars.saturating_sub(1)
            }
            FilterExpr::Criterion(node) => node.criterion.required_bars(),
        }
    }

    /// Structural validation. Must pass before any symbol is screened.
    pub fn validate(&self) -> Result<(), ScreenerError> {
        self.validate_node()?;
        let mut seen = HashSet::new();
        for node in self.criteria() {
            if let Some(id) = &node.id {
                if id.trim().is_empty() {
                    return Err(ScreenerError::FilterInvalid {
                        reason: "criterion id must not be empty".into(),
                    });
                }
                if !seen.insert(id.as_str()) {
                    return Err(ScreenerError::FilterInvalid {
                        reason: format!("duplicate criterion id '{}'", id),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_node(&self) -> Result<(), ScreenerError> {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                if children.is_empty() {
                    return Err(ScreenerError::FilterInvalid {
                        reason: "AND/OR needs at least one child".into(),
                    });
                }
                children.iter().try_for_each(FilterExpr::validate_node)
            }
            FilterExpr::Not(inner) => inner.validate_node(),
            FilterExpr::Consecutive { expr, bars } | FilterExpr::AnyOf { expr, bars } => {
                if *bars == 0 {
                    return Err(ScreenerError::FilterInvalid {
                        reason: format!("{}: bar count must be at least 1", self),
                    });
                }
                expr.validate_node()
            }
            FilterExpr::Criterion(node) => node.criterion.validate(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Open => write!(f, "open"),
            Operand::High => write!(f, "high"),
            Operand::Low => write!(f, "low"),
            Operand::Close => write!(f, "close"),
            Operand::Volume => write!(f, "volume"),
            Operand::Constant(v) => write!(f, "{}", v),
            Operand::Indicator(r) => write!(f, "{}", r),
        }
    }
}

impl fmt::Display for IndicatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use IndicatorField as F;
        match (self.indicator_type, self.field) {
            (IndicatorType::Sma(n), _) => write!(f, "SMA({})", n),
            (IndicatorType::Ema(n), _) => write!(f, "EMA({})", n),
            (IndicatorType::Rsi(n), _) => write!(f, "RSI({})", n),
            (IndicatorType::VolumeSma(n), _) => write!(f, "VOLUME_SMA({})", n),
            (IndicatorType::Macd { fast, slow, signal }, field) => {
                let name = match field {
                    F::MacdSignal => "MACD_SIGNAL",
                    F::MacdHistogram => "MACD_HISTOGRAM",
                    _ => "MACD_LINE",
                };
                write!(f, "{}({},{},{})", name, fast, slow, signal)
            }
            (
                IndicatorType::Kdj {
                    period,
                    k_smooth,
                    d_smooth,
                },
                field,
            ) => {
                let name = match field {
                    F::KdjD => "KDJ_D",
                    F::KdjJ => "KDJ_J",
                    _ => "KDJ_K",
                };
                write!(f, "{}({},{},{})", name, period, k_smooth, d_smooth)
            }
            (IndicatorType::Bollinger { period, width_x100 }, field) => {
                let name = match field {
                    F::BollingerUpper => "BOLLINGER_UPPER",
                    F::BollingerLower => "BOLLINGER_LOWER",
                    F::BollingerWidth => "BOLLINGER_WIDTH",
                    _ => "BOLLINGER_MIDDLE",
                };
                write!(f, "{}({},{})", name, period, width_x100 as f64 / 100.0)
            }
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Compare {
                left,
                comparator,
                right,
            } => write!(f, "{}({}, {})", comparator.keyword(), left, right),
            Criterion::Range {
                operand,
                low: Some(lo),
                high: Some(hi),
            } => write!(f, "BETWEEN({}, {}, {})", operand, lo, hi),
            Criterion::Range {
                operand,
                low: Some(lo),
                high: None,
            } => write!(f, "AT_LEAST({}, {})", operand, lo),
            Criterion::Range {
                operand,
                low: None,
                high: Some(hi),
            } => write!(f, "AT_MOST({}, {})", operand, hi),
            Criterion::Range { operand, .. } => write!(f, "BETWEEN({}, , )", operand),
            Criterion::Cross {
                left,
                right,
                direction,
            } => {
                let keyword = match direction {
                    Direction::Up => "CROSS_ABOVE",
                    Direction::Down => "CROSS_BELOW",
                };
                write!(f, "{}({}, {})", keyword, left, right)
            }
            Criterion::Zone {
                operand,
                low,
                high,
                zone,
                entered,
            } => {
                let keyword = if *entered { "ENTERS_ZONE" } else { "IN_ZONE" };
                write!(f, "{}({}, {}, {}, {})", keyword, operand, low, high, zone)
            }
            Criterion::VolumeChange {
                lag,
                factor,
                direction,
            } => {
                let keyword = match direction {
                    Direction::Up => "VOLUME_UP",
                    Direction::Down => "VOLUME_DOWN",
                };
                write!(f, "{}({}, {})", keyword, lag, factor)
            }
            Criterion::Squeeze {
                period,
                width,
                ratio,
            } => write!(f, "SQUEEZE({}, {}, {})", period, width, ratio),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, children: &[FilterExpr]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", child)?;
    }
    write!(f, ")")
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::And(children) => write_list(f, "AND", children),
            FilterExpr::Or(children) => write_list(f, "OR", children),
            FilterExpr::Not(inner) => write!(f, "NOT({})", inner),
            FilterExpr::Consecutive { expr, bars } => write!(f, "CONSECUTIVE({}, {})", expr, bars),
            FilterExpr::AnyOf { expr, bars } => write!(f, "ANY_OF({}, {})", expr, bars),
            FilterExpr::Criterion(node) => write!(f, "{}", node.criterion),
        }
    }
}
