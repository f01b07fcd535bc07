//! Filter evaluation engine.
//!
//! Evaluates a [`FilterExpr`] against one symbol's bars and pre-computed
//! indicator series at a single bar index.
//!
//! # Evaluation Semantics
//!
//! Every node yields one of three outcomes. A leaf whose inputs are
//! undefined at the index it reads is `InsufficientData`, never `Unmatched`.
//!
//! - `AND`: stops at the first child that is not `Matched` and returns it
//! - `OR`: `Matched` if any child matches; insufficient children count as
//!   unmatched unless every child is insufficient
//! - `NOT`: swaps matched/unmatched, keeps `InsufficientData`
//! - `CONSECUTIVE(e, N)`: `AND` of `e` over the N bars ending at the index
//! - `ANY_OF(e, N)`: `OR` of `e` over the (up to) N bars ending at the index
//! - Crossings and zone entries read the index and the bar before it

use crate::domain::code_data::CodeData;
use crate::domain::filter::{Criterion, FilterExpr, IndicatorField, Operand, bollinger_type};
use crate::domain::indicator_helpers::extract_field;
use crate::domain::signal::{self, Direction, SignalEvent, SignalKind};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Matched,
    Unmatched,
    InsufficientData,
}

impl Outcome {
    pub fn is_match(self) -> bool {
        self == Outcome::Matched
    }

    fn negate(self) -> Self {
        match self {
            Outcome::Matched => Outcome::Unmatched,
            Outcome::Unmatched => Outcome::Matched,
            Outcome::InsufficientData => Outcome::InsufficientData,
        }
    }
}

impl From<bool> for Outcome {
    fn from(matched: bool) -> Self {
        if matched {
            Outcome::Matched
        } else {
            Outcome::Unmatched
        }
    }
}

/// Snapshot of one criterion at the bar it was last evaluated on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub index: usize,
    pub date: NaiveDate,
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<SignalEvent>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub evidence: BTreeMap<String, Evidence>,
}

pub fn evaluate(expr: &FilterExpr, data: &CodeData, index: usize) -> Evaluation {
    let mut evidence = BTreeMap::new();
    let outcome = if index < data.bar_count() {
        eval_node(expr, data, index, &mut evidence)
    } else {
        Outcome::InsufficientData
    };
    Evaluation { outcome, evidence }
}

fn eval_node(
    expr: &FilterExpr,
    data: &CodeData,
    index: usize,
    evidence: &mut BTreeMap<String, Evidence>,
) -> Outcome {
    match expr {
        FilterExpr::And(children) => all_of(
            children.iter().map(|c| (c, index)),
            data,
            evidence,
        ),
        FilterExpr::Or(children) => one_of(
            children.iter().map(|c| (c, index)),
            data,
            evidence,
        ),
        FilterExpr::Not(inner) => eval_node(inner, data, index, evidence).negate(),
        FilterExpr::Consecutive { expr, bars } => {
            if *bars == 0 || index + 1 < *bars {
                return Outcome::InsufficientData;
            }
            all_of(
                (index + 1 - *bars..=index).map(|i| (expr.as_ref(), i)),
                data,
                evidence,
            )
        }
        FilterExpr::AnyOf { expr, bars } => {
            let start = index.saturating_sub(bars.saturating_sub(1));
            one_of(
                (start..=index).map(|i| (expr.as_ref(), i)),
                data,
                evidence,
            )
        }
        FilterExpr::Criterion(node) => {
            let key = node.key();
            let record = check_criterion(&node.criterion, data, index);
            let newer = evidence.get(&key).is_none_or(|e| e.index <= index);
            if newer {
                evidence.insert(
                    key,
                    Evidence {
                        index,
                        date: data.ohlcv[index].date,
                        value: record.value,
                        event: record.event,
                        outcome: record.outcome,
                    },
                );
            }
            record.outcome
        }
    }
}

fn all_of<'a, I>(items: I, data: &CodeData, evidence: &mut BTreeMap<String, Evidence>) -> Outcome
where
    I: IntoIterator<Item = (&'a FilterExpr, usize)>,
{
    for (expr, index) in items {
        let outcome = eval_node(expr, data, index, evidence);
        if outcome != Outcome::Matched {
            return outcome;
        }
    }
    Outcome::Matched
}

fn one_of<'a, I>(items: I, data: &CodeData, evidence: &mut BTreeMap<String, Evidence>) -> Outcome
where
    I: IntoIterator<Item = (&'a FilterExpr, usize)>,
{
    let mut all_insufficient = true;
    let mut any = false;
    for (expr, index) in items {
        any = true;
        match eval_node(expr, data, index, evidence) {
            Outcome::Matched => return Outcome::Matched,
            Outcome::Unmatched => all_insufficient = false,
            Outcome::InsufficientData => {}
        }
    }
    if any && all_insufficient {
        Outcome::InsufficientData
    } else {
        Outcome::Unmatched
    }
}

struct Check {
    outcome: Outcome,
    value: Option<f64>,
    event: Option<SignalEvent>,
}

fn check_criterion(criterion: &Criterion, data: &CodeData, index: usize) -> Check {
    let primary = primary_value(criterion, data, index);
    match decide(criterion, data, index) {
        Some((matched, event)) => Check {
            outcome: matched.into(),
            value: primary,
            event,
        },
        None => Check {
            outcome: Outcome::InsufficientData,
            value: primary,
            event: None,
        },
    }
}

/// The value reported as evidence for a criterion.
fn primary_value(criterion: &Criterion, data: &CodeData, index: usize) -> Option<f64> {
    match criterion {
        Criterion::VolumeChange { lag, .. } => volume_ratio(data, index, *lag),
        _ => criterion
            .operands()
            .first()
            .and_then(|op| resolve_operand(op, data, index)),
    }
}

/// `None` means some input was undefined.
fn decide(
    criterion: &Criterion,
    data: &CodeData,
    index: usize,
) -> Option<(bool, Option<SignalEvent>)> {
    match criterion {
        Criterion::Compare {
            left,
            comparator,
            right,
        } => {
            let l = resolve_operand(left, data, index)?;
            let r = resolve_operand(right, data, index)?;
            Some((comparator.apply(l, r), None))
        }
        Criterion::Range {
            operand,
            low,
            high,
        } => {
            let v = resolve_operand(operand, data, index)?;
            let above_low = low.is_none_or(|lo| v >= lo);
            let below_high = high.is_none_or(|hi| v <= hi);
            Some((above_low && below_high, None))
        }
        Criterion::Cross {
            left,
            right,
            direction,
        } => {
            let prev = index.checked_sub(1)?;
            let found = signal::crossing(
                (
                    resolve_operand(left, data, prev)?,
                    resolve_operand(right, data, prev)?,
                ),
                (
                    resolve_operand(left, data, index)?,
                    resolve_operand(right, data, index)?,
                ),
            );
            let kind = if left.is_price() || right.is_price() {
                SignalKind::Breakout
            } else {
                SignalKind::Crossover
            };
            let event = found
                .filter(|d| d == direction)
                .map(|direction| SignalEvent {
                    index,
                    kind,
                    direction,
                });
            Some((event.is_some(), event))
        }
        Criterion::Zone {
            operand,
            low,
            high,
            zone,
            entered,
        } => {
            let cur = resolve_operand(operand, data, index)?;
            if *entered {
                let prev = resolve_operand(operand, data, index.checked_sub(1)?)?;
                Some((signal::zone_entered(prev, cur, *low, *high) == Some(*zone), None))
            } else {
                Some((signal::classify(cur, *low, *high) == *zone, None))
            }
        }
        Criterion::VolumeChange {
            lag,
            factor,
            direction,
        } => {
            let ratio = volume_ratio(data, index, *lag)?;
            let matched = match direction {
                Direction::Up => ratio >= *factor,
                Direction::Down => ratio <= *factor,
            };
            Some((matched, None))
        }
        Criterion::Squeeze {
            period,
            width,
            ratio,
        } => {
            let band = Operand::indicator(
                bollinger_type(*period, *width),
                IndicatorField::BollingerWidth,
            );
            let today = resolve_operand(&band, data, index)?;
            let yesterday = resolve_operand(&band, data, index.checked_sub(1)?)?;
            Some((today < ratio * yesterday, None))
        }
    }
}

/// `volume[i] / volume[i - lag]`; undefined when the earlier volume is zero.
fn volume_ratio(data: &CodeData, index: usize, lag: usize) -> Option<f64> {
    let earlier = data.ohlcv.get(index.checked_sub(lag)?)?.volume;
    let now = data.ohlcv.get(index)?.volume;
    (earlier > 0.0).then(|| now / earlier)
}

pub fn resolve_operand(operand: &Operand, data: &CodeData, index: usize) -> Option<f64> {
    let bar = data.ohlcv.get(index)?;
    match operand {
        Operand::Open => Some(bar.open),
        Operand::High => Some(bar.high),
        Operand::Low => Some(bar.low),
        Operand::Close => Some(bar.close),
        Operand::Volume => Some(bar.volume),
        Operand::Constant(v) => Some(*v),
        Operand::Indicator(r) => {
            let value = data.indicators.get(&r.indicator_type)?.get(index)?;
            extract_field(value, r.field)
        }
    }
}
