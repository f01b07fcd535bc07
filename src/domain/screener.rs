//! Screening orchestrator.
//!
//! Fans one filter out over a universe of symbols. Each symbol is fetched,
//! validated, computed and evaluated on its own task; a failure in one
//! symbol is recorded on its result and never stops the pass.
//!
//! Concurrency is bounded by a semaphore. Fetches run on the blocking pool
//! under a per-symbol timeout, and so does the CPU-bound evaluation. A
//! timed-out fetch is abandoned, not interrupted: the blocking call finishes
//! in the background and its result is dropped.

use crate::domain::code_data::CodeData;
use crate::domain::error::{DataError, ScreenerError};
use crate::domain::filter::FilterExpr;
use crate::domain::filter_eval::{Evidence, Outcome, evaluate};
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator_helpers::extract_indicators;
use crate::domain::ohlcv::{OhlcvBar, validate_bars};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenConfig {
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    /// Bars back from the latest one; 0 evaluates the latest bar.
    pub lookback_offset: usize,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            lookback_offset: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreenRequest {
    pub codes: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub expr: FilterExpr,
}

/// Cooperative cancellation shared between the caller and a running screen.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningResult {
    pub code: String,
    pub matched: bool,
    pub insufficient_data: bool,
    pub evidence: BTreeMap<String, Evidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bars: usize,
    pub as_of: Option<NaiveDate>,
}

impl ScreeningResult {
    fn failed(code: String, error: String) -> Self {
        Self {
            code,
            matched: false,
            insufficient_data: true,
            evidence: BTreeMap::new(),
            error: Some(error),
            bars: 0,
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenReport {
    /// Completed symbols in input order.
    pub results: Vec<ScreeningResult>,
    pub cancelled: bool,
    pub total: usize,
    pub elapsed_ms: u64,
}

impl ScreenReport {
    pub fn matches(&self) -> impl Iterator<Item = &ScreeningResult> {
        self.results.iter().filter(|r| r.matched)
    }

    pub fn match_count(&self) -> usize {
        self.matches().count()
    }

    pub fn into_output(self, include_all: bool) -> Vec<ScreeningResult> {
        if include_all {
            self.results
        } else {
            self.results.into_iter().filter(|r| r.matched).collect()
        }
    }
}

pub struct Screener<D: DataPort + 'static> {
    data_port: Arc<D>,
    config: ScreenConfig,
}

impl<D: DataPort + 'static> Screener<D> {
    pub fn new(data_port: Arc<D>, config: ScreenConfig) -> Self {
        Self { data_port, config }
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    /// Screen every code in `request`. Validation errors abort before any
    /// fetch; cancellation returns whatever finished, with `cancelled` set.
    pub async fn run(
        &self,
        request: ScreenRequest,
        cancel: &CancelToken,
    ) -> Result<ScreenReport, ScreenerError> {
        request.expr.validate()?;
        if request.start_date > request.end_date {
            return Err(ScreenerError::ConfigInvalid {
                section: "screen".to_string(),
                key: "start_date".to_string(),
                reason: "start_date must not be after end_date".to_string(),
            });
        }

        let started = Instant::now();
        let total = request.codes.len();
        let expr = Arc::new(request.expr);
        let indicators: Arc<[IndicatorType]> = extract_indicators(&expr).into_iter().collect();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        info!(
            symbols = total,
            filter = %expr,
            concurrency = self.config.concurrency,
            "screen started"
        );

        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<ScreeningResult>> = vec![None; total];
        let mut cancelled = cancel.is_cancelled();

        for (position, code) in request.codes.into_iter().enumerate() {
            if cancelled {
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = SymbolJob {
                code,
                start_date: request.start_date,
                end_date: request.end_date,
                expr: Arc::clone(&expr),
                indicators: Arc::clone(&indicators),
                config: self.config,
            };
            let data_port = Arc::clone(&self.data_port);
            tasks.spawn(async move {
                let _permit = permit;
                (position, job.run(data_port).await)
            });
        }

        if cancelled {
            tasks.abort_all();
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((position, result))) => slots[position] = Some(result),
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!(error = %e, "screening task failed"),
                },
            }
        }

        let results: Vec<ScreeningResult> = slots.into_iter().flatten().collect();
        let report = ScreenReport {
            total,
            cancelled,
            elapsed_ms: started.elapsed().as_millis() as u64,
            results,
        };

        info!(
            symbols = total,
            completed = report.results.len(),
            matched = report.match_count(),
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "screen finished"
        );
        Ok(report)
    }
}

struct SymbolJob {
    code: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    expr: Arc<FilterExpr>,
    indicators: Arc<[IndicatorType]>,
    config: ScreenConfig,
}

impl SymbolJob {
    async fn run<D: DataPort + 'static>(self, data_port: Arc<D>) -> ScreeningResult {
        let bars = match self.fetch(data_port).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(code = %self.code, error = %e, "symbol skipped");
                return ScreeningResult::failed(self.code, e.to_string());
            }
        };

        let SymbolJob {
            code,
            expr,
            indicators,
            config,
            ..
        } = self;
        let label = code.clone();
        let evaluated = tokio::task::spawn_blocking(move || {
            screen_bars(code, bars, &expr, &indicators, config.lookback_offset)
        })
        .await;

        match evaluated {
            Ok(result) => {
                debug!(
                    code = %result.code,
                    bars = result.bars,
                    matched = result.matched,
                    insufficient = result.insufficient_data,
                    "symbol evaluated"
                );
                result
            }
            Err(e) => {
                warn!(code = %label, error = %e, "evaluation failed");
                ScreeningResult::failed(label, format!("evaluation failed: {}", e))
            }
        }
    }

    async fn fetch<D: DataPort + 'static>(
        &self,
        data_port: Arc<D>,
    ) -> Result<Vec<OhlcvBar>, DataError> {
        let code = self.code.clone();
        let (start_date, end_date) = (self.start_date, self.end_date);
        let handle = tokio::task::spawn_blocking(move || {
            data_port.fetch_ohlcv(&code, start_date, end_date)
        });

        let bars = match tokio::time::timeout(self.config.fetch_timeout, handle).await {
            Err(_) => {
                return Err(DataError::Timeout {
                    millis: self.config.fetch_timeout.as_millis() as u64,
                });
            }
            Ok(Err(join)) => return Err(DataError::Fetch(join.to_string())),
            Ok(Ok(Err(e))) => return Err(DataError::Fetch(e.to_string())),
            Ok(Ok(Ok(bars))) => bars,
        };

        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        validate_bars(&bars)?;
        Ok(bars)
    }
}

/// Evaluate `expr` over already fetched bars, `lookback_offset` bars back
/// from the latest one. Bars are assumed valid.
pub fn screen_bars(
    code: String,
    bars: Vec<OhlcvBar>,
    expr: &FilterExpr,
    indicators: &[IndicatorType],
    lookback_offset: usize,
) -> ScreeningResult {
    let data = CodeData::new(code, bars).with_indicators(indicators.iter().copied());
    let bar_count = data.bar_count();

    let Some(index) = data.index_from_end(lookback_offset) else {
        return ScreeningResult {
            code: data.code,
            matched: false,
            insufficient_data: true,
            evidence: BTreeMap::new(),
            error: None,
            bars: bar_count,
            as_of: None,
        };
    };

    let evaluation = evaluate(expr, &data, index);
    ScreeningResult {
        as_of: Some(data.ohlcv[index].date),
        code: data.code,
        matched: evaluation.outcome.is_match(),
        insufficient_data: evaluation.outcome == Outcome::InsufficientData,
        evidence: evaluation.evidence,
        error: None,
        bars: bar_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter_parser::parse;
    use crate::domain::indicator::test_support::make_bars;
    use std::collections::HashMap;

    struct FixedPort {
        series: HashMap<String, Vec<OhlcvBar>>,
    }

    impl FixedPort {
        fn new(entries: &[(&str, Vec<OhlcvBar>)]) -> Self {
            Self {
                series: entries
                    .iter()
                    .map(|(code, bars)| (code.to_string(), bars.clone()))
                    .collect(),
            }
        }
    }

    impl DataPort for FixedPort {
        fn fetch_ohlcv(
            &self,
            code: &str,
            _start_date: NaiveDate,
            _end_date: NaiveDate,
        ) -> Result<Vec<OhlcvBar>, ScreenerError> {
            self.series
                .get(code)
                .cloned()
                .ok_or_else(|| ScreenerError::NoData {
                    code: code.to_string(),
                })
        }

        fn list_symbols(&self) -> Result<Vec<String>, ScreenerError> {
            let mut codes: Vec<String> = self.series.keys().cloned().collect();
            codes.sort();
            Ok(codes)
        }
    }

    fn request(codes: &[&str], filter: &str) -> ScreenRequest {
        ScreenRequest {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            expr: parse(filter).unwrap(),
        }
    }

    fn rising(n: usize) -> Vec<OhlcvBar> {
        make_bars(&(0..n).map(|i| 10.0 + i as f64).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let port = Arc::new(FixedPort::new(&[
            ("A", rising(30)),
            ("B", rising(3)),
            ("C", rising(30)),
        ]));
        let screener = Screener::new(port, ScreenConfig::default());
        let report = screener
            .run(request(&["C", "B", "A"], "ABOVE(close, SMA(5))"), &CancelToken::new())
            .await
            .unwrap();

        let codes: Vec<&str> = report.results.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["C", "B", "A"]);
        assert!(report.results[0].matched);
        assert!(report.results[1].insufficient_data);
        assert_eq!(report.match_count(), 2);
        assert!(!report.cancelled);
        assert_eq!(report.total, 3);
    }

    #[tokio::test]
    async fn fetch_error_is_isolated() {
        let port = Arc::new(FixedPort::new(&[("A", rising(30))]));
        let screener = Screener::new(port, ScreenConfig::default());
        let report = screener
            .run(request(&["A", "MISSING"], "ABOVE(close, 0)"), &CancelToken::new())
            .await
            .unwrap();

        assert!(report.results[0].matched);
        let missing = &report.results[1];
        assert!(!missing.matched);
        assert!(missing.insufficient_data);
        assert!(missing.error.as_deref().unwrap().contains("no data for MISSING"));
    }

    #[tokio::test]
    async fn malformed_bars_are_a_data_error() {
        let mut bars = rising(10);
        bars[4].date = bars[3].date;
        let port = Arc::new(FixedPort::new(&[("A", bars)]));
        let screener = Screener::new(port, ScreenConfig::default());
        let report = screener
            .run(request(&["A"], "ABOVE(close, 0)"), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            report.results[0].error.as_deref(),
            Some("dates not strictly increasing at index 4")
        );
    }

    #[tokio::test]
    async fn invalid_filter_aborts() {
        let port = Arc::new(FixedPort::new(&[("A", rising(30))]));
        let screener = Screener::new(port, ScreenConfig::default());
        let err = screener
            .run(request(&["A"], "BETWEEN(close, 30, 10)"), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let port = Arc::new(FixedPort::new(&[("A", rising(30))]));
        let screener = Screener::new(port, ScreenConfig::default());
        let token = CancelToken::new();
        token.cancel();
        let report = screener
            .run(request(&["A"], "ABOVE(close, 0)"), &token)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(report.total, 1);
    }

    #[test]
    fn lookback_offset_moves_the_index() {
        let expr = parse("ABOVE(close, 12)").unwrap();
        let latest = screen_bars("A".into(), rising(5), &expr, &[], 0);
        assert!(latest.matched);
        assert_eq!(latest.as_of, Some(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));

        let earlier = screen_bars("A".into(), rising(5), &expr, &[], 3);
        assert!(!earlier.matched);
        assert!(!earlier.insufficient_data);

        let beyond = screen_bars("A".into(), rising(5), &expr, &[], 5);
        assert!(beyond.insufficient_data);
        assert_eq!(beyond.as_of, None);
        assert_eq!(beyond.bars, 5);
    }

    #[test]
    fn output_filtering() {
        let report = ScreenReport {
            results: vec![
                screen_bars("A".into(), rising(5), &parse("ABOVE(close, 0)").unwrap(), &[], 0),
                screen_bars("B".into(), rising(5), &parse("BELOW(close, 0)").unwrap(), &[], 0),
            ],
            cancelled: false,
            total: 2,
            elapsed_ms: 0,
        };
        assert_eq!(report.clone().into_output(false).len(), 1);
        assert_eq!(report.into_output(true).len(), 2);
    }
}
