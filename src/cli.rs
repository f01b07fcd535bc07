//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::code_data::CodeData;
use crate::domain::config_validation::{
    DataSource, FilterSource, ScreenSettings, validate_data_config, validate_screen_config,
};
use crate::domain::error::ScreenerError;
use crate::domain::filter::FilterExpr;
use crate::domain::filter_parser;
use crate::domain::indicator_helpers::{
    default_indicator_set, extract_indicators, recent_crosses, snapshot, zone_readings,
};
use crate::domain::ohlcv::validate_bars;
use crate::domain::preset::parse_filter_json;
use crate::domain::screener::{CancelToken, ScreenReport, ScreenRequest, Screener};
use crate::domain::signal::{Direction, Zone};
use crate::domain::universe::resolve_universe;
use crate::logging::{LogFormat, init_logging};
use crate::ports::data_port::DataPort;

/// Exit status of a screen interrupted with Ctrl-C.
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "stockscreen", version, about = "Technical-analysis stock screener")]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default, Clone)]
#[group(multiple = false)]
pub struct FilterArgs {
    /// Filter in the text DSL, e.g. "AND(ABOVE(RSI(14), 70), ABOVE(close, SMA(20)))"
    #[arg(long)]
    pub filter: Option<String>,

    /// JSON filter tree or legacy preset
    #[arg(long, value_name = "FILE")]
    pub filter_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Screen a universe of symbols
    Screen {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// Comma separated codes, overriding [screen] codes
        #[arg(long)]
        codes: Option<String>,
        /// Include non-matching symbols in the output
        #[arg(long)]
        all: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        /// Evaluate this many bars before the latest one
        #[arg(long)]
        lookback_offset: Option<usize>,
    },
    /// Parse and validate a filter without screening
    Validate {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show the latest indicator values for one symbol
    Indicators {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
        #[arg(long)]
        json: bool,
    },
    /// List the symbols the configured data source knows about
    ListSymbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Human
    });

    let outcome = match cli.command {
        Command::Screen {
            config,
            filter,
            codes,
            all,
            json,
            lookback_offset,
        } => run_screen(&config, &filter, codes.as_deref(), all, json, lookback_offset),
        Command::Validate { filter } => run_validate(&filter),
        Command::Indicators { config, code, json } => run_indicators(&config, &code, json),
        Command::ListSymbols { config } => run_list_symbols(&config),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            // Parse errors were already printed with their caret context.
            if !matches!(e, ScreenerError::FilterParse(_)) {
                eprintln!("error: {e}");
            }
            if e.is_validation() {
                tracing::debug!(error = %e, "filter rejected before screening");
            }
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ScreenerError> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

pub fn open_data_port(source: &DataSource) -> Result<Box<dyn DataPort>, ScreenerError> {
    match source {
        DataSource::Csv { dir } => {
            if !dir.is_dir() {
                return Err(ScreenerError::ConfigInvalid {
                    section: "data".to_string(),
                    key: "csv_dir".to_string(),
                    reason: format!("{} is not a directory", dir.display()),
                });
            }
            Ok(Box::new(CsvAdapter::new(dir.clone())))
        }
        #[cfg(feature = "sqlite")]
        DataSource::Sqlite { path, pool_size } => {
            use crate::adapters::sqlite_adapter::SqliteAdapter;
            Ok(Box::new(SqliteAdapter::open(path, *pool_size)?))
        }
        #[cfg(not(feature = "sqlite"))]
        DataSource::Sqlite { .. } => Err(ScreenerError::ConfigInvalid {
            section: "data".to_string(),
            key: "source".to_string(),
            reason: "built without the sqlite feature".to_string(),
        }),
    }
}

/// Parse a DSL filter, printing the caret context on failure.
pub fn parse_dsl(text: &str) -> Result<FilterExpr, ScreenerError> {
    filter_parser::parse(text).map_err(|e| {
        eprintln!("error: invalid filter\n{}", e.display_with_context(text));
        ScreenerError::from(e)
    })
}

pub fn read_filter_file(path: &Path) -> Result<FilterExpr, ScreenerError> {
    let json = fs::read_to_string(path)?;
    parse_filter_json(&json)
}

/// The filter from the command line, else the one named in the config.
pub fn load_filter(
    args: &FilterArgs,
    configured: Option<&FilterSource>,
) -> Result<FilterExpr, ScreenerError> {
    let expr = match (&args.filter, &args.filter_json, configured) {
        (Some(text), _, _) => parse_dsl(text)?,
        (None, Some(path), _) => read_filter_file(path)?,
        (None, None, Some(FilterSource::Dsl(text))) => parse_dsl(text)?,
        (None, None, Some(FilterSource::JsonFile(path))) => read_filter_file(path)?,
        (None, None, None) => {
            return Err(ScreenerError::ConfigMissing {
                section: "screen".to_string(),
                key: "filter".to_string(),
            });
        }
    };
    expr.validate()?;
    Ok(expr)
}

/// Resolve the universe and run one screen on a fresh runtime. Ctrl-C
/// cancels the screen and keeps the partial results.
pub fn screen_with_port<D: DataPort + 'static>(
    data_port: D,
    settings: &ScreenSettings,
    expr: FilterExpr,
    codes_override: Option<&str>,
) -> Result<ScreenReport, ScreenerError> {
    let codes = resolve_universe(&data_port, codes_override.or(settings.codes.as_deref()))?;
    let request = ScreenRequest {
        codes,
        start_date: settings.start_date,
        end_date: settings.end_date,
        expr,
    };
    let screener = Screener::new(Arc::new(data_port), settings.screen_config());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let report = runtime.block_on(async {
        let cancel = CancelToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling screen");
                on_interrupt.cancel();
            }
        });
        screener.run(request, &cancel).await
    });
    // Fetches that timed out or were cancelled may still be sleeping on the
    // blocking pool; do not wait for them.
    runtime.shutdown_background();
    report
}

fn run_screen(
    config_path: &Path,
    filter_args: &FilterArgs,
    codes_override: Option<&str>,
    all: bool,
    json: bool,
    lookback_offset: Option<usize>,
) -> Result<ExitCode, ScreenerError> {
    let config = load_config(config_path)?;
    let source = validate_data_config(&config)?;
    let mut settings = validate_screen_config(&config)?;
    if let Some(offset) = lookback_offset {
        settings.lookback_offset = offset;
    }
    let include_all = all || settings.include_all;

    let expr = load_filter(filter_args, settings.filter.as_ref())?;
    let data_port = open_data_port(&source)?;
    let report = screen_with_port(data_port, &settings, expr, codes_override)?;

    let cancelled = report.cancelled;
    print!("{}", render_report(report, include_all, json)?);

    Ok(if cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    })
}

/// Screen output: a JSON document, or one line per symbol with the
/// evidence of matches indented beneath it.
pub fn render_report(
    report: ScreenReport,
    include_all: bool,
    json: bool,
) -> Result<String, ScreenerError> {
    let ScreenReport {
        cancelled,
        total,
        elapsed_ms,
        ..
    } = report;
    let matched = report.match_count();
    let completed = report.results.len();
    let results = report.into_output(include_all);

    if json {
        let out = ScreenReport {
            results,
            cancelled,
            total,
            elapsed_ms,
        };
        let mut text = serde_json::to_string_pretty(&out)?;
        text.push('\n');
        return Ok(text);
    }

    let mut out = String::new();
    for result in &results {
        let as_of = result
            .as_of
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match (&result.error, result.matched, result.insufficient_data) {
            (Some(e), _, _) => format!("error: {}", e),
            (None, true, _) => "MATCH".to_string(),
            (None, false, true) => "insufficient data".to_string(),
            (None, false, false) => "no match".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:>5}  {}",
            result.code, as_of, result.bars, status
        );
        if result.matched {
            for (id, evidence) in &result.evidence {
                let value = evidence
                    .value
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(out, "    {} = {}", id, value);
            }
        }
    }

    let mut summary = format!(
        "{} of {} symbols matched ({} evaluated, {} ms)",
        matched, total, completed, elapsed_ms
    );
    if cancelled {
        summary.push_str(", cancelled");
    }
    let _ = writeln!(out, "{}", summary);
    Ok(out)
}

fn run_validate(filter_args: &FilterArgs) -> Result<ExitCode, ScreenerError> {
    let expr = match load_filter(filter_args, None) {
        Err(ScreenerError::ConfigMissing { .. }) => {
            return Err(ScreenerError::FilterInvalid {
                reason: "pass --filter or --filter-json".to_string(),
            });
        }
        other => other?,
    };
    print!("{}", describe_filter(&expr));
    Ok(ExitCode::SUCCESS)
}

pub fn describe_filter(expr: &FilterExpr) -> String {
    let indicators: Vec<String> = extract_indicators(expr)
        .iter()
        .map(|t| t.to_string())
        .collect();
    let mut out = String::new();
    let _ = writeln!(out, "filter:        {}", expr);
    let _ = writeln!(out, "criteria:      {}", expr.criteria().len());
    let _ = writeln!(out, "required bars: {}", expr.required_bars());
    let _ = writeln!(
        out,
        "indicators:    {}",
        if indicators.is_empty() {
            "-".to_string()
        } else {
            indicators.join(", ")
        }
    );
    out
}

#[derive(Debug, Serialize)]
pub struct IndicatorSnapshot {
    pub code: String,
    pub date: NaiveDate,
    pub close: f64,
    pub volume: f64,
    pub bars: usize,
    pub values: BTreeMap<String, Option<f64>>,
    pub zones: BTreeMap<String, Zone>,
    pub last_crosses: BTreeMap<String, RecentCross>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentCross {
    pub date: NaiveDate,
    pub direction: Direction,
}

pub fn indicator_snapshot<D: DataPort + ?Sized>(
    data_port: &D,
    code: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<IndicatorSnapshot, ScreenerError> {
    let code = code.trim().to_uppercase();
    let bars = data_port.fetch_ohlcv(&code, start_date, end_date)?;
    validate_bars(&bars).map_err(|source| ScreenerError::Data {
        code: code.clone(),
        source,
    })?;
    let data = CodeData::new(code.clone(), bars).with_indicators(default_indicator_set());
    let index = data
        .index_from_end(0)
        .ok_or_else(|| ScreenerError::NoData { code: code.clone() })?;
    let bar = &data.ohlcv[index];

    Ok(IndicatorSnapshot {
        date: bar.date,
        close: bar.close,
        volume: bar.volume,
        bars: data.bar_count(),
        values: snapshot(&data, index),
        zones: zone_readings(&data, index),
        last_crosses: recent_crosses(&data, index)
            .into_iter()
            .map(|(name, event)| {
                let cross = RecentCross {
                    date: data.ohlcv[event.index].date,
                    direction: event.direction,
                };
                (name, cross)
            })
            .collect(),
        code,
    })
}

fn run_indicators(config_path: &Path, code: &str, json: bool) -> Result<ExitCode, ScreenerError> {
    let config = load_config(config_path)?;
    let source = validate_data_config(&config)?;
    let settings = validate_screen_config(&config)?;
    let data_port = open_data_port(&source)?;

    let snap = indicator_snapshot(
        data_port.as_ref(),
        code,
        settings.start_date,
        settings.end_date,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} as of {} ({} bars)", snap.code, snap.date, snap.bars);
    println!("  {:<26} {:.4}", "close", snap.close);
    println!("  {:<26} {:.0}", "volume", snap.volume);
    for (name, value) in &snap.values {
        match value {
            Some(v) => println!("  {:<26} {:.4}", name, v),
            None => println!("  {:<26} -", name),
        }
    }
    for (name, zone) in &snap.zones {
        println!("  {:<26} {}", name, zone);
    }
    for (name, cross) in &snap.last_crosses {
        let label = match cross.direction {
            Direction::Up => "golden cross",
            Direction::Down => "death cross",
        };
        println!("  {:<26} {} on {}", name, label, cross.date);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_list_symbols(config_path: &Path) -> Result<ExitCode, ScreenerError> {
    let config = load_config(config_path)?;
    let source = validate_data_config(&config)?;
    let data_port = open_data_port(&source)?;

    let symbols = data_port.list_symbols()?;
    if symbols.is_empty() {
        eprintln!("No symbols found");
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
        eprintln!("{} symbols found", symbols.len());
    }
    Ok(ExitCode::SUCCESS)
}
