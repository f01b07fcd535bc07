//! Core domain types and screening logic.

pub mod code_data;
pub mod config_validation;
pub mod error;
pub mod filter;
pub mod filter_eval;
pub mod filter_parser;
pub mod indicator;
pub mod indicator_helpers;
pub mod ohlcv;
pub mod preset;
pub mod screener;
pub mod signal;
pub mod universe;
