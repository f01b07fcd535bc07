//! Symbol universe: parses explicit code lists and falls back to every
//! symbol the data source knows about.

use crate::domain::error::ScreenerError;
use crate::ports::data_port::DataPort;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in code list")]
    EmptyToken,

    #[error("duplicate code: {0}")]
    DuplicateCode(String),
}

impl From<UniverseError> for ScreenerError {
    fn from(err: UniverseError) -> Self {
        ScreenerError::ConfigInvalid {
            section: "screen".to_string(),
            key: "codes".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Split a comma separated code list. Codes are trimmed and upper-cased;
/// empty tokens and duplicates are rejected.
pub fn parse_codes(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut codes = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let code = trimmed.to_uppercase();
        if !seen.insert(code.clone()) {
            return Err(UniverseError::DuplicateCode(code));
        }
        codes.push(code);
    }

    Ok(codes)
}

/// The codes to screen: `explicit` when given and non-blank, otherwise
/// everything the data port lists.
pub fn resolve_universe<D: DataPort + ?Sized>(
    data_port: &D,
    explicit: Option<&str>,
) -> Result<Vec<String>, ScreenerError> {
    match explicit.map(str::trim) {
        Some(list) if !list.is_empty() => {
            let codes = parse_codes(list)?;
            debug!(count = codes.len(), "using explicit code list");
            Ok(codes)
        }
        _ => {
            let codes = data_port.list_symbols()?;
            info!(count = codes.len(), "screening all listed symbols");
            Ok(codes)
        }
    }
}
