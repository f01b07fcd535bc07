//! Domain error types.
//!
//! Two tiers: [`ScreenerError`] aborts a whole screening request, while
//! [`DataError`] is scoped to one symbol and never escapes the orchestrator.
//! Missing history is not an error at all; it travels as an undefined
//! indicator value and surfaces as `insufficient_data` on the result.

/// A parse error with position information for filter parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Per-symbol failure. Recorded on that symbol's result; the pass continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("fetch timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("no bars returned")]
    Empty,

    #[error("malformed bar at index {index}: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("dates not strictly increasing at index {index}")]
    NonMonotonic { index: usize },
}

/// Top-level error type for stockscreen.
#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    FilterParse(#[from] ParseError),

    #[error("invalid filter: {reason}")]
    FilterInvalid { reason: String },

    #[error("conflicting filter bounds in {criterion}: {reason}")]
    FilterConflict { criterion: String, reason: String },

    #[error("no data for {code}")]
    NoData { code: String },

    #[error("data error for {code}: {source}")]
    Data {
        code: String,
        #[source]
        source: DataError,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScreenerError {
    /// True for errors in the filter expression itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScreenerError::FilterParse(_)
                | ScreenerError::FilterInvalid { .. }
                | ScreenerError::FilterConflict { .. }
                | ScreenerError::Json(_)
        )
    }
}

impl From<&ScreenerError> for std::process::ExitCode {
    fn from(err: &ScreenerError) -> Self {
        let code: u8 = match err {
            ScreenerError::Io(_) => 1,
            ScreenerError::ConfigParse { .. }
            | ScreenerError::ConfigMissing { .. }
            | ScreenerError::ConfigInvalid { .. } => 2,
            ScreenerError::Database { .. } | ScreenerError::DatabaseQuery { .. } => 3,
            ScreenerError::FilterParse(_)
            | ScreenerError::FilterInvalid { .. }
            | ScreenerError::FilterConflict { .. }
            | ScreenerError::Json(_) => 4,
            ScreenerError::NoData { .. } | ScreenerError::Data { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
