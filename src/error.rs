//! Error kinds shared by every analysis stage

use thiserror::Error;

/// Errors surfaced by the analysis stages.
///
/// Only `EmptyInput`, `Io` and `Csv` raised while loading the input file abort a run.
/// Everything else is recovered by the caller: the affected row degrades to nulls or
/// the affected sub-analysis is skipped.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("failed to parse {field}: {reason}")]
    Parse { field: String, reason: String },

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("lookup failed for {ip}: {reason}")]
    LookupFailure { ip: String, reason: String },

    #[error("input contains no rows")]
    EmptyInput,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

impl AnalyticsError {
    pub fn missing(column: &str) -> Self {
        AnalyticsError::MissingColumn(column.to_string())
    }

    /// True for errors that only mean "skip this sub-analysis".
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::MissingColumn(_)
                | AnalyticsError::Parse { .. }
                | AnalyticsError::LookupFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(AnalyticsError::missing("amount").is_recoverable());
        assert!(!AnalyticsError::EmptyInput.is_recoverable());
        assert_eq!(
            AnalyticsError::missing("gateway_code").to_string(),
            "missing column: gateway_code"
        );
    }
}
