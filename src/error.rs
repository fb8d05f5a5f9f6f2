use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiEngineError {
    #[error("Column mapping rejected: {0}")]
    MappingRejected(String),

    #[error("Financial invariant violation for period {period}: {}", errors.join("; "))]
    InvariantViolation {
        period: NaiveDate,
        errors: Vec<String>,
    },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KpiEngineError>;
