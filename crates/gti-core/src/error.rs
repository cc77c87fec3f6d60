//! Error type shared by the pipeline, history store, and forecasting code.
//!
//! Running out of data is not an error: those paths return `Ok(None)`.
//! Everything here is either a caller mistake (bad configuration, unreadable
//! files) or an internal numeric failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GtiError {
    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid phase history: {0}")]
    InvalidHistory(String),

    #[error("non-finite value in {stage}: {detail}")]
    Numeric { stage: &'static str, detail: String },
}

impl GtiError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn numeric(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::Numeric {
            stage,
            detail: detail.into(),
        }
    }
}

/// Fail with [`GtiError::Numeric`] unless `value` is finite.
pub(crate) fn ensure_finite(stage: &'static str, name: &str, value: f64) -> Result<f64, GtiError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GtiError::numeric(stage, format!("{name} = {value}")))
    }
}
