//! Error types for the discovery pipeline and inventory codecs.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`SurveyError`]
pub type Result<T> = std::result::Result<T, SurveyError>;

/// Errors that abort a pipeline run or an inventory read/write.
///
/// Per-address probe failures never show up here: they are absorbed into
/// [`crate::scanner::ProbeOutcome`] and only affect the summary counts.
#[derive(Debug, Error)]
pub enum SurveyError {
    // === Expansion ===
    #[error("Invalid network range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },

    // === Build ===
    #[error("Duplicate hostname '{hostname}': {incoming} collides with {existing}")]
    DuplicateHost {
        hostname: String,
        existing: String,
        incoming: String,
    },

    #[error("Invalid inventory: {0}")]
    InvalidInventory(String),

    // === Serialization ===
    #[error("Inventory I/O failed for {}: {source}", path.display())]
    SerializationIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {encoding} inventory: {message}")]
    Parse {
        encoding: &'static str,
        message: String,
    },

    #[error("Failed to render {encoding} inventory: {message}")]
    Render {
        encoding: &'static str,
        message: String,
    },

    // === Configuration ===
    #[error("Configuration error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl SurveyError {
    pub(crate) fn invalid_range(input: &str, reason: impl Into<String>) -> Self {
        SurveyError::InvalidRange {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SurveyError::SerializationIo {
            path: path.into(),
            source,
        }
    }

    /// Get an error code for logging and JSON output
    pub fn code(&self) -> &'static str {
        match self {
            SurveyError::InvalidRange { .. } => "INVALID_RANGE",
            SurveyError::DuplicateHost { .. } => "DUPLICATE_HOST",
            SurveyError::InvalidInventory(_) => "INVALID_INVENTORY",
            SurveyError::SerializationIo { .. } => "SERIALIZATION_IO",
            SurveyError::Parse { .. } => "PARSE_ERROR",
            SurveyError::Render { .. } => "RENDER_ERROR",
            SurveyError::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// Check if this error means the inventory document itself is unusable
    pub fn is_inventory_error(&self) -> bool {
        matches!(
            self,
            SurveyError::DuplicateHost { .. }
                | SurveyError::InvalidInventory(_)
                | SurveyError::Parse { .. }
        )
    }
}
