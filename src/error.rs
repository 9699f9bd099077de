use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerExplorerError {
    #[error("Load error: {0}")]
    LoadError(String),

    #[error("Missing required column '{column}' in {source_name}")]
    MissingColumn { source_name: String, column: String },

    #[error("Invalid time keyword: {0}")]
    InvalidTimeKeyword(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("No data in selection: {0}")]
    EmptyData(String),

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "remote")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl LedgerExplorerError {
    /// True for errors raised while reading or normalizing an upload.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            LedgerExplorerError::LoadError(_) | LedgerExplorerError::MissingColumn { .. }
        )
    }

    /// Errors that a single view reports inline while the other views keep rendering.
    pub fn is_recoverable_in_view(&self) -> bool {
        matches!(
            self,
            LedgerExplorerError::InvalidTimeKeyword(_)
                | LedgerExplorerError::UnknownAccount(_)
                | LedgerExplorerError::EmptyData(_)
                | LedgerExplorerError::InternalInvariant(_)
                | LedgerExplorerError::DateError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerExplorerError>;
