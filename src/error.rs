use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the UI automation layer.
#[derive(Error, Debug)]
pub enum UiError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Unexpected value in {field}: expected {expected:?}, got {actual:?}")]
    UnexpectedValue {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("WebDriver transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for UiError {
    fn from(e: reqwest::Error) -> Self {
        UiError::Transport(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet error: {0}")]
    Sheet(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Row error: {0}")]
    Row(String),

    #[error("Unknown group {0:?}, expected \"Emitido\" or \"Recibido\"")]
    UnknownGroup(String),

    #[error("Extraction helper failed: {0}")]
    Helper(String),

    #[error("Document retrieval failed: {0}")]
    Retrieval(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error(transparent)]
    Ui(#[from] UiError),
}

impl From<calamine::Error> for BotError {
    fn from(e: calamine::Error) -> Self {
        BotError::Sheet(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for BotError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        BotError::Sheet(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
