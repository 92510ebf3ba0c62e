use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Download at row {0} is still active")]
    JobActive(usize),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Guide source error: {0}")]
    Source(String),
}

impl AppError {
    pub(crate) fn no_row(row: usize) -> Self {
        AppError::NotFound(format!("no download at row {}", row))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
