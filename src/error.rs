use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Data value store error: {0}")]
    RowStore(String),

    #[error("Analytics store error: {0}")]
    Analytics(String),

    #[error("Prediction store error: {0}")]
    PredictionStore(String),

    #[error("Data value stream error: {0}")]
    Stream(String),

    #[error("Timed out after {0}s waiting for data values")]
    QueueTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PredictionError>;
