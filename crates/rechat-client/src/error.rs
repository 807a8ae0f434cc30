use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("stream '{0}' is unknown to the server")]
    StreamNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session file error: {0}")]
    Session(#[from] std::io::Error),

    #[error("no interrupted stream to resume")]
    NothingToResume,
}

pub type Result<T> = std::result::Result<T, TransportError>;
