use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Any non-2xx response other than the 400-with-message case.
    #[error("{resource} returned HTTP {status}")]
    Status { resource: String, status: u16 },

    /// HTTP 400 carrying the server's `message` field. Distinguishes a
    /// malformed request from an infrastructure failure.
    #[error("bad request to {resource}: {message}")]
    BadRequest { resource: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
