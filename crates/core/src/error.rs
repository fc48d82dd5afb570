use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("remote api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("transient failure persisted after retries: {0}")]
    RetriesExhausted(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding model mismatch: index built with {found}, configured {expected}")]
    ModelMismatch { expected: String, found: String },

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("retrieval request failed: {0}")]
    Request(String),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
