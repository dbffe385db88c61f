use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Link content error: {0}")]
    Link(#[from] LinkError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Operation timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Cache(CacheError::Sql(e))
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Thread not found: {reference}")]
    NotFound { reference: String },

    #[error("Thread deleted or inaccessible: {reference}")]
    Deleted { reference: String },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid fetch response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Invalid LLM response: {details}")]
    InvalidResponse { details: String },

    #[error("Empty LLM response")]
    EmptyResponse,

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine unavailable")]
    OcrUnavailable,

    #[error("OCR failed: {reason}")]
    OcrFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link fetch timed out: {url}")]
    FetchTimeout { url: String },

    #[error("Unsupported link content: {url}")]
    Unsupported { url: String },
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Corrupt cache entry: {detail}")]
    Corrupt { detail: String },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Comment tree cycle detected at {comment_id}")]
    CycleDetected { comment_id: String },

    #[error("Duplicate comment identifier: {comment_id}")]
    DuplicateId { comment_id: String },

    #[error("Malformed thread structure: {details}")]
    MalformedThread { details: String },
}
