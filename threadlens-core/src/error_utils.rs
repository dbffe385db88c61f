use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Fetch(e) => e.is_retryable(),
            CoreError::Llm(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            CoreError::Timeout { .. } => true,
            // Cache failures degrade to uncached computation instead of retrying
            CoreError::Cache(_) => false,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Fetch(FetchError::RateLimitExceeded { retry_after }) => {
                Some(Duration::from_secs(*retry_after))
            }
            CoreError::Llm(LlmError::RateLimitExceeded { retry_after }) => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }
}

impl ErrorExt for FetchError {
    fn log_error(&self) -> &Self {
        error!("FetchError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("FetchError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimitExceeded { .. } => true,
            FetchError::RequestTimeout => true,
            FetchError::ServerError { status_code } => *status_code >= 500,
            FetchError::Transport { .. } => true,
            // Not found and deleted are permanent
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }
}

impl ErrorExt for LlmError {
    fn log_error(&self) -> &Self {
        error!("LlmError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("LlmError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimitExceeded { .. } => true,
            LlmError::RequestTimeout => true,
            LlmError::ServerError { status_code } => *status_code >= 500,
            LlmError::Transport { .. } => true,
            LlmError::EmptyResponse => true,
            // Schema violations get one stricter re-prompt, not a blind retry
            LlmError::InvalidResponse { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryability() {
        assert!(FetchError::RequestTimeout.is_retryable());
        assert!(FetchError::ServerError { status_code: 502 }.is_retryable());
        assert!(!FetchError::NotFound {
            reference: "abc123".to_string()
        }
        .is_retryable());
        assert!(!FetchError::Deleted {
            reference: "abc123".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_llm_schema_violation_not_retryable() {
        let err = LlmError::InvalidResponse {
            details: "missing field".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(LlmError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_rate_limit_retry_after() {
        let err = CoreError::Llm(LlmError::RateLimitExceeded { retry_after: 30 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_cache_failure_not_retryable() {
        let err = CoreError::Cache(CacheError::Corrupt {
            detail: "bad row".to_string(),
        });
        assert!(!err.is_retryable());
    }
}
