use std::io;
use thiserror::Error;

/// Core error type for faultline.
#[derive(Error, Debug)]
pub enum FaultlineError {
    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("weight profile error: {message}")]
    WeightProfile { message: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("corpus error: {message}")]
    Corpus { message: String },

    #[error("{service} failed: {message}")]
    External { service: String, message: String },

    #[error("{service} is rate limited")]
    RateLimited { service: String },

    #[error("{service} disabled after repeated rate limiting")]
    CircuitOpen { service: String },

    #[error("{service} timed out after {after_ms}ms")]
    Timeout { service: String, after_ms: u64 },
}

impl FaultlineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn weight_profile(message: impl Into<String>) -> Self {
        Self::WeightProfile {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    pub fn corpus(message: impl Into<String>) -> Self {
        Self::Corpus {
            message: message.into(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(service: impl Into<String>) -> Self {
        Self::RateLimited {
            service: service.into(),
        }
    }

    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    pub fn timeout(service: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            service: service.into(),
            after_ms,
        }
    }

    /// Returns true if this error is caused by user input (vs internal/system).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. } | Self::Validation { .. } | Self::Corpus { .. }
        )
    }

    /// Returns true if retrying the operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }

    /// Returns true if the failure belongs to an optional signal source and
    /// should be absorbed as a zero/absent score rather than abort a run.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::External { .. }
                | Self::RateLimited { .. }
                | Self::CircuitOpen { .. }
                | Self::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FaultlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = FaultlineError::config("bad value");
        assert_eq!(err.to_string(), "config error: bad value");
    }

    #[test]
    fn timeout_display() {
        let err = FaultlineError::timeout("knowledge store", 250);
        assert_eq!(err.to_string(), "knowledge store timed out after 250ms");
    }

    #[test]
    fn user_error_classification() {
        assert!(FaultlineError::invalid_path("/bad", "nope").is_user_error());
        assert!(FaultlineError::validation("field", "bad").is_user_error());
        assert!(!FaultlineError::config("oops").is_user_error());
        assert!(!FaultlineError::weight_profile("zero").is_user_error());
    }

    #[test]
    fn retryable_classification() {
        let io_err = FaultlineError::io("read", io::Error::new(io::ErrorKind::Other, "timeout"));
        assert!(io_err.is_retryable());
        assert!(FaultlineError::rate_limited("llm").is_retryable());
        assert!(!FaultlineError::circuit_open("llm").is_retryable());
        assert!(!FaultlineError::config("nope").is_retryable());
    }

    #[test]
    fn degradable_classification() {
        assert!(FaultlineError::external("llm", "500").is_degradable());
        assert!(FaultlineError::circuit_open("llm").is_degradable());
        assert!(FaultlineError::timeout("source", 10).is_degradable());
        assert!(!FaultlineError::weight_profile("all zero").is_degradable());
        assert!(!FaultlineError::corpus("empty").is_degradable());
    }
}
