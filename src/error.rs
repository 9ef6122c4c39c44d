//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the bearer-guard crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error(transparent)]
	Operation(#[from] crate::retry::OperationError),

	#[error("Operation '{operation}' was cancelled while waiting to retry.")]
	Interrupted { operation: String },
	#[cfg(feature = "metrics")]
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Token content carries no extractable expiration timestamp.")]
	MissingExpiration,
	#[error("Retries exhausted for '{operation}' after {attempts} attempt(s).")]
	RetryExhausted {
		operation: String,
		attempts: u32,
		#[source]
		source: crate::retry::OperationError,
	},
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Token expired at {0}.")]
	TokenExpired(chrono::DateTime<chrono::Utc>),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
