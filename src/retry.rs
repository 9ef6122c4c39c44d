//! Bounded retry with exponential backoff and jitter for idempotent network operations.
//!
//! [`RetryStrategy`] is either exponential backoff over a validated [`RetryConfig`] or
//! the explicit no-retry policy; both honor cooperative cancellation between attempts.

// std
use std::{cell::RefCell, future::Future};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default number of attempts, counting the initial one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay feeding the backoff curve.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Default upper bound applied to computed delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default growth factor between consecutive delays.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default relative jitter applied to each delay.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;
/// Cap on the backoff exponent; keeps the f64 math finite for any multiplier.
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Failure reported by a retried operation, categorized for retry eligibility.
///
/// Everything except [`OperationError::Fatal`] is considered transient and eligible
/// for another attempt.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
	/// A connection to the upstream host could not be established.
	#[error("Connection failure: {0}")]
	Connection(String),
	/// A definite failure; repeating the operation cannot change the outcome.
	#[error("Fatal failure: {0}")]
	Fatal(String),
	/// A transient I/O failure expected to clear on a later attempt.
	#[error("Transient I/O failure: {0}")]
	Io(String),
	/// The upstream host did not answer within the attempt deadline.
	#[error("Timed out: {0}")]
	Timeout(String),
}
impl OperationError {
	/// Whether repeating the operation may change the outcome.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Fatal(_))
	}

	/// Static category label for logs and metrics.
	pub fn category(&self) -> &'static str {
		match self {
			Self::Connection(_) => "connection",
			Self::Fatal(_) => "fatal",
			Self::Io(_) => "io",
			Self::Timeout(_) => "timeout",
		}
	}
}
impl From<reqwest::Error> for OperationError {
	fn from(value: reqwest::Error) -> Self {
		if value.is_timeout() {
			Self::Timeout(value.to_string())
		} else if value.is_connect() {
			Self::Connection(value.to_string())
		} else if value.is_builder() || value.is_decode() {
			Self::Fatal(value.to_string())
		} else {
			Self::Io(value.to_string())
		}
	}
}

/// Immutable descriptor of one attempt within a retried operation.
#[derive(Clone, Debug)]
pub struct RetryContext {
	operation: Arc<str>,
	attempt: u32,
}
impl RetryContext {
	/// Context for the first attempt of a named operation.
	pub fn initial(operation: impl Into<Arc<str>>) -> Self {
		Self { operation: operation.into(), attempt: 1 }
	}

	/// Context for the following attempt, preserving the operation name.
	pub fn next_attempt(&self) -> Self {
		Self { operation: self.operation.clone(), attempt: self.attempt.saturating_add(1) }
	}

	/// Name of the operation being retried.
	pub fn operation(&self) -> &str {
		&self.operation
	}

	/// One-based attempt number.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}
}

/// Backoff configuration for [`RetryStrategy::exponential`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
	/// Maximum number of attempts, counting the initial one.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Base delay feeding the backoff curve.
	#[serde(default = "default_initial_delay")]
	pub initial_delay: Duration,
	/// Upper bound applied to computed delays before jitter.
	#[serde(default = "default_max_delay")]
	pub max_delay: Duration,
	/// Growth factor between consecutive delays.
	#[serde(default = "default_backoff_multiplier")]
	pub backoff_multiplier: f64,
	/// Relative jitter applied to each delay.
	#[serde(default = "default_jitter_factor")]
	pub jitter_factor: f64,
}
impl RetryConfig {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts == 0 {
			return Err(Error::Validation {
				field: "retry.max_attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
			return Err(Error::Validation {
				field: "retry.backoff_multiplier",
				reason: "Must be a finite value of at least 1.0.".into(),
			});
		}
		if !self.jitter_factor.is_finite() || !(0.0..=1.0).contains(&self.jitter_factor) {
			return Err(Error::Validation {
				field: "retry.jitter_factor",
				reason: "Must be a finite value between 0.0 and 1.0.".into(),
			});
		}
		if self.max_delay < self.initial_delay {
			return Err(Error::Validation {
				field: "retry.max_delay",
				reason: "Must be greater than or equal to initial_delay.".into(),
			});
		}

		Ok(())
	}

	/// Delay scheduled before the given one-based attempt.
	///
	/// The first attempt runs immediately. For attempt `n` the raw delay is
	/// `initial_delay * backoff_multiplier^(n - 1)` clamped to `max_delay`, then
	/// perturbed by a uniformly random amount within `jitter_factor` of itself.
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		if attempt <= 1 {
			return Duration::ZERO;
		}

		let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
		let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
		let capped = raw.min(self.max_delay.as_secs_f64());

		self.apply_jitter(Duration::from_secs_f64(capped))
	}

	fn apply_jitter(&self, delay: Duration) -> Duration {
		if self.jitter_factor == 0.0 || delay.is_zero() {
			return delay;
		}

		let spread = delay.mul_f64(self.jitter_factor);

		random_within(delay.saturating_sub(spread), delay + spread)
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			initial_delay: DEFAULT_INITIAL_DELAY,
			max_delay: DEFAULT_MAX_DELAY,
			backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
			jitter_factor: DEFAULT_JITTER_FACTOR,
		}
	}
}

/// Retry policy applied to a fallible asynchronous operation.
///
/// Construct with [`RetryStrategy::exponential`] for bounded exponential backoff, or
/// with [`RetryStrategy::none`] as the explicit resilience-disabled policy that runs
/// the operation exactly once. Backoff sleeps race against the attached cancellation
/// token; cancellation fails the execution with [`Error::Interrupted`] and leaves the
/// token in its cancelled state for the caller to observe.
#[derive(Clone, Debug)]
pub struct RetryStrategy {
	mode: Mode,
	cancel: CancellationToken,
}
impl RetryStrategy {
	/// The explicit no-retry policy; executes the operation exactly once.
	pub fn none() -> Self {
		Self { mode: Mode::Single, cancel: CancellationToken::new() }
	}

	/// Exponential backoff retry over a validated configuration.
	pub fn exponential(config: RetryConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self { mode: Mode::Backoff(config), cancel: CancellationToken::new() })
	}

	/// Exponential backoff retry with the default configuration.
	pub fn with_defaults() -> Self {
		Self { mode: Mode::Backoff(RetryConfig::default()), cancel: CancellationToken::new() }
	}

	/// Attach an externally owned cancellation token observed between attempts.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = token;

		self
	}

	/// Token observed while sleeping between attempts.
	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Maximum number of attempts this strategy may perform.
	pub fn max_attempts(&self) -> u32 {
		match &self.mode {
			Mode::Single => 1,
			Mode::Backoff(config) => config.max_attempts,
		}
	}

	/// Execute `operation` under this policy, starting from `context`.
	///
	/// The operation receives the context of the attempt about to run. Fatal failures
	/// surface immediately without consuming remaining attempts; retryable failures
	/// are repeated until `max_attempts` is exhausted, at which point the last cause
	/// is wrapped in [`Error::RetryExhausted`].
	pub async fn execute<T, F, Fut>(&self, context: RetryContext, mut operation: F) -> Result<T>
	where
		F: FnMut(RetryContext) -> Fut,
		Fut: Future<Output = core::result::Result<T, OperationError>>,
	{
		let config = match &self.mode {
			Mode::Single => return operation(context).await.map_err(Error::from),
			Mode::Backoff(config) => config,
		};
		let mut context = context;

		loop {
			match operation(context.clone()).await {
				Ok(value) => {
					if context.attempt() > 1 {
						tracing::debug!(
							operation = context.operation(),
							attempt = context.attempt(),
							"operation recovered after retrying"
						);
					}

					return Ok(value);
				},
				Err(source) if !source.is_retryable() => {
					tracing::debug!(
						operation = context.operation(),
						attempt = context.attempt(),
						category = source.category(),
						"fatal failure; not retrying"
					);

					return Err(source.into());
				},
				Err(source) if context.attempt() >= config.max_attempts => {
					tracing::warn!(
						operation = context.operation(),
						attempts = context.attempt(),
						category = source.category(),
						error = %source,
						"retries exhausted"
					);

					return Err(Error::RetryExhausted {
						operation: context.operation().into(),
						attempts: context.attempt(),
						source,
					});
				},
				Err(source) => {
					let next = context.next_attempt();
					let delay = config.delay_for_attempt(next.attempt());

					tracing::debug!(
						operation = context.operation(),
						attempt = context.attempt(),
						category = source.category(),
						delay_ms = delay.as_millis() as u64,
						error = %source,
						"attempt failed; backing off"
					);
					self.sleep(delay, &context).await?;

					context = next;
				},
			}
		}
	}

	async fn sleep(&self, delay: Duration, context: &RetryContext) -> Result<()> {
		if delay.is_zero() {
			// A zero delay still observes a token that is already cancelled.
			if self.cancel.is_cancelled() {
				return Err(Error::Interrupted { operation: context.operation().into() });
			}

			return Ok(());
		}

		tokio::select! {
			_ = self.cancel.cancelled() => {
				Err(Error::Interrupted { operation: context.operation().into() })
			},
			_ = time::sleep(delay) => Ok(()),
		}
	}
}
impl Default for RetryStrategy {
	fn default() -> Self {
		Self::with_defaults()
	}
}

#[derive(Clone, Debug)]
enum Mode {
	Single,
	Backoff(RetryConfig),
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

fn default_max_attempts() -> u32 {
	DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay() -> Duration {
	DEFAULT_INITIAL_DELAY
}

fn default_max_delay() -> Duration {
	DEFAULT_MAX_DELAY
}

fn default_backoff_multiplier() -> f64 {
	DEFAULT_BACKOFF_MULTIPLIER
}

fn default_jitter_factor() -> f64 {
	DEFAULT_JITTER_FACTOR
}
