//! Concurrent token-validation cache, bounded retry with jitter, and on-demand issuer health
//! tracking — resilience building blocks for modern Rust identity systems.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod retry;

mod error;
mod issuer;
mod token;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	cache::store::{TokenCache, TokenCacheConfig},
	error::{Error, Result},
	issuer::{IssuerConfig, IssuerHealthRegistry, IssuerHealthRegistryBuilder, IssuerResolution},
	keys::{KeySource, StaticKeySource},
	retry::{OperationError, RetryConfig, RetryContext, RetryStrategy},
	token::{AccessTokenContent, TokenKind},
};
#[cfg(feature = "prometheus")]
pub use crate::metrics::{install_default_exporter, prometheus_handle};
