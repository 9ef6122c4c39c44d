//! JWKS endpoint adapter with a TTL cache and coalesced cold fetches.

// crates.io
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use url::Url;
// self
use crate::{
	_prelude::*,
	http::{self, DEFAULT_MAX_RESPONSE_BYTES},
	keys::KeySource,
	retry::{RetryContext, RetryStrategy},
};

/// Default lifetime of a fetched key set before it is refreshed.
pub const DEFAULT_KEYS_TTL: Duration = Duration::from_secs(600);
/// Default timeout for a single fetch attempt.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// [`KeySource`] backed by a JWKS endpoint.
///
/// Construction performs no I/O; the first `key_set` call fetches the document and
/// concurrent cold callers coalesce onto that single request. A fetched set is
/// served from memory until its TTL elapses.
#[derive(Debug)]
pub struct JwksKeySource {
	client: Client,
	url: Url,
	ttl: Duration,
	fetch_timeout: Duration,
	max_response_bytes: u64,
	retry: RetryStrategy,
	cached: RwLock<Option<CachedKeys>>,
	single_flight: Mutex<()>,
}
impl JwksKeySource {
	/// Create a [`JwksKeySourceBuilder`] for the given endpoint.
	pub fn builder(url: Url) -> JwksKeySourceBuilder {
		JwksKeySourceBuilder::new(url)
	}

	/// Endpoint this source fetches from.
	pub fn url(&self) -> &Url {
		&self.url
	}

	async fn fresh_cached(&self) -> Option<Arc<JwkSet>> {
		self.cached
			.read()
			.await
			.as_ref()
			.filter(|cached| cached.fetched_at.elapsed() < self.ttl)
			.map(|cached| cached.keys.clone())
	}

	async fn fetch(&self) -> Result<Arc<JwkSet>> {
		let keys: JwkSet = self
			.retry
			.execute(RetryContext::initial("jwks-fetch"), |_| {
				let client = self.client.clone();
				let url = self.url.clone();
				let timeout = self.fetch_timeout;
				let max_bytes = self.max_response_bytes;

				async move { http::fetch_json(&client, &url, timeout, max_bytes).await }
			})
			.await?;

		tracing::debug!(url = %self.url, keys = keys.keys.len(), "jwks document refreshed");

		Ok(Arc::new(keys))
	}
}
#[async_trait]
impl KeySource for JwksKeySource {
	async fn is_healthy(&self) -> bool {
		matches!(self.key_set().await, Ok(keys) if !keys.keys.is_empty())
	}

	async fn key_set(&self) -> Result<Arc<JwkSet>> {
		if let Some(keys) = self.fresh_cached().await {
			return Ok(keys);
		}

		// Coalesce concurrent cold callers onto one upstream request.
		let _flight = self.single_flight.lock().await;

		if let Some(keys) = self.fresh_cached().await {
			return Ok(keys);
		}

		let keys = self.fetch().await?;

		*self.cached.write().await =
			Some(CachedKeys { keys: keys.clone(), fetched_at: Instant::now() });

		Ok(keys)
	}
}

/// Builder for [`JwksKeySource`].
#[derive(Debug)]
pub struct JwksKeySourceBuilder {
	client: Option<Client>,
	url: Url,
	ttl: Duration,
	fetch_timeout: Duration,
	max_response_bytes: u64,
	retry: RetryStrategy,
	require_https: bool,
}
impl JwksKeySourceBuilder {
	/// Create a builder with default fetch settings.
	pub fn new(url: Url) -> Self {
		Self {
			client: None,
			url,
			ttl: DEFAULT_KEYS_TTL,
			fetch_timeout: DEFAULT_FETCH_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			retry: RetryStrategy::none(),
			require_https: true,
		}
	}

	/// Use an existing HTTP client instead of [`http::default_client`].
	pub fn client(mut self, client: Client) -> Self {
		self.client = Some(client);

		self
	}

	/// Override how long a fetched key set is served from memory.
	pub fn ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;

		self
	}

	/// Override the per-attempt fetch timeout.
	pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
		self.fetch_timeout = timeout;

		self
	}

	/// Override the response size guard.
	pub fn max_response_bytes(mut self, max_bytes: u64) -> Self {
		self.max_response_bytes = max_bytes;

		self
	}

	/// Retry schedule applied to fetches (no retries by default).
	pub fn retry(mut self, retry: RetryStrategy) -> Self {
		self.retry = retry;

		self
	}

	/// Enforce HTTPS for the endpoint (enabled by default).
	pub fn require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Finalise the configuration and construct a [`JwksKeySource`].
	pub fn build(self) -> Result<JwksKeySource> {
		if self.require_https && self.url.scheme() != "https" {
			return Err(Error::Security(format!("Upstream URL {} must use HTTPS.", self.url)));
		}

		let client = match self.client {
			Some(client) => client,
			None => http::default_client()?,
		};

		Ok(JwksKeySource {
			client,
			url: self.url,
			ttl: self.ttl,
			fetch_timeout: self.fetch_timeout,
			max_response_bytes: self.max_response_bytes,
			retry: self.retry,
			cached: RwLock::new(None),
			single_flight: Mutex::new(()),
		})
	}
}

#[derive(Clone, Debug)]
struct CachedKeys {
	keys: Arc<JwkSet>,
	fetched_at: Instant,
}
