//! OIDC discovery adapter resolving an issuer to its JWKS endpoint.

// crates.io
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;
// self
use crate::{
	_prelude::*,
	http::{self, DEFAULT_MAX_RESPONSE_BYTES},
	keys::{
		KeySource,
		jwks::{DEFAULT_FETCH_TIMEOUT, DEFAULT_KEYS_TTL, JwksKeySource},
	},
	retry::{RetryContext, RetryStrategy},
};

/// Discovery document location relative to the issuer, per OIDC Discovery.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Subset of the OIDC discovery document needed to locate verification keys.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderMetadata {
	/// Issuer identifier the document claims to describe.
	pub issuer: String,
	/// Location of the issuer's JWKS endpoint.
	pub jwks_uri: Url,
}

/// [`KeySource`] that locates the JWKS endpoint through OIDC discovery.
///
/// The discovery document is fetched once, on first use; the resolved
/// [`JwksKeySource`] is then reused for the lifetime of this source. A failed
/// discovery leaves nothing behind, so a later call simply tries again.
#[derive(Debug)]
pub struct WellKnownKeySource {
	client: Client,
	issuer: Url,
	ttl: Duration,
	fetch_timeout: Duration,
	max_response_bytes: u64,
	retry: RetryStrategy,
	require_https: bool,
	discovered: OnceCell<JwksKeySource>,
}
impl WellKnownKeySource {
	/// Create a [`WellKnownKeySourceBuilder`] for the given issuer.
	pub fn builder(issuer: Url) -> WellKnownKeySourceBuilder {
		WellKnownKeySourceBuilder::new(issuer)
	}

	/// Issuer this source discovers keys for.
	pub fn issuer(&self) -> &Url {
		&self.issuer
	}

	fn metadata_url(&self) -> Result<Url> {
		let issuer = self.issuer.as_str().trim_end_matches('/');

		Ok(format!("{issuer}{WELL_KNOWN_PATH}").parse()?)
	}

	async fn resolve_source(&self) -> Result<&JwksKeySource> {
		self.discovered
			.get_or_try_init(|| async {
				let metadata = self.discover().await?;
				let source = JwksKeySource::builder(metadata.jwks_uri)
					.client(self.client.clone())
					.ttl(self.ttl)
					.fetch_timeout(self.fetch_timeout)
					.max_response_bytes(self.max_response_bytes)
					.retry(self.retry.clone())
					.require_https(self.require_https)
					.build()?;

				tracing::info!(
					issuer = %self.issuer,
					jwks_url = %source.url(),
					"issuer metadata discovered"
				);

				Ok(source)
			})
			.await
	}

	async fn discover(&self) -> Result<ProviderMetadata> {
		let url = self.metadata_url()?;
		let metadata: ProviderMetadata = self
			.retry
			.execute(RetryContext::initial("well-known-discovery"), |_| {
				let client = self.client.clone();
				let url = url.clone();
				let timeout = self.fetch_timeout;
				let max_bytes = self.max_response_bytes;

				async move { http::fetch_json(&client, &url, timeout, max_bytes).await }
			})
			.await?;

		if metadata.issuer.trim_end_matches('/') != self.issuer.as_str().trim_end_matches('/') {
			return Err(Error::Security(format!(
				"Discovery document for {} claims issuer '{}'.",
				self.issuer, metadata.issuer
			)));
		}

		Ok(metadata)
	}
}
#[async_trait]
impl KeySource for WellKnownKeySource {
	async fn is_healthy(&self) -> bool {
		match self.resolve_source().await {
			Ok(source) => source.is_healthy().await,
			Err(error) => {
				tracing::debug!(issuer = %self.issuer, %error, "issuer discovery failed");

				false
			},
		}
	}

	async fn key_set(&self) -> Result<Arc<JwkSet>> {
		self.resolve_source().await?.key_set().await
	}
}

/// Builder for [`WellKnownKeySource`].
#[derive(Debug)]
pub struct WellKnownKeySourceBuilder {
	client: Option<Client>,
	issuer: Url,
	ttl: Duration,
	fetch_timeout: Duration,
	max_response_bytes: u64,
	retry: RetryStrategy,
	require_https: bool,
}
impl WellKnownKeySourceBuilder {
	/// Create a builder with default fetch settings.
	pub fn new(issuer: Url) -> Self {
		Self {
			client: None,
			issuer,
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

	/// Override how long resolved key sets are served from memory.
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

	/// Retry schedule applied to discovery and key fetches (no retries by default).
	pub fn retry(mut self, retry: RetryStrategy) -> Self {
		self.retry = retry;

		self
	}

	/// Enforce HTTPS for the issuer and its JWKS endpoint (enabled by default).
	pub fn require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Finalise the configuration and construct a [`WellKnownKeySource`].
	pub fn build(self) -> Result<WellKnownKeySource> {
		if self.require_https && self.issuer.scheme() != "https" {
			return Err(Error::Security(format!("Issuer URL {} must use HTTPS.", self.issuer)));
		}

		let client = match self.client {
			Some(client) => client,
			None => http::default_client()?,
		};

		Ok(WellKnownKeySource {
			client,
			issuer: self.issuer,
			ttl: self.ttl,
			fetch_timeout: self.fetch_timeout,
			max_response_bytes: self.max_response_bytes,
			retry: self.retry,
			require_https: self.require_https,
			discovered: OnceCell::new(),
		})
	}
}
