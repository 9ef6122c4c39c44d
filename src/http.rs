//! Bounded HTTP JSON retrieval shared by the key-source adapters.

// crates.io
use reqwest::{Client, header, redirect};
use serde::de::DeserializeOwned;
use url::Url;
// self
use crate::{_prelude::*, retry::OperationError};

/// Largest response body accepted from an upstream endpoint.
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Default TCP connect timeout for [`default_client`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// User agent advertised on outbound requests.
const USER_AGENT: &str = concat!("bearer-guard/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used when a key source is not handed one explicitly.
pub fn default_client() -> Result<Client> {
	Ok(Client::builder()
		.user_agent(USER_AGENT)
		.redirect(redirect::Policy::limited(3))
		.connect_timeout(DEFAULT_CONNECT_TIMEOUT)
		.build()?)
}

/// Fetch a JSON document, classifying failures for the retry layer.
///
/// Server-side errors and timeouts come back as retryable [`OperationError`]
/// categories; client-side errors, oversized bodies, and malformed payloads are
/// fatal so callers fail fast instead of hammering a misconfigured endpoint.
pub async fn fetch_json<T>(
	client: &Client,
	url: &Url,
	timeout: Duration,
	max_bytes: u64,
) -> core::result::Result<T, OperationError>
where
	T: DeserializeOwned,
{
	let started = Instant::now();
	let response = client
		.get(url.clone())
		.header(header::ACCEPT, "application/json")
		.timeout(timeout)
		.send()
		.await?;
	let status = response.status();

	if status.is_server_error() {
		return Err(OperationError::Io(format!("upstream returned {status}")));
	}
	if !status.is_success() {
		return Err(OperationError::Fatal(format!("upstream returned {status}")));
	}

	let bytes = response.bytes().await?;

	if bytes.len() as u64 > max_bytes {
		return Err(OperationError::Fatal(format!(
			"response body of {} bytes exceeds the {max_bytes}-byte limit",
			bytes.len()
		)));
	}

	tracing::debug!(
		%url,
		%status,
		bytes = bytes.len(),
		elapsed = ?started.elapsed(),
		"fetched json document"
	);

	serde_json::from_slice(&bytes)
		.map_err(|error| OperationError::Fatal(format!("invalid JSON payload: {error}")))
}
