//! Key-source contract and the adapters that fulfil it.

pub mod jwks;
pub mod well_known;

// std
use std::fmt::Debug;
// crates.io
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
// self
use crate::_prelude::*;

/// Supplier of the verification keys published by one issuer.
///
/// Implementations defer network work until a caller actually needs keys; merely
/// constructing a source must not open connections. When several tasks race into a
/// cold source, one fetch runs and the rest await its outcome.
#[async_trait]
pub trait KeySource: Debug + Send + Sync {
	/// Whether at least one usable verification key is retrievable right now.
	///
	/// `true` requires an end-to-end success: reachable endpoint, well-formed
	/// document, and a non-empty key set.
	async fn is_healthy(&self) -> bool;

	/// Current key set, fetched on demand.
	async fn key_set(&self) -> Result<Arc<JwkSet>>;
}

/// Fixed in-memory key source for offline verification and tests.
#[derive(Clone, Debug)]
pub struct StaticKeySource {
	keys: Arc<JwkSet>,
}
impl StaticKeySource {
	/// Wrap an already known key set.
	pub fn new(keys: JwkSet) -> Self {
		Self { keys: Arc::new(keys) }
	}

	/// A source holding no keys; never healthy.
	pub fn empty() -> Self {
		Self::new(JwkSet { keys: Vec::new() })
	}
}
#[async_trait]
impl KeySource for StaticKeySource {
	async fn is_healthy(&self) -> bool {
		!self.keys.keys.is_empty()
	}

	async fn key_set(&self) -> Result<Arc<JwkSet>> {
		Ok(self.keys.clone())
	}
}
