//! Validated token payloads and claim accessors.

// std
use std::fmt;
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Claim carrying the expiration timestamp.
pub const CLAIM_EXPIRATION: &str = "exp";
/// Claim carrying the issuer identifier.
pub const CLAIM_ISSUER: &str = "iss";
/// Claim carrying the subject identifier.
pub const CLAIM_SUBJECT: &str = "sub";

/// Marker distinguishing the token categories handled by a validator.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
	/// OAuth 2.0 access token.
	#[default]
	Access,
	/// OpenID Connect ID token.
	Id,
	/// OAuth 2.0 refresh token.
	Refresh,
}

/// Verified payload of a bearer token.
///
/// Produced by the cryptographic verification step; carries the decoded claims
/// alongside the raw token string they were extracted from. The `exp` claim is the
/// expiration authority used by the token cache.
#[derive(Clone)]
pub struct AccessTokenContent {
	claims: Map<String, Value>,
	raw_token: String,
	kind: TokenKind,
}
impl AccessTokenContent {
	/// Construct content for a verified access token.
	pub fn new(claims: Map<String, Value>, raw_token: impl Into<String>) -> Self {
		Self { claims, raw_token: raw_token.into(), kind: TokenKind::Access }
	}

	/// Override the token kind marker.
	pub fn with_kind(mut self, kind: TokenKind) -> Self {
		self.kind = kind;

		self
	}

	/// Decoded claims of the token.
	pub fn claims(&self) -> &Map<String, Value> {
		&self.claims
	}

	/// Raw token string the claims were decoded from.
	pub fn raw_token(&self) -> &str {
		&self.raw_token
	}

	/// Token kind marker.
	pub fn kind(&self) -> TokenKind {
		self.kind
	}

	/// Expiration timestamp extracted from the `exp` claim, if present and numeric.
	pub fn expires_at(&self) -> Option<DateTime<Utc>> {
		self.timestamp_claim(CLAIM_EXPIRATION)
	}

	/// Issuer identifier from the `iss` claim.
	pub fn issuer(&self) -> Option<&str> {
		self.claims.get(CLAIM_ISSUER).and_then(Value::as_str)
	}

	/// Subject identifier from the `sub` claim.
	pub fn subject(&self) -> Option<&str> {
		self.claims.get(CLAIM_SUBJECT).and_then(Value::as_str)
	}

	fn timestamp_claim(&self, claim: &str) -> Option<DateTime<Utc>> {
		let value = self.claims.get(claim)?;
		let seconds = value.as_i64().or_else(|| value.as_f64().map(|secs| secs as i64))?;

		DateTime::from_timestamp(seconds, 0)
	}
}
impl fmt::Debug for AccessTokenContent {
	// The raw token is a live credential; it must never reach logs through `Debug`.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AccessTokenContent")
			.field("claims", &self.claims.len())
			.field("raw_token", &"<redacted>")
			.field("kind", &self.kind)
			.finish()
	}
}
