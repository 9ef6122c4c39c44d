//! Cache entry bookkeeping for validated tokens.

// self
use crate::{_prelude::*, token::AccessTokenContent};

/// A validated token retained until its expiration passes.
///
/// Owned exclusively by the token cache; the shared piece handed to callers is the
/// inner [`AccessTokenContent`].
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
	content: Arc<AccessTokenContent>,
	expires_at: DateTime<Utc>,
}
impl CacheEntry {
	pub(crate) fn new(content: Arc<AccessTokenContent>, expires_at: DateTime<Utc>) -> Self {
		Self { content, expires_at }
	}

	pub(crate) fn content(&self) -> &Arc<AccessTokenContent> {
		&self.content
	}

	pub(crate) fn expires_at(&self) -> DateTime<Utc> {
		self.expires_at
	}

	pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}
}
