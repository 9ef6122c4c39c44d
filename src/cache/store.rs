//! Token cache storage, capacity management, and background eviction.

// std
use std::collections::BinaryHeap;
// crates.io
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cache::entry::CacheEntry,
	metrics::{self, CacheStats},
	token::AccessTokenContent,
};

/// Default maximum number of cached tokens.
pub const DEFAULT_MAX_SIZE: usize = 1_000;
/// Default interval between proactive eviction sweeps.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(300);
/// Divisor deriving the capacity-eviction batch from the current entry count.
const EVICTION_BATCH_DIVISOR: usize = 10;

/// Configuration for [`TokenCache`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenCacheConfig {
	/// Maximum number of entries retained; `0` disables caching entirely.
	#[serde(default = "default_max_size")]
	pub max_size: usize,
	/// Interval between proactive eviction sweeps.
	#[serde(default = "default_eviction_interval")]
	pub eviction_interval: Duration,
}
impl TokenCacheConfig {
	/// Validate invariants for cache configuration.
	pub fn validate(&self) -> Result<()> {
		if self.eviction_interval.is_zero() {
			return Err(Error::Validation {
				field: "cache.eviction_interval",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for TokenCacheConfig {
	fn default() -> Self {
		Self { max_size: DEFAULT_MAX_SIZE, eviction_interval: DEFAULT_EVICTION_INTERVAL }
	}
}

/// Concurrent, expiration-aware cache of validated bearer tokens keyed by the raw
/// token string.
///
/// A hit replays the stored [`AccessTokenContent`] so the caller can skip signature
/// verification. Lookups and insertions never block on I/O and never hold a lock
/// across expensive work. Two tasks validating the same unknown token may both miss
/// and both verify; the last insertion wins and the duplicated verification is an
/// accepted trade-off of keeping the fast path lock-free.
///
/// Expired entries are dropped lazily on lookup and proactively by a background
/// sweep. [`TokenCache::shutdown`] stops the sweep; lazy expiry keeps working
/// afterwards.
#[derive(Clone, Debug)]
pub struct TokenCache {
	config: TokenCacheConfig,
	entries: Arc<DashMap<String, CacheEntry>>,
	stats: Arc<CacheStats>,
	evictor: Arc<Evictor>,
}
impl TokenCache {
	/// Construct a cache and spawn its periodic eviction task.
	///
	/// Must be called within a Tokio runtime unless `max_size` is zero, in which
	/// case caching is disabled and no task is spawned.
	pub fn new(config: TokenCacheConfig) -> Result<Self> {
		config.validate()?;

		let entries = Arc::new(DashMap::new());
		let stats = CacheStats::new();
		let cancel = CancellationToken::new();
		let handle = (config.max_size > 0).then(|| {
			spawn_sweeper(entries.clone(), stats.clone(), config.eviction_interval, cancel.clone())
		});

		Ok(Self {
			config,
			entries,
			stats,
			evictor: Arc::new(Evictor { cancel, handle: Mutex::new(handle) }),
		})
	}

	/// Look up a previously validated token.
	///
	/// Returns the stored content on a hit and `None` on a miss. A hit whose
	/// expiration has passed removes the entry and fails with
	/// [`Error::TokenExpired`]; an expired token is a definite failure, not an
	/// absence.
	pub fn get(&self, token: &str) -> Result<Option<Arc<AccessTokenContent>>> {
		if self.config.max_size == 0 {
			self.stats.record_miss();
			metrics::record_cache_miss();

			return Ok(None);
		}

		let Some((content, expires_at)) =
			self.entries.get(token).map(|entry| (entry.content().clone(), entry.expires_at()))
		else {
			self.stats.record_miss();
			metrics::record_cache_miss();

			return Ok(None);
		};

		if Utc::now() >= expires_at {
			// The read guard above is already gone; removing here cannot deadlock.
			self.entries.remove(token);
			self.stats.record_expiration();
			metrics::record_token_expired();
			tracing::debug!(expired_at = %expires_at, "cached token expired");

			return Err(Error::TokenExpired(expires_at));
		}

		self.stats.record_hit();
		metrics::record_cache_hit();

		Ok(Some(content))
	}

	/// Insert or overwrite the content cached for a token.
	///
	/// The content must carry an extractable expiration; a missing one is a defect
	/// in the verification step, not a token-state condition, and fails with
	/// [`Error::MissingExpiration`] while leaving the cache unchanged.
	pub fn put(&self, token: impl Into<String>, content: AccessTokenContent) -> Result<()> {
		let Some(expires_at) = content.expires_at() else {
			tracing::error!(
				kind = ?content.kind(),
				"rejecting token content without an expiration claim"
			);

			return Err(Error::MissingExpiration);
		};

		if self.config.max_size == 0 {
			return Ok(());
		}

		self.entries.insert(token.into(), CacheEntry::new(Arc::new(content), expires_at));
		self.stats.record_insertion();

		if self.entries.len() > self.config.max_size {
			self.evict_overflow();
		}

		Ok(())
	}

	/// Current number of cached entries.
	pub fn size(&self) -> usize {
		self.entries.len()
	}

	/// Event accumulator for this cache instance.
	pub fn stats(&self) -> Arc<CacheStats> {
		self.stats.clone()
	}

	/// Stop the background eviction task.
	///
	/// Idempotent. `get` and `put` remain callable afterwards; expired entries are
	/// then only dropped lazily on lookup.
	pub async fn shutdown(&self) {
		self.evictor.cancel.cancel();

		// Take the handle out of the lock before awaiting it.
		let Some(handle) = self.evictor.handle.lock().take() else { return };

		if let Err(error) = handle.await {
			tracing::warn!(%error, "token cache eviction task panicked");
		}
	}

	fn evict_overflow(&self) {
		let len = self.entries.len();

		if len <= self.config.max_size {
			return;
		}

		let batch = (len / EVICTION_BATCH_DIVISOR).max(1);
		// Max-heap over expiry; popping down to `batch` keeps the soonest-expiring keys.
		let mut victims = BinaryHeap::with_capacity(batch + 1);

		for entry in self.entries.iter() {
			victims.push((entry.value().expires_at(), entry.key().clone()));

			if victims.len() > batch {
				victims.pop();
			}
		}

		let mut removed = 0_u64;

		for (_, token) in victims {
			if self.entries.remove(&token).is_some() {
				removed += 1;
			}
		}

		if removed > 0 {
			self.stats.record_evictions(removed);
			metrics::record_cache_evictions(removed);
			tracing::debug!(removed, size = self.entries.len(), "capacity eviction completed");
		}
	}

	#[cfg(test)]
	pub(crate) fn sweep_now(&self) -> u64 {
		sweep_expired(&self.entries, Utc::now())
	}
}

#[derive(Debug)]
struct Evictor {
	cancel: CancellationToken,
	handle: Mutex<Option<JoinHandle<()>>>,
}

fn spawn_sweeper(
	entries: Arc<DashMap<String, CacheEntry>>,
	stats: Arc<CacheStats>,
	interval: Duration,
	cancel: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = time::interval(interval);

		// The first tick completes immediately; consume it so the first sweep runs
		// one full interval after construction.
		ticker.tick().await;

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					tracing::debug!("token cache eviction task stopped");

					break;
				},
				_ = ticker.tick() => {
					let removed = sweep_expired(&entries, Utc::now());

					if removed > 0 {
						stats.record_evictions(removed);
						metrics::record_cache_evictions(removed);
						tracing::debug!(removed, "expired tokens evicted");
					}
				},
			}
		}
	})
}

fn sweep_expired(entries: &DashMap<String, CacheEntry>, now: DateTime<Utc>) -> u64 {
	let before = entries.len();

	entries.retain(|_, entry| !entry.is_expired(now));

	before.saturating_sub(entries.len()) as u64
}

fn default_max_size() -> usize {
	DEFAULT_MAX_SIZE
}

fn default_eviction_interval() -> Duration {
	DEFAULT_EVICTION_INTERVAL
}
