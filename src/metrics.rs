//! Metrics helpers and per-instance telemetry bookkeeping.
//!
//! The atomic accumulators below are always available and act as the fire-and-forget
//! event sinks the cache and registry record into. The `metrics` facade counters are
//! emitted additionally when the `metrics` feature is enabled; the `prometheus`
//! feature layers an exporter on top.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
// self
use crate::_prelude::*;

#[cfg(feature = "metrics")]
const METRIC_CACHE_REQUESTS_TOTAL: &str = "token_cache_requests_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_HITS_TOTAL: &str = "token_cache_hits_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_MISSES_TOTAL: &str = "token_cache_misses_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_EXPIRED_TOTAL: &str = "token_cache_expired_total";
#[cfg(feature = "metrics")]
const METRIC_CACHE_EVICTIONS_TOTAL: &str = "token_cache_evictions_total";
#[cfg(feature = "metrics")]
const METRIC_PROBES_TOTAL: &str = "issuer_probes_total";
#[cfg(feature = "metrics")]
const METRIC_PROBE_DURATION: &str = "issuer_probe_duration_seconds";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe event accumulator for a single token cache instance.
#[derive(Debug, Default)]
pub struct CacheStats {
	requests: AtomicU64,
	hits: AtomicU64,
	misses: AtomicU64,
	expirations: AtomicU64,
	insertions: AtomicU64,
	evictions: AtomicU64,
}
impl CacheStats {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a lookup served from the cache.
	pub fn record_hit(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a lookup that found no entry.
	pub fn record_miss(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
		self.misses.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a lookup that found an entry past its expiration.
	pub fn record_expiration(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
		self.expirations.fetch_add(1, Ordering::Relaxed);
	}

	/// Record an inserted or overwritten entry.
	pub fn record_insertion(&self) {
		self.insertions.fetch_add(1, Ordering::Relaxed);
	}

	/// Record entries removed by capacity eviction or the periodic sweep.
	pub fn record_evictions(&self, count: u64) {
		self.evictions.fetch_add(count, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CacheStatsSnapshot {
		CacheStatsSnapshot {
			requests: self.requests.load(Ordering::Relaxed),
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			expirations: self.expirations.load(Ordering::Relaxed),
			insertions: self.insertions.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of token cache telemetry counters.
#[derive(Clone, Debug)]
pub struct CacheStatsSnapshot {
	/// Total number of lookups observed.
	pub requests: u64,
	/// Count of lookups served from the cache.
	pub hits: u64,
	/// Count of lookups that found no entry.
	pub misses: u64,
	/// Count of lookups that found an expired entry.
	pub expirations: u64,
	/// Count of inserted or overwritten entries.
	pub insertions: u64,
	/// Count of entries removed by eviction.
	pub evictions: u64,
}
impl CacheStatsSnapshot {
	/// Convenience method to compute the cache hit rate.
	pub fn hit_rate(&self) -> f64 {
		if self.requests == 0 { 0.0 } else { self.hits as f64 / self.requests as f64 }
	}
}

/// Thread-safe event accumulator for an issuer health registry.
#[derive(Debug, Default)]
pub struct RegistryStats {
	resolutions: AtomicU64,
	healthy_hits: AtomicU64,
	probe_successes: AtomicU64,
	probe_failures: AtomicU64,
	promotions: AtomicU64,
}
impl RegistryStats {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a resolution request, whatever its outcome.
	pub fn record_resolution(&self) {
		self.resolutions.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a resolution answered from the healthy set without probing.
	pub fn record_healthy_hit(&self) {
		self.healthy_hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a health probe that reported a usable key source.
	pub fn record_probe_success(&self) {
		self.probe_successes.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a health probe that failed or timed out.
	pub fn record_probe_failure(&self) {
		self.probe_failures.fetch_add(1, Ordering::Relaxed);
	}

	/// Record an issuer moving from the unhealthy to the healthy set.
	pub fn record_promotion(&self) {
		self.promotions.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> RegistryStatsSnapshot {
		RegistryStatsSnapshot {
			resolutions: self.resolutions.load(Ordering::Relaxed),
			healthy_hits: self.healthy_hits.load(Ordering::Relaxed),
			probe_successes: self.probe_successes.load(Ordering::Relaxed),
			probe_failures: self.probe_failures.load(Ordering::Relaxed),
			promotions: self.promotions.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of issuer registry telemetry counters.
#[derive(Clone, Debug)]
pub struct RegistryStatsSnapshot {
	/// Total number of resolution requests observed.
	pub resolutions: u64,
	/// Count of resolutions answered from the healthy set without probing.
	pub healthy_hits: u64,
	/// Count of health probes reporting a usable key source.
	pub probe_successes: u64,
	/// Count of health probes that failed or timed out.
	pub probe_failures: u64,
	/// Count of issuers promoted to the healthy set.
	pub promotions: u64,
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a token served from the cache.
pub fn record_cache_hit() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_CACHE_REQUESTS_TOTAL).increment(1);
		metrics::counter!(METRIC_CACHE_HITS_TOTAL).increment(1);
	}
}

/// Record a lookup that found no cached token.
pub fn record_cache_miss() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_CACHE_REQUESTS_TOTAL).increment(1);
		metrics::counter!(METRIC_CACHE_MISSES_TOTAL).increment(1);
	}
}

/// Record a lookup that found an expired token.
pub fn record_token_expired() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_CACHE_REQUESTS_TOTAL).increment(1);
		metrics::counter!(METRIC_CACHE_EXPIRED_TOTAL).increment(1);
	}
}

/// Record entries removed by eviction.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_cache_evictions(count: u64) {
	#[cfg(feature = "metrics")]
	metrics::counter!(METRIC_CACHE_EVICTIONS_TOTAL).increment(count);
}

/// Record a successful issuer health probe along with its latency.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_probe_success(issuer: &str, duration: Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(METRIC_PROBES_TOTAL, "issuer" => issuer.to_owned(), "status" => "success")
			.increment(1);
		metrics::histogram!(METRIC_PROBE_DURATION, "issuer" => issuer.to_owned())
			.record(duration.as_secs_f64());
	}
}

/// Record a failed or timed-out issuer health probe.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_probe_failure(issuer: &str) {
	#[cfg(feature = "metrics")]
	metrics::counter!(METRIC_PROBES_TOTAL, "issuer" => issuer.to_owned(), "status" => "error")
		.increment(1);
}
