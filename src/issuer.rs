//! Issuer enablement and health tracking with on-demand probes.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use dashmap::DashMap;
use tokio::time;
// self
use crate::{
	_prelude::*,
	keys::KeySource,
	metrics::{self, RegistryStats},
	retry::{OperationError, RetryContext, RetryStrategy},
};

/// Default upper bound on a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Static configuration for one accepted issuer.
#[derive(Clone, Debug)]
pub struct IssuerConfig {
	identifier: String,
	enabled: bool,
	key_source: Arc<dyn KeySource>,
}
impl IssuerConfig {
	/// Describe an enabled issuer backed by the given key source.
	pub fn new(identifier: impl Into<String>, key_source: Arc<dyn KeySource>) -> Self {
		Self { identifier: identifier.into(), enabled: true, key_source }
	}

	/// Set enablement to the desired value.
	pub fn with_enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;

		self
	}

	/// Issuer identifier as it appears in token claims.
	pub fn identifier(&self) -> &str {
		&self.identifier
	}

	/// Whether tokens from this issuer are accepted at all.
	pub fn enabled(&self) -> bool {
		self.enabled
	}

	/// Key source used for verification and probing.
	pub fn key_source(&self) -> &Arc<dyn KeySource> {
		&self.key_source
	}
}

/// Outcome of resolving an issuer for a validation attempt.
#[derive(Clone, Debug)]
pub enum IssuerResolution {
	/// The issuer is enabled and its keys are believed retrievable.
	Usable(Arc<IssuerConfig>),
	/// The issuer is unknown, disabled, or failed its health probe.
	Unusable,
}
impl IssuerResolution {
	/// Whether validation may proceed against this issuer.
	pub fn is_usable(&self) -> bool {
		matches!(self, Self::Usable(_))
	}

	/// Configuration of a usable issuer.
	pub fn into_config(self) -> Option<Arc<IssuerConfig>> {
		match self {
			Self::Usable(config) => Some(config),
			Self::Unusable => None,
		}
	}
}

/// Health-tracking view over the set of enabled issuers.
///
/// Every issuer starts unhealthy, keeping startup free of network activity; the
/// first successful probe promotes it. Promotion is one-way: a promoted issuer is
/// never demoted here, and reachability regressions surface through the actual key
/// fetch instead of a stale health flag.
#[derive(Clone, Debug)]
pub struct IssuerHealthRegistry {
	issuers: Arc<DashMap<String, Arc<IssuerEntry>>>,
	probe_timeout: Duration,
	probe_retry: RetryStrategy,
	stats: Arc<RegistryStats>,
}
impl IssuerHealthRegistry {
	/// Create a registry from issuer configurations with default probe settings.
	pub fn new<I>(issuers: I) -> Self
	where
		I: IntoIterator<Item = IssuerConfig>,
	{
		let mut builder = Self::builder();

		for config in issuers {
			builder = builder.issuer(config);
		}

		builder.build()
	}

	/// Create an [`IssuerHealthRegistryBuilder`] for advanced configuration.
	pub fn builder() -> IssuerHealthRegistryBuilder {
		IssuerHealthRegistryBuilder::new()
	}

	/// Decide whether validation may proceed against `identifier`.
	///
	/// Healthy issuers are answered from memory without touching the network.
	/// An unhealthy issuer gets one bounded probe; success promotes it so later
	/// resolutions skip the probe. Unknown and disabled issuers are unusable and
	/// are never probed.
	#[tracing::instrument(skip(self, identifier), fields(issuer = identifier))]
	pub async fn resolve(&self, identifier: &str) -> IssuerResolution {
		self.stats.record_resolution();

		let Some(entry) = self.issuers.get(identifier).map(|entry| entry.value().clone()) else {
			tracing::debug!("issuer unknown or disabled");

			return IssuerResolution::Unusable;
		};

		if entry.healthy.load(Ordering::Acquire) {
			self.stats.record_healthy_hit();

			return IssuerResolution::Usable(entry.config.clone());
		}

		if self.probe(&entry).await {
			IssuerResolution::Usable(entry.config.clone())
		} else {
			IssuerResolution::Unusable
		}
	}

	/// Identifiers currently believed healthy, sorted.
	pub fn healthy_issuers(&self) -> Vec<String> {
		self.partition(true)
	}

	/// Identifiers still awaiting a successful probe, sorted.
	pub fn unhealthy_issuers(&self) -> Vec<String> {
		self.partition(false)
	}

	/// Number of enabled issuers known to the registry.
	pub fn len(&self) -> usize {
		self.issuers.len()
	}

	/// Whether the registry tracks no issuers.
	pub fn is_empty(&self) -> bool {
		self.issuers.is_empty()
	}

	/// Event accumulator for this registry instance.
	pub fn stats(&self) -> Arc<RegistryStats> {
		self.stats.clone()
	}

	async fn probe(&self, entry: &IssuerEntry) -> bool {
		let identifier = entry.config.identifier();
		let started = Instant::now();
		let outcome = self
			.probe_retry
			.execute(RetryContext::initial("issuer-health-probe"), |_| {
				let source = entry.config.key_source().clone();
				let timeout = self.probe_timeout;

				async move {
					match time::timeout(timeout, source.is_healthy()).await {
						Ok(true) => Ok(()),
						Ok(false) => Err(OperationError::Io(
							"key source reports no retrievable keys".into(),
						)),
						Err(_) => Err(OperationError::Timeout(format!(
							"health probe exceeded {timeout:?}"
						))),
					}
				}
			})
			.await;

		match outcome {
			Ok(()) => {
				// Promotion is one-way; count only the first transition.
				if !entry.healthy.swap(true, Ordering::AcqRel) {
					self.stats.record_promotion();
					tracing::info!(issuer = identifier, "issuer promoted to healthy");
				}

				self.stats.record_probe_success();
				metrics::record_probe_success(identifier, started.elapsed());

				true
			},
			Err(error) => {
				self.stats.record_probe_failure();
				metrics::record_probe_failure(identifier);
				tracing::warn!(issuer = identifier, %error, "issuer health probe failed");

				false
			},
		}
	}

	fn partition(&self, healthy: bool) -> Vec<String> {
		let mut identifiers = self
			.issuers
			.iter()
			.filter(|entry| entry.value().healthy.load(Ordering::Acquire) == healthy)
			.map(|entry| entry.key().clone())
			.collect::<Vec<_>>();

		identifiers.sort_unstable();

		identifiers
	}
}

/// Builder for [`IssuerHealthRegistry`].
#[derive(Debug)]
pub struct IssuerHealthRegistryBuilder {
	issuers: Vec<IssuerConfig>,
	probe_timeout: Duration,
	probe_retry: RetryStrategy,
}
impl IssuerHealthRegistryBuilder {
	/// Create a builder with no issuers and default probe settings.
	pub fn new() -> Self {
		Self {
			issuers: Vec::new(),
			probe_timeout: DEFAULT_PROBE_TIMEOUT,
			probe_retry: RetryStrategy::none(),
		}
	}

	/// Add an issuer to the accepted set.
	pub fn issuer(mut self, config: IssuerConfig) -> Self {
		self.issuers.push(config);

		self
	}

	/// Override the per-probe timeout.
	pub fn probe_timeout(mut self, timeout: Duration) -> Self {
		self.probe_timeout = timeout;

		self
	}

	/// Retry schedule applied within one resolution's probe (no retries by default).
	pub fn probe_retry(mut self, retry: RetryStrategy) -> Self {
		self.probe_retry = retry;

		self
	}

	/// Finalise the configuration and construct an [`IssuerHealthRegistry`].
	pub fn build(self) -> IssuerHealthRegistry {
		let issuers = DashMap::new();

		for config in self.issuers {
			if !config.enabled() {
				tracing::debug!(issuer = config.identifier(), "skipping disabled issuer");

				continue;
			}

			issuers.insert(
				config.identifier().to_owned(),
				Arc::new(IssuerEntry {
					config: Arc::new(config),
					healthy: AtomicBool::new(false),
				}),
			);
		}

		IssuerHealthRegistry {
			issuers: Arc::new(issuers),
			probe_timeout: self.probe_timeout,
			probe_retry: self.probe_retry,
			stats: RegistryStats::new(),
		}
	}
}
impl Default for IssuerHealthRegistryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug)]
struct IssuerEntry {
	config: Arc<IssuerConfig>,
	healthy: AtomicBool,
}
