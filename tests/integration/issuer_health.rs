//! Integration coverage for issuer health probing against live endpoints.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use bearer_guard::{IssuerConfig, IssuerHealthRegistry, KeySource, keys::jwks::JwksKeySource};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

const JWKS_BODY: &str = r#"{
    "keys": [
        {
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": "primary",
            "n": "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A",
            "e": "AQAB"
        }
    ]
}"#;

fn jwks_template() -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(JWKS_BODY)
		.insert_header("content-type", "application/json")
}

fn source_for(server: &MockServer) -> Arc<JwksKeySource> {
	Arc::new(
		JwksKeySource::builder(
			format!("{}/oidc/jwks.json", server.uri()).parse().expect("valid url"),
		)
		.require_https(false)
		.build()
		.expect("source builds"),
	)
}

#[tokio::test]
async fn disabled_issuers_are_never_probed_over_the_network() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template())
		.expect(0)
		.mount(&server)
		.await;

	let registry = IssuerHealthRegistry::new([
		IssuerConfig::new("https://idp.disabled", source_for(&server)).with_enabled(false),
	]);

	assert!(!registry.resolve("https://idp.disabled").await.is_usable());
	assert!(registry.is_empty());
	server.verify().await;
}

#[tokio::test]
async fn an_issuer_recovers_once_its_endpoint_comes_back() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let request_counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let counter_handle = request_counter.clone();

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(move |_: &wiremock::Request| {
			let idx = counter_handle.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

			if idx < 2 { ResponseTemplate::new(500) } else { jwks_template() }
		})
		.mount(&server)
		.await;

	let issuer = "https://idp.example.com";
	let registry = IssuerHealthRegistry::new([IssuerConfig::new(issuer, source_for(&server))]);

	// Two outages, then the endpoint comes back and the probe promotes the issuer.
	assert!(!registry.resolve(issuer).await.is_usable());
	assert!(!registry.resolve(issuer).await.is_usable());
	assert!(registry.resolve(issuer).await.is_usable());
	assert_eq!(registry.healthy_issuers(), [issuer]);

	// Promoted issuers resolve from memory without probing again.
	assert!(registry.resolve(issuer).await.is_usable());
	assert_eq!(request_counter.load(std::sync::atomic::Ordering::SeqCst), 3);

	let stats = registry.stats().snapshot();

	assert_eq!(stats.resolutions, 4);
	assert_eq!(stats.probe_failures, 2);
	assert_eq!(stats.probe_successes, 1);
	assert_eq!(stats.healthy_hits, 1);
	assert_eq!(stats.promotions, 1);
}

#[tokio::test]
async fn probe_timeouts_bound_a_hanging_endpoint() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template().set_delay(Duration::from_millis(500)))
		.mount(&server)
		.await;

	let issuer = "https://idp.slow.example.com";
	let registry = IssuerHealthRegistry::builder()
		.issuer(IssuerConfig::new(issuer, source_for(&server)))
		.probe_timeout(Duration::from_millis(50))
		.build();

	assert!(!registry.resolve(issuer).await.is_usable());
	assert_eq!(registry.stats().snapshot().probe_failures, 1);
	assert_eq!(registry.unhealthy_issuers(), [issuer]);
}

#[tokio::test]
async fn usable_resolutions_hand_back_a_working_key_source() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template())
		.mount(&server)
		.await;

	let issuer = "https://idp.example.com";
	let registry = IssuerHealthRegistry::new([IssuerConfig::new(issuer, source_for(&server))]);
	let config = registry
		.resolve(issuer)
		.await
		.into_config()
		.expect("healthy issuer resolves to its config");

	assert_eq!(config.identifier(), issuer);

	let keys = config.key_source().key_set().await.expect("keys retrievable");

	assert_eq!(keys.keys.len(), 1);
}
