//! Integration coverage for JWKS retrieval and OIDC discovery key sources.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use bearer_guard::{
	Error, KeySource, RetryConfig, RetryStrategy,
	keys::{jwks::JwksKeySource, well_known::WellKnownKeySource},
};
use serde_json::json;
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

fn jwks_source(server: &MockServer, ttl: Duration) -> JwksKeySource {
	JwksKeySource::builder(format!("{}/oidc/jwks.json", server.uri()).parse().expect("valid url"))
		.ttl(ttl)
		.require_https(false)
		.build()
		.expect("source builds")
}

fn fast_retry(max_attempts: u32) -> RetryStrategy {
	RetryStrategy::exponential(RetryConfig {
		max_attempts,
		initial_delay: Duration::from_millis(10),
		max_delay: Duration::from_millis(50),
		backoff_multiplier: 2.0,
		jitter_factor: 0.0,
	})
	.expect("valid retry config")
}

#[tokio::test]
async fn construction_is_lazy_and_first_use_fetches() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template())
		.expect(1)
		.mount(&server)
		.await;

	let source = jwks_source(&server, Duration::from_secs(60));

	assert!(
		server.received_requests().await.expect("recording enabled").is_empty(),
		"construction must not touch the network"
	);

	let keys = source.key_set().await.expect("fetch succeeds");

	assert_eq!(keys.keys.len(), 1);
	server.verify().await;
}

#[tokio::test]
async fn fetched_keys_are_reused_until_the_ttl_expires() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template())
		.expect(2)
		.mount(&server)
		.await;

	let source = jwks_source(&server, Duration::from_millis(100));
	let first = source.key_set().await.expect("fetch succeeds");
	let second = source.key_set().await.expect("served from memory");

	assert!(Arc::ptr_eq(&first, &second), "fresh key sets should be shared");

	tokio::time::sleep(Duration::from_millis(150)).await;

	let third = source.key_set().await.expect("refetched after expiry");

	assert_eq!(third.keys.len(), 1);
	server.verify().await;
}

#[tokio::test]
async fn concurrent_cold_starts_share_one_fetch() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template().set_delay(Duration::from_millis(100)))
		.expect(1)
		.mount(&server)
		.await;

	let source = Arc::new(jwks_source(&server, Duration::from_secs(60)));
	let mut handles = Vec::new();

	for _ in 0..10 {
		let source = source.clone();

		handles.push(tokio::spawn(async move { source.key_set().await }));
	}
	for handle in handles {
		let keys = handle.await.expect("no panic").expect("fetch succeeds");

		assert_eq!(keys.keys.len(), 1);
	}

	server.verify().await;
}

#[tokio::test]
async fn failing_endpoints_and_empty_documents_are_unhealthy() {
	let _ = tracing_subscriber::fmt::try_init();

	let failing = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&failing)
		.await;

	assert!(!jwks_source(&failing, Duration::from_secs(60)).is_healthy().await);

	let empty = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [] })))
		.mount(&empty)
		.await;

	assert!(!jwks_source(&empty, Duration::from_secs(60)).is_healthy().await);
}

#[tokio::test]
async fn transient_failures_recover_within_one_fetch_when_retry_is_configured() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let request_counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let counter_handle = request_counter.clone();

	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(move |_: &wiremock::Request| {
			let idx = counter_handle.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

			if idx == 0 { ResponseTemplate::new(500) } else { jwks_template() }
		})
		.mount(&server)
		.await;

	let source = JwksKeySource::builder(
		format!("{}/oidc/jwks.json", server.uri()).parse().expect("valid url"),
	)
	.retry(fast_retry(3))
	.require_https(false)
	.build()
	.expect("source builds");
	let keys = source.key_set().await.expect("second attempt succeeds");

	assert_eq!(keys.keys.len(), 1);
	assert_eq!(request_counter.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn discovery_resolves_keys_through_the_well_known_document() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"issuer": server.uri(),
			"jwks_uri": format!("{}/oidc/jwks.json", server.uri()),
			"response_types_supported": ["code"]
		})))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template())
		.expect(1)
		.mount(&server)
		.await;

	let source = WellKnownKeySource::builder(server.uri().parse().expect("valid url"))
		.require_https(false)
		.build()
		.expect("source builds");
	let first = source.key_set().await.expect("discovery and fetch succeed");
	let second = source.key_set().await.expect("served from memory");

	assert_eq!(first.keys.len(), 1);
	// The discovery document is fetched once; later calls reuse the resolved source.
	assert!(Arc::ptr_eq(&first, &second));
	assert!(source.is_healthy().await);
	server.verify().await;
}

#[tokio::test]
async fn discovery_rejects_a_mismatched_issuer() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"issuer": "https://evil.example.com",
			"jwks_uri": format!("{}/oidc/jwks.json", server.uri())
		})))
		.mount(&server)
		.await;

	let source = WellKnownKeySource::builder(server.uri().parse().expect("valid url"))
		.require_https(false)
		.build()
		.expect("source builds");

	assert!(matches!(source.key_set().await, Err(Error::Security(_))));
	assert!(!source.is_healthy().await);
}

#[tokio::test]
async fn failed_discovery_is_retried_on_the_next_call() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let request_counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let counter_handle = request_counter.clone();
	let issuer = server.uri();

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(move |_: &wiremock::Request| {
			let idx = counter_handle.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

			if idx == 0 {
				ResponseTemplate::new(500)
			} else {
				ResponseTemplate::new(200).set_body_json(json!({
					"issuer": issuer,
					"jwks_uri": format!("{issuer}/oidc/jwks.json")
				}))
			}
		})
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/oidc/jwks.json"))
		.respond_with(jwks_template())
		.mount(&server)
		.await;

	let source = WellKnownKeySource::builder(server.uri().parse().expect("valid url"))
		.require_https(false)
		.build()
		.expect("source builds");

	assert!(source.key_set().await.is_err(), "first discovery fails");

	let keys = source.key_set().await.expect("second discovery succeeds");

	assert_eq!(keys.keys.len(), 1);
}
