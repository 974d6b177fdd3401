//! Organization directory service client tests
//!
//! Runs [`OrgApiClient`] against a wiremock GraphQL endpoint:
//! - label lookup and caching
//! - retries on unavailable responses
//! - unknown content partners and rejected lookups

use serde_json::json;
use sipin_common::SipError;
use sipin_sip_creator::org_api::{LabelCache, LabelResolver, OrgApiClient, OrgApiConfig};
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, max_retries: u32) -> OrgApiClient {
    let config = OrgApiConfig {
        url: format!("{}/graphql", server.uri()),
        timeout: Duration::from_secs(5),
        max_retries,
        retry_delay: Duration::from_millis(1),
    };
    OrgApiClient::new(config, LabelCache::new()).unwrap()
}

fn organizations_response(labels: &[&str]) -> serde_json::Value {
    let organizations: Vec<_> = labels.iter().map(|label| json!({ "label": label })).collect();
    json!({ "data": { "organizations": organizations } })
}

fn lookup(cp_id: &str) -> serde_json::Value {
    json!({ "query": OrgApiClient::query(cp_id) })
}

// ============================================================================
// Successful Lookups
// ============================================================================

#[tokio::test]
async fn test_resolves_label_and_caches_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_json(lookup("OR-abc")))
        .respond_with(ResponseTemplate::new(200).set_body_json(organizations_response(&["ACME"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 3);

    assert_eq!(client.resolve("OR-abc").await.unwrap(), "ACME");
    assert_eq!(client.resolve("OR-abc").await.unwrap(), "ACME");
    assert_eq!(client.cache().get("OR-abc").await.as_deref(), Some("ACME"));
}

#[tokio::test]
async fn test_first_organization_wins() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(organizations_response(&["First", "Second"])),
        )
        .mount(&server)
        .await;

    assert_eq!(client(&server, 1).resolve("OR-abc").await.unwrap(), "First");
}

#[tokio::test]
async fn test_prefilled_cache_skips_the_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let cache = LabelCache::new();
    cache.insert("OR-abc", "Cached").await;
    let config = OrgApiConfig::new(format!("{}/graphql", server.uri()));
    let client = OrgApiClient::new(config, cache).unwrap();

    assert_eq!(client.resolve("OR-abc").await.unwrap(), "Cached");
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_retries_until_service_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(organizations_response(&["ACME"])))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client(&server, 5).resolve("OR-abc").await.unwrap(), "ACME");
}

#[tokio::test]
async fn test_exhausted_retries_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&server, 3);
    let err = client.resolve("OR-abc").await.unwrap_err();

    assert!(matches!(err, SipError::DependencyUnavailable(_)));
    assert!(err.is_transient());
    assert!(client.cache().is_empty().await);
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    // Nothing listens on port 1
    let config = OrgApiConfig {
        url: "http://127.0.0.1:1/graphql".to_string(),
        timeout: Duration::from_secs(1),
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
    };
    let err = OrgApiClient::new(config, LabelCache::new())
        .unwrap()
        .resolve("OR-abc")
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

// ============================================================================
// Terminal Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_content_partner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(organizations_response(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 5).resolve("OR-missing").await.unwrap_err();

    assert!(matches!(err, SipError::UnknownContentPartner(_)));
    assert!(!err.is_transient());
    assert!(err.to_string().contains("OR-missing"));
}

#[tokio::test]
async fn test_unparseable_response_is_unknown_partner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client(&server, 5).resolve("OR-abc").await.unwrap_err();

    assert!(matches!(err, SipError::UnknownContentPartner(_)));
}

#[tokio::test]
async fn test_rejected_lookup_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 5).resolve("OR-abc").await.unwrap_err();

    assert!(matches!(err, SipError::Config(_)));
    assert!(!err.is_transient());
}
