//! Organization directory service client
//!
//! Resolves a content partner id to its display label through the GraphQL
//! organization API. Labels never change within a run, so they are memoized in
//! a [`LabelCache`] that is shared by every in-flight notification.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sipin_common::{Result, SipError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts per lookup
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base delay between attempts; the actual delay is this times the attempt number
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Statuses worth another attempt
const RETRYABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Content partner id to label, write-once per key
#[derive(Debug, Clone, Default)]
pub struct LabelCache {
    labels: Arc<RwLock<HashMap<String, String>>>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, cp_id: &str) -> Option<String> {
        self.labels.read().await.get(cp_id).cloned()
    }

    pub async fn insert(&self, cp_id: impl Into<String>, label: impl Into<String>) {
        self.labels
            .write()
            .await
            .entry(cp_id.into())
            .or_insert_with(|| label.into());
    }

    pub async fn len(&self) -> usize {
        self.labels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Looks up the label of a content partner
#[async_trait]
pub trait LabelResolver: Send + Sync {
    /// # Errors
    /// - [`SipError::DependencyUnavailable`] when the service stays unreachable
    /// - [`SipError::UnknownContentPartner`] when it has no label for `cp_id`
    async fn resolve(&self, cp_id: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OrgApiConfig {
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl OrgApiConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<OrganizationsData>,
}

#[derive(Debug, Deserialize)]
struct OrganizationsData {
    #[serde(default)]
    organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    label: Option<String>,
}

enum Attempt {
    Done(Result<String>),
    Retry(String),
}

pub struct OrgApiClient {
    client: Client,
    config: OrgApiConfig,
    cache: LabelCache,
}

impl OrgApiClient {
    pub fn new(config: OrgApiConfig, cache: LabelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SipError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            cache,
        })
    }

    pub fn cache(&self) -> &LabelCache {
        &self.cache
    }

    /// GraphQL query for the label of one organization
    pub fn query(cp_id: &str) -> String {
        let id = serde_json::Value::String(cp_id.to_string());
        format!("{{ organizations(id:{}) {{ label }} }}", id)
    }

    async fn attempt(&self, cp_id: &str) -> Attempt {
        let body = serde_json::json!({ "query": Self::query(cp_id) });
        let response = match self.client.post(&self.config.url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("request failed: {}", e)),
        };

        let status = response.status();
        if RETRYABLE_STATUSES.contains(&status) {
            return Attempt::Retry(format!("status {}", status));
        }
        if !status.is_success() {
            return Attempt::Done(Err(SipError::Config(format!(
                "Directory service rejected the lookup for '{}' with status {}",
                cp_id, status
            ))));
        }

        let parsed: GraphQlResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return Attempt::Done(Err(SipError::UnknownContentPartner(format!(
                    "Could not fetch the label for CP ID '{}': {}",
                    cp_id, e
                ))))
            },
        };

        let label = parsed
            .data
            .and_then(|data| data.organizations.into_iter().next())
            .and_then(|organization| organization.label);
        Attempt::Done(label.ok_or_else(|| {
            SipError::UnknownContentPartner(format!(
                "Could not fetch the label for CP ID '{}'",
                cp_id
            ))
        }))
    }
}

#[async_trait]
impl LabelResolver for OrgApiClient {
    async fn resolve(&self, cp_id: &str) -> Result<String> {
        if let Some(label) = self.cache.get(cp_id).await {
            debug!("Label for {} served from cache", cp_id);
            return Ok(label);
        }

        let max_retries = self.config.max_retries.max(1);
        for attempt in 1..=max_retries {
            debug!("Label lookup attempt {}/{} for: {}", attempt, max_retries, cp_id);

            match self.attempt(cp_id).await {
                Attempt::Done(Ok(label)) => {
                    info!(cp_id, label = %label, "Resolved content partner label");
                    self.cache.insert(cp_id, label.clone()).await;
                    return Ok(label);
                },
                Attempt::Done(Err(e)) => return Err(e),
                Attempt::Retry(reason) if attempt < max_retries => {
                    let delay = self.config.retry_delay * attempt;
                    warn!(
                        "Label lookup attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempt, max_retries, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Attempt::Retry(reason) => {
                    return Err(SipError::DependencyUnavailable(format!(
                        "Directory service unavailable after {} attempts: {}",
                        max_retries, reason
                    )));
                },
            }
        }

        Err(SipError::DependencyUnavailable(format!(
            "Directory service unavailable for '{}'",
            cp_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_quotes_id() {
        assert_eq!(
            OrgApiClient::query("OR-abc"),
            r#"{ organizations(id:"OR-abc") { label } }"#
        );
        assert_eq!(
            OrgApiClient::query(r#"a"b"#),
            r#"{ organizations(id:"a\"b") { label } }"#
        );
    }

    #[tokio::test]
    async fn test_cache_is_write_once() {
        let cache = LabelCache::new();
        assert!(cache.is_empty().await);
        cache.insert("OR-abc", "First").await;
        cache.insert("OR-abc", "Second").await;
        assert_eq!(cache.get("OR-abc").await.as_deref(), Some("First"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_is_shared_between_clones() {
        let cache = LabelCache::new();
        let clone = cache.clone();
        clone.insert("OR-abc", "ACME").await;
        assert_eq!(cache.get("OR-abc").await.as_deref(), Some("ACME"));
    }
}
