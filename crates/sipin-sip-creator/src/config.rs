//! Configuration management

use crate::bag::{BagConfig, TransferMode};
use crate::events::{EventSettings, DEFAULT_EVENT_SOURCE, DEFAULT_EVENT_TYPE};
use crate::orchestrator::{
    RedeliveryPolicy, DEFAULT_REDELIVERY_ATTEMPTS, DEFAULT_REDELIVERY_DELAY_MS,
};
use crate::org_api::{
    OrgApiConfig, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_SECS,
};
use sipin_common::{Result, SipError};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default maximum number of notifications processed at once.
pub const DEFAULT_PREFETCH_COUNT: usize = 10;

/// Default host identifier when the machine hostname cannot be read.
pub const DEFAULT_HOST: &str = "localhost";

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host identifier put in completion events
    pub host: String,
    pub prefetch_count: usize,
    /// Redelivery of notifications that fail transiently
    pub redelivery: RedeliveryPolicy,
    pub bag: BagConfig,
    pub events: EventSettings,
    /// JSON-lines sink for completion events; stdout when unset
    pub events_path: Option<PathBuf>,
    /// Directory service; required to run the pipeline
    pub org_api: Option<OrgApiConfig>,
}

impl AppConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `load` uses the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = var("SIPIN_HOST").unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| DEFAULT_HOST.to_string())
        });

        let transfer = match var("SIPIN_ESSENCE_TRANSFER") {
            Some(value) => value.parse::<TransferMode>()?,
            None => TransferMode::default(),
        };

        let org_api = match var("ORG_API_URL") {
            Some(url) => {
                let mut config = OrgApiConfig::new(url);
                config.timeout = Duration::from_secs(parse_or(
                    &var,
                    "ORG_API_TIMEOUT_SECS",
                    DEFAULT_TIMEOUT_SECS,
                )?);
                config.max_retries = parse_or(&var, "ORG_API_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
                config.retry_delay = Duration::from_millis(parse_or(
                    &var,
                    "ORG_API_RETRY_DELAY_MS",
                    DEFAULT_RETRY_DELAY_MS,
                )?);
                Some(config)
            },
            None => None,
        };

        let config = AppConfig {
            host,
            prefetch_count: parse_or(&var, "SIPIN_PREFETCH_COUNT", DEFAULT_PREFETCH_COUNT)?,
            redelivery: RedeliveryPolicy {
                max_attempts: parse_or(
                    &var,
                    "SIPIN_REDELIVERY_ATTEMPTS",
                    DEFAULT_REDELIVERY_ATTEMPTS,
                )?,
                delay: Duration::from_millis(parse_or(
                    &var,
                    "SIPIN_REDELIVERY_DELAY_MS",
                    DEFAULT_REDELIVERY_DELAY_MS,
                )?),
            },
            bag: BagConfig {
                output_dir: var("SIPIN_OUTPUT_DIR").map(PathBuf::from),
                work_dir: var("SIPIN_WORK_DIR").map(PathBuf::from),
                transfer,
                ..BagConfig::default()
            },
            events: EventSettings {
                event_type: var("SIPIN_EVENT_TYPE")
                    .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
                source: var("SIPIN_EVENT_SOURCE")
                    .unwrap_or_else(|| DEFAULT_EVENT_SOURCE.to_string()),
            },
            events_path: var("SIPIN_EVENTS_PATH").map(PathBuf::from),
            org_api,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.prefetch_count == 0 {
            return Err(SipError::Config(
                "SIPIN_PREFETCH_COUNT must be greater than 0".to_string(),
            ));
        }

        if self.redelivery.max_attempts == 0 {
            return Err(SipError::Config(
                "SIPIN_REDELIVERY_ATTEMPTS must be greater than 0".to_string(),
            ));
        }

        if let Some(org_api) = &self.org_api {
            if !org_api.url.starts_with("http://") && !org_api.url.starts_with("https://") {
                return Err(SipError::Config(format!(
                    "ORG_API_URL must be an http(s) URL, got '{}'",
                    org_api.url
                )));
            }
            if org_api.max_retries == 0 {
                return Err(SipError::Config(
                    "ORG_API_MAX_RETRIES must be greater than 0".to_string(),
                ));
            }
        }

        for (name, dir) in [
            ("SIPIN_OUTPUT_DIR", &self.bag.output_dir),
            ("SIPIN_WORK_DIR", &self.bag.work_dir),
        ] {
            if let Some(dir) = dir {
                if !dir.is_dir() {
                    return Err(SipError::Config(format!(
                        "{} '{}' is not a directory",
                        name,
                        dir.display()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Directory service settings, which the pipeline can not run without
    pub fn require_org_api(&self) -> Result<&OrgApiConfig> {
        self.org_api
            .as_ref()
            .ok_or_else(|| SipError::Config("ORG_API_URL is not set".to_string()))
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| SipError::Config(format!("Invalid {} '{}': {}", key, value, e))),
        None => Ok(default),
    }
}
