//! Completion events
//!
//! One event is published per consumed notification, shaped as a structured
//! CloudEvent. The publisher is a seam: [`JsonLinesPublisher`] writes events
//! as JSON lines, other sinks implement [`EventPublisher`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sipin_common::{Result, SipError};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const SPEC_VERSION: &str = "1.0";
pub const DEFAULT_EVENT_TYPE: &str = "be.meemoo.sipin.sip.create";
pub const DEFAULT_EVENT_SOURCE: &str = "sipin-sip-creator";

/// Result of processing one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    IntegrityMismatch,
    ValidationFailure,
    TransientFailure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::IntegrityMismatch => "integrity-mismatch",
            Outcome::ValidationFailure => "validation-failure",
            Outcome::TransientFailure => "transient-failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `data` of a completion event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub host: String,
    /// Archive path, empty when no archive was produced
    pub path: String,
    pub outcome: Option<Outcome>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essence_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_sum_essence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essence_filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bag_filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_declared: Option<String>,
}

/// Header values shared by every event of this process
#[derive(Debug, Clone)]
pub struct EventSettings {
    pub event_type: String,
    pub source: String,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub specversion: String,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub subject: String,
    pub time: DateTime<Utc>,
    pub outcome: Outcome,
    pub correlation_id: String,
    pub datacontenttype: String,
    pub data: EventData,
}

impl CompletionEvent {
    pub fn new(
        settings: &EventSettings,
        subject: impl Into<String>,
        correlation_id: impl Into<String>,
        outcome: Outcome,
        mut data: EventData,
    ) -> Self {
        data.outcome = Some(outcome);
        Self {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            event_type: settings.event_type.clone(),
            source: settings.source.clone(),
            subject: subject.into(),
            time: Utc::now(),
            outcome,
            correlation_id: correlation_id.into(),
            datacontenttype: "application/json".to_string(),
            data,
        }
    }
}

/// Sink for completion events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CompletionEvent) -> Result<()>;
}

/// Writes one JSON event per line
pub struct JsonLinesPublisher {
    target: String,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesPublisher {
    pub fn stdout() -> Self {
        Self {
            target: "stdout".to_string(),
            writer: Mutex::new(Box::new(tokio::io::stdout())),
        }
    }

    /// Append to `path`, creating it if needed
    pub async fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| SipError::filesystem(path, e))?;
        Ok(Self {
            target: path.display().to_string(),
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// `None` means stdout
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::file(path).await,
            None => Ok(Self::stdout()),
        }
    }
}

#[async_trait]
impl EventPublisher for JsonLinesPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| SipError::DependencyUnavailable(format!("{}: {}", self.target, e)))?;
        writer
            .flush()
            .await
            .map_err(|e| SipError::DependencyUnavailable(format!("{}: {}", self.target, e)))?;
        Ok(())
    }
}

/// Keeps published events in memory
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<CompletionEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
