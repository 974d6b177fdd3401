//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sipin_common::checksum::compute_md5;
use sipin_common::{Result, SipError};
use sipin_sip_creator::bag::{BagAssembler, BagConfig};
use sipin_sip_creator::events::{EventSettings, MemoryPublisher};
use sipin_sip_creator::orchestrator::IngestionPipeline;
use sipin_sip_creator::org_api::LabelResolver;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ESSENCE: &[u8] = b"\x00\x00\x00\x18ftypmp42 pretend this is a video";

/// An essence and sidecar dropped in a watchfolder
pub struct Watchfolder {
    pub dir: PathBuf,
    pub flow_id: String,
}

impl Watchfolder {
    /// `declared_md5`: `Some(None)` omits the field, `None` declares the real checksum
    pub fn new(dir: &Path, flow_id: &str, declared_md5: Option<Option<&str>>) -> Self {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("clip.mp4"), ESSENCE).unwrap();

        let md5 = match declared_md5 {
            None => Some(compute_md5(ESSENCE)),
            Some(declared) => declared.map(str::to_string),
        };
        let md5_element = md5
            .map(|md5| format!("  <md5>{}</md5>\n", md5))
            .unwrap_or_default();
        let sidecar = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<VIAA>\n{}  <CP_id>OR-abc</CP_id>\n  <dc_title>Evening news</dc_title>\n  <dc_identifier_localid>NEWS_001</dc_identifier_localid>\n</VIAA>\n",
            md5_element
        );
        fs::write(dir.join("clip.xml"), sidecar).unwrap();

        Self {
            dir: dir.to_path_buf(),
            flow_id: flow_id.to_string(),
        }
    }

    pub fn essence(&self) -> PathBuf {
        self.dir.join("clip.mp4")
    }

    pub fn sidecar(&self) -> PathBuf {
        self.dir.join("clip.xml")
    }

    pub fn notification(&self) -> Vec<u8> {
        self.notification_for("clip.mp4")
    }

    /// Notification for another essence in the same folder, sharing the sidecar
    pub fn notification_for(&self, essence: &str) -> Vec<u8> {
        serde_json::json!({
            "cp_name": "ACME",
            "flow_id": self.flow_id,
            "sip_package": [
                {"file_type": "essence", "file_name": essence, "file_path": self.dir},
                {"file_type": "sidecar", "file_name": "clip.xml", "file_path": self.dir},
            ]
        })
        .to_string()
        .into_bytes()
    }
}

/// Always answers with the same label
pub struct StaticResolver {
    pub label: String,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(label: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(label)
        }
    }
}

#[async_trait]
impl LabelResolver for StaticResolver {
    async fn resolve(&self, _cp_id: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.label.clone())
    }
}

/// Fails every lookup with the given error
pub struct FailingResolver {
    pub transient: bool,
}

#[async_trait]
impl LabelResolver for FailingResolver {
    async fn resolve(&self, cp_id: &str) -> Result<String> {
        if self.transient {
            Err(SipError::DependencyUnavailable("directory service down".to_string()))
        } else {
            Err(SipError::UnknownContentPartner(cp_id.to_string()))
        }
    }
}

/// Fails the first `failures` lookups as unavailable, then answers
pub struct FlakyResolver {
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyResolver {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LabelResolver for FlakyResolver {
    async fn resolve(&self, _cp_id: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(SipError::DependencyUnavailable("directory service down".to_string()))
        } else {
            Ok("ACME".to_string())
        }
    }
}

/// Panics on every lookup
pub struct PanickingResolver;

#[async_trait]
impl LabelResolver for PanickingResolver {
    async fn resolve(&self, _cp_id: &str) -> Result<String> {
        panic!("resolver bug");
    }
}

pub fn pipeline(
    resolver: Arc<dyn LabelResolver>,
    publisher: Arc<MemoryPublisher>,
    bag: BagConfig,
) -> IngestionPipeline {
    IngestionPipeline::new(
        resolver,
        publisher,
        BagAssembler::new(bag),
        EventSettings::default(),
        "test-host",
    )
}

pub fn read_entry(archive: &Path, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}

pub fn read_entry_bytes(archive: &Path, name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut content = Vec::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    content
}

/// Files in `dir` (not recursive) with the given suffix
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(suffix))
        .collect()
}
