//! SIPin SIP creator
//!
//! Turns a watchfolder notification for an essence and its sidecar into an
//! E-ARK SIP, bagged with an MD5 manifest and zipped, and reports the result
//! as a completion event.
//!
//! # Pipeline
//!
//! - [`notification`]: the inbound essence/sidecar pair
//! - [`sidecar`] and [`descriptive`]: producer metadata and its Dublin Core mapping
//! - [`premis`]: entity, representation and file objects
//! - [`mets`]: package and representation METS documents
//! - [`sip`]: all documents of one SIP, laid out for bagging
//! - [`bag`]: BagIt tree, manifest and zip archive
//! - [`orchestrator`]: per-notification state machine and dispatcher
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sipin_sip_creator::bag::{BagAssembler, BagConfig};
//! use sipin_sip_creator::events::{EventSettings, JsonLinesPublisher};
//! use sipin_sip_creator::orchestrator::IngestionPipeline;
//! use sipin_sip_creator::org_api::{LabelCache, OrgApiClient, OrgApiConfig};
//! use sipin_sip_creator::transport::Delivery;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = OrgApiClient::new(
//!         OrgApiConfig::new("https://org.example/graphql"),
//!         LabelCache::new(),
//!     )?;
//!     let pipeline = IngestionPipeline::new(
//!         Arc::new(resolver),
//!         Arc::new(JsonLinesPublisher::stdout()),
//!         BagAssembler::new(BagConfig::default()),
//!         EventSettings::default(),
//!         "localhost",
//!     );
//!     let body = std::fs::read("notification.json")?;
//!     let handled = pipeline.handle(&Delivery { tag: 1, body }).await;
//!     println!("{:?}", handled.decision);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod bag;
pub mod config;
pub mod content_type;
pub mod descriptive;
pub mod events;
pub mod mets;
pub mod notification;
pub mod orchestrator;
pub mod org_api;
pub mod premis;
pub mod sidecar;
pub mod sip;
pub mod transport;
pub mod xml;
