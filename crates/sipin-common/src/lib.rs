//! SIPin Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the SIP creator.
//!
//! # Overview
//!
//! - **Error Handling**: the packaging error taxonomy and its retry classification
//! - **Checksums**: streaming MD5 fixity for essences and generated documents
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: small value types passed between packaging stages
//!
//! # Example
//!
//! ```no_run
//! use sipin_common::{Result, SipError};
//! use sipin_common::checksum::compute_file_md5;
//!
//! fn fixity(path: &str) -> Result<()> {
//!     let md5 = compute_file_md5(path)?;
//!     println!("File checksum: {}", md5);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SipError};
