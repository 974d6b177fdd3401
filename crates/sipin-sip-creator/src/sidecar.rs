//! Sidecar metadata parser
//!
//! The sidecar is the XML document a producer drops next to the essence. Only
//! a handful of its top-level fields matter for packaging.

use serde::Deserialize;
use sipin_common::{Result, SipError};
use std::path::Path;

/// Raw top-level fields of a sidecar document
#[derive(Debug, Default, Deserialize)]
struct RawSidecar {
    #[serde(default)]
    md5: Option<String>,
    #[serde(rename = "CP_id", default)]
    cp_id: Option<String>,
    #[serde(rename = "dc_identifier_localid", default)]
    local_id: Option<String>,
    #[serde(rename = "dc_identifier_localId", default)]
    local_id_alt_case: Option<String>,
    #[serde(rename = "dc_source", default)]
    source: Option<String>,
    #[serde(rename = "dc_title", default)]
    title: Option<String>,
}

/// Parsed sidecar fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    /// MD5 of the essence as declared by the producer
    pub md5: Option<String>,
    /// Content partner (organization) identifier
    pub cp_id: String,
    pub local_id: Option<String>,
    pub local_id_alt_case: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
}

impl Sidecar {
    /// Parse a sidecar document
    ///
    /// # Errors
    /// [`SipError::MalformedInput`] when the XML cannot be read or `CP_id` is
    /// absent or empty.
    pub fn parse(xml: &str) -> Result<Self> {
        let raw: RawSidecar = quick_xml::de::from_str(xml)
            .map_err(|e| SipError::MalformedInput(format!("Failed to parse sidecar XML: {}", e)))?;

        let cp_id = non_empty(raw.cp_id).ok_or_else(|| {
            SipError::MalformedInput("Sidecar is missing mandatory field 'CP_id'".to_string())
        })?;

        Ok(Self {
            md5: non_empty(raw.md5),
            cp_id,
            local_id: non_empty(raw.local_id),
            local_id_alt_case: non_empty(raw.local_id_alt_case),
            source: non_empty(raw.source),
            title: non_empty(raw.title),
        })
    }

    /// Read and parse a sidecar from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| SipError::filesystem(path, e))?;
        Self::parse(&xml)
    }

    /// Name the essence had at the producer
    ///
    /// First non-empty of `dc_identifier_localid`, `dc_identifier_localId`,
    /// `dc_source`.
    pub fn calculate_original_filename(&self) -> Option<&str> {
        [&self.local_id, &self.local_id_alt_case, &self.source]
            .into_iter()
            .find_map(|field| field.as_deref())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidecar(body: &str) -> String {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<VIAA>{}</VIAA>", body)
    }

    #[test]
    fn test_sidecar_without_md5() {
        let parsed = Sidecar::parse(&sidecar("<CP_id>OR-abc123</CP_id>")).unwrap();
        assert_eq!(parsed.md5, None);
        assert_eq!(parsed.cp_id, "OR-abc123");
    }

    #[test]
    fn test_sidecar_md5() {
        let xml = sidecar(
            "<CP>ACME</CP><CP_id>OR-abc123</CP_id>\
             <md5>7e0ef8c24fe343d98fbb93b6a7db6ccb</md5>\
             <dc_title>A title</dc_title>",
        );
        let parsed = Sidecar::parse(&xml).unwrap();
        assert_eq!(parsed.md5.as_deref(), Some("7e0ef8c24fe343d98fbb93b6a7db6ccb"));
        assert_eq!(parsed.title.as_deref(), Some("A title"));
    }

    #[test]
    fn test_missing_cp_id_is_validation_failure() {
        let err = Sidecar::parse(&sidecar("<md5>abc123</md5>")).unwrap_err();
        assert!(matches!(err, SipError::MalformedInput(ref m) if m.contains("CP_id")));
    }

    #[test]
    fn test_invalid_xml() {
        assert!(Sidecar::parse("<VIAA><md5>abc</VIAA>").is_err());
    }

    #[test]
    fn test_original_filename_prefers_local_id() {
        let xml = sidecar(
            "<CP_id>OR-1</CP_id>\
             <dc_source>source.mxf</dc_source>\
             <dc_identifier_localid>local.mxf</dc_identifier_localid>",
        );
        let parsed = Sidecar::parse(&xml).unwrap();
        assert_eq!(parsed.calculate_original_filename(), Some("local.mxf"));
    }

    #[test]
    fn test_original_filename_falls_back_in_order() {
        let alt = Sidecar::parse(&sidecar(
            "<CP_id>OR-1</CP_id>\
             <dc_identifier_localid></dc_identifier_localid>\
             <dc_identifier_localId>alt.mxf</dc_identifier_localId>\
             <dc_source>source.mxf</dc_source>",
        ))
        .unwrap();
        assert_eq!(alt.calculate_original_filename(), Some("alt.mxf"));

        let source = Sidecar::parse(&sidecar(
            "<CP_id>OR-1</CP_id><dc_source>source.mxf</dc_source>",
        ))
        .unwrap();
        assert_eq!(source.calculate_original_filename(), Some("source.mxf"));

        let none = Sidecar::parse(&sidecar("<CP_id>OR-1</CP_id>")).unwrap();
        assert_eq!(none.calculate_original_filename(), None);
    }
}
