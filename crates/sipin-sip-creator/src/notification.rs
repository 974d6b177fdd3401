//! Inbound watchfolder notification
//!
//! One notification describes an essence and its sidecar that landed in a
//! watchfolder. Only the fields the packager consumes are modelled.

use serde::Deserialize;
use sipin_common::checksum::compute_md5;
use sipin_common::{Result, SipError};
use std::path::{Path, PathBuf};

/// Role of a file in the SIP package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Essence,
    Sidecar,
}

/// One entry of `sip_package`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SipItem {
    pub file_type: FileRole,
    pub file_name: String,
    pub file_path: String,
}

impl SipItem {
    /// Full path of the file: `file_path` joined with `file_name`
    pub fn path(&self) -> PathBuf {
        Path::new(&self.file_path).join(&self.file_name)
    }
}

#[derive(Debug, Deserialize)]
struct RawNotification {
    cp_name: String,
    flow_id: String,
    sip_package: Vec<SipItem>,
}

/// An essence/sidecar pair ready to be validated and packaged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub cp_name: String,
    pub flow_id: String,
    pub essence: SipItem,
    pub sidecar: SipItem,
}

impl FilePair {
    /// Parse a notification body
    ///
    /// # Errors
    /// [`SipError::MalformedInput`] when the body is not JSON, misses a
    /// mandatory key, or does not hold exactly one essence and one sidecar.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| SipError::MalformedInput(format!("Message is not valid JSON: '{}'", e)))?;

        let raw: RawNotification = serde_json::from_value(value).map_err(|e| {
            SipError::MalformedInput(format!("Missing mandatory key or invalid value: {}", e))
        })?;

        let essence = single_item(&raw.sip_package, FileRole::Essence)?;
        let sidecar = single_item(&raw.sip_package, FileRole::Sidecar)?;

        Ok(Self {
            cp_name: raw.cp_name,
            flow_id: raw.flow_id,
            essence,
            sidecar,
        })
    }

    pub fn essence_path(&self) -> PathBuf {
        self.essence.path()
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.sidecar.path()
    }

    /// File name of the essence without its extension
    pub fn essence_stem(&self) -> String {
        Path::new(&self.essence.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.essence.file_name.clone())
    }

    /// Both referenced files must exist before packaging starts
    pub fn ensure_files_exist(&self) -> Result<()> {
        for path in [self.essence_path(), self.sidecar_path()] {
            if !path.is_file() {
                return Err(SipError::MissingFile(path));
            }
        }
        Ok(())
    }

    /// Name for the bag and its working directory, unique per job
    ///
    /// Built from the full essence file name and the flow id, so `clip.mp4`
    /// and `clip.mov` in one flow get distinct names. When sanitizing had to
    /// replace characters, a digest of the raw values is appended because
    /// different raw names may sanitize to the same string.
    pub fn package_name(&self) -> String {
        let file_name = sanitize(&self.essence.file_name);
        let flow_id = sanitize(&self.flow_id);
        let name = format!("{}_{}", file_name, flow_id);
        if file_name == self.essence.file_name && flow_id == self.flow_id {
            return name;
        }
        let digest = compute_md5(format!("{}\n{}", self.essence.file_name, self.flow_id).as_bytes());
        format!("{}_{}", name, &digest[..8])
    }
}

fn single_item(items: &[SipItem], role: FileRole) -> Result<SipItem> {
    let mut matching = items.iter().filter(|item| item.file_type == role);
    match (matching.next(), matching.next()) {
        (Some(item), None) => Ok(item.clone()),
        (None, _) => Err(SipError::MalformedInput(format!(
            "Missing mandatory key: no {:?} file in sip_package",
            role
        ))),
        (Some(_), Some(_)) => Err(SipError::MalformedInput(format!(
            "sip_package holds more than one {:?} file",
            role
        ))),
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = r#"{
        "cp_name": "CPFIELD",
        "flow_id": "FLOWFIELD",
        "sip_package": [
            {"file_type": "sidecar", "file_name": "file.xml", "file_path": "/path/to/xml/file"},
            {"file_type": "essence", "file_name": "file.mxf", "file_path": "/path/to/essence/file"}
        ]
    }"#;

    #[test]
    fn test_message_valid() {
        let pair = FilePair::parse(MESSAGE.as_bytes()).unwrap();
        assert_eq!(pair.cp_name, "CPFIELD");
        assert_eq!(pair.flow_id, "FLOWFIELD");
        assert_eq!(pair.essence.file_name, "file.mxf");
        assert_eq!(pair.essence.file_path, "/path/to/essence/file");
        assert_eq!(pair.sidecar.file_name, "file.xml");
        assert_eq!(pair.essence_path(), PathBuf::from("/path/to/essence/file/file.mxf"));
        assert_eq!(pair.sidecar_path(), PathBuf::from("/path/to/xml/file/file.xml"));
        assert_eq!(pair.essence_stem(), "file");
    }

    #[test]
    fn test_message_invalid_json() {
        let err = FilePair::parse(b"not json").unwrap_err();
        assert!(matches!(err, SipError::MalformedInput(ref m) if m.starts_with("Message is not valid JSON")));
    }

    #[test]
    fn test_message_missing_cp_name() {
        let body = r#"{"flow_id": "F1", "sip_package": []}"#;
        let err = FilePair::parse(body.as_bytes()).unwrap_err();
        assert!(matches!(err, SipError::MalformedInput(ref m) if m.contains("cp_name")));
    }

    #[test]
    fn test_message_without_sidecar() {
        let body = r#"{"cp_name": "ACME", "flow_id": "F1", "sip_package": [
            {"file_type": "essence", "file_name": "clip.mp4", "file_path": "/in"}
        ]}"#;
        let err = FilePair::parse(body.as_bytes()).unwrap_err();
        assert!(matches!(err, SipError::MalformedInput(_)));
    }

    #[test]
    fn test_unknown_file_type_is_malformed() {
        let body = r#"{"cp_name": "ACME", "flow_id": "F1", "sip_package": [
            {"file_type": "subtitle", "file_name": "clip.srt", "file_path": "/in"}
        ]}"#;
        assert!(FilePair::parse(body.as_bytes()).is_err());
    }

    #[test]
    fn test_package_name_is_namespaced_by_flow() {
        let pair = FilePair::parse(MESSAGE.as_bytes()).unwrap();
        assert_eq!(pair.package_name(), "file.mxf_FLOWFIELD");
    }

    #[test]
    fn test_package_name_keeps_extension() {
        let mut pair = FilePair::parse(MESSAGE.as_bytes()).unwrap();
        let mxf = pair.package_name();
        pair.essence.file_name = "file.mov".to_string();
        assert_ne!(pair.package_name(), mxf);
        assert_eq!(pair.package_name(), "file.mov_FLOWFIELD");
    }

    #[test]
    fn test_sanitized_package_names_do_not_collide() {
        let mut pair = FilePair::parse(MESSAGE.as_bytes()).unwrap();
        pair.flow_id = "run/42".to_string();
        let slash = pair.package_name();
        pair.flow_id = "run 42".to_string();
        let space = pair.package_name();
        pair.flow_id = "run_42".to_string();
        let plain = pair.package_name();

        assert!(slash.starts_with("file.mxf_run_42_"));
        assert_eq!(plain, "file.mxf_run_42");
        assert_ne!(slash, space);
        assert_ne!(slash, plain);
        assert_ne!(space, plain);
    }

    #[test]
    fn test_missing_files_are_reported() {
        let pair = FilePair::parse(MESSAGE.as_bytes()).unwrap();
        let err = pair.ensure_files_exist().unwrap_err();
        assert!(matches!(err, SipError::MissingFile(p) if p == PathBuf::from("/path/to/essence/file/file.mxf")));
    }
}
