//! Descriptive metadata (Dublin Core terms)
//!
//! Mapping producer metadata onto DC terms is pluggable through
//! [`DescriptiveTransform`]. Implementations must be pure: the same source
//! document and parameters always produce the same [`DcTerms`].

use crate::sidecar::Sidecar;
use crate::xml::{ns, Attrs, XmlWriter};
use sipin_common::Result;
use std::collections::BTreeMap;

/// A Dublin Core terms record; elements are written in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DcTerms {
    elements: Vec<(String, String)>,
}

impl DcTerms {
    /// The minimal record: creator, identifier and title
    pub fn new(
        creator: impl Into<String>,
        identifier: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let mut terms = Self::default();
        terms.push("creator", creator);
        terms.push("identifier", identifier);
        terms.push("title", title);
        terms
    }

    /// Append a `dcterms:<term>` element
    pub fn push(&mut self, term: impl Into<String>, value: impl Into<String>) {
        self.elements.push((term.into(), value.into()));
    }

    /// First value of a term
    pub fn get(&self, term: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|(t, _)| t == term)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut w = XmlWriter::new()?;
        w.start(
            "metadata",
            &Attrs::new()
                .with("xmlns:xsi", ns::XSI)
                .with("xmlns:dcterms", ns::DCTERMS)
                .with("xmlns:dc", ns::DC),
        )?;
        for (term, value) in &self.elements {
            w.text_element(&format!("dcterms:{}", term), &Attrs::new(), value)?;
        }
        w.end("metadata")?;
        w.finish()
    }
}

/// Named parameters passed to a transform (e.g. the intellectual entity UUID)
pub type TransformParams = BTreeMap<String, String>;

/// Turns a source metadata document into DC terms
pub trait DescriptiveTransform: Send + Sync {
    fn transform(&self, source: &str, params: &TransformParams) -> Result<DcTerms>;
}

/// Default mapping from a sidecar document
///
/// - `creator`: the `cp_label` parameter, else the sidecar's `CP_id`
/// - `identifier`: the `ie_uuid` parameter, else the local id
/// - `title`: `dc_title`, else the original filename
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarDcTransform;

impl DescriptiveTransform for SidecarDcTransform {
    fn transform(&self, source: &str, params: &TransformParams) -> Result<DcTerms> {
        let sidecar = Sidecar::parse(source)?;

        let creator = params
            .get("cp_label")
            .cloned()
            .unwrap_or_else(|| sidecar.cp_id.clone());
        let identifier = params
            .get("ie_uuid")
            .cloned()
            .or_else(|| sidecar.calculate_original_filename().map(str::to_string))
            .unwrap_or_default();
        let title = sidecar
            .title
            .clone()
            .or_else(|| sidecar.calculate_original_filename().map(str::to_string))
            .unwrap_or_default();

        let mut terms = DcTerms::new(creator, identifier, title);
        if let Some(local_id) = sidecar.local_id.as_ref().or(sidecar.local_id_alt_case.as_ref()) {
            terms.push("alternative", local_id.clone());
        }
        if let Some(source) = &sidecar.source {
            terms.push("source", source.clone());
        }
        Ok(terms)
    }
}
