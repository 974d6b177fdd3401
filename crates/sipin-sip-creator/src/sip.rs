//! Builds the documents of a single-representation SIP
//!
//! Generated documents are checksummed in memory before they are referenced,
//! so each METS `CHECKSUM` matches the bytes the bag assembler writes.

use crate::bag::SipLayout;
use crate::content_type::{guess_mimetype, ContentType};
use crate::descriptive::{DescriptiveTransform, SidecarDcTransform, TransformParams};
use crate::mets::{
    Agent, AgentRole, AgentType, FileGrpUse, MetsDocument, MetsKind, Note, NoteType, PackageNode,
};
use crate::notification::FilePair;
use crate::premis::{FileDescription, PremisGraph};
use crate::sidecar::Sidecar;
use chrono::{DateTime, Utc};
use sipin_common::checksum::{compute_file_md5, compute_md5};
use sipin_common::{Result, SipError};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub const SOFTWARE_NAME: &str = env!("CARGO_PKG_NAME");
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

const XML_MIMETYPE: &str = "application/xml";
const METS_XML: &str = "mets.xml";
const DC_XML: &str = "metadata/descriptive/dc.xml";
const PREMIS_XML: &str = "metadata/preservation/premis.xml";
const REPRESENTATION: &str = "representation_1";

/// Everything known about the essence before it is placed in the bag
#[derive(Debug, Clone)]
pub struct EssenceInfo {
    pub file_name: String,
    pub source: PathBuf,
    /// Checksum recorded in METS and PREMIS
    pub md5: String,
    pub size: u64,
    /// Creation time of the file itself; packaging time when unknown
    pub created: Option<DateTime<Utc>>,
}

impl EssenceInfo {
    /// Describe the essence on disk
    ///
    /// The file is only read when the producer declared no checksum; the bag
    /// manifest hashes the placed essence anyway. Blocking.
    pub fn from_file(
        file_name: impl Into<String>,
        source: impl Into<PathBuf>,
        declared_md5: Option<&str>,
    ) -> Result<Self> {
        let source = source.into();
        let metadata = fs::metadata(&source).map_err(|e| SipError::filesystem(&source, e))?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        let md5 = match declared_md5 {
            Some(md5) => md5.to_string(),
            None => compute_file_md5(&source)?,
        };

        Ok(Self {
            file_name: file_name.into(),
            source,
            md5,
            size: metadata.len(),
            created,
        })
    }
}

/// Input of one packaging run
#[derive(Debug, Clone)]
pub struct SipInputs<'a> {
    pub pair: &'a FilePair,
    pub sidecar: &'a Sidecar,
    pub sidecar_xml: &'a str,
    pub cp_label: &'a str,
    pub essence: EssenceInfo,
}

/// A SIP ready for the bag assembler
#[derive(Debug, Clone)]
pub struct BuiltSip {
    pub layout: SipLayout,
    pub entity: Uuid,
    pub content_type: ContentType,
}

pub struct SipBuilder {
    transform: Arc<dyn DescriptiveTransform>,
}

impl Default for SipBuilder {
    fn default() -> Self {
        Self::new(Arc::new(SidecarDcTransform))
    }
}

impl SipBuilder {
    pub fn new(transform: Arc<dyn DescriptiveTransform>) -> Self {
        Self { transform }
    }

    pub fn build(&self, inputs: &SipInputs<'_>) -> Result<BuiltSip> {
        let created = Utc::now();
        let essence = &inputs.essence;
        let mimetype = guess_mimetype(&essence.file_name);
        let content_type = ContentType::from_mimetype(mimetype);

        let original_name = inputs
            .sidecar
            .calculate_original_filename()
            .unwrap_or(&essence.file_name)
            .to_string();
        let graph = PremisGraph::build(FileDescription {
            original_name: Some(original_name),
            md5: Some(essence.md5.clone()),
            size: Some(essence.size),
            mimetype: mimetype.map(str::to_string),
        })?;

        let mut params = TransformParams::new();
        params.insert("ie_uuid".to_string(), graph.entity.uuid.to_string());
        params.insert("cp_label".to_string(), inputs.cp_label.to_string());
        let dc = self
            .transform
            .transform(inputs.sidecar_xml, &params)?
            .to_xml()?;

        let package_premis = graph.package_document()?;
        let representation_premis = graph.representation_document()?;
        let agents = agents(inputs.cp_label, &inputs.sidecar.cp_id)?;

        // Representation level, paths relative to the representation
        let essence_path = format!("data/{}", essence.file_name);
        let representation_premis_node =
            document_node(PREMIS_XML, &representation_premis, created, FileGrpUse::Preservation);
        let representation_root = PackageNode::directory(REPRESENTATION, FileGrpUse::Representations)
            .with_child(
                PackageNode::directory("metadata", FileGrpUse::Metadata)
                    .with_child(PackageNode::directory("descriptive", FileGrpUse::Descriptive))?
                    .with_child(
                        PackageNode::directory("preservation", FileGrpUse::Preservation)
                            .with_child(representation_premis_node.clone())?,
                    )?,
            )?
            .with_child(
                PackageNode::directory("data", FileGrpUse::Data).with_child(
                    PackageNode::file(&essence_path)
                        .with_checksum(essence.md5.as_str())
                        .with_size(essence.size)
                        .with_mimetype(mimetype)
                        .with_created(essence.created.unwrap_or(created))
                        .with_usage(FileGrpUse::Data),
                )?,
            )?;

        let mut representation_mets = MetsDocument::new(
            MetsKind::Representation,
            graph.representation.uuid.to_string(),
            content_type.clone(),
            representation_root,
        )
        .with_created(created);
        for agent in &agents {
            representation_mets.add_agent(agent.clone());
        }
        representation_mets.add_preservation(representation_premis_node)?;
        let representation_mets = representation_mets.to_xml()?;

        // Package level
        let representation_dir = format!("representations/{}", REPRESENTATION);
        let representation_mets_path = format!("{}/{}", representation_dir, METS_XML);
        let dc_node = document_node(DC_XML, &dc, created, FileGrpUse::Descriptive);
        let package_premis_node =
            document_node(PREMIS_XML, &package_premis, created, FileGrpUse::Preservation);

        let package_root = PackageNode::directory(inputs.pair.package_name(), FileGrpUse::Root)
            .with_child(
                PackageNode::directory("metadata", FileGrpUse::Metadata)
                    .with_child(
                        PackageNode::directory("descriptive", FileGrpUse::Descriptive)
                            .with_child(dc_node.clone())?,
                    )?
                    .with_child(
                        PackageNode::directory("preservation", FileGrpUse::Preservation)
                            .with_child(package_premis_node.clone())?,
                    )?,
            )?
            .with_child(
                PackageNode::directory("representations", FileGrpUse::Representations).with_child(
                    PackageNode::directory(REPRESENTATION, FileGrpUse::Representations).with_child(
                        PackageNode::mets_file(&representation_mets_path)
                            .with_checksum(compute_md5(representation_mets.as_bytes()))
                            .with_size(representation_mets.len() as u64)
                            .with_mimetype(Some(XML_MIMETYPE))
                            .with_created(created),
                    )?,
                )?,
            )?;

        let mut package_mets = MetsDocument::new(
            MetsKind::Package,
            graph.entity.uuid.to_string(),
            content_type.clone(),
            package_root,
        )
        .with_created(created);
        for agent in agents {
            package_mets.add_agent(agent);
        }
        package_mets.add_descriptive(dc_node)?;
        package_mets.add_preservation(package_premis_node)?;
        let package_mets = package_mets.to_xml()?;

        let layout = SipLayout {
            name: inputs.pair.package_name(),
            directories: vec![
                "metadata/descriptive".to_string(),
                "metadata/preservation".to_string(),
                format!("{}/data", representation_dir),
                format!("{}/metadata/descriptive", representation_dir),
                format!("{}/metadata/preservation", representation_dir),
            ],
            documents: vec![
                (METS_XML.to_string(), package_mets),
                (DC_XML.to_string(), dc),
                (PREMIS_XML.to_string(), package_premis),
                (representation_mets_path, representation_mets),
                (
                    format!("{}/{}", representation_dir, PREMIS_XML),
                    representation_premis,
                ),
            ],
            essence_source: essence.source.clone(),
            essence_target: format!("{}/{}", representation_dir, essence_path),
        };

        Ok(BuiltSip {
            layout,
            entity: graph.entity.uuid,
            content_type,
        })
    }
}

fn document_node(
    path: &str,
    content: &str,
    created: DateTime<Utc>,
    usage: FileGrpUse,
) -> PackageNode {
    PackageNode::file(path)
        .with_checksum(compute_md5(content.as_bytes()))
        .with_size(content.len() as u64)
        .with_mimetype(Some(XML_MIMETYPE))
        .with_created(created)
        .with_usage(usage)
}

/// The content partner and this software, in that order
fn agents(cp_label: &str, cp_id: &str) -> Result<Vec<Agent>> {
    let partner = Agent::new(
        AgentRole::Creator,
        AgentType::Organization,
        Some(cp_label.to_string()),
    )?
    .with_note(Note::new(cp_id, Some(NoteType::IdentificationCode)));

    let software = Agent::new(
        AgentRole::Creator,
        AgentType::Other("SOFTWARE".to_string()),
        Some(SOFTWARE_NAME.to_string()),
    )?
    .with_note(Note::new(SOFTWARE_VERSION, Some(NoteType::SoftwareVersion)));

    Ok(vec![partner, software])
}
