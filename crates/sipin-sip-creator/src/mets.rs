//! METS documents with the E-ARK CSIP/SIP extensions
//!
//! A [`MetsDocument`] owns one [`PackageNode`] tree. The tree is rendered
//! twice, top-down: once as the file section and once as the structural map.
//! Leaf files become `fptr`s in the structural map, except files flagged as
//! METS documents themselves, which become `mptr`s pointing at their location.

use crate::content_type::ContentType;
use crate::xml::{generate_id, ns, Attrs, XmlWriter};
use chrono::{DateTime, SecondsFormat, Utc};
use sipin_common::types::ChecksumAlgorithm;
use sipin_common::{Result, SipError};

pub const CONTENT_INFORMATION_TYPE: &str = "https://data.hetarchief.be/id/sip/1.0/basic";
pub const PROFILE: &str = "https://earksip.dilcis.eu/profile/E-ARK-SIP.xml";

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRole {
    Creator,
    Editor,
    Archivist,
    Preservation,
    Disseminator,
    Custodian,
    IpOwner,
    /// Any other role; the qualifier is written as `OTHERROLE`
    Other(String),
}

impl AgentRole {
    fn as_str(&self) -> &str {
        match self {
            AgentRole::Creator => "CREATOR",
            AgentRole::Editor => "EDITOR",
            AgentRole::Archivist => "ARCHIVIST",
            AgentRole::Preservation => "PRESERVATION",
            AgentRole::Disseminator => "DISSEMINATOR",
            AgentRole::Custodian => "CUSTODIAN",
            AgentRole::IpOwner => "IPOWNER",
            AgentRole::Other(_) => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentType {
    Individual,
    Organization,
    /// Any other type; the qualifier is written as `OTHERTYPE`
    Other(String),
}

impl AgentType {
    fn as_str(&self) -> &str {
        match self {
            AgentType::Individual => "INDIVIDUAL",
            AgentType::Organization => "ORGANIZATION",
            AgentType::Other(_) => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteType {
    SoftwareVersion,
    IdentificationCode,
}

impl NoteType {
    fn as_str(self) -> &'static str {
        match self {
            NoteType::SoftwareVersion => "SOFTWARE VERSION",
            NoteType::IdentificationCode => "IDENTIFICATIONCODE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub value: String,
    pub note_type: Option<NoteType>,
}

impl Note {
    pub fn new(value: impl Into<String>, note_type: Option<NoteType>) -> Self {
        Self {
            value: value.into(),
            note_type,
        }
    }
}

/// An agent in the METS header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    role: AgentRole,
    agent_type: AgentType,
    name: Option<String>,
    note: Option<Note>,
}

impl Agent {
    /// # Errors
    /// [`SipError::Config`] when an `Other` role or type has a blank qualifier.
    pub fn new(role: AgentRole, agent_type: AgentType, name: Option<String>) -> Result<Self> {
        if let AgentRole::Other(qualifier) = &role {
            if qualifier.trim().is_empty() {
                return Err(SipError::Config(
                    "The field 'other_role' is mandatory when role is 'OTHER'".to_string(),
                ));
            }
        }
        if let AgentType::Other(qualifier) = &agent_type {
            if qualifier.trim().is_empty() {
                return Err(SipError::Config(
                    "The field 'other_type' is mandatory when type is 'OTHER'".to_string(),
                ));
            }
        }
        Ok(Self {
            role,
            agent_type,
            name,
            note: None,
        })
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.note = Some(note);
        self
    }

    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    fn write(&self, w: &mut XmlWriter) -> Result<()> {
        let other_role = match &self.role {
            AgentRole::Other(q) => Some(q.as_str()),
            _ => None,
        };
        let other_type = match &self.agent_type {
            AgentType::Other(q) => Some(q.as_str()),
            _ => None,
        };
        let attrs = Attrs::new()
            .with("ROLE", self.role.as_str())
            .with_opt("OTHERROLE", other_role)
            .with("TYPE", self.agent_type.as_str())
            .with_opt("OTHERTYPE", other_type);

        w.start("mets:agent", &attrs)?;
        if let Some(name) = &self.name {
            w.text_element("mets:name", &Attrs::new(), name)?;
        }
        if let Some(note) = &self.note {
            let note_attrs =
                Attrs::new().with_opt("csip:NOTETYPE", note.note_type.map(NoteType::as_str));
            w.text_element("mets:note", &note_attrs, &note.value)?;
        }
        w.end("mets:agent")
    }
}

// ============================================================================
// Package tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// `USE` classification of a file group or file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileGrpUse {
    Root,
    Metadata,
    Descriptive,
    Preservation,
    Representations,
    Data,
    Documentation,
    Schemas,
}

impl FileGrpUse {
    pub fn as_str(self) -> &'static str {
        match self {
            FileGrpUse::Root => "root",
            FileGrpUse::Metadata => "metadata",
            FileGrpUse::Descriptive => "descriptive",
            FileGrpUse::Preservation => "preservation",
            FileGrpUse::Representations => "representations",
            FileGrpUse::Data => "data",
            FileGrpUse::Documentation => "documentation",
            FileGrpUse::Schemas => "schemas",
        }
    }
}

/// How a leaf is referenced from the structural map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    /// `fptr` to a file in this document's file section
    File,
    /// `mptr` to another METS document, by location
    Mets,
}

/// Directory or file in a package tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    kind: NodeKind,
    is_mets: bool,
    children: Vec<PackageNode>,
    /// Location relative to the METS document
    pub path: Option<String>,
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub mimetype: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub usage: Option<FileGrpUse>,
    pub label: Option<String>,
}

impl PackageNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            is_mets: false,
            children: Vec::new(),
            path: None,
            checksum: None,
            size: None,
            mimetype: None,
            created: None,
            usage: None,
            label: None,
        }
    }

    pub fn directory(label: impl Into<String>, usage: FileGrpUse) -> Self {
        let mut node = Self::new(NodeKind::Directory);
        node.label = Some(label.into());
        node.usage = Some(usage);
        node
    }

    pub fn file(path: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::File);
        node.path = Some(path.into());
        node
    }

    /// A file that is itself a METS document (a representation's manifest)
    pub fn mets_file(path: impl Into<String>) -> Self {
        let mut node = Self::file(path);
        node.is_mets = true;
        node
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mimetype(mut self, mimetype: Option<&str>) -> Self {
        self.mimetype = mimetype.map(str::to_string);
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_usage(mut self, usage: FileGrpUse) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_mets(&self) -> bool {
        self.is_mets
    }

    pub fn children(&self) -> &[PackageNode] {
        &self.children
    }

    /// Append a child; order is kept and determines document order
    ///
    /// # Errors
    /// [`SipError::Invariant`] when `self` is a file.
    pub fn add_child(&mut self, child: PackageNode) -> Result<()> {
        if self.kind == NodeKind::File {
            return Err(SipError::Invariant(format!(
                "A file can not have children: {}",
                self.path.as_deref().unwrap_or_default()
            )));
        }
        self.children.push(child);
        Ok(())
    }

    pub fn with_child(mut self, child: PackageNode) -> Result<Self> {
        self.add_child(child)?;
        Ok(self)
    }

    /// Structural map pointer for a leaf; `None` for directories
    pub fn pointer(&self) -> Option<Pointer> {
        match (self.kind, self.is_mets) {
            (NodeKind::Directory, _) => None,
            (NodeKind::File, false) => Some(Pointer::File),
            (NodeKind::File, true) => Some(Pointer::Mets),
        }
    }

    fn display_label(&self) -> String {
        self.label
            .clone()
            .or_else(|| {
                self.path
                    .as_deref()
                    .and_then(|p| p.rsplit('/').next())
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }

    /// Checksum, size, mimetype and creation attributes shared by `file` and `mdRef`
    fn fixity_attrs(&self, attrs: Attrs) -> Attrs {
        attrs
            .with_opt("MIMETYPE", self.mimetype.clone())
            .with_opt("SIZE", self.size.map(|s| s.to_string()))
            .with_opt("CREATED", self.created.map(format_timestamp))
            .with_opt("CHECKSUM", self.checksum.clone())
            .with_opt(
                "CHECKSUMTYPE",
                self.checksum.as_ref().map(|_| ChecksumAlgorithm::Md5.as_str()),
            )
    }

    fn write_filesec(&self, w: &mut XmlWriter, file_ids: &mut Vec<String>) -> Result<()> {
        let id = generate_id();
        match self.kind {
            NodeKind::Directory => {
                let attrs = Attrs::new()
                    .with("ID", id)
                    .with_opt("USE", self.usage.map(FileGrpUse::as_str));
                w.start("mets:fileGrp", &attrs)?;
                for child in &self.children {
                    child.write_filesec(w, file_ids)?;
                }
                w.end("mets:fileGrp")
            },
            NodeKind::File => {
                file_ids.push(id.clone());
                let attrs = self.fixity_attrs(
                    Attrs::new()
                        .with("ID", id)
                        .with_opt("USE", self.usage.map(FileGrpUse::as_str)),
                );
                w.start("mets:file", &attrs)?;
                if let Some(path) = &self.path {
                    w.empty("mets:FLocat", &location_attrs(path))?;
                }
                w.end("mets:file")
            },
        }
    }

    fn write_structmap<'a, I>(&self, w: &mut XmlWriter, file_ids: &mut I) -> Result<()>
    where
        I: Iterator<Item = &'a String>,
    {
        match self.pointer() {
            None => {
                let attrs = Attrs::new()
                    .with("ID", generate_id())
                    .with("LABEL", self.display_label());
                w.start("mets:div", &attrs)?;
                for child in &self.children {
                    child.write_structmap(w, file_ids)?;
                }
                w.end("mets:div")
            },
            Some(pointer) => {
                let file_id = file_ids.next().ok_or_else(|| {
                    SipError::Invariant("structMap and fileSec are out of step".to_string())
                })?;
                match pointer {
                    Pointer::File => {
                        w.empty("mets:fptr", &Attrs::new().with("FILEID", file_id.as_str()))
                    },
                    Pointer::Mets => {
                        let path = self.path.as_deref().unwrap_or_default();
                        w.empty("mets:mptr", &location_attrs(path))
                    },
                }
            },
        }
    }
}

fn location_attrs(path: &str) -> Attrs {
    Attrs::new()
        .with("LOCTYPE", "URL")
        .with("xlink:type", "simple")
        .with("xlink:href", path)
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Document
// ============================================================================

/// Which level of the SIP hierarchy a document describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetsKind {
    Package,
    Representation,
}

/// Metadata vocabulary of a referenced metadata file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdType {
    Dc,
    Premis,
}

impl MdType {
    fn as_str(self) -> &'static str {
        match self {
            MdType::Dc => "DC",
            MdType::Premis => "PREMIS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MetadataRef {
    md_type: MdType,
    file: PackageNode,
}

impl MetadataRef {
    fn write(&self, w: &mut XmlWriter) -> Result<()> {
        let path = self.file.path.as_deref().unwrap_or_default();
        let attrs = self.file.fixity_attrs(
            Attrs::new()
                .with("ID", generate_id())
                .with("LOCTYPE", "URL")
                .with("MDTYPE", self.md_type.as_str())
                .with("xlink:type", "simple")
                .with("xlink:href", path),
        );
        w.empty("mets:mdRef", &attrs)
    }
}

#[derive(Debug, Clone)]
pub struct MetsDocument {
    kind: MetsKind,
    objid: String,
    content_type: ContentType,
    created: DateTime<Utc>,
    agents: Vec<Agent>,
    root: PackageNode,
    descriptive: Vec<MetadataRef>,
    preservation: Vec<MetadataRef>,
}

impl MetsDocument {
    pub fn new(
        kind: MetsKind,
        objid: impl Into<String>,
        content_type: ContentType,
        root: PackageNode,
    ) -> Self {
        Self {
            kind,
            objid: objid.into(),
            content_type,
            created: Utc::now(),
            agents: Vec::new(),
            root,
            descriptive: Vec::new(),
            preservation: Vec::new(),
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn add_agent(&mut self, agent: Agent) {
        self.agents.push(agent);
    }

    /// Reference a descriptive metadata file from a `dmdSec`
    pub fn add_descriptive(&mut self, file: PackageNode) -> Result<()> {
        self.descriptive.push(metadata_ref(MdType::Dc, file)?);
        Ok(())
    }

    /// Reference a preservation metadata file from the `amdSec`
    pub fn add_preservation(&mut self, file: PackageNode) -> Result<()> {
        self.preservation.push(metadata_ref(MdType::Premis, file)?);
        Ok(())
    }

    pub fn root(&self) -> &PackageNode {
        &self.root
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut w = XmlWriter::new()?;

        let root_attrs = Attrs::new()
            .with("xmlns:mets", ns::METS)
            .with("xmlns:csip", ns::CSIP)
            .with("xmlns:sip", ns::SIP)
            .with("xmlns:xsi", ns::XSI)
            .with("xmlns:xlink", ns::XLINK)
            .with("OBJID", self.objid.as_str())
            .with("TYPE", self.content_type.as_str())
            .with_opt("OTHERTYPE", self.content_type.other_type())
            .with("csip:CONTENTINFORMATIONTYPE", CONTENT_INFORMATION_TYPE)
            .with("PROFILE", PROFILE);
        w.start("mets:mets", &root_attrs)?;

        self.write_header(&mut w)?;

        for entry in &self.descriptive {
            w.start("mets:dmdSec", &Attrs::new().with("ID", generate_id()))?;
            entry.write(&mut w)?;
            w.end("mets:dmdSec")?;
        }

        if !self.preservation.is_empty() {
            w.start("mets:amdSec", &Attrs::new().with("ID", generate_id()))?;
            for entry in &self.preservation {
                w.start("mets:digiprovMD", &Attrs::new().with("ID", generate_id()))?;
                entry.write(&mut w)?;
                w.end("mets:digiprovMD")?;
            }
            w.end("mets:amdSec")?;
        }

        let mut file_ids = Vec::new();
        w.start("mets:fileSec", &Attrs::new().with("ID", generate_id()))?;
        self.root.write_filesec(&mut w, &mut file_ids)?;
        w.end("mets:fileSec")?;

        let structmap_attrs = Attrs::new()
            .with("ID", generate_id())
            .with("TYPE", "PHYSICAL")
            .with("LABEL", "CSIP");
        w.start("mets:structMap", &structmap_attrs)?;
        self.root.write_structmap(&mut w, &mut file_ids.iter())?;
        w.end("mets:structMap")?;

        w.end("mets:mets")?;
        w.finish()
    }

    fn write_header(&self, w: &mut XmlWriter) -> Result<()> {
        let package_type = match self.kind {
            MetsKind::Package => Some("SIP"),
            MetsKind::Representation => None,
        };
        let attrs = Attrs::new()
            .with("CREATEDATE", format_timestamp(self.created))
            .with_opt("csip:OAISPACKAGETYPE", package_type);

        w.start("mets:metsHdr", &attrs)?;
        for agent in &self.agents {
            agent.write(w)?;
        }
        w.end("mets:metsHdr")
    }
}

fn metadata_ref(md_type: MdType, file: PackageNode) -> Result<MetadataRef> {
    if file.kind != NodeKind::File {
        return Err(SipError::Invariant(
            "Only files can be referenced as metadata sections".to_string(),
        ));
    }
    Ok(MetadataRef { md_type, file })
}
