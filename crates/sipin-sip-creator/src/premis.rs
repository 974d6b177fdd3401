//! PREMIS preservation metadata
//!
//! A single-representation SIP has exactly three PREMIS objects: the
//! intellectual entity, its representation, and the essence file. They are
//! linked by structural relationships that always come in mirrored pairs:
//!
//! ```text
//! entity --is represented by--> representation --represents--> entity
//!                               representation --includes-----> file
//! file --is included in--> representation
//! ```

use crate::xml::{ns, Attrs, XmlWriter};
use sipin_common::types::ChecksumAlgorithm;
use sipin_common::{Result, SipError};
use uuid::Uuid;

const RELATIONSHIP_TYPE_URI: &str = "http://id.loc.gov/vocabulary/preservation/relationshipType";
const RELATIONSHIP_SUBTYPE_URI: &str =
    "http://id.loc.gov/vocabulary/preservation/relationshipSubType";
const HASH_FUNCTIONS_URI: &str =
    "http://id.loc.gov/vocabulary/preservation/cryptographicHashFunctions";

/// Kind of PREMIS object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    IntellectualEntity,
    Representation,
    File,
}

impl ObjectKind {
    /// Value of `xsi:type`
    pub fn xsi_type(self) -> &'static str {
        match self {
            ObjectKind::IntellectualEntity => "premis:intellectualEntity",
            ObjectKind::Representation => "premis:representation",
            ObjectKind::File => "premis:file",
        }
    }

    /// Value of `objectCategory`
    pub fn category(self) -> &'static str {
        match self {
            ObjectKind::IntellectualEntity => "intellectual entity",
            ObjectKind::Representation => "representation",
            ObjectKind::File => "file",
        }
    }
}

/// Structural relationship subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipSubtype {
    Includes,
    RepresentedBy,
    Represents,
    IncludedIn,
}

impl RelationshipSubtype {
    pub fn label(self) -> &'static str {
        match self {
            RelationshipSubtype::Includes => "includes",
            RelationshipSubtype::RepresentedBy => "is represented by",
            RelationshipSubtype::Represents => "represents",
            RelationshipSubtype::IncludedIn => "is included in",
        }
    }

    /// Code in the LoC relationshipSubType vocabulary
    fn code(self) -> &'static str {
        match self {
            RelationshipSubtype::Includes => "inc",
            RelationshipSubtype::RepresentedBy => "isr",
            RelationshipSubtype::Represents => "rep",
            RelationshipSubtype::IncludedIn => "isi",
        }
    }

    /// The subtype the target must carry back towards the source
    pub fn inverse(self) -> Self {
        match self {
            RelationshipSubtype::Includes => RelationshipSubtype::IncludedIn,
            RelationshipSubtype::IncludedIn => RelationshipSubtype::Includes,
            RelationshipSubtype::RepresentedBy => RelationshipSubtype::Represents,
            RelationshipSubtype::Represents => RelationshipSubtype::RepresentedBy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub subtype: RelationshipSubtype,
    pub target: Uuid,
}

/// Fixity block of a PREMIS object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixity {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

impl Fixity {
    pub fn md5(digest: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Md5,
            digest: digest.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremisObject {
    pub kind: ObjectKind,
    pub uuid: Uuid,
    pub original_name: Option<String>,
    pub fixity: Option<Fixity>,
    pub size: Option<u64>,
    pub format_name: Option<String>,
    pub relationships: Vec<Relationship>,
}

impl PremisObject {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            uuid: Uuid::new_v4(),
            original_name: None,
            fixity: None,
            size: None,
            format_name: None,
            relationships: Vec::new(),
        }
    }

    /// Target of the first relationship with the given subtype
    pub fn related(&self, subtype: RelationshipSubtype) -> Option<Uuid> {
        self.relationships
            .iter()
            .find(|r| r.subtype == subtype)
            .map(|r| r.target)
    }

    fn write(&self, w: &mut XmlWriter) -> Result<()> {
        w.start("premis:object", &Attrs::new().with("xsi:type", self.kind.xsi_type()))?;

        w.start("premis:objectIdentifier", &Attrs::new())?;
        w.text_element("premis:objectIdentifierType", &Attrs::new(), "UUID")?;
        w.text_element(
            "premis:objectIdentifierValue",
            &Attrs::new(),
            &self.uuid.to_string(),
        )?;
        w.end("premis:objectIdentifier")?;

        w.text_element("premis:objectCategory", &Attrs::new(), self.kind.category())?;

        if self.fixity.is_some() || self.size.is_some() || self.format_name.is_some() {
            w.start("premis:objectCharacteristics", &Attrs::new())?;
            if let Some(fixity) = &self.fixity {
                w.start("premis:fixity", &Attrs::new())?;
                w.text_element(
                    "premis:messageDigestAlgorithm",
                    &Attrs::new()
                        .with("authority", "cryptographicHashFunctions")
                        .with("authorityURI", HASH_FUNCTIONS_URI)
                        .with("valueURI", fixity.algorithm.value_uri()),
                    fixity.algorithm.as_str(),
                )?;
                w.text_element("premis:messageDigest", &Attrs::new(), &fixity.digest)?;
                w.end("premis:fixity")?;
            }
            if let Some(size) = self.size {
                w.text_element("premis:size", &Attrs::new(), &size.to_string())?;
            }
            if let Some(format_name) = &self.format_name {
                w.start("premis:format", &Attrs::new())?;
                w.start("premis:formatDesignation", &Attrs::new())?;
                w.text_element("premis:formatName", &Attrs::new(), format_name)?;
                w.end("premis:formatDesignation")?;
                w.end("premis:format")?;
            }
            w.end("premis:objectCharacteristics")?;
        }

        if let Some(name) = &self.original_name {
            w.text_element("premis:originalName", &Attrs::new(), name)?;
        }

        for relationship in &self.relationships {
            write_relationship(w, relationship)?;
        }

        w.end("premis:object")
    }
}

fn write_relationship(w: &mut XmlWriter, relationship: &Relationship) -> Result<()> {
    w.start("premis:relationship", &Attrs::new())?;
    w.text_element(
        "premis:relationshipType",
        &Attrs::new()
            .with("authority", "relationshipType")
            .with("authorityURI", RELATIONSHIP_TYPE_URI)
            .with("valueURI", format!("{}/str", RELATIONSHIP_TYPE_URI)),
        "structural",
    )?;
    w.text_element(
        "premis:relationshipSubType",
        &Attrs::new()
            .with("authority", "relationshipSubType")
            .with("authorityURI", RELATIONSHIP_SUBTYPE_URI)
            .with(
                "valueURI",
                format!("{}/{}", RELATIONSHIP_SUBTYPE_URI, relationship.subtype.code()),
            ),
        relationship.subtype.label(),
    )?;
    w.start("premis:relatedObjectIdentifier", &Attrs::new())?;
    w.text_element("premis:relatedObjectIdentifierType", &Attrs::new(), "UUID")?;
    w.text_element(
        "premis:relatedObjectIdentifierValue",
        &Attrs::new(),
        &relationship.target.to_string(),
    )?;
    w.end("premis:relatedObjectIdentifier")?;
    w.end("premis:relationship")
}

/// What the essence file object should record
#[derive(Debug, Clone, Default)]
pub struct FileDescription {
    pub original_name: Option<String>,
    pub md5: Option<String>,
    pub size: Option<u64>,
    pub mimetype: Option<String>,
}

/// The entity / representation / file graph of one package
#[derive(Debug, Clone)]
pub struct PremisGraph {
    pub entity: PremisObject,
    pub representation: PremisObject,
    pub file: PremisObject,
}

impl PremisGraph {
    /// Build the three objects with fresh UUIDs and wire their relationships
    pub fn build(file: FileDescription) -> Result<Self> {
        let mut essence = PremisObject::new(ObjectKind::File);
        essence.original_name = file.original_name;
        essence.fixity = file.md5.map(Fixity::md5);
        essence.size = file.size;
        essence.format_name = file.mimetype;

        let mut graph = Self {
            entity: PremisObject::new(ObjectKind::IntellectualEntity),
            representation: PremisObject::new(ObjectKind::Representation),
            file: essence,
        };

        let (entity, representation, file) =
            (graph.entity.uuid, graph.representation.uuid, graph.file.uuid);
        graph.link(entity, RelationshipSubtype::RepresentedBy, representation)?;
        graph.link(representation, RelationshipSubtype::Includes, file)?;

        Ok(graph)
    }

    fn object_mut(&mut self, uuid: Uuid) -> Option<&mut PremisObject> {
        [&mut self.entity, &mut self.representation, &mut self.file]
            .into_iter()
            .find(|object| object.uuid == uuid)
    }

    /// Add `from --subtype--> to` and its inverse `to --inverse--> from`
    ///
    /// # Errors
    /// [`SipError::Invariant`] when either UUID is not part of the graph.
    pub fn link(&mut self, from: Uuid, subtype: RelationshipSubtype, to: Uuid) -> Result<()> {
        if self.object_mut(to).is_none() {
            return Err(SipError::Invariant(format!(
                "PREMIS relationship targets unknown object {}",
                to
            )));
        }
        let source = self.object_mut(from).ok_or_else(|| {
            SipError::Invariant(format!("PREMIS relationship from unknown object {}", from))
        })?;
        source.relationships.push(Relationship {
            subtype,
            target: to,
        });

        if let Some(target) = self.object_mut(to) {
            target.relationships.push(Relationship {
                subtype: subtype.inverse(),
                target: from,
            });
        }
        Ok(())
    }

    /// Every edge has its mirrored edge on the other side
    pub fn is_consistent(&self) -> bool {
        let objects = [&self.entity, &self.representation, &self.file];
        objects.iter().all(|object| {
            object.relationships.iter().all(|edge| {
                objects.iter().any(|other| {
                    other.uuid == edge.target
                        && other.relationships.contains(&Relationship {
                            subtype: edge.subtype.inverse(),
                            target: object.uuid,
                        })
                })
            })
        })
    }

    /// Package-level document: the intellectual entity
    pub fn package_document(&self) -> Result<String> {
        write_premis(&[&self.entity])
    }

    /// Representation-level document: the representation and its file
    pub fn representation_document(&self) -> Result<String> {
        write_premis(&[&self.representation, &self.file])
    }
}

/// Serialize objects into a `premis:premis` document
pub fn write_premis(objects: &[&PremisObject]) -> Result<String> {
    let mut w = XmlWriter::new()?;
    w.start(
        "premis:premis",
        &Attrs::new()
            .with("xmlns:premis", ns::PREMIS)
            .with("xmlns:xsi", ns::XSI)
            .with("version", "3.0"),
    )?;
    for object in objects {
        object.write(&mut w)?;
    }
    w.end("premis:premis")?;
    w.finish()
}
