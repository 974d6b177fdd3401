//! Small XML writing layer over `quick_xml::Writer`
//!
//! METS, PREMIS and Dublin Core documents are all written element by element
//! through [`XmlWriter`], so namespace prefixes and indentation stay uniform.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sipin_common::{Result, SipError};
use uuid::Uuid;

pub mod ns {
    pub const METS: &str = "http://www.loc.gov/METS/";
    pub const CSIP: &str = "https://DILCIS.eu/XML/METS/CSIPExtensionMETS";
    pub const SIP: &str = "https://DILCIS.eu/XML/METS/SIPExtensionMETS";
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    pub const XLINK: &str = "http://www.w3.org/1999/xlink";
    pub const PREMIS: &str = "http://www.loc.gov/premis/v3";
    pub const DCTERMS: &str = "http://purl.org/dc/terms/";
    pub const DC: &str = "http://purl.org/dc/elements/1.1/";
}

/// Generate a document-local identifier.
///
/// `ID` attributes are `xs:ID`, which may not start with a digit, hence the
/// `uuid-` prefix.
pub fn generate_id() -> String {
    format!("uuid-{}", Uuid::new_v4())
}

/// Ordered attribute list; optional values are skipped
#[derive(Debug, Default, Clone)]
pub struct Attrs(Vec<(&'static str, String)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.push((key, value.into()));
        self
    }

    pub fn with_opt<V: Into<String>>(self, key: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    fn start<'a>(&'a self, name: &'a str) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in &self.0 {
            start.push_attribute((*key, value.as_str()));
        }
        start
    }
}

/// Indented XML document writer
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    /// Start a new document with an XML declaration
    pub fn new() -> Result<Self> {
        let mut writer = Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        writer.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(writer)
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.inner.write_event(event).map_err(SipError::xml)
    }

    pub fn start(&mut self, name: &str, attrs: &Attrs) -> Result<()> {
        self.event(Event::Start(attrs.start(name)))
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    /// Self-closing element
    pub fn empty(&mut self, name: &str, attrs: &Attrs) -> Result<()> {
        self.event(Event::Empty(attrs.start(name)))
    }

    /// `<name attrs>text</name>`
    pub fn text_element(&mut self, name: &str, attrs: &Attrs, text: &str) -> Result<()> {
        self.event(Event::Start(attrs.start(name)))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub fn finish(self) -> Result<String> {
        let mut bytes = self.inner.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(SipError::xml)
    }
}
