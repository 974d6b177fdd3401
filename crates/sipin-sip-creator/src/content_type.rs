//! Mimetype guessing and the SIP content type derived from it

use std::path::Path;

/// Guess the mimetype of a file from its extension (case-insensitive)
pub fn guess_mimetype(path: impl AsRef<Path>) -> Option<&'static str> {
    let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
    let mimetype = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "jp2" => "image/jp2",
        "pdf" => "application/pdf",
        "mxf" => "application/mxf",
        "zip" => "application/zip",
        "xml" => "application/xml",
        "mov" => "video/quicktime",
        "mp4" | "m4v" => "video/mp4",
        "mpg" => "video/mpeg",
        "ts" => "video/MP2T",
        "mp3" | "mp2" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "ogg" => "audio/ogg",
        _ => return None,
    };
    Some(mimetype)
}

/// Content type of a SIP, written as the METS root `TYPE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Photographs,
    Audio,
    TextualWorks,
    Collection,
    Video,
    /// Anything else; the qualifier becomes `OTHERTYPE`
    Other(String),
}

impl ContentType {
    pub fn from_mimetype(mimetype: Option<&str>) -> Self {
        match mimetype {
            Some("image/jpeg" | "image/tiff" | "image/jp2") => ContentType::Photographs,
            Some("audio/mpeg" | "audio/x-wav" | "audio/ogg") => ContentType::Audio,
            Some("application/pdf") => ContentType::TextualWorks,
            Some("application/zip") => ContentType::Collection,
            Some(
                "video/quicktime" | "video/mp4" | "video/MP2T" | "video/mpeg" | "application/mxf",
            ) => ContentType::Video,
            Some(other) => ContentType::Other(other.to_string()),
            None => ContentType::Other("unknown".to_string()),
        }
    }

    /// Value of the METS `TYPE` attribute
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Photographs => "Photographs - Digital",
            ContentType::Audio => "Audio - Media-independent (digital)",
            ContentType::TextualWorks => "Textual works - Digital",
            ContentType::Collection => "Collection",
            ContentType::Video => "Video - File-based and Physical Media",
            ContentType::Other(_) => "OTHER",
        }
    }

    /// Value of the METS `OTHERTYPE` attribute, only set for [`ContentType::Other`]
    pub fn other_type(&self) -> Option<&str> {
        match self {
            ContentType::Other(qualifier) => Some(qualifier),
            _ => None,
        }
    }
}
