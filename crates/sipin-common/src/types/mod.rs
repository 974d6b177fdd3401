//! Common types used across the SIP creator

use serde::{Deserialize, Serialize};

/// Checksum algorithm type
///
/// Only MD5 is produced; it is what the bag manifests and the producers'
/// sidecars carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
}

impl ChecksumAlgorithm {
    /// Name used in METS `CHECKSUMTYPE` and PREMIS `messageDigestAlgorithm`
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "MD5",
        }
    }

    /// Suffix used for BagIt manifest file names (`manifest-md5.txt`)
    pub fn bagit_name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
        }
    }

    /// Library of Congress preservation vocabulary URI
    pub fn value_uri(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => {
                "http://id.loc.gov/vocabulary/preservation/cryptographicHashFunctions/md5"
            },
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
