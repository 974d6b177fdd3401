//! MD5 fixity utilities
//!
//! Bags carry MD5 manifests, so MD5 is the only digest used here. Readers are
//! consumed in fixed-size chunks; memory use does not grow with the input.

use crate::error::{Result, SipError};
use std::io::Read;
use std::path::Path;

const BUFFER_SIZE: usize = 64 * 1024;

/// Compute MD5 checksum of bytes
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Compute MD5 checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// Compute MD5 checksum of a file
pub fn compute_file_md5(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| SipError::filesystem(path, e))?;
    compute_checksum(&mut file).map_err(|e| match e {
        SipError::Io(source) => SipError::filesystem(path, source),
        other => other,
    })
}

/// Compare two hex digests, ignoring case
pub fn md5_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
