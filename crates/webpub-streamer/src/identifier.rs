//! Publication identifiers.
//!
//! An identifier is the URL-safe base64 encoding (no padding) of the raw bytes
//! of a local file path. It is used both as the cache key and as the first
//! path segment of every publication URL, so it must never contain `/`, `+`
//! or `=`.

use crate::error::DecodeError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::path::{Path, PathBuf};

/// Encode a file path into an identifier.
#[must_use]
pub fn encode(path: &Path) -> String {
    URL_SAFE_NO_PAD.encode(path_to_bytes(path))
}

/// Decode an identifier back into the file path it was built from.
///
/// # Errors
///
/// Returns `DecodeError` if the identifier is empty, is not URL-safe base64,
/// or does not decode to a path representable on this platform.
pub fn decode(identifier: &str) -> Result<PathBuf, DecodeError> {
    if identifier.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(identifier)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

    if bytes.is_empty() {
        return Err(DecodeError::InvalidPath);
    }

    bytes_to_path(bytes)
}

/// Build the manifest URL for an identifier as seen through `host`.
#[must_use]
pub fn manifest_url(host: &str, identifier: &str) -> String {
    format!("http://{host}/{identifier}/manifest.json")
}

#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
#[allow(clippy::unnecessary_wraps)]
fn bytes_to_path(bytes: Vec<u8>) -> Result<PathBuf, DecodeError> {
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: Vec<u8>) -> Result<PathBuf, DecodeError> {
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| DecodeError::InvalidPath)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_url_safe() {
        // Produces '+' and '/' under the standard alphabet.
        let id = encode(Path::new("/books/???>>>.epub"));
        assert!(!id.contains('/'));
        assert!(!id.contains('+'));
        assert!(!id.contains('='));
    }

    #[test]
    fn test_round_trip() {
        let path = Path::new("/home/reader/Books/Moby Dick.epub");
        assert_eq!(decode(&encode(path)).unwrap(), path);
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode(""), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_invalid_alphabet() {
        assert!(matches!(
            decode("not*base64!"),
            Err(DecodeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_manifest_url() {
        assert_eq!(
            manifest_url("localhost:8080", "abc"),
            "http://localhost:8080/abc/manifest.json"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_round_trip() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"/tmp/\xff\xfebook.epub"));
        assert_eq!(decode(&encode(path)).unwrap(), path);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any printable path survives an encode/decode cycle unchanged
            #[test]
            fn identifier_round_trip(path in "[^\u{0}]{1,64}") {
                let path = PathBuf::from(path);
                let id = encode(&path);
                prop_assert!(!id.contains('/'));
                prop_assert_eq!(decode(&id).unwrap(), path);
            }
        }
    }
}
