//! Object key validation.
//!
//! Object stores accept almost any byte sequence as a key, but keys handed
//! to a backend by this crate are expected to already be normalized: no
//! leading slash, no empty, `.` or `..` segments, no NUL bytes. Only the
//! final `/` of a directory key is allowed to produce an empty segment.

use crate::error::{ErrorKind, Result};

/// Validates an object key, returning it unchanged if it's well-formed.
///
/// # Returns
/// Returns the key if valid, or [`InvalidKey`](crate::error::ErrorKind::InvalidKey)
/// if invalid.
///
/// # Examples
///
/// ```
/// use ossdav_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("docs/report.pdf").is_ok());
/// assert!(validate_key("docs/archive/").is_ok()); // (directory marker)
/// // Invalid keys
/// assert!(validate_key("/docs/report.pdf").is_err());
/// assert!(validate_key("docs/../report.pdf").is_err());
/// assert!(validate_key("docs//report.pdf").is_err());
/// assert!(validate_key("a\0b").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    let invalid = || exn::Exn::from(ErrorKind::InvalidKey(key.escape_default().to_string()));
    if key.is_empty() || key.contains('\0') {
        return Err(invalid());
    }
    let body = key.strip_suffix('/').unwrap_or(key);
    for segment in body.split('/') {
        // An empty segment here means a leading slash, a double slash, or a
        // key that was nothing but a slash.
        if matches!(segment, "" | "." | "..") {
            return Err(invalid());
        }
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("report.pdf")]
    #[case("docs/report.pdf")]
    #[case("docs/2024/q1/report.pdf")]
    #[case("docs/")]
    #[case("docs/archive/")]
    #[case("New Folder/file with spaces.txt")]
    fn test_valid_keys(#[case] key: &str) {
        assert_eq!(validate(key).unwrap(), key);
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("/docs")]
    #[case("docs//report.pdf")]
    #[case("docs//")]
    #[case("./docs")]
    #[case("docs/../etc/passwd")]
    #[case("..")]
    #[case("a\0b")]
    fn test_invalid_keys(#[case] key: &str) {
        let err = validate(key).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }
}
