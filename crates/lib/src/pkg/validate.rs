//! Structural checks applied to every package before it is trusted.
//!
//! Types rule out most invalid shapes; what remains are content constraints
//! on names and hash strings, and the requirement that every reference names a
//! package. Checks stop at the first violation and name the offending field.

use thiserror::Error;

use crate::consts::{CONTENT_HASH_LEN, PATH_SEPARATOR, PKG_HASH_LEN, PKG_NAME_MAX_LEN};
use crate::util::hash::{ContentHash, PkgHash};

use super::types::RefKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("name {name:?} is too long ({len} bytes), must be at most {max} bytes")]
  NameTooLong { name: String, len: usize, max: usize },

  #[error("name {name:?} contains path separator")]
  NameContainsSeparator { name: String },

  #[error("out-hash must be a {expected}-character lowercase hex string, got {value:?}")]
  InvalidOutHash { value: String, expected: usize },

  #[error("hash must be a {expected}-character lowercase hex string, got {value:?}")]
  InvalidHash { value: String, expected: usize },

  #[error("hash {value} does not match the package content, which hashes to {derived}")]
  HashMismatch { value: String, derived: String },

  #[error("path must be a non-empty path, got {value:?}")]
  InvalidPath { value: String },

  #[error("{field}[{index}] must be a package, got {value}")]
  NotAPackage { field: RefKind, index: usize, value: String },
}

impl ValidationError {
  /// Name of the descriptor field the error is about.
  pub fn field(&self) -> &'static str {
    match self {
      ValidationError::NameTooLong { .. } | ValidationError::NameContainsSeparator { .. } => "name",
      ValidationError::InvalidOutHash { .. } => "out-hash",
      ValidationError::InvalidHash { .. } | ValidationError::HashMismatch { .. } => "hash",
      ValidationError::InvalidPath { .. } => "path",
      ValidationError::NotAPackage { field, .. } => field.field(),
    }
  }
}

/// A package name: at most 64 bytes, no path separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgName(String);

impl PkgName {
  pub fn parse(name: &str) -> Result<Self, ValidationError> {
    if name.len() > PKG_NAME_MAX_LEN {
      return Err(ValidationError::NameTooLong {
        name: name.to_string(),
        len: name.len(),
        max: PKG_NAME_MAX_LEN,
      });
    }

    if name.as_bytes().contains(&PATH_SEPARATOR) {
      return Err(ValidationError::NameContainsSeparator { name: name.to_string() });
    }

    Ok(Self(name.to_string()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

pub(crate) fn parse_out_hash(value: &str) -> Result<ContentHash, ValidationError> {
  ContentHash::parse(value).map_err(|_| ValidationError::InvalidOutHash {
    value: value.to_string(),
    expected: CONTENT_HASH_LEN,
  })
}

pub(crate) fn parse_hash(value: &str) -> Result<PkgHash, ValidationError> {
  PkgHash::parse(value).map_err(|_| ValidationError::InvalidHash {
    value: value.to_string(),
    expected: PKG_HASH_LEN,
  })
}

/// Check that every element of a reference list names a package.
///
/// `is_package` decides membership; the arena checks ids, the record loader
/// checks hash strings.
pub(crate) fn check_refs<T, F>(field: RefKind, refs: &[T], is_package: F) -> Result<(), ValidationError>
where
  T: std::fmt::Display,
  F: Fn(&T) -> bool,
{
  match refs.iter().position(|r| !is_package(r)) {
    Some(index) => Err(ValidationError::NotAPackage {
      field,
      index,
      value: refs[index].to_string(),
    }),
    None => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_with_separator_fails() {
    let err = PkgName::parse("a/b").unwrap_err();
    assert_eq!(err, ValidationError::NameContainsSeparator { name: "a/b".to_string() });
    assert_eq!(err.field(), "name");
  }

  #[test]
  fn name_of_65_bytes_fails() {
    let name = "x".repeat(65);
    let err = PkgName::parse(&name).unwrap_err();
    assert!(matches!(err, ValidationError::NameTooLong { len: 65, max: 64, .. }));
  }

  #[test]
  fn name_of_64_bytes_passes() {
    let name = "x".repeat(64);
    assert_eq!(PkgName::parse(&name).unwrap().as_str(), name);
  }

  #[test]
  fn name_length_counts_bytes_not_chars() {
    // 22 three-byte chars = 66 bytes
    let name = "€".repeat(22);
    assert!(PkgName::parse(&name).is_err());
  }

  #[test]
  fn empty_name_is_allowed() {
    assert!(PkgName::parse("").is_ok());
  }

  #[test]
  fn out_hash_must_be_full_hex_digest() {
    assert!(parse_out_hash(&"a".repeat(64)).is_ok());

    let err = parse_out_hash("sha256-abc").unwrap_err();
    assert_eq!(err.field(), "out-hash");
    assert!(err.to_string().contains("sha256-abc"));
  }

  #[test]
  fn check_refs_reports_first_offender() {
    let refs = vec![1, 2, 99, 100];
    let err = check_refs(RefKind::Extra, &refs, |r| *r < 10).unwrap_err();
    assert_eq!(
      err,
      ValidationError::NotAPackage {
        field: RefKind::Extra,
        index: 2,
        value: "99".to_string(),
      }
    );
    assert_eq!(err.to_string(), "extra-refs[2] must be a package, got 99");
  }
}
