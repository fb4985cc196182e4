//! Hashing utilities for content addressing and output verification.
//!
//! This module provides:
//! - `PkgHash`: the fixed-width content address of a package descriptor
//! - `ContentHash`: a full 64-character hash of realized output
//! - `hash_path()`: hash a realized output, whether a file or a directory tree
//! - `hash_directory()`, `hash_file()`, `hash_bytes()`

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use crate::consts::{CONTENT_HASH_LEN, PKG_HASH_LEN};

/// A hash string that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected a {expected}-character lowercase hex string, got {value:?}")]
pub struct HashFormatError {
  pub value: String,
  pub expected: usize,
}

fn check_hex(value: &str, expected: usize) -> Result<(), HashFormatError> {
  if value.len() == expected && value.bytes().all(is_hash_byte) {
    Ok(())
  } else {
    Err(HashFormatError {
      value: value.to_string(),
      expected,
    })
  }
}

/// Returns true for bytes that can appear in a hex hash string.
#[inline]
pub fn is_hash_byte(b: u8) -> bool {
  matches!(b, b'0'..=b'9' | b'a'..=b'f')
}

/// The content address of a package descriptor.
///
/// Always exactly [`PKG_HASH_LEN`] lowercase hex characters. Deserialization
/// goes through [`PkgHash::parse`], so untrusted input cannot smuggle in a
/// malformed address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PkgHash(String);

impl PkgHash {
  pub fn parse(value: &str) -> Result<Self, HashFormatError> {
    check_hex(value, PKG_HASH_LEN)?;
    Ok(Self(value.to_string()))
  }

  /// Truncate a full SHA-256 digest to a package hash.
  pub(crate) fn from_digest(digest: &[u8]) -> Self {
    let full = hex::encode(digest);
    Self(full[..PKG_HASH_LEN].to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn as_bytes(&self) -> &[u8] {
    self.0.as_bytes()
  }
}

impl TryFrom<String> for PkgHash {
  type Error = HashFormatError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    check_hex(&value, PKG_HASH_LEN)?;
    Ok(Self(value))
  }
}

impl From<PkgHash> for String {
  fn from(hash: PkgHash) -> Self {
    hash.0
  }
}

impl std::fmt::Display for PkgHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A full 64-character SHA-256 hash of realized output.
///
/// Used for fixed-output verification: a package may declare the hash its
/// output must have, and the realized output is checked against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
  pub fn parse(value: &str) -> Result<Self, HashFormatError> {
    check_hex(value, CONTENT_HASH_LEN)?;
    Ok(Self(value.to_string()))
  }

  fn from_digest(digest: &[u8]) -> Self {
    Self(hex::encode(digest))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl TryFrom<String> for ContentHash {
  type Error = HashFormatError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    check_hex(&value, CONTENT_HASH_LEN)?;
    Ok(Self(value))
  }
}

impl From<ContentHash> for String {
  fn from(hash: ContentHash) -> Self {
    hash.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing realized output.
#[derive(Debug, Error)]
pub enum DirHashError {
  #[error("failed to walk {path}: {message}")]
  WalkDir { path: String, message: String },

  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read symlink {path}: {source}")]
  ReadSymlink {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Hash a realized output.
///
/// A regular file hashes to the digest of its bytes; a directory hashes via
/// [`hash_directory`]; a symlink hashes its target string.
pub fn hash_path(path: &Path) -> Result<ContentHash, DirHashError> {
  let meta = fs::symlink_metadata(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    source: e,
  })?;

  if meta.file_type().is_symlink() {
    let target = read_link(path)?;
    Ok(hash_bytes(target.as_bytes()))
  } else if meta.is_dir() {
    hash_directory(path)
  } else {
    hash_file(path)
  }
}

fn read_link(path: &Path) -> Result<String, DirHashError> {
  let target = fs::read_link(path).map_err(|e| DirHashError::ReadSymlink {
    path: path.display().to_string(),
    source: e,
  })?;
  Ok(target.to_string_lossy().into_owned())
}

/// Compute a deterministic hash of a directory tree.
///
/// Each entry contributes one line: `F:<rel>:<content hash>` for files,
/// `D:<rel>` for directories and `L:<rel>:<target hash>` for symlinks.
/// Timestamps and permissions are ignored. Entries are visited in file-name
/// order so the result is stable across filesystems.
pub fn hash_directory(root: &Path) -> Result<ContentHash, DirHashError> {
  let mut hasher = Sha256::new();

  for entry in WalkDir::new(root).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(|e| DirHashError::WalkDir {
      path: root.display().to_string(),
      message: e.to_string(),
    })?;
    let entry_path = entry.path();
    let rel = entry_path.strip_prefix(root).unwrap_or(entry_path).to_string_lossy();

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel, hash_file(entry_path)?)
    } else if file_type.is_dir() {
      format!("D:{}", rel)
    } else if file_type.is_symlink() {
      let target = read_link(entry_path)?;
      format!("L:{}:{}", rel, hash_bytes(target.as_bytes()))
    } else {
      // sockets, devices and fifos have no content
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |e| DirHashError::ReadFile {
    path: path.display().to_string(),
    source: e,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let n = file.read(&mut buffer).map_err(read_err)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }

  Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::from_digest(&Sha256::digest(data))
}
