//! Store layout for realized packages.
//!
//! A realized package lives at `<store>/pkg/<hash>-<name>`, or
//! `<store>/pkg/<hash>` when it has no name. The hash prefix keeps every path
//! unique; the name is only there for people reading the store.

use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, STORE_ENV};
use crate::platform::paths::data_dir;
use crate::util::hash::PkgHash;

/// Root of the store: `$CAIRN_STORE`, else `<data dir>/store`.
///
/// Falls back to a relative `.cairn/store` when the host has no data dir.
pub fn store_dir() -> PathBuf {
  if let Some(path) = std::env::var_os(STORE_ENV).filter(|p| !p.is_empty()) {
    return PathBuf::from(path);
  }

  data_dir()
    .unwrap_or_else(|| PathBuf::from(format!(".{APP_NAME}")))
    .join("store")
}

pub fn pkg_dir_name(hash: &PkgHash, name: Option<&str>) -> String {
  match name {
    Some(name) if !name.is_empty() => format!("{hash}-{name}"),
    _ => hash.to_string(),
  }
}

pub fn pkg_dir_path(store: &Path, hash: &PkgHash, name: Option<&str>) -> PathBuf {
  store.join("pkg").join(pkg_dir_name(hash, name))
}
