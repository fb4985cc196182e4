use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use crate::pkg::Builder;
use crate::util::hash::{ContentHash, PkgHash};

/// Everything an executor is told about one package it should realize.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
  pub hash: PkgHash,
  pub name: Option<String>,
  /// `None` for packages that only aggregate references.
  pub builder: Option<Builder>,
  /// Expected output hash for fixed-output packages.
  pub out_hash: Option<ContentHash>,
  /// Suggested location for the output.
  pub out_dir: PathBuf,
  /// Realized paths of the package's strong dependencies.
  pub dependencies: BTreeMap<PkgHash, PathBuf>,
}

/// A realized output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
  pub path: PathBuf,
}

impl BuildOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildFailure {
  #[error("build failed: {0}")]
  Failed(String),

  #[error("build cancelled")]
  Cancelled,
}

/// Runs builders. Sandboxing, fetching and command execution all live behind
/// this boundary.
///
/// An executor is shared by every concurrent build of a realization, so a
/// call must not assume exclusive access to anything but `out_dir`.
pub trait BuildExecutor: Send + Sync + 'static {
  fn build(&self, request: BuildRequest) -> impl Future<Output = Result<BuildOutput, BuildFailure>> + Send;
}
