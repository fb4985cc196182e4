//! Types for package realization.
//!
//! This module defines the error types, result types, and configuration
//! for realizing the closure of a set of roots.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::build::store::store_dir;
use crate::build::{BuildFailure, VerifyError};
use crate::consts::SCAN_BLOCK_SIZE;
use crate::pkg::{HashError, PathError};
use crate::resolve::{Resolution, ResolveError};
use crate::scan::ScanError;
use crate::util::hash::PkgHash;

/// Errors that can occur while realizing packages.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The roots could not be hashed.
  #[error(transparent)]
  Hash(#[from] HashError),

  /// The closure could not be resolved, e.g. because it has a cycle.
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  /// The executor reported a failure or cancellation.
  #[error("build of {hash} failed: {source}")]
  Build {
    hash: PkgHash,
    #[source]
    source: BuildFailure,
  },

  /// A fixed-output package produced something other than its out-hash.
  #[error("output of {hash} failed verification: {source}")]
  Verify {
    hash: PkgHash,
    #[source]
    source: VerifyError,
  },

  /// The realized output could not be scanned for references.
  #[error("output of {hash} could not be scanned: {source}")]
  Scan {
    hash: PkgHash,
    #[source]
    source: ScanError,
  },

  /// A realized path could not be recorded.
  #[error(transparent)]
  Path(#[from] PathError),

  /// A build task panicked.
  #[error("build task panicked: {0}")]
  TaskPanicked(String),
}

/// Outcome of a realization.
#[derive(Debug, Default)]
pub struct RealizeResult {
  /// Realized packages and where their outputs are.
  pub realized: HashMap<PkgHash, PathBuf>,

  /// Packages whose build, verification or scan failed.
  pub failed: HashMap<PkgHash, ExecuteError>,

  /// Packages that were not built because a dependency failed.
  /// Maps skipped package -> the failed dependency.
  pub skipped: HashMap<PkgHash, PkgHash>,

  /// The resolution as it stood when realization stopped.
  pub resolution: Resolution,
}

impl RealizeResult {
  /// Returns true if every package in the closure was realized.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && self.resolution.is_complete()
  }

  /// Returns the total number of packages processed.
  pub fn total(&self) -> usize {
    self.realized.len() + self.failed.len() + self.skipped.len()
  }
}

/// Configuration for realization.
#[derive(Debug, Clone)]
pub struct RealizeConfig {
  /// Maximum number of builds to run in parallel.
  pub parallelism: usize,

  /// Store root under which outputs are suggested to go.
  pub store_dir: PathBuf,

  /// Read size used when scanning outputs.
  pub scan_block_size: usize,
}

impl RealizeConfig {
  pub fn with_store_dir(mut self, store_dir: impl Into<PathBuf>) -> Self {
    self.store_dir = store_dir.into();
    self
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism;
    self
  }
}

impl Default for RealizeConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      store_dir: store_dir(),
      scan_block_size: SCAN_BLOCK_SIZE,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
