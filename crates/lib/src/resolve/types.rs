//! Resolver results and errors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::pkg::PkgId;
use crate::scan::ScanError;
use crate::util::hash::PkgHash;

/// What is known about a package's extra references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
  /// Not built yet, so its extra references are undecided.
  Pending,
  /// Built and scanned. Holds the extra references found in the output, which
  /// may be none.
  Confirmed(Vec<PkgHash>),
  /// The build or the scan failed. The package cannot be resolved.
  Failed(String),
}

impl ScanStatus {
  pub fn is_pending(&self) -> bool {
    matches!(self, ScanStatus::Pending)
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, ScanStatus::Failed(_))
  }
}

/// A view of the dependency closure of a set of roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
  /// Every package reachable from the roots through force, confirmed extra
  /// and weak references.
  pub closure: BTreeSet<PkgHash>,
  /// Closure members, dependencies before dependents.
  pub build_order: Vec<PkgHash>,
  /// Members reached only through a weak reference.
  pub weak: BTreeSet<PkgHash>,
  /// Members whose extra references are not confirmed yet.
  pub pending: BTreeSet<PkgHash>,
  /// Members whose build or scan failed.
  pub failed: BTreeSet<PkgHash>,
  /// Strong dependencies of each member, in declared order.
  pub deps: BTreeMap<PkgHash, Vec<PkgHash>>,
}

impl Resolution {
  /// True when nothing is pending and nothing failed.
  pub fn is_complete(&self) -> bool {
    self.pending.is_empty() && self.failed.is_empty()
  }

  pub fn contains(&self, hash: &PkgHash) -> bool {
    self.closure.contains(hash)
  }

  pub fn dependencies(&self, hash: &PkgHash) -> &[PkgHash] {
    self.deps.get(hash).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn position(&self, hash: &PkgHash) -> Option<usize> {
    self.build_order.iter().position(|h| h == hash)
  }
}

/// Participants of a reference cycle, in path order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<PkgHash>);

impl fmt::Display for Cycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for hash in &self.0 {
      write!(f, "{hash} -> ")?;
    }
    match self.0.first() {
      Some(first) => write!(f, "{first}"),
      None => Ok(()),
    }
  }
}

fn join(hashes: &[PkgHash]) -> String {
  hashes.iter().map(PkgHash::as_str).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("dependency cycle: {cycle}")]
  Cycle { cycle: Cycle },

  #[error("package {0} must be hashed before it can be resolved")]
  Unhashed(PkgId),

  #[error("root {0} does not exist")]
  UnknownRoot(PkgId),

  #[error("package {0} is not part of this resolution")]
  UnknownPackage(PkgHash),

  #[error("extra references of {hash} are already confirmed as [{}]", join(existing))]
  AlreadyConfirmed { hash: PkgHash, existing: Vec<PkgHash> },

  #[error("failed to scan output of {hash}: {source}")]
  Scan {
    hash: PkgHash,
    #[source]
    source: ScanError,
  },

  #[error("resolution incomplete: pending [{}], failed [{}]", join(pending), join(failed))]
  Unresolved { pending: Vec<PkgHash>, failed: Vec<PkgHash> },
}

impl ResolveError {
  /// Hashes of the cycle participants, if this is a cycle error.
  pub fn cycle(&self) -> Option<&[PkgHash]> {
    match self {
      ResolveError::Cycle { cycle } => Some(&cycle.0),
      _ => None,
    }
  }
}
