//! Arena of package descriptors.
//!
//! Packages reference each other by [`PkgId`], never by ownership, so shared
//! (diamond) dependencies need no reference counting. Once hashed, a package is
//! also indexed by its [`PkgHash`]; the first package to claim a hash is the
//! canonical node for it and later duplicates resolve to the same node.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::util::hash::PkgHash;

use super::hash::{HashError, derive_hash};
use super::types::{Pkg, PkgId, PkgSpec, RefKind};
use super::validate::{ValidationError, check_refs};

#[derive(Debug, Error)]
pub enum PathError {
  #[error("package {0} does not exist")]
  UnknownPackage(PkgHash),

  #[error("path of package {hash} is already {existing}, refusing {new}")]
  AlreadySet {
    hash: PkgHash,
    existing: PathBuf,
    new: PathBuf,
  },

  #[error(transparent)]
  Invalid(#[from] ValidationError),
}

#[derive(Debug, Default, Clone)]
pub struct PkgGraph {
  pkgs: Vec<Pkg>,
  by_hash: HashMap<PkgHash, PkgId>,
}

impl PkgGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Validate a spec and add it to the graph.
  ///
  /// References must name packages already in the graph.
  pub fn add(&mut self, spec: PkgSpec) -> Result<PkgId, ValidationError> {
    let pkg = Pkg::from_spec(spec)?;
    let len = self.pkgs.len();
    for kind in RefKind::ALL {
      check_refs(kind, pkg.refs(kind), |id| id.0 < len)?;
    }

    Ok(self.push(pkg))
  }

  pub(crate) fn push(&mut self, pkg: Pkg) -> PkgId {
    let id = PkgId(self.pkgs.len());
    if let Some(hash) = &pkg.hash {
      self.by_hash.entry(hash.clone()).or_insert(id);
    }
    self.pkgs.push(pkg);
    id
  }

  pub(crate) fn get_mut(&mut self, id: PkgId) -> Option<&mut Pkg> {
    self.pkgs.get_mut(id.0)
  }

  pub fn get(&self, id: PkgId) -> Option<&Pkg> {
    self.pkgs.get(id.0)
  }

  /// The canonical package for a hash.
  pub fn lookup(&self, hash: &PkgHash) -> Option<PkgId> {
    self.by_hash.get(hash).copied()
  }

  pub fn get_by_hash(&self, hash: &PkgHash) -> Option<&Pkg> {
    self.lookup(hash).and_then(|id| self.get(id))
  }

  pub fn contains_hash(&self, hash: &PkgHash) -> bool {
    self.by_hash.contains_key(hash)
  }

  pub fn len(&self) -> usize {
    self.pkgs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pkgs.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = PkgId> + '_ {
    (0..self.pkgs.len()).map(PkgId)
  }

  /// Hash of a package, if it has one.
  pub fn hash_of(&self, id: PkgId) -> Option<&PkgHash> {
    self.get(id).and_then(Pkg::hash)
  }

  /// Derive a package's hash without storing it.
  pub fn derive_hash(&self, id: PkgId) -> Result<PkgHash, HashError> {
    derive_hash(self, id)
  }

  /// Derive and record a package's hash.
  ///
  /// The hash is write-once: re-assigning the same value is a no-op, a
  /// different value is a [`HashError::Conflict`].
  pub fn assign_hash(&mut self, id: PkgId) -> Result<PkgHash, HashError> {
    let derived = derive_hash(self, id)?;
    let pkg = self.get_mut(id).ok_or(HashError::UnknownPackage(id))?;

    if let Some(existing) = &pkg.hash {
      if *existing == derived {
        return Ok(derived);
      }
      return Err(HashError::Conflict {
        pkg: id,
        existing: existing.clone(),
        derived,
      });
    }
    pkg.hash = Some(derived.clone());

    let canonical = *self.by_hash.entry(derived.clone()).or_insert(id);
    if canonical != id {
      debug!(pkg = %id, hash = %derived, canonical = %canonical, "package duplicates an existing node");
    } else {
      debug!(pkg = %id, hash = %derived, "assigned package hash");
    }

    Ok(derived)
  }

  /// Hash a package and everything it references, dependencies first.
  ///
  /// Already-hashed packages are taken as they are.
  pub fn hash_closure(&mut self, root: PkgId) -> Result<PkgHash, HashError> {
    if self.get(root).is_none() {
      return Err(HashError::UnknownPackage(root));
    }

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
      if expanded {
        order.push(id);
        continue;
      }
      if !visited.insert(id) {
        continue;
      }

      let pkg = self.get(id).ok_or(HashError::UnknownPackage(id))?;
      if pkg.hash.is_some() {
        continue;
      }

      stack.push((id, true));
      for kind in RefKind::ALL.iter().rev() {
        for reference in pkg.refs(*kind).iter().rev() {
          if !visited.contains(reference) {
            stack.push((*reference, false));
          }
        }
      }
    }

    for id in order {
      self.assign_hash(id)?;
    }

    self
      .hash_of(root)
      .cloned()
      .ok_or(HashError::UnknownPackage(root))
  }

  /// Record where a package was realized.
  ///
  /// Write-once per hash. Every package sharing the hash gets the path.
  pub fn set_path(&mut self, hash: &PkgHash, path: impl Into<PathBuf>) -> Result<(), PathError> {
    let path = path.into();
    if path.as_os_str().is_empty() {
      return Err(ValidationError::InvalidPath { value: String::new() }.into());
    }

    let canonical = self.lookup(hash).ok_or_else(|| PathError::UnknownPackage(hash.clone()))?;
    if let Some(existing) = &self.pkgs[canonical.0].path {
      if *existing == path {
        return Ok(());
      }
      return Err(PathError::AlreadySet {
        hash: hash.clone(),
        existing: existing.clone(),
        new: path,
      });
    }

    for pkg in self.pkgs.iter_mut().filter(|p| p.hash.as_ref() == Some(hash)) {
      pkg.path = Some(path.clone());
    }
    debug!(hash = %hash, path = %path.display(), "recorded package path");

    Ok(())
  }
}
