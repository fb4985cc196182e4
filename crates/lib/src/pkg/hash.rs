//! Content-address derivation.
//!
//! A package's hash covers its builder, name and out-hash plus the *hashes* of
//! its references, in declared order. References are never re-encoded, so a
//! change anywhere below a package changes its hash, and references must be
//! hashed first.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::PKG_HASH_DOMAIN;
use crate::util::hash::PkgHash;

use super::graph::PkgGraph;
use super::types::{Builder, Pkg, PkgId, RefKind};

#[derive(Debug, Error)]
pub enum HashError {
  /// A reference has not been hashed yet. This is an ordering mistake by the
  /// caller, not bad data.
  #[error("{field}[{index}] of package {pkg} refers to unhashed package {reference}; hash references first")]
  UnhashedReference {
    pkg: PkgId,
    field: RefKind,
    index: usize,
    reference: PkgId,
  },

  #[error("package {0} does not exist")]
  UnknownPackage(PkgId),

  #[error("package {0} has not been hashed")]
  Unhashed(PkgId),

  #[error("package {pkg} is already hashed as {existing}, refusing {derived}")]
  Conflict {
    pkg: PkgId,
    existing: PkgHash,
    derived: PkgHash,
  },

  #[error("failed to encode package {pkg}: {source}")]
  Encode {
    pkg: PkgId,
    #[source]
    source: serde_json::Error,
  },
}

/// Canonical encoding fed to the hash function. Field order is fixed by the
/// declaration order; `None` encodes as `null`. References are content
/// addresses, so a persisted record encodes exactly like the package it
/// came from.
#[derive(Serialize)]
pub(crate) struct CanonicalPkg<'a> {
  domain: &'static str,
  builder: Option<&'a Builder>,
  name: Option<&'a str>,
  out_hash: Option<&'a str>,
  force_refs: Vec<&'a str>,
  extra_refs: Vec<&'a str>,
  weak_refs: Vec<&'a str>,
}

impl<'a> CanonicalPkg<'a> {
  /// The package's own fields, with empty reference lists.
  pub(crate) fn new(pkg: &'a Pkg) -> Self {
    Self {
      domain: PKG_HASH_DOMAIN,
      builder: pkg.builder(),
      name: pkg.name(),
      out_hash: pkg.out_hash().map(|h| h.as_str()),
      force_refs: Vec::new(),
      extra_refs: Vec::new(),
      weak_refs: Vec::new(),
    }
  }

  pub(crate) fn with_refs(mut self, kind: RefKind, refs: Vec<&'a str>) -> Self {
    match kind {
      RefKind::Force => self.force_refs = refs,
      RefKind::Extra => self.extra_refs = refs,
      RefKind::Weak => self.weak_refs = refs,
    }
    self
  }

  pub(crate) fn digest(&self) -> Result<PkgHash, serde_json::Error> {
    let encoded = serde_json::to_vec(self)?;
    Ok(PkgHash::from_digest(&Sha256::digest(&encoded)))
  }
}

/// Collect the hashes of one reference list, failing on the first unhashed one.
pub(crate) fn ref_hashes(graph: &PkgGraph, pkg: PkgId, kind: RefKind) -> Result<Vec<&PkgHash>, HashError> {
  let node = graph.get(pkg).ok_or(HashError::UnknownPackage(pkg))?;

  node
    .refs(kind)
    .iter()
    .enumerate()
    .map(|(index, &reference)| {
      graph
        .get(reference)
        .ok_or(HashError::UnknownPackage(reference))?
        .hash()
        .ok_or(HashError::UnhashedReference {
          pkg,
          field: kind,
          index,
          reference,
        })
    })
    .collect()
}

/// Derive the content address of a package whose references are hashed.
///
/// Pure: does not store the result. See [`PkgGraph::assign_hash`].
pub fn derive_hash(graph: &PkgGraph, pkg: PkgId) -> Result<PkgHash, HashError> {
  let node = graph.get(pkg).ok_or(HashError::UnknownPackage(pkg))?;

  let mut canonical = CanonicalPkg::new(node);
  for kind in RefKind::ALL {
    let refs = ref_hashes(graph, pkg, kind)?.into_iter().map(PkgHash::as_str).collect();
    canonical = canonical.with_refs(kind, refs);
  }

  canonical.digest().map_err(|source| HashError::Encode { pkg, source })
}
