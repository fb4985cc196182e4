//! Persisted form of package descriptors.
//!
//! A [`PkgRecord`] encodes as an eight-element JSON array in fixed order:
//! builder, name, out-hash, hash, path, force-refs, extra-refs, weak-refs.
//! References are content-address strings. A [`PkgBundle`] carries a closure
//! of records (dependencies first) plus its roots.
//!
//! Everything read back is untrusted and goes through the validator before a
//! package is created from it.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::BUNDLE_VERSION;
use crate::util::hash::PkgHash;

use super::graph::PkgGraph;
use super::hash::{CanonicalPkg, HashError, ref_hashes};
use super::types::{Builder, Pkg, PkgId, RefKind};
use super::validate::{PkgName, ValidationError, check_refs, parse_hash, parse_out_hash};

#[derive(Debug, Error)]
pub enum RecordError {
  #[error("failed to decode package data: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid package record {index}: {source}")]
  Invalid {
    index: usize,
    #[source]
    source: ValidationError,
  },

  #[error("failed to encode package record {index}: {source}")]
  Encode {
    index: usize,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported bundle version {0} (expected {BUNDLE_VERSION})")]
  UnsupportedVersion(u32),

  #[error("bundle root {0:?} is not a package in the bundle")]
  UnknownRoot(String),
}

type RecordFields = (
  Option<Builder>,
  Option<String>,
  Option<String>,
  Option<String>,
  Option<PathBuf>,
  Vec<String>,
  Vec<String>,
  Vec<String>,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordFields", into = "RecordFields")]
pub struct PkgRecord {
  pub builder: Option<Builder>,
  pub name: Option<String>,
  pub out_hash: Option<String>,
  pub hash: Option<String>,
  pub path: Option<PathBuf>,
  pub force_refs: Vec<String>,
  pub extra_refs: Vec<String>,
  pub weak_refs: Vec<String>,
}

impl From<RecordFields> for PkgRecord {
  fn from(fields: RecordFields) -> Self {
    let (builder, name, out_hash, hash, path, force_refs, extra_refs, weak_refs) = fields;
    Self {
      builder,
      name,
      out_hash,
      hash,
      path,
      force_refs,
      extra_refs,
      weak_refs,
    }
  }
}

impl From<PkgRecord> for RecordFields {
  fn from(r: PkgRecord) -> Self {
    (
      r.builder,
      r.name,
      r.out_hash,
      r.hash,
      r.path,
      r.force_refs,
      r.extra_refs,
      r.weak_refs,
    )
  }
}

impl PkgRecord {
  pub fn refs(&self, kind: RefKind) -> &[String] {
    match kind {
      RefKind::Force => &self.force_refs,
      RefKind::Extra => &self.extra_refs,
      RefKind::Weak => &self.weak_refs,
    }
  }

  /// Run the validator over every field, in field order, then check that a
  /// recorded hash is the one the record's content derives.
  pub fn validate(&self) -> Result<(), RecordError> {
    self.checked_pkg(0).map(|_| ())
  }

  /// Validate this record as entry `index` of its batch and build an unwired
  /// package from it.
  fn checked_pkg(&self, index: usize) -> Result<Pkg, RecordError> {
    let pkg = self.to_pkg().map_err(|source| RecordError::Invalid { index, source })?;

    if let Some(claimed) = &pkg.hash {
      let derived = self
        .digest(&pkg)
        .map_err(|source| RecordError::Encode { index, source })?;

      if derived != *claimed {
        return Err(RecordError::Invalid {
          index,
          source: ValidationError::HashMismatch {
            value: claimed.to_string(),
            derived: derived.to_string(),
          },
        });
      }
    }

    Ok(pkg)
  }

  /// Content address of `pkg` with this record's reference lists.
  fn digest(&self, pkg: &Pkg) -> Result<PkgHash, serde_json::Error> {
    RefKind::ALL
      .into_iter()
      .fold(CanonicalPkg::new(pkg), |canonical, kind| {
        canonical.with_refs(kind, self.refs(kind).iter().map(String::as_str).collect())
      })
      .digest()
  }

  /// Build an unwired package from this record. References are validated for
  /// shape only; the caller resolves them.
  fn to_pkg(&self) -> Result<Pkg, ValidationError> {
    let name = self.name.as_deref().map(PkgName::parse).transpose()?;
    let out_hash = self.out_hash.as_deref().map(parse_out_hash).transpose()?;
    let hash = self.hash.as_deref().map(parse_hash).transpose()?;

    if let Some(path) = &self.path
      && path.as_os_str().is_empty()
    {
      return Err(ValidationError::InvalidPath { value: String::new() });
    }

    for kind in RefKind::ALL {
      check_refs(kind, self.refs(kind), |r| PkgHash::parse(r).is_ok())?;
    }

    Ok(Pkg {
      builder: self.builder.clone(),
      name,
      out_hash,
      hash,
      path: self.path.clone(),
      force_refs: Vec::new(),
      extra_refs: Vec::new(),
      weak_refs: Vec::new(),
    })
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  /// Decode and validate a record.
  pub fn from_json(json: &str) -> Result<Self, RecordError> {
    let record: PkgRecord = serde_json::from_str(json)?;
    record.validate()?;
    Ok(record)
  }
}

/// A closure of package records and the roots it was exported for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkgBundle {
  pub version: u32,
  pub roots: Vec<String>,
  pub pkgs: Vec<PkgRecord>,
}

impl PkgBundle {
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }

  /// Decode a bundle. Validation happens in [`PkgGraph::import`].
  pub fn from_json(json: &str) -> Result<Self, RecordError> {
    let bundle: PkgBundle = serde_json::from_str(json)?;
    if bundle.version != BUNDLE_VERSION {
      return Err(RecordError::UnsupportedVersion(bundle.version));
    }
    Ok(bundle)
  }
}

impl PkgGraph {
  /// The persisted form of one package. All its references must be hashed.
  pub fn to_record(&self, id: PkgId) -> Result<PkgRecord, HashError> {
    let pkg = self.get(id).ok_or(HashError::UnknownPackage(id))?;
    let strings = |kind: RefKind| -> Result<Vec<String>, HashError> {
      Ok(ref_hashes(self, id, kind)?.into_iter().map(|h| h.to_string()).collect())
    };

    Ok(PkgRecord {
      builder: pkg.builder().cloned(),
      name: pkg.name().map(str::to_string),
      out_hash: pkg.out_hash().map(|h| h.to_string()),
      hash: pkg.hash().map(|h| h.to_string()),
      path: pkg.path().map(|p| p.to_path_buf()),
      force_refs: strings(RefKind::Force)?,
      extra_refs: strings(RefKind::Extra)?,
      weak_refs: strings(RefKind::Weak)?,
    })
  }

  /// Export the closure of `roots`, dependencies before dependents.
  ///
  /// Every package in the closure must be hashed.
  pub fn export(&self, roots: &[PkgId]) -> Result<PkgBundle, HashError> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut root_hashes = Vec::new();

    for &root in roots {
      let hash = self.get(root).ok_or(HashError::UnknownPackage(root))?.hash();
      root_hashes.push(hash.ok_or(HashError::Unhashed(root))?.to_string());
      self.collect_post_order(root, &mut seen, &mut order)?;
    }

    let pkgs = order.into_iter().map(|id| self.to_record(id)).collect::<Result<Vec<_>, _>>()?;
    debug!(roots = root_hashes.len(), pkgs = pkgs.len(), "exported package bundle");

    Ok(PkgBundle {
      version: BUNDLE_VERSION,
      roots: root_hashes,
      pkgs,
    })
  }

  fn collect_post_order(
    &self,
    id: PkgId,
    seen: &mut HashSet<PkgHash>,
    order: &mut Vec<PkgId>,
  ) -> Result<(), HashError> {
    let pkg = self.get(id).ok_or(HashError::UnknownPackage(id))?;
    let hash = pkg.hash().ok_or(HashError::Unhashed(id))?;
    if !seen.insert(hash.clone()) {
      return Ok(());
    }

    for kind in RefKind::ALL {
      for &reference in pkg.refs(kind) {
        self.collect_post_order(reference, seen, order)?;
      }
    }
    order.push(id);
    Ok(())
  }

  /// Import a bundle, returning the ids of its roots.
  ///
  /// Every record is validated; references may point at records anywhere in
  /// the bundle or at packages already in the graph. Records whose hash is
  /// already known are deduplicated. Nothing is added unless the whole bundle
  /// is valid.
  pub fn import(&mut self, bundle: PkgBundle) -> Result<Vec<PkgId>, RecordError> {
    if bundle.version != BUNDLE_VERSION {
      return Err(RecordError::UnsupportedVersion(bundle.version));
    }

    self.insert_records(&bundle.pkgs)?;

    bundle
      .roots
      .iter()
      .map(|root| {
        PkgHash::parse(root)
          .ok()
          .and_then(|hash| self.lookup(&hash))
          .ok_or_else(|| RecordError::UnknownRoot(root.clone()))
      })
      .collect()
  }

  /// Import a single record whose references are already in the graph.
  pub fn import_record(&mut self, record: PkgRecord) -> Result<PkgId, RecordError> {
    let ids = self.insert_records(std::slice::from_ref(&record))?;
    Ok(ids[0])
  }

  fn insert_records(&mut self, records: &[PkgRecord]) -> Result<Vec<PkgId>, RecordError> {
    let mut pkgs = Vec::with_capacity(records.len());
    let mut known: HashSet<PkgHash> = HashSet::new();

    for (index, record) in records.iter().enumerate() {
      let pkg = record.checked_pkg(index)?;
      if let Some(hash) = &pkg.hash {
        known.insert(hash.clone());
      }
      pkgs.push(pkg);
    }

    for (index, record) in records.iter().enumerate() {
      for kind in RefKind::ALL {
        check_refs(kind, record.refs(kind), |r| {
          PkgHash::parse(r).is_ok_and(|h| known.contains(&h) || self.contains_hash(&h))
        })
        .map_err(|source| RecordError::Invalid { index, source })?;
      }
    }

    // First pass registers every hash so forward references can be wired.
    let mut ids = Vec::with_capacity(records.len());
    let mut fresh = Vec::new();
    for pkg in pkgs {
      match pkg.hash.as_ref().and_then(|h| self.lookup(h)) {
        Some(existing) => ids.push(existing),
        None => {
          let id = self.push(pkg);
          ids.push(id);
          fresh.push(id);
        }
      }
    }

    for (record, &id) in records.iter().zip(&ids) {
      if !fresh.contains(&id) {
        continue;
      }
      let wire = |refs: &[String]| -> Vec<PkgId> {
        refs
          .iter()
          .filter_map(|r| PkgHash::parse(r).ok().and_then(|h| self.lookup(&h)))
          .collect()
      };
      let (force, extra, weak) = (wire(&record.force_refs), wire(&record.extra_refs), wire(&record.weak_refs));
      if let Some(pkg) = self.get_mut(id) {
        pkg.force_refs = force;
        pkg.extra_refs = extra;
        pkg.weak_refs = weak;
      }
    }

    debug!(records = records.len(), added = fresh.len(), "imported package records");
    Ok(ids)
  }
}
