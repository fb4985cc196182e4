//! Test utilities for cairn-lib.

use crate::pkg::{PkgGraph, PkgId, PkgSpec, RefKind};
use crate::util::hash::PkgHash;

/// A well-formed package hash made of one repeated byte value.
pub fn fake_hash(n: u8) -> PkgHash {
  PkgHash::parse(&format!("{:02x}", n).repeat(16)).unwrap()
}

/// Add a named package and hash it.
pub fn hashed(graph: &mut PkgGraph, spec: PkgSpec) -> PkgId {
  let id = graph.add(spec).unwrap();
  graph.assign_hash(id).unwrap();
  id
}

/// Hash of a package that must already be hashed.
pub fn hash_of(graph: &PkgGraph, id: PkgId) -> PkgHash {
  graph.hash_of(id).unwrap().clone()
}

/// Point `from`'s references of `kind` at `to` after hashing, bypassing
/// validation. Graphs built through the public API are acyclic, so this is
/// how cycles are made.
pub fn link(graph: &mut PkgGraph, from: PkgId, kind: RefKind, to: &[PkgId]) {
  let pkg = graph.get_mut(from).unwrap();
  let refs = match kind {
    RefKind::Force => &mut pkg.force_refs,
    RefKind::Extra => &mut pkg.extra_refs,
    RefKind::Weak => &mut pkg.weak_refs,
  };
  refs.extend_from_slice(to);
}
