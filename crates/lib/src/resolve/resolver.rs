//! Incremental dependency resolution.
//!
//! Force references are strong edges from the start. Extra references become
//! strong edges only once a scan of the referrer's output confirms them; until
//! then the referrer is pending. Weak references pull their targets into the
//! closure without ordering anything.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::pkg::{Pkg, PkgGraph, PkgId, RefKind};
use crate::scan::RefScanner;
use crate::util::hash::PkgHash;

use super::types::{Cycle, Resolution, ResolveError, ScanStatus};

/// Outgoing references of one package, by hash.
#[derive(Debug, Clone, Default)]
struct NodeRefs {
  force: Vec<PkgHash>,
  extra: Vec<PkgHash>,
  weak: Vec<PkgHash>,
}

impl NodeRefs {
  fn kind_mut(&mut self, kind: RefKind) -> &mut Vec<PkgHash> {
    match kind {
      RefKind::Force => &mut self.force,
      RefKind::Extra => &mut self.extra,
      RefKind::Weak => &mut self.weak,
    }
  }

  /// The `i`th edge across force, extra and weak references.
  fn edge(&self, i: usize) -> Option<&PkgHash> {
    let (f, e) = (self.force.len(), self.extra.len());
    if i < f {
      self.force.get(i)
    } else if i < f + e {
      self.extra.get(i - f)
    } else {
      self.weak.get(i - f - e)
    }
  }
}

/// Resolution state for one set of roots.
///
/// Owns a snapshot of the reachable part of the graph, so the graph itself
/// stays free to be updated (for example with realized paths) while builds
/// are in flight.
#[derive(Debug, Clone)]
pub struct Resolver {
  roots: Vec<PkgHash>,
  nodes: HashMap<PkgHash, NodeRefs>,
  status: HashMap<PkgHash, ScanStatus>,
}

impl Resolver {
  /// Snapshot everything reachable from `roots` and reject reference cycles.
  ///
  /// Every reachable package must already be hashed.
  pub fn new(graph: &PkgGraph, roots: &[PkgId]) -> Result<Self, ResolveError> {
    let roots = roots
      .iter()
      .map(|&id| {
        let pkg = graph.get(id).ok_or(ResolveError::UnknownRoot(id))?;
        pkg.hash().cloned().ok_or(ResolveError::Unhashed(id))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let mut nodes: HashMap<PkgHash, NodeRefs> = HashMap::new();
    let mut stack = roots.clone();
    while let Some(hash) = stack.pop() {
      if nodes.contains_key(&hash) {
        continue;
      }
      let pkg = graph
        .get_by_hash(&hash)
        .ok_or_else(|| ResolveError::UnknownPackage(hash.clone()))?;

      let mut refs = NodeRefs::default();
      for kind in RefKind::ALL {
        for &id in pkg.refs(kind) {
          let target = graph.hash_of(id).ok_or(ResolveError::Unhashed(id))?;
          refs.kind_mut(kind).push(target.clone());
          if !nodes.contains_key(target) {
            stack.push(target.clone());
          }
        }
      }
      nodes.insert(hash, refs);
    }

    check_acyclic(&roots, &nodes)?;

    let status = nodes
      .iter()
      .map(|(hash, refs)| {
        let status = if refs.extra.is_empty() {
          ScanStatus::Confirmed(Vec::new())
        } else {
          ScanStatus::Pending
        };
        (hash.clone(), status)
      })
      .collect();

    debug!(roots = roots.len(), reachable = nodes.len(), "created resolver");
    Ok(Self { roots, nodes, status })
  }

  pub fn status(&self, hash: &PkgHash) -> Option<&ScanStatus> {
    self.status.get(hash)
  }

  /// Extra references of a package: the candidates to scan its output for.
  pub fn candidates(&self, hash: &PkgHash) -> Result<&[PkgHash], ResolveError> {
    self
      .nodes
      .get(hash)
      .map(|refs| refs.extra.as_slice())
      .ok_or_else(|| ResolveError::UnknownPackage(hash.clone()))
  }

  /// Force references plus confirmed extra references, without repeats.
  fn strong_deps(&self, hash: &PkgHash) -> Vec<PkgHash> {
    let Some(refs) = self.nodes.get(hash) else {
      return Vec::new();
    };
    let confirmed: &[PkgHash] = match self.status.get(hash) {
      Some(ScanStatus::Confirmed(found)) => found,
      _ => &[],
    };

    let mut seen = HashSet::new();
    refs
      .force
      .iter()
      .chain(confirmed)
      .filter(|h| seen.insert(*h))
      .cloned()
      .collect()
  }

  /// Post-order walk over strong edges from `start`. Weak targets of every
  /// finished node are queued for a later pass.
  fn visit(
    &self,
    start: &PkgHash,
    visited: &mut HashSet<PkgHash>,
    res: &mut Resolution,
    weak_queue: &mut VecDeque<PkgHash>,
  ) {
    if !visited.insert(start.clone()) {
      return;
    }

    let mut stack = vec![(start.clone(), self.strong_deps(start), 0usize)];
    while let Some((_, children, next)) = stack.last_mut() {
      if let Some(child) = children.get(*next) {
        *next += 1;
        let child = child.clone();
        if visited.insert(child.clone()) {
          let deps = self.strong_deps(&child);
          stack.push((child, deps, 0));
        }
        continue;
      }

      let Some((hash, children, _)) = stack.pop() else {
        break;
      };
      if let Some(refs) = self.nodes.get(&hash) {
        weak_queue.extend(refs.weak.iter().cloned());
      }
      res.closure.insert(hash.clone());
      res.deps.insert(hash.clone(), children);
      res.build_order.push(hash);
    }
  }

  /// The closure and build order as currently known.
  pub fn resolution(&self) -> Resolution {
    let mut res = Resolution::default();
    let mut visited = HashSet::new();
    let mut weak_queue = VecDeque::new();

    for root in &self.roots {
      self.visit(root, &mut visited, &mut res, &mut weak_queue);
    }

    let strong = res.build_order.len();
    while let Some(target) = weak_queue.pop_front() {
      self.visit(&target, &mut visited, &mut res, &mut weak_queue);
    }
    res.weak = res.build_order[strong..].iter().cloned().collect();

    for hash in &res.build_order {
      match self.status.get(hash) {
        Some(ScanStatus::Pending) => {
          res.pending.insert(hash.clone());
        }
        Some(ScanStatus::Failed(_)) => {
          res.failed.insert(hash.clone());
        }
        _ => {}
      }
    }

    res
  }

  /// Closure members still waiting for a build output, in build order.
  pub fn pending(&self) -> Vec<PkgHash> {
    self
      .resolution()
      .build_order
      .into_iter()
      .filter(|h| self.status.get(h).is_some_and(ScanStatus::is_pending))
      .collect()
  }

  /// Record which candidates were found in the output of `hash`.
  ///
  /// Anything in `found` that is not an extra reference of `hash` is ignored.
  /// Returns the confirmed extra references in declared order. Confirming
  /// again with the same outcome is a no-op; a different outcome is an
  /// error. A failed package may be confirmed after a successful retry.
  pub fn confirm(&mut self, hash: &PkgHash, found: &[PkgHash]) -> Result<Vec<PkgHash>, ResolveError> {
    let refs = self
      .nodes
      .get(hash)
      .ok_or_else(|| ResolveError::UnknownPackage(hash.clone()))?;

    let found: HashSet<&PkgHash> = found.iter().collect();
    let mut seen = HashSet::new();
    let confirmed: Vec<PkgHash> = refs
      .extra
      .iter()
      .filter(|h| found.contains(h) && seen.insert(*h))
      .cloned()
      .collect();

    if let Some(ScanStatus::Confirmed(existing)) = self.status.get(hash) {
      if *existing == confirmed {
        return Ok(confirmed);
      }
      return Err(ResolveError::AlreadyConfirmed {
        hash: hash.clone(),
        existing: existing.clone(),
      });
    }

    debug!(
      pkg = %hash,
      candidates = refs.extra.len(),
      confirmed = confirmed.len(),
      "confirmed extra references"
    );
    self.status.insert(hash.clone(), ScanStatus::Confirmed(confirmed.clone()));
    Ok(confirmed)
  }

  /// Scan `content` for the extra references of `hash` and confirm them.
  pub fn confirm_bytes(&mut self, hash: &PkgHash, content: &[u8]) -> Result<Vec<PkgHash>, ResolveError> {
    let found = RefScanner::new(self.candidates(hash)?).scan_bytes(content);
    self.confirm(hash, &found)
  }

  /// Scan the realized output of `hash` at `path` and confirm what it
  /// references. A scan failure marks the package failed.
  pub fn confirm_output(&mut self, hash: &PkgHash, path: &Path) -> Result<Vec<PkgHash>, ResolveError> {
    let scanner = RefScanner::new(self.candidates(hash)?);
    if scanner.is_empty() {
      return self.confirm(hash, &[]);
    }

    match scanner.scan_path(path) {
      Ok(found) => self.confirm(hash, &found),
      Err(source) => {
        self.mark_failed(hash, source.to_string())?;
        Err(ResolveError::Scan {
          hash: hash.clone(),
          source,
        })
      }
    }
  }

  /// Record that the build of `hash` failed or was cancelled.
  pub fn mark_failed(&mut self, hash: &PkgHash, reason: impl Into<String>) -> Result<(), ResolveError> {
    if !self.nodes.contains_key(hash) {
      return Err(ResolveError::UnknownPackage(hash.clone()));
    }
    let reason = reason.into();
    warn!(pkg = %hash, reason = %reason, "package marked failed");
    self.status.insert(hash.clone(), ScanStatus::Failed(reason));
    Ok(())
  }

  /// The final resolution, provided nothing is pending or failed.
  pub fn finish(&self) -> Result<Resolution, ResolveError> {
    let res = self.resolution();
    if !res.is_complete() {
      let in_order = |set: &BTreeSet<PkgHash>| {
        res
          .build_order
          .iter()
          .filter(|h| set.contains(*h))
          .cloned()
          .collect::<Vec<_>>()
      };
      return Err(ResolveError::Unresolved {
        pending: in_order(&res.pending),
        failed: in_order(&res.failed),
      });
    }

    info!(
      roots = self.roots.len(),
      closure = res.closure.len(),
      weak = res.weak.len(),
      "resolved dependencies"
    );
    Ok(res)
  }
}

/// Depth-first search over every declared reference, failing on the first
/// edge that leads back onto the current path.
fn check_acyclic(roots: &[PkgHash], nodes: &HashMap<PkgHash, NodeRefs>) -> Result<(), ResolveError> {
  enum Mark {
    OnPath,
    Done,
  }

  let mut marks: HashMap<&PkgHash, Mark> = HashMap::new();
  for root in roots {
    if marks.contains_key(root) {
      continue;
    }

    marks.insert(root, Mark::OnPath);
    let mut path: Vec<(&PkgHash, usize)> = vec![(root, 0)];

    while let Some((hash, next)) = path.last_mut() {
      let hash: &PkgHash = *hash;
      let edge = nodes.get(hash).and_then(|refs| refs.edge(*next));
      let Some(child) = edge else {
        marks.insert(hash, Mark::Done);
        path.pop();
        continue;
      };
      *next += 1;

      match marks.get(child) {
        Some(Mark::Done) => {}
        Some(Mark::OnPath) => {
          let start = path.iter().position(|(h, _)| *h == child).unwrap_or(0);
          let cycle = Cycle(path[start..].iter().map(|(h, _)| (*h).clone()).collect());
          return Err(ResolveError::Cycle { cycle });
        }
        None => {
          marks.insert(child, Mark::OnPath);
          path.push((child, 0));
        }
      }
    }
  }

  Ok(())
}

/// Resolve `roots` against the realized paths recorded in `graph`.
///
/// Every pending package with a recorded path is scanned, repeatedly, until
/// no more progress is possible.
pub fn resolve(graph: &PkgGraph, roots: &[PkgId]) -> Result<Resolution, ResolveError> {
  let mut resolver = Resolver::new(graph, roots)?;

  loop {
    let mut progressed = false;
    for hash in resolver.pending() {
      let Some(path) = graph.get_by_hash(&hash).and_then(Pkg::path) else {
        continue;
      };
      resolver.confirm_output(&hash, path)?;
      progressed = true;
    }
    if !progressed {
      break;
    }
  }

  resolver.finish()
}
