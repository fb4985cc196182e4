//! Build DAG over a resolution's strong edges.
//!
//! Weak references carry no ordering, so a weakly reached package is a node
//! here with edges only to and from its own strong dependencies.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::util::hash::PkgHash;

use super::types::{Cycle, Resolution, ResolveError};

/// Dependency graph of a resolution, with an edge from each dependency to its
/// dependent.
///
/// Provides:
/// - topological order of the closure
/// - parallel build waves
/// - direct dependency and dependent queries
#[derive(Debug)]
pub struct BuildDag {
  graph: DiGraph<PkgHash, ()>,
  nodes: HashMap<PkgHash, NodeIndex>,
}

impl BuildDag {
  /// Build the DAG from a resolution.
  ///
  /// Nodes are added in build order, so every order derived from the DAG is
  /// deterministic.
  pub fn from_resolution(res: &Resolution) -> Result<Self, ResolveError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for hash in &res.build_order {
      let idx = graph.add_node(hash.clone());
      nodes.insert(hash.clone(), idx);
    }

    for (hash, deps) in &res.deps {
      let Some(&dependent) = nodes.get(hash) else {
        continue;
      };
      for dep in deps {
        if let Some(&dep_idx) = nodes.get(dep) {
          graph.add_edge(dep_idx, dependent, ());
        }
      }
    }

    let dag = Self { graph, nodes };
    dag.topological()?;
    Ok(dag)
  }

  fn cycle_at(&self, idx: NodeIndex) -> ResolveError {
    ResolveError::Cycle {
      cycle: Cycle(vec![self.graph[idx].clone()]),
    }
  }

  /// Packages in an order where dependencies come before dependents.
  pub fn topological(&self) -> Result<Vec<PkgHash>, ResolveError> {
    let sorted = toposort(&self.graph, None).map_err(|c| self.cycle_at(c.node_id()))?;
    Ok(sorted.into_iter().map(|idx| self.graph[idx].clone()).collect())
  }

  /// Packages grouped into waves. Every package's dependencies are in
  /// earlier waves, so a wave can be built in parallel.
  pub fn waves(&self) -> Result<Vec<Vec<PkgHash>>, ResolveError> {
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
      .collect();

    let mut waves = Vec::new();
    let mut ready: Vec<NodeIndex> = self
      .graph
      .node_indices()
      .filter(|idx| in_degree[idx.index()] == 0)
      .collect();
    let mut placed = 0;

    while !ready.is_empty() {
      let mut next = Vec::new();
      for &idx in &ready {
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          let degree = &mut in_degree[dependent.index()];
          *degree = degree.saturating_sub(1);
          if *degree == 0 {
            next.push(dependent);
          }
        }
      }

      placed += ready.len();
      ready.sort();
      waves.push(ready.iter().map(|&idx| self.graph[idx].clone()).collect());
      ready = next;
    }

    if placed != self.graph.node_count() {
      let stuck = self.graph.node_indices().find(|idx| in_degree[idx.index()] > 0);
      if let Some(idx) = stuck {
        return Err(self.cycle_at(idx));
      }
    }

    Ok(waves)
  }

  /// Direct strong dependencies of a package.
  pub fn dependencies(&self, hash: &PkgHash) -> Vec<PkgHash> {
    self.neighbors(hash, Direction::Incoming)
  }

  /// Packages that directly depend on `hash`.
  pub fn dependents(&self, hash: &PkgHash) -> Vec<PkgHash> {
    self.neighbors(hash, Direction::Outgoing)
  }

  fn neighbors(&self, hash: &PkgHash, dir: Direction) -> Vec<PkgHash> {
    let Some(&idx) = self.nodes.get(hash) else {
      return Vec::new();
    };
    let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, dir).collect();
    found.sort();
    found.dedup();
    found.into_iter().map(|i| self.graph[i].clone()).collect()
  }

  pub fn has_dependencies(&self, hash: &PkgHash) -> bool {
    let Some(&idx) = self.nodes.get(hash) else {
      return false;
    };
    self.graph.neighbors_directed(idx, Direction::Incoming).next().is_some()
  }

  pub fn contains(&self, hash: &PkgHash) -> bool {
    self.nodes.contains_key(hash)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pkg::{PkgGraph, PkgSpec};
  use crate::resolve::resolve;
  use crate::util::testutil::{fake_hash, hash_of, hashed};

  #[test]
  fn empty_resolution() {
    let dag = BuildDag::from_resolution(&Resolution::default()).unwrap();

    assert!(dag.is_empty());
    assert!(dag.topological().unwrap().is_empty());
    assert!(dag.waves().unwrap().is_empty());
  }

  #[test]
  fn diamond_waves() {
    //     a
    //    / \
    //   b   c
    //    \ /
    //     d
    let mut graph = PkgGraph::new();
    let d = hashed(&mut graph, PkgSpec::named("d"));
    let b = hashed(&mut graph, PkgSpec::named("b").force_ref(d));
    let c = hashed(&mut graph, PkgSpec::named("c").force_ref(d));
    let a = hashed(&mut graph, PkgSpec::named("a").force_ref(b).force_ref(c));
    let [ha, hb, hc, hd] = [a, b, c, d].map(|id| hash_of(&graph, id));

    let dag = BuildDag::from_resolution(&resolve(&graph, &[a]).unwrap()).unwrap();
    let waves = dag.waves().unwrap();

    assert_eq!(waves, vec![vec![hd.clone()], vec![hb.clone(), hc.clone()], vec![ha.clone()]]);
    assert_eq!(dag.dependencies(&ha), vec![hb.clone(), hc.clone()]);
    assert_eq!(dag.dependents(&hd), vec![hb, hc]);
    assert!(!dag.has_dependencies(&hd));

    let topo = dag.topological().unwrap();
    assert_eq!(topo.first(), Some(&hd));
    assert_eq!(topo.last(), Some(&ha));
  }

  #[test]
  fn weak_target_has_no_ordering_edge() {
    let mut graph = PkgGraph::new();
    let w = hashed(&mut graph, PkgSpec::named("w"));
    let a = hashed(&mut graph, PkgSpec::named("a").weak_ref(w));
    let [ha, hw] = [a, w].map(|id| hash_of(&graph, id));

    let dag = BuildDag::from_resolution(&resolve(&graph, &[a]).unwrap()).unwrap();

    assert_eq!(dag.len(), 2);
    assert!(dag.dependencies(&ha).is_empty());
    assert_eq!(dag.waves().unwrap(), vec![vec![ha, hw]]);
  }

  #[test]
  fn cyclic_deps_are_rejected() {
    let (a, b) = (fake_hash(1), fake_hash(2));
    let res = Resolution {
      build_order: vec![a.clone(), b.clone()],
      deps: [(a.clone(), vec![b.clone()]), (b.clone(), vec![a.clone()])].into(),
      ..Default::default()
    };

    let err = BuildDag::from_resolution(&res).unwrap_err();
    assert!(err.cycle().is_some());
  }

  #[test]
  fn unknown_hash_has_no_neighbors() {
    let dag = BuildDag::from_resolution(&Resolution::default()).unwrap();
    assert!(dag.dependencies(&fake_hash(9)).is_empty());
    assert!(!dag.contains(&fake_hash(9)));
  }
}
