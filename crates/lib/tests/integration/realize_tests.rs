use std::sync::Arc;

use cairn_lib::build::BuildFailure;
use cairn_lib::pkg::Builder;
use cairn_lib::{ExecuteError, PkgGraph, PkgSpec, realize};

use super::common::{ScriptExecutor, TestStore};

fn cmd(script: &str) -> Builder {
  Builder::new().cmd(script)
}

#[tokio::test]
async fn diamond_is_built_once_per_package() {
  //     a
  //    / \
  //   b   c
  //    \ /
  //     d
  let store = TestStore::new();
  let mut graph = PkgGraph::new();
  let d = graph.add(PkgSpec::named("d").builder(cmd("make d"))).unwrap();
  let b = graph.add(PkgSpec::named("b").builder(cmd("make b")).force_ref(d)).unwrap();
  let c = graph.add(PkgSpec::named("c").builder(cmd("make c")).force_ref(d)).unwrap();
  let a = graph
    .add(PkgSpec::named("a").builder(cmd("make a")).force_ref(b).force_ref(c))
    .unwrap();

  let executor = Arc::new(ScriptExecutor::default());
  let result = realize(&mut graph, &[a], executor.clone(), &store.config).await.unwrap();

  assert!(result.is_success());
  assert_eq!(result.realized.len(), 4);

  let built = executor.built();
  assert_eq!(built.len(), 4);
  assert_eq!(built[0], "d");
  assert_eq!(built[3], "a");

  let [ha, hb, hc] = [a, b, c].map(|id| graph.hash_of(id).unwrap().clone());
  let request = executor.request_for("a");
  assert_eq!(request.dependencies.len(), 2);
  assert_eq!(request.dependencies.get(&hb), result.realized.get(&hb));
  assert_eq!(request.dependencies.get(&hc), result.realized.get(&hc));
  assert!(request.out_dir.starts_with(store.temp.path().join("store").join("pkg")));

  for id in [a, b, c, d] {
    let path = graph.get(id).unwrap().path().unwrap();
    assert!(path.join("bin").exists());
  }
  assert_eq!(result.resolution.build_order.last(), Some(&ha));
}

#[tokio::test]
async fn references_are_discovered_through_outputs() {
  let store = TestStore::new();
  let mut graph = PkgGraph::new();
  let zlib = graph.add(PkgSpec::named("zlib")).unwrap();
  let docs = graph.add(PkgSpec::named("docs")).unwrap();
  let lib = graph.add(PkgSpec::named("lib").extra_ref(zlib)).unwrap();
  let app = graph.add(PkgSpec::named("app").extra_ref(lib).extra_ref(docs)).unwrap();
  graph.hash_closure(app).unwrap();
  let [hzlib, hdocs, hlib, happ] = [zlib, docs, lib, app].map(|id| graph.hash_of(id).unwrap().clone());

  let executor = Arc::new(
    ScriptExecutor::default()
      .embedding("app", &[&hlib])
      .embedding("lib", &[&hzlib]),
  );
  let result = realize(&mut graph, &[app], executor.clone(), &store.config).await.unwrap();

  assert!(result.is_success());
  assert_eq!(executor.built(), vec!["app", "lib", "zlib"]);
  assert_eq!(result.resolution.build_order, vec![hzlib, hlib.clone(), happ.clone()]);
  assert!(!result.resolution.contains(&hdocs));
  assert_eq!(result.resolution.dependencies(&happ), &[hlib]);
}

#[tokio::test]
async fn weak_reference_is_realized_without_ordering() {
  let store = TestStore::new();
  let mut graph = PkgGraph::new();
  let manual = graph.add(PkgSpec::named("manual")).unwrap();
  let tool = graph.add(PkgSpec::named("tool").weak_ref(manual)).unwrap();

  let executor = Arc::new(ScriptExecutor::default());
  let result = realize(&mut graph, &[tool], executor.clone(), &store.config).await.unwrap();

  let hmanual = graph.hash_of(manual).unwrap().clone();
  assert!(result.is_success());
  assert!(result.realized.contains_key(&hmanual));
  assert!(result.resolution.weak.contains(&hmanual));
  assert!(executor.request_for("tool").dependencies.is_empty());
}

#[tokio::test]
async fn failure_skips_dependents_but_not_siblings() {
  let store = TestStore::new();
  let mut graph = PkgGraph::new();
  let broken = graph.add(PkgSpec::named("broken")).unwrap();
  let fine = graph.add(PkgSpec::named("fine")).unwrap();
  let user = graph.add(PkgSpec::named("user").force_ref(broken)).unwrap();
  let top = graph.add(PkgSpec::named("top").force_ref(user).force_ref(fine)).unwrap();

  let executor = Arc::new(ScriptExecutor::default().failing("broken"));
  let result = realize(&mut graph, &[top], executor.clone(), &store.config).await.unwrap();

  let [hbroken, hfine, huser, htop] = [broken, fine, user, top].map(|id| graph.hash_of(id).unwrap().clone());
  assert!(!result.is_success());
  assert!(result.realized.contains_key(&hfine));
  assert!(matches!(
    result.failed.get(&hbroken),
    Some(ExecuteError::Build { source: BuildFailure::Failed(_), .. })
  ));
  assert_eq!(result.skipped.get(&huser), Some(&hbroken));
  assert_eq!(result.skipped.get(&htop), Some(&hbroken));
  assert!(!executor.built().contains(&"user".to_string()));
  assert!(graph.get(fine).unwrap().path().is_some());
  assert!(graph.get(top).unwrap().path().is_none());
}

#[tokio::test]
async fn cancelled_build_leaves_references_unresolved() {
  let store = TestStore::new();
  let mut graph = PkgGraph::new();
  let lib = graph.add(PkgSpec::named("lib")).unwrap();
  let app = graph.add(PkgSpec::named("app").extra_ref(lib)).unwrap();

  let executor = Arc::new(ScriptExecutor::default().cancelling("app"));
  let result = realize(&mut graph, &[app], executor, &store.config).await.unwrap();

  let happ = graph.hash_of(app).unwrap().clone();
  assert!(matches!(
    result.failed.get(&happ),
    Some(ExecuteError::Build {
      source: BuildFailure::Cancelled,
      ..
    })
  ));
  // a cancelled build is never mistaken for one with no references
  assert!(result.resolution.failed.contains(&happ));
  assert!(!result.resolution.is_complete());
}

#[tokio::test]
async fn serial_realization_matches_parallel() {
  let build = |parallelism: usize| async move {
    let store = TestStore::new();
    let config = store.config.clone().with_parallelism(parallelism);
    let mut graph = PkgGraph::new();
    let leaves: Vec<_> = (0..6)
      .map(|i| graph.add(PkgSpec::named(&format!("leaf{i}"))).unwrap())
      .collect();
    let top = leaves
      .iter()
      .fold(PkgSpec::named("top"), |spec, &leaf| spec.force_ref(leaf));
    let top = graph.add(top).unwrap();

    let executor = Arc::new(ScriptExecutor::default());
    let result = realize(&mut graph, &[top], executor, &config).await.unwrap();
    assert!(result.is_success());
    result.resolution.build_order
  };

  assert_eq!(build(1).await, build(4).await);
}
