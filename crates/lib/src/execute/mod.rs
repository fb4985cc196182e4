//! Package realization.
//!
//! Drives a [`BuildExecutor`] over the closure of a set of roots. It handles:
//! - dependency ordering over the current strong edges
//! - parallel execution of independent packages
//! - out-hash verification and reference scanning of every output
//! - failure propagation and skip tracking
//!
//! The closure grows as outputs are scanned: a confirmed extra reference may
//! bring in packages that were not known to be needed when realization
//! started. The driver recomputes the resolution after every finished build
//! and keeps going until nothing more can be started.

pub mod types;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::build::store::pkg_dir_path;
use crate::build::{BuildExecutor, BuildRequest, verify_output};
use crate::pkg::{PkgGraph, PkgId};
use crate::resolve::{BuildDag, ResolveError, Resolver};
use crate::scan::RefScanner;
use crate::util::hash::PkgHash;

pub use types::{ExecuteError, RealizeConfig, RealizeResult};

/// One package to realize, detached from the graph so it can move into a task.
struct Job {
  request: BuildRequest,
  /// Output recorded in the graph by an earlier realization. Reused instead
  /// of building again.
  existing: Option<PathBuf>,
  candidates: Vec<PkgHash>,
  scan_block_size: usize,
}

struct Realized {
  path: PathBuf,
  found: Vec<PkgHash>,
}

/// Realize everything `roots` need.
///
/// Unhashed packages reachable from the roots are hashed first. Packages that
/// already have a path in the graph are not rebuilt but are still verified
/// and scanned. On return the graph holds the path of every realized package.
///
/// Failures of individual packages are collected in the result; an `Err` is
/// only returned when the closure cannot be resolved at all.
pub async fn realize<E: BuildExecutor>(
  graph: &mut PkgGraph,
  roots: &[PkgId],
  executor: Arc<E>,
  config: &RealizeConfig,
) -> Result<RealizeResult, ExecuteError> {
  for &root in roots {
    graph.hash_closure(root)?;
  }
  let mut resolver = Resolver::new(graph, roots)?;

  info!(roots = roots.len(), parallelism = config.parallelism, "starting realization");

  let mut result = RealizeResult::default();
  let mut in_flight: HashSet<PkgHash> = HashSet::new();
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let mut join_set = JoinSet::new();

  loop {
    let resolution = resolver.resolution();
    let dag = BuildDag::from_resolution(&resolution)?;

    for hash in &resolution.build_order {
      if in_flight.contains(hash)
        || result.realized.contains_key(hash)
        || result.failed.contains_key(hash)
        || result.skipped.contains_key(hash)
      {
        continue;
      }

      let deps = dag.dependencies(hash);
      let broken = deps.iter().find_map(|dep| {
        if result.failed.contains_key(dep) {
          Some(dep.clone())
        } else {
          result.skipped.get(dep).cloned()
        }
      });
      if let Some(failed_dep) = broken {
        warn!(pkg = %hash, failed_dep = %failed_dep, "skipping package due to failed dependency");
        resolver.mark_failed(hash, format!("dependency {failed_dep} failed"))?;
        result.skipped.insert(hash.clone(), failed_dep);
        continue;
      }

      if !deps.iter().all(|dep| result.realized.contains_key(dep)) {
        continue;
      }

      let job = prepare_job(graph, &resolver, &result, hash, &deps, config)?;

      let executor = executor.clone();
      let semaphore = semaphore.clone();
      let task_hash = hash.clone();
      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire().await else {
          return (task_hash.clone(), Err(ExecuteError::TaskPanicked("build slots closed".to_string())));
        };
        let outcome = match tokio::spawn(realize_one(executor, job)).await {
          Ok(outcome) => outcome,
          Err(e) => Err(ExecuteError::TaskPanicked(e.to_string())),
        };
        (task_hash, outcome)
      });
      in_flight.insert(hash.clone());
    }

    let Some(joined) = join_set.join_next().await else {
      break;
    };
    let (hash, outcome) = match joined {
      Ok(done) => done,
      Err(e) => {
        error!(error = %e, "realization task panicked");
        return Err(ExecuteError::TaskPanicked(e.to_string()));
      }
    };
    in_flight.remove(&hash);

    match outcome {
      Ok(done) => match resolver.confirm(&hash, &done.found) {
        Ok(confirmed) => {
          info!(
            pkg = %hash,
            path = %done.path.display(),
            refs = confirmed.len(),
            "package realized"
          );
          result.realized.insert(hash, done.path);
        }
        Err(e) => {
          error!(pkg = %hash, error = %e, "could not confirm references");
          resolver.mark_failed(&hash, e.to_string())?;
          result.failed.insert(hash, e.into());
        }
      },
      Err(e) => {
        error!(pkg = %hash, error = %e, "package failed");
        resolver.mark_failed(&hash, e.to_string())?;
        result.failed.insert(hash, e);
      }
    }
  }

  for (hash, path) in &result.realized {
    graph.set_path(hash, path)?;
  }
  result.resolution = resolver.resolution();

  info!(
    realized = result.realized.len(),
    failed = result.failed.len(),
    skipped = result.skipped.len(),
    pending = result.resolution.pending.len(),
    "realization complete"
  );

  Ok(result)
}

fn prepare_job(
  graph: &PkgGraph,
  resolver: &Resolver,
  result: &RealizeResult,
  hash: &PkgHash,
  deps: &[PkgHash],
  config: &RealizeConfig,
) -> Result<Job, ExecuteError> {
  let pkg = graph
    .get_by_hash(hash)
    .ok_or_else(|| ResolveError::UnknownPackage(hash.clone()))?;

  let dependencies: BTreeMap<PkgHash, PathBuf> = deps
    .iter()
    .filter_map(|dep| result.realized.get(dep).map(|path| (dep.clone(), path.clone())))
    .collect();

  debug!(
    pkg = %hash,
    label = %pkg.label(),
    deps = dependencies.len(),
    reuse = pkg.path().is_some(),
    "package ready"
  );

  Ok(Job {
    request: BuildRequest {
      hash: hash.clone(),
      name: pkg.name().map(str::to_string),
      builder: pkg.builder().cloned(),
      out_hash: pkg.out_hash().cloned(),
      out_dir: pkg_dir_path(&config.store_dir, hash, pkg.name()),
      dependencies,
    },
    existing: pkg.path().map(|p| p.to_path_buf()),
    candidates: resolver.candidates(hash)?.to_vec(),
    scan_block_size: config.scan_block_size,
  })
}

/// Build (or reuse), verify and scan one package.
async fn realize_one<E: BuildExecutor>(executor: Arc<E>, job: Job) -> Result<Realized, ExecuteError> {
  let Job {
    request,
    existing,
    candidates,
    scan_block_size,
  } = job;
  let hash = request.hash.clone();
  let out_hash = request.out_hash.clone();

  let path = match existing {
    Some(path) => {
      debug!(pkg = %hash, path = %path.display(), "reusing realized output");
      path
    }
    None => {
      info!(pkg = %hash, name = ?request.name, "building package");
      executor
        .build(request)
        .await
        .map_err(|source| ExecuteError::Build {
          hash: hash.clone(),
          source,
        })?
        .path
    }
  };

  tokio::task::spawn_blocking(move || -> Result<Realized, ExecuteError> {
    if let Some(expected) = &out_hash {
      verify_output(expected, &path).map_err(|source| ExecuteError::Verify {
        hash: hash.clone(),
        source,
      })?;
    }

    let scanner = RefScanner::new(&candidates).with_block_size(scan_block_size);
    let found = if scanner.is_empty() {
      Vec::new()
    } else {
      scanner
        .scan_path(&path)
        .map_err(|source| ExecuteError::Scan { hash, source })?
    };

    Ok(Realized { path, found })
  })
  .await
  .map_err(|e| ExecuteError::TaskPanicked(e.to_string()))?
}
