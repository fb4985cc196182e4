//! Shared test helpers for cairn-lib integration tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use cairn_lib::build::{BuildExecutor, BuildFailure, BuildOutput, BuildRequest};
use cairn_lib::{PkgHash, RealizeConfig};
use tempfile::TempDir;

/// Executor that writes `<out_dir>/bin/<name>`, a script mentioning the path of
/// every dependency plus the store paths configured in `embed`.
#[derive(Default)]
pub struct ScriptExecutor {
  /// Store paths to write into a package's output, by package name.
  pub embed: Mutex<BTreeMap<String, Vec<PkgHash>>>,
  /// Names of packages whose build fails.
  pub fail: Mutex<Vec<String>>,
  /// Names of packages whose build is cancelled.
  pub cancel: Mutex<Vec<String>>,
  /// Every request received, in order.
  pub requests: Mutex<Vec<BuildRequest>>,
}

impl ScriptExecutor {
  pub fn embedding(self, name: &str, hashes: &[&PkgHash]) -> Self {
    self
      .embed
      .lock()
      .unwrap()
      .insert(name.to_string(), hashes.iter().map(|h| (*h).clone()).collect());
    self
  }

  pub fn failing(self, name: &str) -> Self {
    self.fail.lock().unwrap().push(name.to_string());
    self
  }

  pub fn cancelling(self, name: &str) -> Self {
    self.cancel.lock().unwrap().push(name.to_string());
    self
  }

  /// Names of the packages built, in the order their builds started.
  pub fn built(&self) -> Vec<String> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| r.name.clone().unwrap_or_default())
      .collect()
  }

  pub fn request_for(&self, name: &str) -> BuildRequest {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .find(|r| r.name.as_deref() == Some(name))
      .cloned()
      .unwrap_or_else(|| panic!("no request for {name}"))
  }
}

impl BuildExecutor for ScriptExecutor {
  async fn build(&self, request: BuildRequest) -> Result<BuildOutput, BuildFailure> {
    self.requests.lock().unwrap().push(request.clone());
    let name = request.name.clone().unwrap_or_else(|| "out".to_string());

    if self.fail.lock().unwrap().contains(&name) {
      return Err(BuildFailure::Failed(format!("{name}: exit status 1")));
    }
    if self.cancel.lock().unwrap().contains(&name) {
      return Err(BuildFailure::Cancelled);
    }

    let mut script = String::from("#!/bin/sh\n");
    for (hash, path) in &request.dependencies {
      script.push_str(&format!("# dep {hash} at {}\n", path.display()));
    }
    let embedded = self.embed.lock().unwrap().get(&name).cloned().unwrap_or_default();
    for hash in embedded {
      script.push_str(&format!("exec /store/pkg/{hash}/bin/tool \"$@\"\n"));
    }

    let bin = request.out_dir.join("bin");
    std::fs::create_dir_all(&bin).map_err(|e| BuildFailure::Failed(e.to_string()))?;
    std::fs::write(bin.join(&name), script).map_err(|e| BuildFailure::Failed(e.to_string()))?;

    Ok(BuildOutput::new(request.out_dir))
  }
}

/// Isolated store for one test.
pub struct TestStore {
  pub temp: TempDir,
  pub config: RealizeConfig,
}

impl TestStore {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let config = RealizeConfig::default().with_store_dir(temp.path().join("store"));
    Self { temp, config }
  }
}
