use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::hash::{ContentHash, PkgHash};

use super::validate::{PkgName, ValidationError};

/// Index of a package inside a [`PkgGraph`](super::PkgGraph).
///
/// Ids are assigned at construction time, before a package has a content
/// address. Once hashed, a package is also reachable by its [`PkgHash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PkgId(pub(crate) usize);

impl PkgId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl std::fmt::Display for PkgId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// The three kinds of reference a package can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
  /// Always in the closure and always a build-order edge.
  Force,
  /// A build-order edge only if scanning finds it in the output.
  Extra,
  /// In the closure, never a build-order edge.
  Weak,
}

impl RefKind {
  pub const ALL: [RefKind; 3] = [RefKind::Force, RefKind::Extra, RefKind::Weak];

  /// The field name used in errors and the persisted form.
  pub fn field(self) -> &'static str {
    match self {
      RefKind::Force => "force-refs",
      RefKind::Extra => "extra-refs",
      RefKind::Weak => "weak-refs",
    }
  }
}

impl std::fmt::Display for RefKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.field())
  }
}

/// One step of a builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildAction {
  FetchUrl {
    url: String,
    sha256: String,
  },
  Cmd {
    cmd: String,
    env: Option<BTreeMap<String, String>>,
    cwd: Option<String>,
  },
}

pub struct BuildCmdOptions {
  pub cmd: String,
  pub env: Option<BTreeMap<String, String>>,
  pub cwd: Option<String>,
}

impl BuildCmdOptions {
  pub fn new(cmd: &str) -> Self {
    Self {
      cmd: cmd.to_string(),
      env: None,
      cwd: None,
    }
  }

  pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env = Some(env);
    self
  }

  pub fn with_cwd(mut self, cwd: &str) -> Self {
    self.cwd = Some(cwd.to_string());
    self
  }
}

impl From<&str> for BuildCmdOptions {
  fn from(cmd: &str) -> Self {
    BuildCmdOptions::new(cmd)
  }
}

/// How a package's output is produced.
///
/// The core never runs a builder; it only hashes its serialized content and
/// hands it to the [`BuildExecutor`](crate::build::BuildExecutor). Action order
/// is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Builder {
  pub actions: Vec<BuildAction>,
}

impl Builder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fetch_url(mut self, url: &str, sha256: &str) -> Self {
    self.actions.push(BuildAction::FetchUrl {
      url: url.to_string(),
      sha256: sha256.to_string(),
    });
    self
  }

  pub fn cmd(mut self, opts: impl Into<BuildCmdOptions>) -> Self {
    let opts = opts.into();
    self.actions.push(BuildAction::Cmd {
      cmd: opts.cmd,
      env: opts.env,
      cwd: opts.cwd,
    });
    self
  }
}

/// Construction input for a package.
///
/// Carries everything a caller may supply. `hash` and `path` are derived
/// later and cannot be set here.
#[derive(Debug, Clone, Default)]
pub struct PkgSpec {
  pub builder: Option<Builder>,
  pub name: Option<String>,
  pub out_hash: Option<String>,
  pub force_refs: Vec<PkgId>,
  pub extra_refs: Vec<PkgId>,
  pub weak_refs: Vec<PkgId>,
}

impl PkgSpec {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn named(name: &str) -> Self {
    Self::new().name(name)
  }

  pub fn name(mut self, name: &str) -> Self {
    self.name = Some(name.to_string());
    self
  }

  pub fn builder(mut self, builder: Builder) -> Self {
    self.builder = Some(builder);
    self
  }

  pub fn out_hash(mut self, out_hash: &str) -> Self {
    self.out_hash = Some(out_hash.to_string());
    self
  }

  pub fn force_ref(mut self, id: PkgId) -> Self {
    self.force_refs.push(id);
    self
  }

  pub fn extra_ref(mut self, id: PkgId) -> Self {
    self.extra_refs.push(id);
    self
  }

  pub fn weak_ref(mut self, id: PkgId) -> Self {
    self.weak_refs.push(id);
    self
  }
}

/// A validated package descriptor.
///
/// Fields are private: a `Pkg` only comes out of the validator, and the
/// derived fields are only written by [`PkgGraph`](super::PkgGraph).
#[derive(Debug, Clone, PartialEq)]
pub struct Pkg {
  pub(crate) builder: Option<Builder>,
  pub(crate) name: Option<PkgName>,
  pub(crate) out_hash: Option<ContentHash>,
  pub(crate) hash: Option<PkgHash>,
  pub(crate) path: Option<PathBuf>,
  pub(crate) force_refs: Vec<PkgId>,
  pub(crate) extra_refs: Vec<PkgId>,
  pub(crate) weak_refs: Vec<PkgId>,
}

impl Pkg {
  pub fn builder(&self) -> Option<&Builder> {
    self.builder.as_ref()
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_ref().map(PkgName::as_str)
  }

  pub fn out_hash(&self) -> Option<&ContentHash> {
    self.out_hash.as_ref()
  }

  pub fn hash(&self) -> Option<&PkgHash> {
    self.hash.as_ref()
  }

  pub fn path(&self) -> Option<&std::path::Path> {
    self.path.as_deref()
  }

  pub fn refs(&self, kind: RefKind) -> &[PkgId] {
    match kind {
      RefKind::Force => &self.force_refs,
      RefKind::Extra => &self.extra_refs,
      RefKind::Weak => &self.weak_refs,
    }
  }

  pub fn force_refs(&self) -> &[PkgId] {
    &self.force_refs
  }

  pub fn extra_refs(&self) -> &[PkgId] {
    &self.extra_refs
  }

  pub fn weak_refs(&self) -> &[PkgId] {
    &self.weak_refs
  }

  /// Display label for logs: the name if there is one, else the hash.
  pub fn label(&self) -> String {
    match (&self.name, &self.hash) {
      (Some(name), _) => name.as_str().to_string(),
      (None, Some(hash)) => hash.to_string(),
      (None, None) => "<unnamed>".to_string(),
    }
  }

  /// Validate the caller-supplied fields of a spec. Reference ids are
  /// checked against the graph by the caller.
  pub(crate) fn from_spec(spec: PkgSpec) -> Result<Self, ValidationError> {
    let name = spec.name.as_deref().map(PkgName::parse).transpose()?;
    let out_hash = spec
      .out_hash
      .as_deref()
      .map(super::validate::parse_out_hash)
      .transpose()?;

    Ok(Self {
      builder: spec.builder,
      name,
      out_hash,
      hash: None,
      path: None,
      force_refs: spec.force_refs,
      extra_refs: spec.extra_refs,
      weak_refs: spec.weak_refs,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_preserves_action_order_and_options() {
    let mut env = BTreeMap::new();
    env.insert("CC".to_string(), "clang".to_string());

    let builder = Builder::new()
      .fetch_url("https://example.com/src.tar.gz", "abc123")
      .cmd(BuildCmdOptions::new("make").with_env(env.clone()).with_cwd("/build"));

    assert_eq!(builder.actions.len(), 2);
    assert!(matches!(builder.actions[0], BuildAction::FetchUrl { .. }));
    match &builder.actions[1] {
      BuildAction::Cmd { cmd, env: e, cwd } => {
        assert_eq!(cmd, "make");
        assert_eq!(e, &Some(env));
        assert_eq!(cwd.as_deref(), Some("/build"));
      }
      _ => panic!("Expected Cmd action"),
    }
  }

  #[test]
  fn ref_kind_field_names() {
    assert_eq!(RefKind::Force.field(), "force-refs");
    assert_eq!(RefKind::Extra.to_string(), "extra-refs");
    assert_eq!(RefKind::Weak.field(), "weak-refs");
  }

  #[test]
  fn from_spec_leaves_derived_fields_unset() {
    let pkg = Pkg::from_spec(PkgSpec::named("hello")).unwrap();
    assert_eq!(pkg.name(), Some("hello"));
    assert!(pkg.hash().is_none());
    assert!(pkg.path().is_none());
  }

  #[test]
  fn label_prefers_name_then_hash() {
    assert_eq!(Pkg::from_spec(PkgSpec::named("hello")).unwrap().label(), "hello");

    let mut anonymous = Pkg::from_spec(PkgSpec::new()).unwrap();
    assert_eq!(anonymous.label(), "<unnamed>");
    anonymous.hash = Some(crate::util::testutil::fake_hash(5));
    assert_eq!(anonymous.label(), crate::util::testutil::fake_hash(5).to_string());
  }
}
