//! Fixed-output verification.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::util::hash::{ContentHash, DirHashError, hash_path};

#[derive(Debug, Error)]
pub enum VerifyError {
  #[error("output {} has hash {actual}, expected {expected}", path.display())]
  Mismatch {
    path: PathBuf,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

/// Check a realized output against its declared out-hash.
pub fn verify_output(expected: &ContentHash, path: &Path) -> Result<(), VerifyError> {
  let actual = hash_path(path)?;
  if actual != *expected {
    return Err(VerifyError::Mismatch {
      path: path.to_path_buf(),
      expected: expected.clone(),
      actual,
    });
  }

  debug!(path = %path.display(), hash = %actual, "output matches out-hash");
  Ok(())
}
