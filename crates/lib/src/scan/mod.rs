//! Reference scanning over realized build output.
//!
//! A build output references another package if that package's hash string
//! appears somewhere in its bytes. All candidate hashes share one width and
//! the lowercase hex alphabet, so the scanner tracks the current run of hex
//! bytes and, once the run is long enough, looks up the trailing full-width
//! window in a hash set. Every candidate is matched in the same pass and every
//! occurrence is seen, overlapping ones included.
//!
//! A coincidental byte sequence equal to a candidate hash is reported like a
//! real reference; the scanner cannot tell them apart.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::{PKG_HASH_LEN, SCAN_BLOCK_SIZE};
use crate::util::hash::{PkgHash, is_hash_byte};

#[derive(Debug, Error)]
pub enum ScanError {
  #[error("failed to read {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk {}: {source}", path.display())]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

/// Which candidates have been seen so far.
#[derive(Debug, Clone)]
struct Hits {
  found: Vec<bool>,
  remaining: usize,
}

impl Hits {
  fn new(candidates: usize) -> Self {
    Self {
      found: vec![false; candidates],
      remaining: candidates,
    }
  }

  fn record(&mut self, index: usize) {
    if !self.found[index] {
      self.found[index] = true;
      self.remaining -= 1;
    }
  }

  fn is_complete(&self) -> bool {
    self.remaining == 0
  }

  fn merge(mut self, other: Hits) -> Hits {
    for (index, hit) in other.found.into_iter().enumerate() {
      if hit {
        self.record(index);
      }
    }
    self
  }
}

/// A compiled set of candidate hashes.
#[derive(Debug, Clone)]
pub struct RefScanner {
  width: usize,
  patterns: HashMap<Box<[u8]>, usize>,
  candidates: Vec<PkgHash>,
  block_size: usize,
}

impl RefScanner {
  /// Compile a scanner. Duplicate candidates are collapsed; results keep the
  /// order of first appearance.
  pub fn new<'a, I>(candidates: I) -> Self
  where
    I: IntoIterator<Item = &'a PkgHash>,
  {
    let mut seen = HashSet::new();
    let candidates: Vec<PkgHash> = candidates.into_iter().filter(|h| seen.insert(*h)).cloned().collect();
    let patterns = candidates
      .iter()
      .enumerate()
      .map(|(index, hash)| (Box::from(hash.as_bytes()), index))
      .collect();

    Self {
      width: PKG_HASH_LEN,
      patterns,
      candidates,
      block_size: SCAN_BLOCK_SIZE,
    }
  }

  /// Read size for streaming scans. Never smaller than the pattern width.
  pub fn with_block_size(mut self, block_size: usize) -> Self {
    self.block_size = block_size.max(self.width);
    self
  }

  pub fn candidates(&self) -> &[PkgHash] {
    &self.candidates
  }

  pub fn is_empty(&self) -> bool {
    self.candidates.is_empty()
  }

  fn scan_into(&self, buf: &[u8], hits: &mut Hits) {
    if hits.is_complete() {
      return;
    }

    let mut run = 0usize;
    for (i, &b) in buf.iter().enumerate() {
      if !is_hash_byte(b) {
        run = 0;
        continue;
      }
      run += 1;
      if run < self.width {
        continue;
      }

      let window = &buf[i + 1 - self.width..=i];
      if let Some(&index) = self.patterns.get(window) {
        hits.record(index);
        if hits.is_complete() {
          return;
        }
      }
    }
  }

  /// Stream `reader` through the scanner, keeping `width - 1` bytes of the
  /// previous block so matches across block edges are not lost.
  fn scan_reader_into<R: Read>(&self, mut reader: R, hits: &mut Hits) -> io::Result<()> {
    let keep = self.width - 1;
    let mut block = vec![0u8; self.block_size];
    let mut buf = Vec::with_capacity(self.block_size + keep);

    while !hits.is_complete() {
      let n = match reader.read(&mut block) {
        Ok(0) => break,
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      };

      buf.extend_from_slice(&block[..n]);
      self.scan_into(&buf, hits);

      if buf.len() > keep {
        buf.drain(..buf.len() - keep);
      }
    }

    Ok(())
  }

  fn found(&self, hits: Hits) -> Vec<PkgHash> {
    self
      .candidates
      .iter()
      .zip(hits.found)
      .filter_map(|(hash, hit)| hit.then(|| hash.clone()))
      .collect()
  }

  /// Candidates that occur in `content`.
  pub fn scan_bytes(&self, content: &[u8]) -> Vec<PkgHash> {
    let mut hits = Hits::new(self.candidates.len());
    self.scan_into(content, &mut hits);
    self.found(hits)
  }

  /// Candidates that occur in the bytes produced by `reader`.
  ///
  /// Memory use is bounded by the block size regardless of input length.
  pub fn scan_reader<R: Read>(&self, reader: R) -> io::Result<Vec<PkgHash>> {
    let mut hits = Hits::new(self.candidates.len());
    self.scan_reader_into(reader, &mut hits)?;
    Ok(self.found(hits))
  }

  /// Scan one large buffer in parallel chunks.
  ///
  /// Each chunk is extended by `width - 1` bytes into its successor, so a
  /// match straddling a chunk edge is still seen by exactly one chunk.
  pub fn scan_chunked(&self, content: &[u8], chunk_size: usize) -> Vec<PkgHash> {
    let n = self.candidates.len();
    if n == 0 {
      return Vec::new();
    }

    let chunk_size = chunk_size.max(self.width);
    let overlap = self.width - 1;
    let starts: Vec<usize> = (0..content.len()).step_by(chunk_size).collect();

    let hits = starts
      .par_iter()
      .map(|&start| {
        let end = (start + chunk_size + overlap).min(content.len());
        let mut hits = Hits::new(n);
        self.scan_into(&content[start..end], &mut hits);
        hits
      })
      .reduce(|| Hits::new(n), Hits::merge);

    self.found(hits)
  }

  /// Scan a realized output on disk.
  ///
  /// A file is streamed; a directory is walked and each regular file scanned
  /// independently. Symlink targets are scanned as bytes and never followed.
  pub fn scan_path(&self, root: &Path) -> Result<Vec<PkgHash>, ScanError> {
    let mut hits = Hits::new(self.candidates.len());
    if hits.is_complete() {
      return Ok(Vec::new());
    }

    let mut files = 0usize;
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
      let entry = entry.map_err(|source| ScanError::Walk {
        path: root.to_path_buf(),
        source,
      })?;
      let path = entry.path();
      let file_type = entry.file_type();

      if file_type.is_file() {
        let io_err = |source| ScanError::Io {
          path: path.to_path_buf(),
          source,
        };
        let file = File::open(path).map_err(io_err)?;
        self.scan_reader_into(file, &mut hits).map_err(io_err)?;
        files += 1;
      } else if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|source| ScanError::Io {
          path: path.to_path_buf(),
          source,
        })?;
        self.scan_into(target.as_os_str().as_encoded_bytes(), &mut hits);
      }

      if hits.is_complete() {
        break;
      }
    }

    let found = self.found(hits);
    debug!(
      path = %root.display(),
      files,
      candidates = self.candidates.len(),
      found = found.len(),
      "scanned output"
    );
    Ok(found)
  }
}

/// Candidates whose string occurs anywhere in `content`.
pub fn scan(content: &[u8], candidates: &[PkgHash]) -> Vec<PkgHash> {
  RefScanner::new(candidates).scan_bytes(content)
}
