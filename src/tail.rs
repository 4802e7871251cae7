//! The consumed file-tailing boundary, used to pull the last lines of a
//! job's stderr file into failure diagnostics.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::ClientError;

/// Boundary contract for reading the tail of a file.
pub trait FileTail {
  /// Returns the last `n` lines of `path`, or `None` if the file does not
  /// exist.
  fn tail(&self, path: &Path, n: usize) -> Result<Option<Vec<String>>, ClientError>;
}

impl<T: FileTail + ?Sized> FileTail for &T {
  fn tail(&self, path: &Path, n: usize) -> Result<Option<Vec<String>>, ClientError> {
    (**self).tail(path, n)
  }
}

/// Default implementation reading straight from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTail;

impl FileTail for FsTail {
  fn tail(&self, path: &Path, n: usize) -> Result<Option<Vec<String>>, ClientError> {
    if !path.exists() {
      debug!(path = %path.display(), "no file to tail");
      return Ok(None);
    }
    let contents = fs::read_to_string(path)
      .map_err(|e| ClientError::with_source(format!("failed to read {}", path.display()), e))?;
    let lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let start = lines.len().saturating_sub(n);
    Ok(Some(lines[start..].to_vec()))
  }
}
