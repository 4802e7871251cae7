//! Persistence of the tracked-item set.
//!
//! The on-disk format is section-oriented: one `[cluster_id]` section per
//! tracked cluster, `key = value` lines, comma-separated proc-id lists per
//! state bucket. A malformed section skips that one item with a warning;
//! the rest of the file still loads. Saving always rewrites the whole file
//! in one batch, via a temp file and an atomic rename, so a crash mid-pass
//! leaves the last-known-good state behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{RecordError, StoreError};
use crate::item::TrackedItem;

/// One cluster's section of the persisted file: ordered key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionRecord {
  name: String,
  pairs: Vec<(String, String)>,
}

impl SectionRecord {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      pairs: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .pairs
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  /// Sets a key, replacing any existing value.
  pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
    let key = key.into();
    let value = value.into();
    match self.pairs.iter_mut().find(|(k, _)| *k == key) {
      Some(pair) => pair.1 = value,
      None => self.pairs.push((key, value)),
    }
  }

  pub fn pairs(&self) -> &[(String, String)] {
    &self.pairs
  }

  fn render(&self, out: &mut String) {
    out.push('[');
    out.push_str(&self.name);
    out.push_str("]\n");
    for (key, value) in &self.pairs {
      out.push_str(key);
      out.push_str(" = ");
      out.push_str(value);
      out.push('\n');
    }
  }
}

/// Parses the whole persisted file into section records.
pub fn parse_sections(text: &str) -> Result<Vec<SectionRecord>, StoreError> {
  let mut sections: Vec<SectionRecord> = Vec::new();
  for (idx, raw_line) in text.lines().enumerate() {
    let line = raw_line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
      continue;
    }
    if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
      sections.push(SectionRecord::new(name.trim()));
      continue;
    }
    let Some((key, value)) = line.split_once('=') else {
      return Err(StoreError::Syntax {
        line: idx + 1,
        detail: format!("expected `key = value`, got `{line}`"),
      });
    };
    let Some(section) = sections.last_mut() else {
      return Err(StoreError::Syntax {
        line: idx + 1,
        detail: "key/value line before any section header".to_string(),
      });
    };
    section
      .pairs
      .push((key.trim().to_string(), value.trim().to_string()));
  }
  Ok(sections)
}

/// Renders section records back to the persisted text form.
pub fn render_sections(sections: &[SectionRecord]) -> String {
  let mut out = String::new();
  for (idx, section) in sections.iter().enumerate() {
    if idx > 0 {
      out.push('\n');
    }
    section.render(&mut out);
  }
  out
}

/// The result of loading the persisted set: the items that rehydrated, plus
/// the section names that did not (with why).
#[derive(Debug, Default)]
pub struct LoadedItems {
  pub items: Vec<TrackedItem>,
  pub rejected: Vec<(String, RecordError)>,
}

/// Boundary contract for persisting the tracked-item set.
///
/// `save` has batch-commit semantics: it replaces the whole persisted set at
/// once, and implementations must not leave a partially-written set behind
/// on failure.
pub trait TrackedItemStore {
  fn load(&self) -> Result<LoadedItems, StoreError>;
  fn save(&mut self, items: &[TrackedItem]) -> Result<(), StoreError>;
}

fn rehydrate(sections: Vec<SectionRecord>) -> LoadedItems {
  let mut loaded = LoadedItems::default();
  for section in sections {
    match TrackedItem::from_record(&section) {
      Ok(item) => loaded.items.push(item),
      Err(e) => {
        warn!(section = section.name(), error = %e, "skipping malformed tracked item");
        loaded.rejected.push((section.name().to_string(), e));
      }
    }
  }
  loaded
}

/// File-backed store.
#[derive(Debug, Clone)]
pub struct FileStore {
  path: PathBuf,
}

impl FileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_err(&self, source: io::Error) -> StoreError {
    StoreError::Io {
      path: self.path.clone(),
      source,
    }
  }
}

impl TrackedItemStore for FileStore {
  fn load(&self) -> Result<LoadedItems, StoreError> {
    let text = match fs::read_to_string(&self.path) {
      Ok(text) => text,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %self.path.display(), "no tracked-item file yet, starting empty");
        return Ok(LoadedItems::default());
      }
      Err(e) => return Err(self.io_err(e)),
    };
    let loaded = rehydrate(parse_sections(&text)?);
    debug!(
      path = %self.path.display(),
      items = loaded.items.len(),
      rejected = loaded.rejected.len(),
      "loaded tracked items"
    );
    Ok(loaded)
  }

  fn save(&mut self, items: &[TrackedItem]) -> Result<(), StoreError> {
    let sections: Vec<SectionRecord> = items.iter().map(TrackedItem::to_record).collect();
    let text = render_sections(&sections);
    let mut tmp = self.path.clone();
    tmp.set_extension("tmp");
    fs::write(&tmp, text).map_err(|e| self.io_err(e))?;
    fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
    info!(path = %self.path.display(), items = items.len(), "rewrote tracked-item file");
    Ok(())
  }
}

/// In-memory store holding persisted *records*, not live items.
///
/// Round-tripping through the record form on every load mirrors the file
/// store's behavior: transient per-pass caches on jobs never survive into
/// the next pass.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  sections: Vec<SectionRecord>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_items(items: &[TrackedItem]) -> Self {
    Self {
      sections: items.iter().map(TrackedItem::to_record).collect(),
    }
  }

  pub fn sections(&self) -> &[SectionRecord] {
    &self.sections
  }
}

impl TrackedItemStore for MemoryStore {
  fn load(&self) -> Result<LoadedItems, StoreError> {
    Ok(rehydrate(self.sections.clone()))
  }

  fn save(&mut self, items: &[TrackedItem]) -> Result<(), StoreError> {
    self.sections = items.iter().map(TrackedItem::to_record).collect();
    Ok(())
  }
}
