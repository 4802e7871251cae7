use std::path::PathBuf;

use thiserror::Error;

use crate::job::ProcId;

/// Errors signalling a violated state-machine contract.
///
/// These are programming or data-contract violations, never expected from a
/// healthy scheduler: they abort the reconciliation pass for the one tracked
/// item that raised them, not the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
  /// A state name (persisted bucket name) that is not part of the closed
  /// state set.
  #[error("unrecognized job state `{0}`")]
  Unrecognized(String),
  /// A move was requested for a proc id the tracked item does not know.
  #[error("job {cluster_id}.{proc_id} is not tracked by this item")]
  UnknownJob { cluster_id: u64, proc_id: ProcId },
}

/// Errors raised while rehydrating one tracked item from its persisted
/// section record. Fatal to loading that one item only; the store skips the
/// section and continues with the others.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
  #[error("section [{section}] is missing required key `{key}`")]
  MissingField { section: String, key: String },
  #[error("section [{section}]: {detail}")]
  Malformed { section: String, detail: String },
  #[error(transparent)]
  State(#[from] StateError),
}

/// Errors from reading or rewriting the persisted tracked-item file as a
/// whole.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O failure on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("syntax error at line {line}: {detail}")]
  Syntax { line: usize, detail: String },
}

/// A failure reported by an external collaborator (scheduler client, file
/// tailer, notification transport).
///
/// The core never retries these: it lets them propagate so the per-item
/// caller can skip the item and pick it up again next pass with its
/// persisted state unchanged.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ClientError {
  message: String,
  #[source]
  source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ClientError {
  /// A collaborator failure described by a plain message.
  pub fn msg(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      source: None,
    }
  }

  /// A collaborator failure wrapping an underlying error.
  pub fn with_source(
    message: impl Into<String>,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self {
      message: message.into(),
      source: Some(Box::new(source)),
    }
  }
}

/// Errors that can end the reconciliation pass for a single tracked item.
#[derive(Error, Debug)]
pub enum ReconcileError {
  #[error(transparent)]
  State(#[from] StateError),
  #[error(transparent)]
  Client(#[from] ClientError),
}

/// Errors that can end a whole monitor pass.
///
/// Per-item failures (snapshot fetch, reconciliation) are not represented
/// here: the monitor logs them, keeps the item's previous state and moves on.
#[derive(Error, Debug)]
pub enum MonitorError {
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Record(#[from] RecordError),
  #[error("notification delivery failed: {0}")]
  Delivery(#[source] ClientError),
}
