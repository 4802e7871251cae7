//! tests/common.rs
//! Shared helpers and fake collaborators for integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::TestWriter;

use flockwatch::{
  attr, AdValue, ClassAd, ClientError, FileTail, JobAction, JobState, Notifier, ProcId,
  QueueEntry, QueueSnapshot, SchedulerClient, TrackedItem,
};

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// A unique scratch path under the system temp directory.
pub fn temp_path(name: &str) -> PathBuf {
  std::env::temp_dir().join(format!("flockwatch-test-{}-{name}", std::process::id()))
}

// --- Fake scheduler client ---

/// Scripted scheduler: a fixed queue, per-job history records, and call
/// recording for edits, actions and history lookups.
#[derive(Default)]
pub struct FakeSchedd {
  queue: Vec<ClassAd>,
  history: HashMap<(u64, ProcId), Vec<ClassAd>>,
  fail_clusters: HashSet<u64>,
  pub history_calls: RefCell<Vec<(u64, ProcId)>>,
  pub edits: RefCell<Vec<(u64, ProcId, String, AdValue)>>,
  pub acts: RefCell<Vec<(JobAction, u64, ProcId)>>,
}

impl FakeSchedd {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_queue(mut self, ads: Vec<ClassAd>) -> Self {
    self.queue = ads;
    self
  }

  pub fn with_history(mut self, cluster_id: u64, proc_id: ProcId, ads: Vec<ClassAd>) -> Self {
    self.history.insert((cluster_id, proc_id), ads);
    self
  }

  /// Queue queries for this cluster fail with a collaborator error.
  pub fn failing_cluster(mut self, cluster_id: u64) -> Self {
    self.fail_clusters.insert(cluster_id);
    self
  }
}

impl SchedulerClient for FakeSchedd {
  fn query(
    &self,
    _owner: &str,
    cluster_id: u64,
    _projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError> {
    if self.fail_clusters.contains(&cluster_id) {
      return Err(ClientError::msg(format!(
        "scripted query failure for cluster {cluster_id}"
      )));
    }
    Ok(
      self
        .queue
        .iter()
        .filter(|ad| ad.get_int(attr::CLUSTER_ID) == Some(cluster_id as i64))
        .cloned()
        .collect(),
    )
  }

  fn history(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    _projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError> {
    self.history_calls.borrow_mut().push((cluster_id, proc_id));
    Ok(
      self
        .history
        .get(&(cluster_id, proc_id))
        .cloned()
        .unwrap_or_default(),
    )
  }

  fn edit(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    attr: &str,
    value: AdValue,
  ) -> Result<(), ClientError> {
    self
      .edits
      .borrow_mut()
      .push((cluster_id, proc_id, attr.to_string(), value));
    Ok(())
  }

  fn act(&self, action: JobAction, cluster_id: u64, proc_id: ProcId) -> Result<(), ClientError> {
    self.acts.borrow_mut().push((action, cluster_id, proc_id));
    Ok(())
  }
}

// --- Fake tailer and notifier ---

/// Returns the same canned tail for every path asked about.
#[derive(Debug, Clone, Default)]
pub struct StaticTail {
  pub lines: Option<Vec<String>>,
}

impl StaticTail {
  pub fn with_lines(lines: &[&str]) -> Self {
    Self {
      lines: Some(lines.iter().map(|s| s.to_string()).collect()),
    }
  }
}

impl FileTail for StaticTail {
  fn tail(&self, _path: &Path, n: usize) -> Result<Option<Vec<String>>, ClientError> {
    Ok(self.lines.as_ref().map(|lines| {
      let start = lines.len().saturating_sub(n);
      lines[start..].to_vec()
    }))
  }
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
  pub deliveries: RefCell<Vec<String>>,
}

impl Notifier for RecordingMailer {
  fn deliver(&self, text: &str) -> Result<(), ClientError> {
    self.deliveries.borrow_mut().push(text.to_string());
    Ok(())
  }
}

// --- Record builders ---

pub fn queue_ad(cluster_id: u64, proc_id: ProcId, status: i64) -> ClassAd {
  let mut ad = ClassAd::new();
  ad.insert(attr::CLUSTER_ID, cluster_id as i64);
  ad.insert(attr::PROC_ID, proc_id as i64);
  ad.insert(attr::JOB_STATUS, status);
  ad
}

pub fn held_ad(
  cluster_id: u64,
  proc_id: ProcId,
  hold_code: i64,
  request_mb: i64,
  usage_mb: i64,
) -> ClassAd {
  let mut ad = queue_ad(cluster_id, proc_id, 5);
  ad.insert(attr::HOLD_REASON, "Job exceeded its memory allocation");
  ad.insert(attr::HOLD_REASON_CODE, hold_code);
  ad.insert(attr::REQUEST_MEMORY, request_mb);
  ad.insert(attr::MEMORY_USAGE, usage_mb);
  ad
}

pub fn history_record(cluster_id: u64, proc_id: ProcId, exit_code: Option<i64>) -> ClassAd {
  let mut ad = ClassAd::new();
  ad.insert(attr::CLUSTER_ID, cluster_id as i64);
  ad.insert(attr::PROC_ID, proc_id as i64);
  ad.insert("LastRemoteHost", "slot1@worker.example.org");
  if let Some(code) = exit_code {
    ad.insert(attr::EXIT_CODE, code);
  }
  ad
}

// --- Item and snapshot builders ---

/// A tracked item whose jobs sit in the given states.
pub fn item_with_states(cluster_id: u64, states: &[(ProcId, JobState)]) -> TrackedItem {
  let mut item = TrackedItem::new_submission(
    cluster_id,
    "/data/submissions/test",
    states.iter().map(|&(proc_id, _)| proc_id),
  );
  for &(proc_id, state) in states {
    if state != JobState::Idle {
      item.move_job(proc_id, state).expect("test job exists");
    }
  }
  item
}

pub fn snapshot_of(cluster_id: u64, ads: Vec<ClassAd>) -> QueueSnapshot {
  QueueSnapshot::from_entries(
    cluster_id,
    ads.into_iter().filter_map(QueueEntry::from_ad).collect(),
  )
}
