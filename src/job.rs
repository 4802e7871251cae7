use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::classad::{attr, ClassAd, HISTORY_PROJECTION};
use crate::client::SchedulerClient;
use crate::error::ClientError;
use crate::queue::QueueEntry;
use crate::state::{JobState, RemoteState};
use crate::tail::FileTail;

/// A job's index within its cluster, assigned by the scheduler.
pub type ProcId = u32;

/// Exit-code sentinel: no historical record exists for the job.
pub const EXIT_NO_HISTORY: i64 = -2000;

/// Exit-code sentinel: a historical record exists but carries no exit code.
pub const EXIT_CODE_MISSING: i64 = -1000;

/// System-wide unique job identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobId {
  pub cluster_id: u64,
  pub proc_id: ProcId,
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.cluster_id, self.proc_id)
  }
}

/// The tail of a job's stderr stream, captured for failure diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StderrTail {
  pub path: PathBuf,
  pub lines: Vec<String>,
}

/// An explicit fetched-once cell.
///
/// External lookups (history records, stderr tails) are performed at most
/// once per job per reconciliation pass; the result, including a negative
/// one, is kept for the rest of the pass.
#[derive(Debug, Clone)]
enum Fetched<T> {
  Pending,
  Ready(T),
}

impl<T> Fetched<T> {
  fn ready(&self) -> Option<&T> {
    match self {
      Fetched::Ready(value) => Some(value),
      Fetched::Pending => None,
    }
  }

  fn is_pending(&self) -> bool {
    matches!(self, Fetched::Pending)
  }
}

/// One work unit within a tracked cluster.
///
/// A job never re-derives its own state: `prev_state` is only ever written
/// through the tracked item's move operation, and `new_state` only from the
/// queue snapshot at the start of a pass.
#[derive(Debug)]
pub struct Job {
  id: JobId,
  prev_state: Option<JobState>,
  new_state: RemoteState,
  failure_count: u32,
  remote_ad: Option<ClassAd>,
  history: Fetched<Option<ClassAd>>,
  stderr: Fetched<Option<StderrTail>>,
}

impl Job {
  pub fn new(id: JobId, prev_state: Option<JobState>) -> Self {
    Self {
      id,
      prev_state,
      new_state: RemoteState::Unlisted,
      failure_count: 0,
      remote_ad: None,
      history: Fetched::Pending,
      stderr: Fetched::Pending,
    }
  }

  pub fn id(&self) -> JobId {
    self.id
  }

  pub fn proc_id(&self) -> ProcId {
    self.id.proc_id
  }

  /// The state persisted from the previous reconciliation pass, or `None`
  /// for a job that has never been placed in a bucket.
  pub fn prev_state(&self) -> Option<JobState> {
    self.prev_state
  }

  /// The snapshot-derived state for the current pass.
  pub fn new_state(&self) -> RemoteState {
    self.new_state
  }

  pub fn failure_count(&self) -> u32 {
    self.failure_count
  }

  pub fn set_failure_count(&mut self, count: u32) {
    self.failure_count = count;
  }

  /// Bumps the failure counter by one resubmission attempt and returns the
  /// new value. Never reset.
  pub(crate) fn record_failure(&mut self) -> u32 {
    self.failure_count += 1;
    self.failure_count
  }

  pub(crate) fn set_prev_state(&mut self, state: JobState) {
    self.prev_state = Some(state);
  }

  /// Caches the queue entry found for this job in the current snapshot.
  pub fn attach_queue_entry(&mut self, entry: &QueueEntry) {
    self.new_state = entry.state();
    self.remote_ad = Some(entry.ad().clone());
  }

  /// Records that the current snapshot contained no entry for this job.
  pub fn mark_unlisted(&mut self) {
    self.new_state = RemoteState::Unlisted;
    self.remote_ad = None;
  }

  /// The cached queue attributes from the latest snapshot entry, if any.
  pub fn remote_ad(&self) -> Option<&ClassAd> {
    self.remote_ad.as_ref()
  }

  /// The job's exit code, derived from its historical record.
  ///
  /// The history lookup happens at most once per job instance; repeated
  /// calls return the cached answer. Returns [`EXIT_NO_HISTORY`] when the
  /// scheduler has no record for the job, [`EXIT_CODE_MISSING`] when a
  /// record exists without an exit-code attribute, and the recorded code
  /// otherwise (`0` is success).
  pub fn exit_code(&mut self, client: &dyn SchedulerClient) -> Result<i64, ClientError> {
    let code = match self.history_ad(client)? {
      None => EXIT_NO_HISTORY,
      Some(ad) => ad.get_int(attr::EXIT_CODE).unwrap_or(EXIT_CODE_MISSING),
    };
    debug!(job = %self.id, code, "derived exit code");
    Ok(code)
  }

  /// The last lines of the job's stderr file, if a path can be resolved.
  ///
  /// The path comes from the queue attributes first, falling back to the
  /// historical record; a relative path is anchored at the cluster's
  /// submission directory. Memoized like the history lookup.
  pub fn stderr_tail(
    &mut self,
    submission_path: &Path,
    client: &dyn SchedulerClient,
    tailer: &dyn FileTail,
    n_lines: usize,
  ) -> Result<Option<&StderrTail>, ClientError> {
    if self.stderr.is_pending() {
      let resolved = self.resolve_stderr_path(client)?.map(|raw| {
        if raw.is_absolute() {
          raw
        } else {
          submission_path.join(raw)
        }
      });
      let captured = match resolved {
        None => {
          debug!(job = %self.id, "no stderr path resolvable");
          None
        }
        Some(path) => tailer
          .tail(&path, n_lines)?
          .map(|lines| StderrTail { path, lines }),
      };
      self.stderr = Fetched::Ready(captured);
    }
    Ok(self.stderr.ready().and_then(Option::as_ref))
  }

  fn resolve_stderr_path(
    &mut self,
    client: &dyn SchedulerClient,
  ) -> Result<Option<PathBuf>, ClientError> {
    if let Some(path) = self.remote_ad.as_ref().and_then(|ad| ad.get_str(attr::ERR)) {
      return Ok(Some(PathBuf::from(path)));
    }
    let from_history = self
      .history_ad(client)?
      .and_then(|ad| ad.get_str(attr::ERR))
      .map(PathBuf::from);
    Ok(from_history)
  }

  /// Fetches and caches the job's historical record.
  ///
  /// More than one matching record is anomalous: it is logged as a warning
  /// and the first result is used.
  pub fn history_ad(
    &mut self,
    client: &dyn SchedulerClient,
  ) -> Result<Option<&ClassAd>, ClientError> {
    if self.history.is_pending() {
      let mut records = client.history(self.id.cluster_id, self.id.proc_id, HISTORY_PROJECTION)?;
      if records.len() > 1 {
        warn!(
          job = %self.id,
          matches = records.len(),
          "more than one historical record matched, using the first"
        );
      }
      let record = if records.is_empty() {
        debug!(job = %self.id, "no historical record");
        None
      } else {
        Some(records.swap_remove(0))
      };
      self.history = Fetched::Ready(record);
    }
    Ok(self.history.ready().and_then(Option::as_ref))
  }
}
