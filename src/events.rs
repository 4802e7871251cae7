//! Events raised by the reconciliation engine for later aggregation.

use crate::item::{MonitorLevel, StateCounts};
use crate::job::{ProcId, StderrTail};

/// The kinds of noteworthy happenings a reconciliation pass can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventCode {
  JobResubmitted,
  JobPermanentlyFailed,
  ClusterFinished,
  Monitoring,
}

/// Diagnostic context gathered when a job is marked permanently failed.
/// Observability only: no reconciliation decision depends on it.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FailureReport {
  /// Interesting attributes from the historical record, if one exists.
  pub history: Vec<(String, String)>,
  /// Interesting attributes from the latest queue record, if one exists.
  pub queue_ad: Vec<(String, String)>,
  /// Tail of the job's stderr file, if one could be resolved.
  pub stderr: Option<StderrTail>,
}

/// One raised event, attributed to a tracked cluster.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
  pub cluster_id: u64,
  pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
  JobResubmitted {
    proc_id: ProcId,
    old_request_mb: Option<i64>,
    new_request_mb: i64,
    /// The item's running resubmission total after this resubmission.
    resubmission_count: u64,
  },
  JobPermanentlyFailed {
    proc_id: ProcId,
    /// The item's running failure total after this failure.
    failure_count: u64,
    report: FailureReport,
  },
  ClusterFinished {
    n_done: usize,
    n_failed: usize,
    n_all: usize,
  },
  Monitoring {
    monitor_level: MonitorLevel,
    old: StateCounts,
    new: StateCounts,
  },
}

impl Event {
  pub fn code(&self) -> EventCode {
    match self.kind {
      EventKind::JobResubmitted { .. } => EventCode::JobResubmitted,
      EventKind::JobPermanentlyFailed { .. } => EventCode::JobPermanentlyFailed,
      EventKind::ClusterFinished { .. } => EventCode::ClusterFinished,
      EventKind::Monitoring { .. } => EventCode::Monitoring,
    }
  }
}
