use std::fmt;
use std::str::FromStr;

use crate::error::StateError;

/// The closed set of states a tracked job can occupy.
///
/// The first seven mirror the scheduler's numeric `JobStatus` codes; `Done`
/// and `Failed` are local bookkeeping states that only ever result from a
/// reconciliation decision, never from a queue listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobState {
  Idle,
  Running,
  Removed,
  Completed,
  Held,
  Transferring,
  Suspended,
  /// Terminal: the job finished and its exit code was acceptable.
  Done,
  /// Terminal: the job will not be retried again.
  Failed,
}

impl JobState {
  /// Every state, in persisted bucket order.
  pub const ALL: [JobState; 9] = [
    JobState::Idle,
    JobState::Running,
    JobState::Removed,
    JobState::Completed,
    JobState::Held,
    JobState::Transferring,
    JobState::Suspended,
    JobState::Done,
    JobState::Failed,
  ];

  /// Maps the scheduler's numeric `JobStatus` code to a state.
  ///
  /// Codes 1 through 7 are defined by the scheduler; anything else returns
  /// `None` and is treated as unhandled by the reconciliation engine.
  pub fn from_status_code(code: i64) -> Option<JobState> {
    match code {
      1 => Some(JobState::Idle),
      2 => Some(JobState::Running),
      3 => Some(JobState::Removed),
      4 => Some(JobState::Completed),
      5 => Some(JobState::Held),
      6 => Some(JobState::Transferring),
      7 => Some(JobState::Suspended),
      _ => None,
    }
  }

  /// The lowercase bucket name used in the persisted tracked-item format.
  pub fn as_str(&self) -> &'static str {
    match self {
      JobState::Idle => "idle",
      JobState::Running => "running",
      JobState::Removed => "removed",
      JobState::Completed => "completed",
      JobState::Held => "held",
      JobState::Transferring => "transferring",
      JobState::Suspended => "suspended",
      JobState::Done => "done",
      JobState::Failed => "failed",
    }
  }

  /// `Done` and `Failed` are the two states a job never leaves.
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobState::Done | JobState::Failed)
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobState {
  type Err = StateError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "idle" => Ok(JobState::Idle),
      "running" => Ok(JobState::Running),
      "removed" => Ok(JobState::Removed),
      "completed" => Ok(JobState::Completed),
      "held" => Ok(JobState::Held),
      // Older persisted files carry the misspelled bucket name.
      "transferring" | "transfering" => Ok(JobState::Transferring),
      "suspended" => Ok(JobState::Suspended),
      "done" => Ok(JobState::Done),
      "failed" => Ok(JobState::Failed),
      other => Err(StateError::Unrecognized(other.to_string())),
    }
  }
}

/// What one snapshot lookup said about a job. Pass-only: this is never
/// persisted and never used as a previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RemoteState {
  /// The queue listed the job with a recognized status code.
  Listed(JobState),
  /// The snapshot contained no entry for this proc id.
  Unlisted,
  /// The queue listed the job with a status code outside the known set.
  Unrecognized(i64),
}

impl RemoteState {
  /// Classifies a raw `JobStatus` code from a queue record.
  pub fn from_status_code(code: i64) -> RemoteState {
    match JobState::from_status_code(code) {
      Some(state) => RemoteState::Listed(state),
      None => RemoteState::Unrecognized(code),
    }
  }
}

impl fmt::Display for RemoteState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemoteState::Listed(state) => state.fmt(f),
      RemoteState::Unlisted => f.write_str("unlisted"),
      RemoteState::Unrecognized(code) => write!(f, "unrecognized({code})"),
    }
  }
}
