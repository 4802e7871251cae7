//! The reconciliation engine: diffs a tracked item against a fresh queue
//! snapshot and applies the per-job decision procedure.

use std::cmp;

use tracing::{debug, info, warn};

use crate::classad::attr;
use crate::client::{JobAction, SchedulerClient};
use crate::error::ReconcileError;
use crate::events::{Event, EventKind, FailureReport};
use crate::item::{Completion, StateCounts, StateIndex, TrackedItem};
use crate::job::{ProcId, EXIT_NO_HISTORY};
use crate::queue::QueueSnapshot;
use crate::state::{JobState, RemoteState};
use crate::tail::FileTail;

/// The scheduler's hold-reason code for a job that exceeded its memory
/// allocation.
pub const MEMORY_EXCEEDED_HOLD_CODE: i64 = 34;

/// Default floor for an escalated memory request, in MB.
pub const DEFAULT_MEMORY_FLOOR_MB: i64 = 4096;

/// Knobs steering one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
  /// Hold-reason code that qualifies a held job for resubmission with more
  /// memory.
  pub memory_hold_reason_code: i64,
  /// Minimum memory request (MB) for a resubmitted job.
  pub memory_floor_mb: i64,
  /// Maximum resubmission attempts per job before it is failed for good.
  /// `None` never caps.
  pub resubmission_cap: Option<u32>,
  /// Number of stderr lines pulled into a failure report.
  pub tail_lines: usize,
  /// Attribute allowlist for failure reports.
  pub interesting_keys: Vec<String>,
}

impl Default for ReconcilePolicy {
  fn default() -> Self {
    Self {
      memory_hold_reason_code: MEMORY_EXCEEDED_HOLD_CODE,
      memory_floor_mb: DEFAULT_MEMORY_FLOOR_MB,
      resubmission_cap: Some(5),
      tail_lines: 10,
      interesting_keys: Vec::new(),
    }
  }
}

/// Everything one pass produced: the updated item, the before-view of its
/// bucket index, the raised events and the completion verdict.
#[derive(Debug)]
pub struct ReconcileOutcome {
  pub item: TrackedItem,
  /// The bucket index as it stood before the pass. Index structures only;
  /// the jobs themselves were shared with (and mutated through) `item`.
  pub old_index: StateIndex,
  pub events: Vec<Event>,
  pub completion: Completion,
}

impl ReconcileOutcome {
  pub fn old_counts(&self) -> StateCounts {
    self.old_index.counts()
  }
}

/// One reconciliation pass over one tracked item.
///
/// The engine owns the item for the duration of the pass. The per-state
/// index is cloned up front as the before-view; the jobs themselves are
/// never duplicated, so metadata and history fetched during the pass is
/// fetched at most once.
pub struct Reconciler<'a> {
  item: TrackedItem,
  snapshot: &'a QueueSnapshot,
  client: &'a dyn SchedulerClient,
  tailer: &'a dyn FileTail,
  policy: &'a ReconcilePolicy,
  events: Vec<Event>,
}

impl<'a> Reconciler<'a> {
  pub fn new(
    item: TrackedItem,
    snapshot: &'a QueueSnapshot,
    client: &'a dyn SchedulerClient,
    tailer: &'a dyn FileTail,
    policy: &'a ReconcilePolicy,
  ) -> Reconciler<'a> {
    Reconciler {
      item,
      snapshot,
      client,
      tailer,
      policy,
      events: Vec::new(),
    }
  }

  /// Runs the decision procedure over every job, in original job order.
  ///
  /// Any collaborator failure or state-contract violation aborts the pass
  /// for this item; the caller keeps the item's previous state.
  pub fn run(mut self) -> Result<ReconcileOutcome, ReconcileError> {
    let cluster_id = self.item.cluster_id();
    // The before-view: a copy of the index structures only. Jobs stay in
    // the item's arena so per-pass fetch caches are never lost or repeated.
    let old_index = self.item.index().clone();
    let old_counts = old_index.counts();
    debug!(cluster_id, jobs = self.item.jobs().len(), "starting reconciliation pass");

    let procs: Vec<ProcId> = self.item.jobs().iter().map(|job| job.proc_id()).collect();
    for proc_id in procs {
      self.attach(proc_id);
      self.step(proc_id)?;
    }

    let completion = self.item.completion();
    if completion.finished {
      info!(
        cluster_id,
        n_done = completion.n_done,
        n_failed = completion.n_failed,
        "cluster is finished"
      );
      self.events.push(Event {
        cluster_id,
        kind: EventKind::ClusterFinished {
          n_done: completion.n_done,
          n_failed: completion.n_failed,
          n_all: self.item.all().len(),
        },
      });
    }
    self.events.push(Event {
      cluster_id,
      kind: EventKind::Monitoring {
        monitor_level: self.item.monitor_level(),
        old: old_counts,
        new: self.item.index().counts(),
      },
    });

    Ok(ReconcileOutcome {
      old_index,
      events: self.events,
      completion,
      item: self.item,
    })
  }

  /// Points the job at its snapshot entry, or marks it unlisted.
  fn attach(&mut self, proc_id: ProcId) {
    let entry = self.snapshot.entry(proc_id).cloned();
    if let Some(job) = self.item.job_mut(proc_id) {
      match entry {
        Some(entry) => job.attach_queue_entry(&entry),
        None => job.mark_unlisted(),
      }
    }
  }

  /// Applies the transition rule for one job.
  fn step(&mut self, proc_id: ProcId) -> Result<(), ReconcileError> {
    let job = match self.item.job(proc_id) {
      Some(job) => job,
      None => return Ok(()),
    };
    let prev = job.prev_state();
    let new_state = job.new_state();
    debug!(job = %job.id(), prev = ?prev, new = %new_state, "deciding");

    match new_state {
      RemoteState::Listed(JobState::Idle) => self.move_unless(proc_id, prev, JobState::Idle)?,
      RemoteState::Listed(JobState::Running) => {
        self.move_unless(proc_id, prev, JobState::Running)?
      }
      RemoteState::Listed(JobState::Removed) => self.permanent_failure(proc_id)?,
      RemoteState::Listed(JobState::Completed) | RemoteState::Unlisted => {
        // Terminal states stay terminal: a completed or vanished job that
        // was already decided must not be reopened.
        if matches!(prev, Some(state) if state.is_terminal()) {
          return Ok(());
        }
        self.settle(proc_id)?;
      }
      RemoteState::Listed(JobState::Held) => self.resubmission_analysis(proc_id)?,
      RemoteState::Listed(JobState::Transferring) => {
        self.move_unless(proc_id, prev, JobState::Transferring)?
      }
      RemoteState::Listed(JobState::Suspended) => {
        if prev == Some(JobState::Failed) {
          return Ok(());
        }
        self.permanent_failure(proc_id)?;
      }
      RemoteState::Listed(state) => {
        // Done/Failed never come from a queue listing.
        warn!(cluster_id = self.item.cluster_id(), proc_id, state = %state, "unhandled listed state");
      }
      RemoteState::Unrecognized(code) => {
        warn!(
          cluster_id = self.item.cluster_id(),
          proc_id, code, "unhandled job status code"
        );
      }
    }
    Ok(())
  }

  fn move_unless(
    &mut self,
    proc_id: ProcId,
    prev: Option<JobState>,
    target: JobState,
  ) -> Result<(), ReconcileError> {
    if prev != Some(target) {
      self.item.move_job(proc_id, target)?;
    }
    Ok(())
  }

  /// Decides a job the queue no longer runs: done if its exit code is clean
  /// or unknown-with-no-history, resubmission analysis otherwise.
  fn settle(&mut self, proc_id: ProcId) -> Result<(), ReconcileError> {
    let exit_code = match self.item.job_mut(proc_id) {
      Some(job) => job.exit_code(self.client)?,
      None => return Ok(()),
    };
    if exit_code == EXIT_NO_HISTORY || exit_code == 0 {
      self.item.move_job(proc_id, JobState::Done)?;
    } else {
      debug!(
        cluster_id = self.item.cluster_id(),
        proc_id, exit_code, "non-zero exit code"
      );
      self.resubmission_analysis(proc_id)?;
    }
    Ok(())
  }

  /// Decides whether a troubled job earns another attempt.
  ///
  /// Only a memory-exceeded hold qualifies: the memory request is doubled
  /// (with a floor), the edit and release are issued, and the job goes back
  /// to idle. Anything else, or a job past the resubmission cap, is failed
  /// permanently.
  fn resubmission_analysis(&mut self, proc_id: ProcId) -> Result<(), ReconcileError> {
    let cluster_id = self.item.cluster_id();
    let (failure_count, hold_code, request_mb) = match self.item.job_mut(proc_id) {
      Some(job) => {
        let count = job.record_failure();
        let hold = job
          .remote_ad()
          .and_then(|ad| ad.get_int(attr::HOLD_REASON_CODE));
        let request = job
          .remote_ad()
          .and_then(|ad| ad.get_int(attr::REQUEST_MEMORY));
        (count, hold, request)
      }
      None => return Ok(()),
    };

    if let Some(cap) = self.policy.resubmission_cap {
      if failure_count > cap {
        info!(
          cluster_id,
          proc_id, failure_count, cap, "resubmission cap reached, failing permanently"
        );
        return self.permanent_failure(proc_id);
      }
    }

    if hold_code != Some(self.policy.memory_hold_reason_code) {
      debug!(cluster_id, proc_id, hold_code = ?hold_code, "hold reason does not qualify for resubmission");
      return self.permanent_failure(proc_id);
    }

    let new_request_mb = match request_mb {
      Some(current) => cmp::max(2 * current, self.policy.memory_floor_mb),
      None => self.policy.memory_floor_mb,
    };
    self
      .client
      .edit(cluster_id, proc_id, attr::REQUEST_MEMORY, new_request_mb.into())?;
    self.client.act(JobAction::Release, cluster_id, proc_id)?;
    self.item.move_job(proc_id, JobState::Idle)?;
    self.item.record_resubmission();
    info!(
      cluster_id,
      proc_id,
      old_request_mb = ?request_mb,
      new_request_mb,
      "resubmitted job with an escalated memory request"
    );
    self.events.push(Event {
      cluster_id,
      kind: EventKind::JobResubmitted {
        proc_id,
        old_request_mb: request_mb,
        new_request_mb,
        resubmission_count: self.item.total_resubmission_count(),
      },
    });
    Ok(())
  }

  /// Marks a job failed for good, gathering diagnostics first.
  fn permanent_failure(&mut self, proc_id: ProcId) -> Result<(), ReconcileError> {
    let cluster_id = self.item.cluster_id();
    let report = self.failure_report(proc_id)?;
    self.item.move_job(proc_id, JobState::Failed)?;
    self.item.record_failure();
    info!(cluster_id, proc_id, "job permanently failed");
    self.events.push(Event {
      cluster_id,
      kind: EventKind::JobPermanentlyFailed {
        proc_id,
        failure_count: self.item.total_failure_count(),
        report,
      },
    });
    Ok(())
  }

  /// Collects failure diagnostics. The stderr tail is best-effort; history
  /// and queue attributes come from the job's memoized fetches.
  fn failure_report(&mut self, proc_id: ProcId) -> Result<FailureReport, ReconcileError> {
    let submission_path = self.item.submission_path().to_path_buf();
    let keys = &self.policy.interesting_keys;
    let job = match self.item.job_mut(proc_id) {
      Some(job) => job,
      None => return Ok(FailureReport::default()),
    };
    let queue_ad = job
      .remote_ad()
      .map(|ad| ad.filtered(keys))
      .unwrap_or_default();
    let history = job
      .history_ad(self.client)?
      .map(|ad| ad.filtered(keys))
      .unwrap_or_default();
    let stderr = match job.stderr_tail(&submission_path, self.client, self.tailer, self.policy.tail_lines) {
      Ok(tail) => tail.cloned(),
      Err(e) => {
        warn!(proc_id, error = %e, "could not capture stderr tail");
        None
      }
    };
    Ok(FailureReport {
      history,
      queue_ad,
      stderr,
    })
  }
}
