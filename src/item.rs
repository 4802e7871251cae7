use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{RecordError, StateError};
use crate::job::{Job, JobId, ProcId};
use crate::state::JobState;
use crate::store::SectionRecord;

/// How eagerly a tracked item should surface monitoring summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MonitorLevel {
  /// Include a state summary in every digest that mentions the cluster.
  #[default]
  High,
  /// Only summarize when something else noteworthy happened.
  Low,
}

impl MonitorLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      MonitorLevel::High => "high",
      MonitorLevel::Low => "low",
    }
  }
}

impl fmt::Display for MonitorLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-state job counts, used for before/after summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateCounts(BTreeMap<JobState, usize>);

impl StateCounts {
  pub fn get(&self, state: JobState) -> usize {
    self.0.get(&state).copied().unwrap_or(0)
  }

  pub fn total(&self) -> usize {
    self.0.values().sum()
  }
}

/// Completion status of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Completion {
  /// True iff the set of done and failed proc ids exactly covers the
  /// declared index set.
  pub finished: bool,
  pub n_done: usize,
  pub n_failed: usize,
}

/// The per-state bucket index of a tracked item.
///
/// This is the only structure a reconciliation pass duplicates: cloning it
/// gives an independent before-view while the jobs themselves, with their
/// memoized remote fetches, stay shared in the item's one arena.
#[derive(Debug, Clone, Default)]
pub struct StateIndex {
  buckets: BTreeMap<JobState, Vec<ProcId>>,
  state_of: HashMap<ProcId, JobState>,
}

impl StateIndex {
  /// Appends a job to a bucket. The job must not already be indexed.
  fn insert(&mut self, proc_id: ProcId, state: JobState) {
    self.buckets.entry(state).or_default().push(proc_id);
    self.state_of.insert(proc_id, state);
  }

  /// Moves a job between buckets, appending to the target. A job with no
  /// current bucket is simply inserted.
  fn move_to(&mut self, proc_id: ProcId, target: JobState) {
    if let Some(current) = self.state_of.get(&proc_id).copied() {
      if let Some(bucket) = self.buckets.get_mut(&current) {
        bucket.retain(|&p| p != proc_id);
      }
    }
    self.insert(proc_id, target);
  }

  pub fn state_of(&self, proc_id: ProcId) -> Option<JobState> {
    self.state_of.get(&proc_id).copied()
  }

  /// Proc ids currently in `state`, in bucket (arrival) order.
  pub fn procs_in(&self, state: JobState) -> &[ProcId] {
    self.buckets.get(&state).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn counts(&self) -> StateCounts {
    StateCounts(
      JobState::ALL
        .iter()
        .map(|&state| (state, self.procs_in(state).len()))
        .collect(),
    )
  }
}

/// A cluster's worth of jobs plus the bookkeeping needed to reconcile it.
#[derive(Debug)]
pub struct TrackedItem {
  cluster_id: u64,
  submission_path: PathBuf,
  monitor_level: MonitorLevel,
  submission_time: Option<DateTime<Utc>>,
  /// The declared index set: every proc id this cluster was submitted with.
  all: BTreeSet<ProcId>,
  /// The job arena, unique by proc id, in original submission order.
  jobs: Vec<Job>,
  job_slots: HashMap<ProcId, usize>,
  index: StateIndex,
  total_failure_count: u64,
  total_resubmission_count: u64,
}

impl TrackedItem {
  /// Creates the tracking record for a freshly submitted cluster; every job
  /// starts idle.
  pub fn new_submission(
    cluster_id: u64,
    submission_path: impl Into<PathBuf>,
    proc_ids: impl IntoIterator<Item = ProcId>,
  ) -> TrackedItem {
    let mut item = TrackedItem {
      cluster_id,
      submission_path: submission_path.into(),
      monitor_level: MonitorLevel::default(),
      submission_time: Some(Utc::now()),
      all: BTreeSet::new(),
      jobs: Vec::new(),
      job_slots: HashMap::new(),
      index: StateIndex::default(),
      total_failure_count: 0,
      total_resubmission_count: 0,
    };
    for proc_id in proc_ids {
      item.push_job(proc_id, Some(JobState::Idle), 0);
    }
    item
  }

  fn push_job(&mut self, proc_id: ProcId, state: Option<JobState>, failure_count: u32) {
    if !self.all.insert(proc_id) {
      warn!(cluster_id = self.cluster_id, proc_id, "duplicate proc id ignored");
      return;
    }
    let id = JobId {
      cluster_id: self.cluster_id,
      proc_id,
    };
    let mut job = Job::new(id, state);
    job.set_failure_count(failure_count);
    self.job_slots.insert(proc_id, self.jobs.len());
    self.jobs.push(job);
    if let Some(state) = state {
      self.index.insert(proc_id, state);
    }
  }

  // --- Accessors ---

  pub fn cluster_id(&self) -> u64 {
    self.cluster_id
  }

  pub fn submission_path(&self) -> &Path {
    &self.submission_path
  }

  pub fn monitor_level(&self) -> MonitorLevel {
    self.monitor_level
  }

  pub fn set_monitor_level(&mut self, level: MonitorLevel) {
    self.monitor_level = level;
  }

  pub fn submission_time(&self) -> Option<DateTime<Utc>> {
    self.submission_time
  }

  pub fn all(&self) -> &BTreeSet<ProcId> {
    &self.all
  }

  pub fn jobs(&self) -> &[Job] {
    &self.jobs
  }

  pub fn job(&self, proc_id: ProcId) -> Option<&Job> {
    self.job_slots.get(&proc_id).map(|&slot| &self.jobs[slot])
  }

  pub fn job_mut(&mut self, proc_id: ProcId) -> Option<&mut Job> {
    let slot = *self.job_slots.get(&proc_id)?;
    Some(&mut self.jobs[slot])
  }

  pub fn index(&self) -> &StateIndex {
    &self.index
  }

  pub fn state_of(&self, proc_id: ProcId) -> Option<JobState> {
    self.index.state_of(proc_id)
  }

  pub fn total_failure_count(&self) -> u64 {
    self.total_failure_count
  }

  pub fn total_resubmission_count(&self) -> u64 {
    self.total_resubmission_count
  }

  pub(crate) fn record_failure(&mut self) {
    self.total_failure_count += 1;
  }

  pub(crate) fn record_resubmission(&mut self) {
    self.total_resubmission_count += 1;
  }

  // --- State transitions ---

  /// Moves a job to `target`: removes it from its current bucket, appends it
  /// to the target bucket and updates the job's previous state.
  ///
  /// Moving a job to the state it is already in is a logged no-op, not an
  /// error. Moving a proc id the item does not track fails with
  /// [`StateError::UnknownJob`] and aborts the item's pass.
  pub fn move_job(&mut self, proc_id: ProcId, target: JobState) -> Result<(), StateError> {
    let slot = *self
      .job_slots
      .get(&proc_id)
      .ok_or(StateError::UnknownJob {
        cluster_id: self.cluster_id,
        proc_id,
      })?;
    let current = self.index.state_of(proc_id);
    if current == Some(target) {
      debug!(job = %self.jobs[slot].id(), state = %target, "already in state, not moving");
      return Ok(());
    }
    self.index.move_to(proc_id, target);
    self.jobs[slot].set_prev_state(target);
    debug!(
      job = %self.jobs[slot].id(),
      from = current.map(|s| s.as_str()).unwrap_or("unset"),
      to = %target,
      "moved job"
    );
    Ok(())
  }

  /// Whether every declared job has reached a terminal state.
  ///
  /// Finished means the union of the done and failed buckets, as a proc-id
  /// set, exactly equals the declared index set. Counting would not do: a
  /// duplicated or missing proc id must keep the item unfinished.
  pub fn completion(&self) -> Completion {
    let done = self.index.procs_in(JobState::Done);
    let failed = self.index.procs_in(JobState::Failed);
    let terminal: BTreeSet<ProcId> = done.iter().chain(failed.iter()).copied().collect();
    Completion {
      finished: terminal == self.all,
      n_done: done.len(),
      n_failed: failed.len(),
    }
  }

  // --- Persistence ---

  /// Rehydrates a tracked item from its persisted section record.
  pub fn from_record(record: &SectionRecord) -> Result<TrackedItem, RecordError> {
    let section = record.name().to_string();
    let missing = |key: &str| RecordError::MissingField {
      section: section.clone(),
      key: key.to_string(),
    };
    let malformed = |detail: String| RecordError::Malformed {
      section: section.clone(),
      detail,
    };

    let cluster_id: u64 = record
      .get("cluster_id")
      .ok_or_else(|| missing("cluster_id"))?
      .trim()
      .parse()
      .map_err(|_| malformed("cluster_id is not an integer".to_string()))?;
    let submission_path = PathBuf::from(
      record
        .get("submission_path")
        .ok_or_else(|| missing("submission_path"))?,
    );
    let order = parse_proc_list(record.get("all").ok_or_else(|| missing("all"))?)
      .map_err(|detail| malformed(detail))?;

    let monitor_level = match record.get("monitor_level") {
      None => MonitorLevel::default(),
      Some("high") => MonitorLevel::High,
      Some("low") => MonitorLevel::Low,
      Some(other) => {
        warn!(section = %section, monitor_level = other, "unknown monitor level, assuming high");
        MonitorLevel::High
      }
    };
    let submission_time = record.get("submission_time").and_then(|raw| {
      match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
          warn!(section = %section, raw, "unparseable submission time, dropping");
          None
        }
      }
    });
    let total_failure_count = parse_count(record.get("total_failure_count"))
      .map_err(|detail| malformed(detail))?;
    let total_resubmission_count = parse_count(record.get("total_resubmission_count"))
      .map_err(|detail| malformed(detail))?;

    // Bucket membership. Every job should appear in exactly one bucket; a
    // proc id outside `all` or listed twice keeps its first placement.
    let declared: BTreeSet<ProcId> = order.iter().copied().collect();
    let mut state_of: HashMap<ProcId, JobState> = HashMap::new();
    for state in JobState::ALL {
      let listed = record
        .get(state.as_str())
        .or_else(|| match state {
          JobState::Transferring => record.get("transfering"),
          _ => None,
        });
      let Some(raw) = listed else { continue };
      for proc_id in parse_proc_list(raw).map_err(|detail| malformed(detail))? {
        if !declared.contains(&proc_id) {
          warn!(section = %section, proc_id, bucket = %state, "proc id outside `all`, dropping");
          continue;
        }
        if let Some(previous) = state_of.get(&proc_id) {
          warn!(
            section = %section, proc_id, first = %previous, also = %state,
            "proc id listed in two buckets, keeping the first"
          );
          continue;
        }
        state_of.insert(proc_id, state);
      }
    }

    let failure_counts = record
      .get("failure_counts")
      .or_else(|| record.get("failurecounts"))
      .map(parse_failure_counts)
      .transpose()
      .map_err(|detail| malformed(detail))?
      .unwrap_or_default();

    let mut item = TrackedItem {
      cluster_id,
      submission_path,
      monitor_level,
      submission_time,
      all: BTreeSet::new(),
      jobs: Vec::new(),
      job_slots: HashMap::new(),
      index: StateIndex::default(),
      total_failure_count,
      total_resubmission_count,
    };
    for proc_id in order {
      let state = state_of.get(&proc_id).copied();
      let failures = failure_counts.get(&proc_id).copied().unwrap_or(0);
      item.push_job(proc_id, state, failures);
    }
    Ok(item)
  }

  /// Serializes the item back into its persisted section form. Only
  /// non-empty buckets and non-zero failure counts are written; transient
  /// remote-metadata caches never are.
  pub fn to_record(&self) -> SectionRecord {
    let mut record = SectionRecord::new(self.cluster_id.to_string());
    record.set("cluster_id", self.cluster_id.to_string());
    record.set(
      "submission_path",
      self.submission_path.display().to_string(),
    );
    record.set("all", join_proc_list(self.jobs.iter().map(Job::proc_id)));
    record.set("monitor_level", self.monitor_level.as_str());
    if let Some(time) = self.submission_time {
      record.set("submission_time", time.to_rfc3339());
    }
    for state in JobState::ALL {
      let bucket = self.index.procs_in(state);
      if !bucket.is_empty() {
        record.set(state.as_str(), join_proc_list(bucket.iter().copied()));
      }
    }
    let failures: Vec<String> = self
      .jobs
      .iter()
      .filter(|job| job.failure_count() > 0)
      .map(|job| format!("{}:{}", job.proc_id(), job.failure_count()))
      .collect();
    if !failures.is_empty() {
      record.set("failure_counts", failures.join(","));
    }
    record.set("total_failure_count", self.total_failure_count.to_string());
    record.set(
      "total_resubmission_count",
      self.total_resubmission_count.to_string(),
    );
    record
  }
}

fn parse_proc_list(raw: &str) -> Result<Vec<ProcId>, String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .map(|part| {
      ProcId::from_str(part).map_err(|_| format!("`{part}` is not a proc id"))
    })
    .collect()
}

fn join_proc_list(procs: impl IntoIterator<Item = ProcId>) -> String {
  procs
    .into_iter()
    .map(|p| p.to_string())
    .collect::<Vec<_>>()
    .join(",")
}

fn parse_count(raw: Option<&str>) -> Result<u64, String> {
  match raw {
    None => Ok(0),
    Some(raw) => raw
      .trim()
      .parse()
      .map_err(|_| format!("`{raw}` is not a count")),
  }
}

fn parse_failure_counts(raw: &str) -> Result<BTreeMap<ProcId, u32>, String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .map(|pair| {
      let (proc_part, count_part) = pair
        .split_once(':')
        .ok_or_else(|| format!("`{pair}` is not a proc:count pair"))?;
      let proc_id = proc_part
        .trim()
        .parse()
        .map_err(|_| format!("`{proc_part}` is not a proc id"))?;
      let count = count_part
        .trim()
        .parse()
        .map_err(|_| format!("`{count_part}` is not a count"))?;
      Ok((proc_id, count))
    })
    .collect()
}
