//! Point-in-time snapshots of the scheduler's view of one cluster.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::classad::{attr, ClassAd, QUEUE_PROJECTION};
use crate::client::SchedulerClient;
use crate::error::ClientError;
use crate::job::ProcId;
use crate::state::{JobState, RemoteState};

/// One remote queue record, pre-digested for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct QueueEntry {
  proc_id: ProcId,
  state: RemoteState,
  ad: ClassAd,
}

impl QueueEntry {
  /// Builds an entry from a raw queue record. Records without a proc id or
  /// status code cannot be attributed to a job and are dropped with a
  /// warning.
  pub fn from_ad(ad: ClassAd) -> Option<QueueEntry> {
    let proc_id = match ad.get_int(attr::PROC_ID) {
      Some(id) if id >= 0 => id as ProcId,
      _ => {
        warn!("queue record without a usable ProcId, dropping: {ad:?}");
        return None;
      }
    };
    let state = match ad.get_int(attr::JOB_STATUS) {
      Some(code) => RemoteState::from_status_code(code),
      None => {
        warn!(proc_id, "queue record without a JobStatus, dropping");
        return None;
      }
    };
    Some(QueueEntry { proc_id, state, ad })
  }

  pub fn proc_id(&self) -> ProcId {
    self.proc_id
  }

  pub fn state(&self) -> RemoteState {
    self.state
  }

  /// The full record as returned by the scheduler.
  pub fn ad(&self) -> &ClassAd {
    &self.ad
  }

  pub fn hold_reason_code(&self) -> Option<i64> {
    self.ad.get_int(attr::HOLD_REASON_CODE)
  }

  pub fn hold_reason(&self) -> Option<&str> {
    self.ad.get_str(attr::HOLD_REASON)
  }

  pub fn request_memory_mb(&self) -> Option<i64> {
    self.ad.get_int(attr::REQUEST_MEMORY)
  }

  pub fn memory_usage_mb(&self) -> Option<i64> {
    self.ad.get_int(attr::MEMORY_USAGE)
  }

  pub fn err_path(&self) -> Option<&str> {
    self.ad.get_str(attr::ERR)
  }
}

/// A read-only, indexed snapshot of every queue record for one cluster.
///
/// Constructed once per reconciliation pass via [`QueueSnapshot::fetch`] (the
/// only network-facing operation in the core) and discarded afterwards.
#[derive(Debug)]
pub struct QueueSnapshot {
  cluster_id: u64,
  entries: Vec<QueueEntry>,
  by_proc: HashMap<ProcId, usize>,
  by_state: BTreeMap<JobState, Vec<ProcId>>,
}

impl QueueSnapshot {
  /// Queries the scheduler for every job of `cluster_id` owned by `owner`
  /// and builds the snapshot indexes.
  pub fn fetch(
    client: &dyn SchedulerClient,
    owner: &str,
    cluster_id: u64,
  ) -> Result<QueueSnapshot, ClientError> {
    let ads = client.query(owner, cluster_id, QUEUE_PROJECTION)?;
    debug!(cluster_id, records = ads.len(), "fetched queue snapshot");
    let entries = ads.into_iter().filter_map(QueueEntry::from_ad).collect();
    Ok(Self::from_entries(cluster_id, entries))
  }

  /// Builds a snapshot from already-digested entries. Entries are ordered by
  /// proc id; a duplicated proc id keeps the first record seen.
  pub fn from_entries(cluster_id: u64, mut entries: Vec<QueueEntry>) -> QueueSnapshot {
    entries.sort_by_key(QueueEntry::proc_id);
    let mut by_proc = HashMap::with_capacity(entries.len());
    let mut by_state: BTreeMap<JobState, Vec<ProcId>> = BTreeMap::new();
    let mut deduped: Vec<QueueEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
      if by_proc.contains_key(&entry.proc_id) {
        warn!(cluster_id, proc_id = entry.proc_id, "duplicate queue record, keeping the first");
        continue;
      }
      by_proc.insert(entry.proc_id, deduped.len());
      if let RemoteState::Listed(state) = entry.state {
        by_state.entry(state).or_default().push(entry.proc_id);
      }
      deduped.push(entry);
    }
    QueueSnapshot {
      cluster_id,
      entries: deduped,
      by_proc,
      by_state,
    }
  }

  pub fn cluster_id(&self) -> u64 {
    self.cluster_id
  }

  pub fn has_proc_id(&self, proc_id: ProcId) -> bool {
    self.by_proc.contains_key(&proc_id)
  }

  pub fn entry(&self, proc_id: ProcId) -> Option<&QueueEntry> {
    self.by_proc.get(&proc_id).map(|&slot| &self.entries[slot])
  }

  /// Proc ids the queue currently lists in `state`, ordered by proc id.
  pub fn procs_in_state(&self, state: JobState) -> &[ProcId] {
    self.by_state.get(&state).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn entries(&self) -> &[QueueEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
