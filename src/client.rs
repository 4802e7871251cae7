//! The consumed scheduler-client boundary.
//!
//! The core never speaks the scheduler's network protocol itself; everything
//! it needs from the remote cluster goes through [`SchedulerClient`].
//! Implementations are expected to be blocking and to do their own retrying:
//! any error they return fails the current item's pass and the item is
//! retried on the next run with its persisted state unchanged.

use crate::classad::{AdValue, ClassAd};
use crate::error::ClientError;
use crate::job::ProcId;

/// The actions the monitor can ask the scheduler to perform on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobAction {
  /// Release a held job back into the queue.
  Release,
  /// Remove a job from the queue entirely.
  Remove,
}

/// Boundary contract for talking to the remote scheduler.
pub trait SchedulerClient {
  /// Returns the queue records for every job of `cluster_id` owned by
  /// `owner`, projected onto `projection` (empty projection = all
  /// attributes).
  fn query(
    &self,
    owner: &str,
    cluster_id: u64,
    projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError>;

  /// Returns the historical (terminal) records matching one job.
  ///
  /// Zero or one result is expected; callers treat more than one as
  /// anomalous but not fatal.
  fn history(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError>;

  /// Edits one attribute of a queued job.
  fn edit(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    attr: &str,
    value: AdValue,
  ) -> Result<(), ClientError>;

  /// Performs a queue action on one job.
  fn act(&self, action: JobAction, cluster_id: u64, proc_id: ProcId) -> Result<(), ClientError>;
}

impl<T: SchedulerClient + ?Sized> SchedulerClient for &T {
  fn query(
    &self,
    owner: &str,
    cluster_id: u64,
    projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError> {
    (**self).query(owner, cluster_id, projection)
  }

  fn history(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError> {
    (**self).history(cluster_id, proc_id, projection)
  }

  fn edit(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    attr: &str,
    value: AdValue,
  ) -> Result<(), ClientError> {
    (**self).edit(cluster_id, proc_id, attr, value)
  }

  fn act(&self, action: JobAction, cluster_id: u64, proc_id: ProcId) -> Result<(), ClientError> {
    (**self).act(action, cluster_id, proc_id)
  }
}
