//! The per-pass control flow tying the pieces together.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::client::{JobAction, SchedulerClient};
use crate::config::MonitorConfig;
use crate::digest::{Digest, Notifier};
use crate::error::MonitorError;
use crate::item::TrackedItem;
use crate::queue::QueueSnapshot;
use crate::reconcile::Reconciler;
use crate::store::TrackedItemStore;
use crate::tail::FileTail;

/// What one monitor pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassSummary {
  pub items_seen: usize,
  pub items_updated: usize,
  pub items_finished: usize,
  pub items_skipped: usize,
  pub events_raised: usize,
  pub notified: bool,
}

/// A cluster the scheduler accepted out-of-band, to be tracked from now on.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Submission {
  pub cluster_id: u64,
  pub n_jobs: u32,
  pub submission_path: PathBuf,
}

/// Drives reconciliation passes over the persisted tracked-item set.
///
/// All collaborators are injected; the monitor holds no ambient state beyond
/// its configuration.
pub struct Monitor<C, S, T, N> {
  client: C,
  store: S,
  tailer: T,
  notifier: N,
  config: MonitorConfig,
}

impl<C, S, T, N> Monitor<C, S, T, N>
where
  C: SchedulerClient,
  S: TrackedItemStore,
  T: FileTail,
  N: Notifier,
{
  pub fn new(client: C, store: S, tailer: T, notifier: N, config: MonitorConfig) -> Self {
    Self {
      client,
      store,
      tailer,
      notifier,
      config,
    }
  }

  pub fn config(&self) -> &MonitorConfig {
    &self.config
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Runs one full reconciliation pass.
  ///
  /// Every tracked item is reconciled against a fresh queue snapshot. An
  /// item whose snapshot or reconciliation fails is skipped with its
  /// previous state intact and retried next pass. Finished items are
  /// dropped. The store is rewritten once, after every item has been
  /// decided, and at most one notification is delivered.
  pub fn run_pass(&mut self) -> Result<PassSummary, MonitorError> {
    let loaded = self.store.load()?;
    let policy = self.config.reconcile_policy();
    let mut digest = Digest::new();
    let mut kept: Vec<TrackedItem> = Vec::new();
    let mut summary = PassSummary::default();

    for item in loaded.items {
      summary.items_seen += 1;
      let cluster_id = item.cluster_id();
      // Enough to rebuild the item if this pass has to be abandoned.
      let checkpoint = item.to_record();

      let snapshot = match QueueSnapshot::fetch(&self.client, &self.config.owner, cluster_id) {
        Ok(snapshot) => snapshot,
        Err(e) => {
          warn!(cluster_id, error = %e, "queue snapshot failed, keeping item for next pass");
          summary.items_skipped += 1;
          kept.push(item);
          continue;
        }
      };

      let outcome =
        Reconciler::new(item, &snapshot, &self.client, &self.tailer, &policy).run();
      match outcome {
        Ok(outcome) => {
          summary.items_updated += 1;
          summary.events_raised += outcome.events.len();
          digest.record_all(outcome.events);
          if outcome.completion.finished {
            info!(cluster_id, "dropping finished cluster from the tracked set");
            summary.items_finished += 1;
          } else {
            kept.push(outcome.item);
          }
        }
        Err(e) => {
          warn!(cluster_id, error = %e, "reconciliation failed, keeping previous state");
          summary.items_skipped += 1;
          kept.push(TrackedItem::from_record(&checkpoint)?);
        }
      }
    }

    self.store.save(&kept)?;

    if let Some(text) = digest.compile(&self.config.digest_policy()) {
      debug!(chars = text.len(), "delivering compiled notification");
      self
        .notifier
        .deliver(&text)
        .map_err(MonitorError::Delivery)?;
      summary.notified = true;
    }

    info!(
      seen = summary.items_seen,
      updated = summary.items_updated,
      finished = summary.items_finished,
      skipped = summary.items_skipped,
      notified = summary.notified,
      "pass complete"
    );
    Ok(summary)
  }

  /// Starts tracking a freshly submitted cluster; its jobs begin idle.
  pub fn track_submission(&mut self, submission: Submission) -> Result<(), MonitorError> {
    let loaded = self.store.load()?;
    let mut items = loaded.items;
    if items
      .iter()
      .any(|item| item.cluster_id() == submission.cluster_id)
    {
      warn!(
        cluster_id = submission.cluster_id,
        "cluster is already tracked, not adding again"
      );
      return Ok(());
    }
    info!(
      cluster_id = submission.cluster_id,
      n_jobs = submission.n_jobs,
      "tracking new cluster"
    );
    items.push(TrackedItem::new_submission(
      submission.cluster_id,
      submission.submission_path,
      0..submission.n_jobs,
    ));
    self.store.save(&items)?;
    Ok(())
  }

  /// Stops tracking a cluster and asks the scheduler to remove its jobs
  /// from the queue.
  pub fn remove_cluster(&mut self, cluster_id: u64) -> Result<(), MonitorError> {
    let loaded = self.store.load()?;
    let mut items = loaded.items;
    let Some(position) = items.iter().position(|item| item.cluster_id() == cluster_id) else {
      warn!(cluster_id, "cluster is not tracked, nothing to remove");
      return Ok(());
    };
    let item = items.remove(position);
    for job in item.jobs() {
      if let Err(e) = self
        .client
        .act(JobAction::Remove, cluster_id, job.proc_id())
      {
        // The queue may legitimately no longer know the job.
        warn!(job = %job.id(), error = %e, "remove action failed");
      }
    }
    info!(cluster_id, "cluster removed from queue and tracked set");
    self.store.save(&items)?;
    Ok(())
  }
}
