//! Runs one reconciliation pass against a scripted in-memory scheduler, so
//! the whole decide/resubmit/notify flow can be watched without a real
//! cluster.
//!
//! ```sh
//! cargo run --example run_once
//! ```

use flockwatch::{
  attr, AdValue, ClassAd, ClientError, FsTail, JobAction, MemoryStore, Monitor, MonitorConfig,
  Notifier, ProcId, SchedulerClient, TrackedItem, TrackedItemStore,
};

/// A canned scheduler: cluster 901 has one job running, one held for memory,
/// and one that left the queue with a clean exit.
struct ScriptedSchedd;

impl SchedulerClient for ScriptedSchedd {
  fn query(
    &self,
    _owner: &str,
    cluster_id: u64,
    _projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError> {
    let mut running = ClassAd::new();
    running
      .insert(attr::CLUSTER_ID, cluster_id as i64)
      .insert(attr::PROC_ID, 0_i64)
      .insert(attr::JOB_STATUS, 2_i64);

    let mut held = ClassAd::new();
    held
      .insert(attr::CLUSTER_ID, cluster_id as i64)
      .insert(attr::PROC_ID, 1_i64)
      .insert(attr::JOB_STATUS, 5_i64)
      .insert(attr::HOLD_REASON, "memory usage exceeded request")
      .insert(attr::HOLD_REASON_CODE, 34_i64)
      .insert(attr::REQUEST_MEMORY, 2048_i64)
      .insert(attr::MEMORY_USAGE, 2304_i64);

    // Proc 2 is intentionally absent: it finished and left the queue.
    Ok(vec![running, held])
  }

  fn history(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    _projection: &[&str],
  ) -> Result<Vec<ClassAd>, ClientError> {
    if proc_id != 2 {
      return Ok(vec![]);
    }
    let mut record = ClassAd::new();
    record
      .insert(attr::CLUSTER_ID, cluster_id as i64)
      .insert(attr::PROC_ID, proc_id as i64)
      .insert(attr::EXIT_CODE, 0_i64);
    Ok(vec![record])
  }

  fn edit(
    &self,
    cluster_id: u64,
    proc_id: ProcId,
    attr: &str,
    value: AdValue,
  ) -> Result<(), ClientError> {
    println!("-> edit {cluster_id}.{proc_id}: {attr} = {value}");
    Ok(())
  }

  fn act(&self, action: JobAction, cluster_id: u64, proc_id: ProcId) -> Result<(), ClientError> {
    println!("-> act {action:?} on {cluster_id}.{proc_id}");
    Ok(())
  }
}

/// Prints the digest instead of mailing it.
struct StdoutNotifier;

impl Notifier for StdoutNotifier {
  fn deliver(&self, text: &str) -> Result<(), ClientError> {
    println!("--- notification ---\n{text}\n--------------------");
    Ok(())
  }
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,flockwatch=debug".into()),
    )
    .init();

  let tracked = TrackedItem::new_submission(901, "/data/submissions/demo", 0..3);
  let store = MemoryStore::with_items(&[tracked]);
  let config = MonitorConfig::for_owner("demo");

  let mut monitor = Monitor::new(ScriptedSchedd, store, FsTail, StdoutNotifier, config);
  let summary = monitor.run_pass()?;

  println!(
    "pass: {} seen, {} updated, {} finished, {} events",
    summary.items_seen, summary.items_updated, summary.items_finished, summary.events_raised
  );
  for section in monitor.store().sections() {
    println!("[{}]", section.name());
    for (key, value) in section.pairs() {
      println!("{key} = {value}");
    }
  }
  let item = monitor.store().load()?.items.remove(0);
  println!(
    "cluster 901 now: job 0 {:?}, job 1 {:?}, job 2 {:?}",
    item.state_of(0),
    item.state_of(1),
    item.state_of(2)
  );
  Ok(())
}
