//! tests/reconcile.rs
//! Decision-procedure coverage: one scenario per transition rule.

mod common;

use crate::common::{
  held_ad, history_record, item_with_states, queue_ad, setup_tracing, snapshot_of, FakeSchedd,
  StaticTail,
};
use flockwatch::{
  attr, AdValue, EventCode, EventKind, JobAction, JobState, MonitorConfig, ReconcilePolicy,
  Reconciler,
};

const CLUSTER: u64 = 63826560;

fn policy() -> ReconcilePolicy {
  MonitorConfig::default().reconcile_policy()
}

#[test]
fn completed_with_zero_exit_code_moves_to_done() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Idle)]);
  let schedd = FakeSchedd::new()
    .with_queue(vec![queue_ad(CLUSTER, 0, 4)])
    .with_history(CLUSTER, 0, vec![history_record(CLUSTER, 0, Some(0))]);
  let snapshot = snapshot_of(CLUSTER, vec![queue_ad(CLUSTER, 0, 4)]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Done));
  assert_eq!(outcome.item.total_resubmission_count(), 0);
  assert!(
    !outcome
      .events
      .iter()
      .any(|e| e.code() == EventCode::JobResubmitted),
    "a clean completion must not raise a resubmission event"
  );
}

#[test]
fn memory_exceeded_hold_doubles_request_and_resubmits() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let ad = held_ad(CLUSTER, 0, 34, 2048, 2100);
  let schedd = FakeSchedd::new().with_queue(vec![ad.clone()]);
  let snapshot = snapshot_of(CLUSTER, vec![ad]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Idle));
  assert_eq!(outcome.item.total_resubmission_count(), 1);
  assert_eq!(
    schedd.edits.borrow().clone(),
    vec![(CLUSTER, 0, attr::REQUEST_MEMORY.to_string(), AdValue::Int(4096))]
  );
  assert_eq!(schedd.acts.borrow().clone(), vec![(JobAction::Release, CLUSTER, 0)]);
  assert!(matches!(
    outcome.events.iter().find(|e| e.code() == EventCode::JobResubmitted),
    Some(event) if matches!(
      event.kind,
      EventKind::JobResubmitted {
        proc_id: 0,
        old_request_mb: Some(2048),
        new_request_mb: 4096,
        resubmission_count: 1,
      }
    )
  ));
}

#[test]
fn memory_hold_without_request_value_gets_the_floor() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let mut ad = queue_ad(CLUSTER, 0, 5);
  ad.insert(attr::HOLD_REASON_CODE, 34_i64);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![ad]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Idle));
  assert_eq!(schedd.edits.borrow()[0].3, AdValue::Int(4096));
}

#[test]
fn large_request_doubles_past_the_floor() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let ad = held_ad(CLUSTER, 0, 34, 8192, 9000);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![ad]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Idle));
  assert_eq!(schedd.edits.borrow()[0].3, AdValue::Int(16384));
}

#[test]
fn non_memory_hold_fails_permanently() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let ad = held_ad(CLUSTER, 0, 3, 2048, 100);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![ad]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Failed));
  assert_eq!(outcome.item.total_failure_count(), 1);
  assert!(schedd.edits.borrow().is_empty(), "no memory edit for a non-memory hold");
  assert!(schedd.acts.borrow().is_empty());
}

#[test]
fn removed_job_fails_permanently_regardless_of_prev() {
  setup_tracing();
  for prev in [JobState::Idle, JobState::Running, JobState::Held] {
    let item = item_with_states(CLUSTER, &[(0, prev)]);
    let schedd = FakeSchedd::new();
    let snapshot = snapshot_of(CLUSTER, vec![queue_ad(CLUSTER, 0, 3)]);

    let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
      .run()
      .unwrap();

    assert_eq!(outcome.item.state_of(0), Some(JobState::Failed));
    assert_eq!(outcome.item.total_failure_count(), 1);
    assert_eq!(
      outcome
        .events
        .iter()
        .filter(|e| e.code() == EventCode::JobPermanentlyFailed)
        .count(),
      1
    );
  }
}

#[test]
fn unlisted_job_without_history_is_assumed_done() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let schedd = FakeSchedd::new(); // empty queue, no history
  let snapshot = snapshot_of(CLUSTER, vec![]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Done));
}

#[test]
fn unlisted_job_with_nonzero_exit_fails_permanently() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let schedd =
    FakeSchedd::new().with_history(CLUSTER, 0, vec![history_record(CLUSTER, 0, Some(1))]);
  let snapshot = snapshot_of(CLUSTER, vec![]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  // No queue metadata means no memory-hold evidence, so no resubmission.
  assert_eq!(outcome.item.state_of(0), Some(JobState::Failed));
  assert_eq!(outcome.item.total_failure_count(), 1);
  assert_eq!(outcome.item.job(0).unwrap().failure_count(), 1);
}

#[test]
fn terminal_jobs_are_never_reopened() {
  setup_tracing();
  // Unlisted + already done: nothing to do, not even a history lookup.
  let item = item_with_states(CLUSTER, &[(0, JobState::Done), (1, JobState::Failed)]);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Done));
  assert_eq!(outcome.item.state_of(1), Some(JobState::Failed));
  assert!(
    schedd.history_calls.borrow().is_empty(),
    "terminal jobs must not trigger history lookups"
  );
}

#[test]
fn completed_listing_for_failed_job_stays_failed() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Failed)]);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![queue_ad(CLUSTER, 0, 4)]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Failed));
  assert!(schedd.history_calls.borrow().is_empty());
}

#[test]
fn suspended_job_fails_unless_already_failed() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running), (1, JobState::Failed)]);
  let snapshot = snapshot_of(
    CLUSTER,
    vec![queue_ad(CLUSTER, 0, 7), queue_ad(CLUSTER, 1, 7)],
  );
  let schedd = FakeSchedd::new();

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Failed));
  assert_eq!(outcome.item.state_of(1), Some(JobState::Failed));
  assert_eq!(outcome.item.total_failure_count(), 1, "only job 0 newly failed");
}

#[test]
fn plain_listings_track_the_queue() {
  setup_tracing();
  let item = item_with_states(
    CLUSTER,
    &[(0, JobState::Idle), (1, JobState::Idle), (2, JobState::Running)],
  );
  let snapshot = snapshot_of(
    CLUSTER,
    vec![
      queue_ad(CLUSTER, 0, 2), // idle -> running
      queue_ad(CLUSTER, 1, 6), // idle -> transferring
      queue_ad(CLUSTER, 2, 1), // running -> idle again
    ],
  );
  let schedd = FakeSchedd::new();

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Running));
  assert_eq!(outcome.item.state_of(1), Some(JobState::Transferring));
  assert_eq!(outcome.item.state_of(2), Some(JobState::Idle));
  assert_eq!(outcome.item.total_failure_count(), 0);
}

#[test]
fn unchanged_states_are_noops() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Idle), (1, JobState::Running)]);
  let snapshot = snapshot_of(
    CLUSTER,
    vec![queue_ad(CLUSTER, 0, 1), queue_ad(CLUSTER, 1, 2)],
  );
  let schedd = FakeSchedd::new();

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.old_counts(), outcome.item.index().counts());
}

#[test]
fn unrecognized_status_code_is_left_alone() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let snapshot = snapshot_of(CLUSTER, vec![queue_ad(CLUSTER, 0, 42)]);
  let schedd = FakeSchedd::new();

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Running));
}

#[test]
fn resubmission_cap_turns_memory_holds_into_failures() {
  setup_tracing();
  let mut item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  item.job_mut(0).unwrap().set_failure_count(5);
  let ad = held_ad(CLUSTER, 0, 34, 2048, 2100);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![ad]);
  let policy = policy(); // resubmission_cap = Some(5)

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy)
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Failed));
  assert!(schedd.edits.borrow().is_empty(), "capped job must not be edited");
  assert_eq!(outcome.item.job(0).unwrap().failure_count(), 6);
}

#[test]
fn uncapped_policy_keeps_resubmitting() {
  setup_tracing();
  let mut item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  item.job_mut(0).unwrap().set_failure_count(40);
  let ad = held_ad(CLUSTER, 0, 34, 2048, 2100);
  let schedd = FakeSchedd::new();
  let snapshot = snapshot_of(CLUSTER, vec![ad]);
  let policy = ReconcilePolicy {
    resubmission_cap: None,
    ..MonitorConfig::default().reconcile_policy()
  };

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy)
    .run()
    .unwrap();

  assert_eq!(outcome.item.state_of(0), Some(JobState::Idle));
  assert_eq!(schedd.edits.borrow().len(), 1);
}

#[test]
fn finished_cluster_raises_the_finished_event() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running), (1, JobState::Done)]);
  // Job 0 vanishes with a clean history; job 1 already done.
  let schedd =
    FakeSchedd::new().with_history(CLUSTER, 0, vec![history_record(CLUSTER, 0, Some(0))]);
  let snapshot = snapshot_of(CLUSTER, vec![]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  assert!(outcome.completion.finished);
  assert_eq!(outcome.completion.n_done, 2);
  assert!(matches!(
    outcome.events.iter().find(|e| e.code() == EventCode::ClusterFinished),
    Some(event) if matches!(
      event.kind,
      EventKind::ClusterFinished { n_done: 2, n_failed: 0, n_all: 2 }
    )
  ));
}

#[test]
fn every_pass_ends_with_a_monitoring_event() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Idle)]);
  let snapshot = snapshot_of(CLUSTER, vec![queue_ad(CLUSTER, 0, 1)]);
  let schedd = FakeSchedd::new();

  let outcome = Reconciler::new(item, &snapshot, &schedd, &StaticTail::default(), &policy())
    .run()
    .unwrap();

  let last = outcome.events.last().expect("monitoring event is always raised");
  assert_eq!(last.code(), EventCode::Monitoring);
  match &last.kind {
    EventKind::Monitoring { old, new, .. } => {
      assert_eq!(old.get(JobState::Idle), 1);
      assert_eq!(new.get(JobState::Idle), 1);
    }
    other => panic!("expected monitoring payload, got {other:?}"),
  }
}

#[test]
fn failure_report_collects_history_ad_and_stderr() {
  setup_tracing();
  let item = item_with_states(CLUSTER, &[(0, JobState::Running)]);
  let mut held = held_ad(CLUSTER, 0, 3, 2048, 100);
  held.insert(attr::ERR, "logs/job_0.err");
  let mut history = history_record(CLUSTER, 0, Some(137));
  history.insert("RemoveReason", "killed by signal");
  let schedd = FakeSchedd::new().with_history(CLUSTER, 0, vec![history]);
  let snapshot = snapshot_of(CLUSTER, vec![held]);
  let tailer = StaticTail::with_lines(&["stack trace line", "out of memory"]);

  let outcome = Reconciler::new(item, &snapshot, &schedd, &tailer, &policy())
    .run()
    .unwrap();

  let failed = outcome
    .events
    .iter()
    .find(|e| e.code() == EventCode::JobPermanentlyFailed)
    .expect("job 0 must fail permanently");
  match &failed.kind {
    EventKind::JobPermanentlyFailed { report, .. } => {
      assert!(report
        .history
        .iter()
        .any(|(key, value)| key == "ExitCode" && value == "137"));
      assert!(report
        .queue_ad
        .iter()
        .any(|(key, _)| key == "HoldReasonCode"));
      let stderr = report.stderr.as_ref().expect("stderr tail captured");
      // Relative stderr path is anchored at the submission directory.
      assert_eq!(
        stderr.path,
        std::path::Path::new("/data/submissions/test/logs/job_0.err")
      );
      assert_eq!(stderr.lines, vec!["stack trace line", "out of memory"]);
    }
    other => panic!("expected failure payload, got {other:?}"),
  }
}
