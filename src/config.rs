//! Process-wide configuration for the monitor.
//!
//! Constructed once by the embedder (however it likes to load settings) and
//! passed in explicitly; nothing in the core reads ambient globals.

use crate::digest::DigestPolicy;
use crate::reconcile::{ReconcilePolicy, DEFAULT_MEMORY_FLOOR_MB, MEMORY_EXCEEDED_HOLD_CODE};

/// Attributes worth surfacing in a failure report.
pub const DEFAULT_INTERESTING_KEYS: &[&str] = &[
  "ExitCode",
  "ExitBySignal",
  "ExitSignal",
  "HoldReason",
  "HoldReasonCode",
  "RemoveReason",
  "LastRemoteHost",
  "MemoryUsage",
  "RequestMemory",
  "JobStartDate",
  "CompletionDate",
];

/// Read-only monitor configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorConfig {
  /// Queue owner whose jobs are tracked.
  pub owner: String,
  /// Notify about the first N resubmissions of an item, stay silent after.
  pub notify_first_n_resubmissions: u64,
  /// Notify about the first N permanent failures of an item.
  pub notify_first_n_failures: u64,
  /// Cap on resubmission attempts per job; `None` never caps.
  pub resubmission_cap: Option<u32>,
  /// Hold-reason code qualifying a held job for a memory escalation.
  pub memory_hold_reason_code: i64,
  /// Minimum escalated memory request, in MB.
  pub memory_floor_mb: i64,
  /// Stderr lines captured into failure reports.
  pub tail_lines: usize,
  /// Attribute allowlist for failure reports.
  pub interesting_keys: Vec<String>,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      owner: String::new(),
      notify_first_n_resubmissions: 3,
      notify_first_n_failures: 3,
      resubmission_cap: Some(5),
      memory_hold_reason_code: MEMORY_EXCEEDED_HOLD_CODE,
      memory_floor_mb: DEFAULT_MEMORY_FLOOR_MB,
      tail_lines: 10,
      interesting_keys: DEFAULT_INTERESTING_KEYS
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

impl MonitorConfig {
  /// Default configuration for one queue owner.
  pub fn for_owner(owner: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      ..Self::default()
    }
  }

  pub fn reconcile_policy(&self) -> ReconcilePolicy {
    ReconcilePolicy {
      memory_hold_reason_code: self.memory_hold_reason_code,
      memory_floor_mb: self.memory_floor_mb,
      resubmission_cap: self.resubmission_cap,
      tail_lines: self.tail_lines,
      interesting_keys: self.interesting_keys.clone(),
    }
  }

  pub fn digest_policy(&self) -> DigestPolicy {
    DigestPolicy {
      notify_first_n_resubmissions: self.notify_first_n_resubmissions,
      notify_first_n_failures: self.notify_first_n_failures,
    }
  }
}
