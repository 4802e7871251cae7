//! Aggregates raised events into one deduplicated, priority-ordered
//! notification per pass.

use std::io::Write as _;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::ClientError;
use crate::events::{Event, EventCode, EventKind};
use crate::item::MonitorLevel;
use crate::state::JobState;

/// Per-pass suppression thresholds for the digest.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DigestPolicy {
  /// Include resubmission messages only for the first N resubmissions of an
  /// item.
  pub notify_first_n_resubmissions: u64,
  /// Include failure-detail messages only for the first N failures of an
  /// item.
  pub notify_first_n_failures: u64,
}

/// The consumed notification-transport boundary.
pub trait Notifier {
  fn deliver(&self, text: &str) -> Result<(), ClientError>;
}

impl<T: Notifier + ?Sized> Notifier for &T {
  fn deliver(&self, text: &str) -> Result<(), ClientError> {
    (**self).deliver(text)
  }
}

/// Notifier piping the compiled text to a local mail command.
#[derive(Debug, Clone)]
pub struct MailPipe {
  command: String,
  subject: String,
  recipient: String,
}

impl MailPipe {
  pub fn new(
    command: impl Into<String>,
    subject: impl Into<String>,
    recipient: impl Into<String>,
  ) -> Self {
    Self {
      command: command.into(),
      subject: subject.into(),
      recipient: recipient.into(),
    }
  }
}

impl Notifier for MailPipe {
  fn deliver(&self, text: &str) -> Result<(), ClientError> {
    // The mail body goes through a shell-adjacent tool; quotes have a
    // history of breaking it, so they are stripped.
    let body: String = text.chars().filter(|c| *c != '"' && *c != '\'').collect();
    let mut child = Command::new(&self.command)
      .arg("-s")
      .arg(&self.subject)
      .arg(&self.recipient)
      .stdin(Stdio::piped())
      .spawn()
      .map_err(|e| ClientError::with_source(format!("failed to spawn {}", self.command), e))?;
    if let Some(stdin) = child.stdin.as_mut() {
      stdin
        .write_all(body.as_bytes())
        .map_err(|e| ClientError::with_source("failed to write mail body", e))?;
    }
    let status = child
      .wait()
      .map_err(|e| ClientError::with_source(format!("failed to wait for {}", self.command), e))?;
    if !status.success() {
      return Err(ClientError::msg(format!(
        "{} exited with {status}",
        self.command
      )));
    }
    info!(recipient = %self.recipient, "notification delivered");
    Ok(())
  }
}

/// Collects events across one pass and compiles them into a single report.
#[derive(Debug, Default)]
pub struct Digest {
  events: Vec<Event>,
}

impl Digest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, event: Event) {
    debug!(cluster_id = event.cluster_id, code = ?event.code(), "recorded event");
    self.events.push(event);
  }

  pub fn record_all(&mut self, events: impl IntoIterator<Item = Event>) {
    for event in events {
      self.record(event);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  /// Compiles the recorded events into one report.
  ///
  /// Monitoring events are processed last so a monitoring summary knows
  /// whether anything else already fired for its cluster. Messages are
  /// grouped per cluster and emitted in ascending priority order within the
  /// group. Returns `None` when nothing was noteworthy; no delivery should
  /// happen then.
  pub fn compile(&self, policy: &DigestPolicy) -> Option<String> {
    let mut ordered: Vec<&Event> = self.events.iter().collect();
    ordered.sort_by_key(|event| matches!(event.kind, EventKind::Monitoring { .. }) as u8);

    // Sections keyed by cluster, in first-seen order.
    let mut sections: Vec<(u64, Vec<(i32, String)>)> = Vec::new();
    for event in ordered {
      let slot = match sections.iter().position(|(id, _)| *id == event.cluster_id) {
        Some(slot) => slot,
        None => {
          sections.push((event.cluster_id, Vec::new()));
          sections.len() - 1
        }
      };
      let section = &mut sections[slot].1;
      if let Some(rendered) = render(event, policy, !section.is_empty()) {
        section.push(rendered);
      } else {
        debug!(
          cluster_id = event.cluster_id,
          code = ?event.code(),
          "event not noteworthy, suppressed"
        );
      }
    }

    let mut text: Vec<String> = Vec::new();
    for (_, mut messages) in sections {
      messages.sort_by_key(|(priority, _)| *priority);
      text.extend(messages.into_iter().map(|(_, message)| message));
    }
    if text.is_empty() {
      debug!("no noteworthy event happened, nothing to deliver");
      return None;
    }
    Some(text.join("\n"))
  }
}

/// Renders one event to `(priority, message)`, or `None` when the
/// suppression policy swallows it.
fn render(event: &Event, policy: &DigestPolicy, others_fired: bool) -> Option<(i32, String)> {
  match &event.kind {
    EventKind::ClusterFinished {
      n_done,
      n_failed,
      n_all,
    } => {
      let pct = |n: usize| {
        if *n_all == 0 {
          0.0
        } else {
          100.0 * n as f64 / *n_all as f64
        }
      };
      Some((
        80,
        format!(
          "Cluster {} is finished: {} ({:.2}%) done, {} ({:.2}%) failed",
          event.cluster_id,
          n_done,
          pct(*n_done),
          n_failed,
          pct(*n_failed)
        ),
      ))
    }
    EventKind::JobResubmitted {
      proc_id,
      old_request_mb,
      new_request_mb,
      resubmission_count,
    } => {
      if *resubmission_count > policy.notify_first_n_resubmissions {
        return None;
      }
      let details = match old_request_mb {
        Some(old) => format!(
          "resubmitted with RequestMemory {old} -> {new_request_mb} MB (resubmission {resubmission_count})"
        ),
        None => format!(
          "resubmitted with RequestMemory {new_request_mb} MB (resubmission {resubmission_count})"
        ),
      };
      Some((10, format!("Job {proc_id}: {details}")))
    }
    EventKind::JobPermanentlyFailed {
      proc_id,
      failure_count,
      report,
    } => {
      if *failure_count > policy.notify_first_n_failures {
        return None;
      }
      let mut message = vec![format!("Details for failure of job {proc_id}:")];
      if !report.history.is_empty() {
        message.push(format!("History: {}", join_pairs(&report.history)));
      }
      if !report.queue_ad.is_empty() {
        message.push(format!("ClassAd: {}", join_pairs(&report.queue_ad)));
      }
      if let Some(stderr) = &report.stderr {
        message.push(format!(
          "Tail of {}:\n{}",
          stderr.path.display(),
          stderr.lines.join("\n")
        ));
      }
      Some((20, message.join("\n")))
    }
    EventKind::Monitoring {
      monitor_level,
      old,
      new,
    } => {
      if *monitor_level != MonitorLevel::High && !others_fired {
        return None;
      }
      let mut message = vec![format!("Cluster {}", event.cluster_id), " previous now".to_string()];
      for state in JobState::ALL {
        message.push(format!("{} {} {}", state, old.get(state), new.get(state)));
      }
      Some((-10, message.join("\n")))
    }
  }
}

fn join_pairs(pairs: &[(String, String)]) -> String {
  pairs
    .iter()
    .map(|(key, value)| format!("{key}: {value}"))
    .collect::<Vec<_>>()
    .join(", ")
}
