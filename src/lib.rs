//! FlockWatch: a batch-cluster lifecycle tracker.
//!
//! Reconciles a locally persisted record of "what we last knew" about each
//! submitted job cluster against a freshly queried snapshot of "what is true
//! now" on the remote scheduler, decides what every job needs (nothing, mark
//! done, mark failed, resubmit with more memory), and compiles noteworthy
//! transitions into a single digest notification per pass.
//!
//! # Features
//!
//! - Closed job-state model ([`JobState`]) with the pass-only
//!   [`RemoteState::Unlisted`] sentinel for jobs the queue no longer lists.
//! - Per-cluster tracking ([`TrackedItem`]) with per-state bucket indexes,
//!   set-equality completion checks and monotonic failure/resubmission
//!   counters.
//! - Point-in-time queue snapshots ([`QueueSnapshot`]) indexed by proc id
//!   and by state.
//! - A reconciliation engine ([`Reconciler`]) implementing the per-job
//!   decision table, including automatic resubmission with an escalated
//!   memory request when a job was held for exceeding its allocation
//!   (hold reason [`MEMORY_EXCEEDED_HOLD_CODE`]), and failure investigation
//!   (history record, queue attributes, stderr tail) on permanent failures.
//! - A configurable cap on resubmission attempts per job
//!   ([`MonitorConfig::resubmission_cap`]) so escalation can never loop
//!   forever.
//! - Event aggregation ([`Digest`]) with per-cluster grouping, priority
//!   ordering and first-N suppression; zero noteworthy events means zero
//!   deliveries.
//! - Section-oriented persistence ([`FileStore`]) with batch-commit
//!   rewrites: a crash mid-pass leaves the last-known-good file.
//! - All external effects behind injected boundary traits:
//!   [`SchedulerClient`], [`TrackedItemStore`], [`FileTail`], [`Notifier`].
//!
//! # Usage
//!
//! ```no_run
//! use flockwatch::{
//!   FileStore, FsTail, MailPipe, Monitor, MonitorConfig,
//! };
//! # use flockwatch::{ClassAd, AdValue, ClientError, JobAction, ProcId, SchedulerClient};
//! # struct MySchedd;
//! # impl SchedulerClient for MySchedd {
//! #   fn query(&self, _: &str, _: u64, _: &[&str]) -> Result<Vec<ClassAd>, ClientError> { Ok(vec![]) }
//! #   fn history(&self, _: u64, _: ProcId, _: &[&str]) -> Result<Vec<ClassAd>, ClientError> { Ok(vec![]) }
//! #   fn edit(&self, _: u64, _: ProcId, _: &str, _: AdValue) -> Result<(), ClientError> { Ok(()) }
//! #   fn act(&self, _: JobAction, _: u64, _: ProcId) -> Result<(), ClientError> { Ok(()) }
//! # }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let client = MySchedd; // your scheduler bindings
//!   let store = FileStore::new("/home/user/.flockwatch/tracked");
//!   let mailer = MailPipe::new("mail", "flockwatch update", "user@example.org");
//!   let config = MonitorConfig::for_owner("user");
//!
//!   let mut monitor = Monitor::new(client, store, FsTail, mailer, config);
//!   let summary = monitor.run_pass()?;
//!   println!(
//!     "reconciled {} clusters, {} finished",
//!     summary.items_updated, summary.items_finished
//!   );
//!   Ok(())
//! }
//! ```
//!
//! # Reconciliation model
//!
//! One pass handles one tracked item at a time, fully: snapshot fetch,
//! decision loop, then a single batched store rewrite after every item has
//! been decided. Jobs are never duplicated during a pass: the engine clones
//! only the per-state index, so remote metadata and history fetched for a
//! job are fetched at most once. A collaborator failure for one cluster
//! skips that cluster (its persisted state untouched) and never disturbs
//! the others.

// Declare modules within the crate
pub mod classad;
pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod events;
pub mod item;
pub mod job;
pub mod monitor;
pub mod queue;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod tail;

// --- Public Re-exports ---

// State model
pub use state::{JobState, RemoteState};

// Records and the scheduler boundary
pub use classad::{attr, AdValue, ClassAd, HISTORY_PROJECTION, QUEUE_PROJECTION};
pub use client::{JobAction, SchedulerClient};

// Core data model
pub use item::{Completion, MonitorLevel, StateCounts, StateIndex, TrackedItem};
pub use job::{Job, JobId, ProcId, StderrTail, EXIT_CODE_MISSING, EXIT_NO_HISTORY};
pub use queue::{QueueEntry, QueueSnapshot};

// Engine and events
pub use events::{Event, EventCode, EventKind, FailureReport};
pub use reconcile::{
  ReconcileOutcome, ReconcilePolicy, Reconciler, DEFAULT_MEMORY_FLOOR_MB,
  MEMORY_EXCEEDED_HOLD_CODE,
};

// Aggregation and delivery
pub use digest::{Digest, DigestPolicy, MailPipe, Notifier};

// Persistence
pub use store::{FileStore, LoadedItems, MemoryStore, SectionRecord, TrackedItemStore};

// Control flow and configuration
pub use config::{MonitorConfig, DEFAULT_INTERESTING_KEYS};
pub use monitor::{Monitor, PassSummary, Submission};
pub use tail::{FileTail, FsTail};

// Error types
pub use error::{
  ClientError, MonitorError, ReconcileError, RecordError, StateError, StoreError,
};
