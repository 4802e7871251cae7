//! The scheduler's key/value job records and the attribute names the
//! monitor projects on.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Well-known record attribute names.
pub mod attr {
  pub const CLUSTER_ID: &str = "ClusterId";
  pub const PROC_ID: &str = "ProcId";
  pub const JOB_STATUS: &str = "JobStatus";
  pub const HOLD_REASON: &str = "HoldReason";
  pub const HOLD_REASON_CODE: &str = "HoldReasonCode";
  pub const HOLD_REASON_SUB_CODE: &str = "HoldReasonSubCode";
  pub const MEMORY_USAGE: &str = "MemoryUsage";
  pub const REQUEST_MEMORY: &str = "RequestMemory";
  pub const ERR: &str = "Err";
  pub const EXIT_CODE: &str = "ExitCode";
  pub const SERVER_TIME: &str = "ServerTime";
}

/// The attributes requested from a live queue query.
pub const QUEUE_PROJECTION: &[&str] = &[
  attr::CLUSTER_ID,
  attr::PROC_ID,
  attr::JOB_STATUS,
  attr::HOLD_REASON,
  attr::HOLD_REASON_CODE,
  attr::HOLD_REASON_SUB_CODE,
  attr::MEMORY_USAGE,
  attr::REQUEST_MEMORY,
  attr::ERR,
];

/// The attributes requested from a history query. Empty means "everything":
/// terminal records are the one place the monitor wants the full picture.
pub const HISTORY_PROJECTION: &[&str] = &[];

/// One attribute value in a scheduler record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdValue {
  Int(i64),
  Float(f64),
  Str(String),
  Bool(bool),
  Undefined,
}

impl AdValue {
  pub fn as_int(&self) -> Option<i64> {
    match self {
      AdValue::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      AdValue::Str(s) => Some(s),
      _ => None,
    }
  }
}

impl fmt::Display for AdValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AdValue::Int(i) => i.fmt(f),
      AdValue::Float(x) => x.fmt(f),
      AdValue::Str(s) => s.fmt(f),
      AdValue::Bool(b) => b.fmt(f),
      AdValue::Undefined => f.write_str("undefined"),
    }
  }
}

impl From<i64> for AdValue {
  fn from(v: i64) -> Self {
    AdValue::Int(v)
  }
}

impl From<f64> for AdValue {
  fn from(v: f64) -> Self {
    AdValue::Float(v)
  }
}

impl From<&str> for AdValue {
  fn from(v: &str) -> Self {
    AdValue::Str(v.to_string())
  }
}

impl From<String> for AdValue {
  fn from(v: String) -> Self {
    AdValue::Str(v)
  }
}

impl From<bool> for AdValue {
  fn from(v: bool) -> Self {
    AdValue::Bool(v)
  }
}

/// A scheduler job record: an ordered attribute map as returned by queue and
/// history queries.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassAd {
  attrs: BTreeMap<String, AdValue>,
}

impl ClassAd {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts an attribute, replacing any previous value.
  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AdValue>) -> &mut Self {
    self.attrs.insert(name.into(), value.into());
    self
  }

  pub fn get(&self, name: &str) -> Option<&AdValue> {
    self.attrs.get(name)
  }

  pub fn get_int(&self, name: &str) -> Option<i64> {
    self.attrs.get(name).and_then(AdValue::as_int)
  }

  pub fn get_str(&self, name: &str) -> Option<&str> {
    self.attrs.get(name).and_then(AdValue::as_str)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.attrs.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.attrs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.attrs.is_empty()
  }

  pub fn iter(&self) -> btree_map::Iter<'_, String, AdValue> {
    self.attrs.iter()
  }

  /// Renders the attributes named in `keys` that are present in this record,
  /// in the order `keys` lists them. Used for failure diagnostics.
  pub fn filtered(&self, keys: &[String]) -> Vec<(String, String)> {
    keys
      .iter()
      .filter_map(|key| {
        self
          .attrs
          .get(key)
          .map(|value| (key.clone(), value.to_string()))
      })
      .collect()
  }
}

impl FromIterator<(String, AdValue)> for ClassAd {
  fn from_iter<I: IntoIterator<Item = (String, AdValue)>>(iter: I) -> Self {
    Self {
      attrs: iter.into_iter().collect(),
    }
  }
}
