//! Deterministic cache keys for resource reads.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Key for a cached read: a resource kind plus a normalized parameter set.
///
/// Parameters are kept sorted and null values are dropped, so two queries that
/// differ only in the order of their fields or in absent optional fields map
/// to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  kind: String,
  params: BTreeMap<String, Value>,
}

impl CacheKey {
  pub fn new(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      params: BTreeMap::new(),
    }
  }

  /// Build a key from any collection of parameter pairs.
  pub fn with_params<I, K>(kind: impl Into<String>, params: I) -> Self
  where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
  {
    let params = params
      .into_iter()
      .filter(|(_, v)| !v.is_null())
      .map(|(k, v)| (k.into(), v))
      .collect();
    Self {
      kind: kind.into(),
      params,
    }
  }

  /// Build a key from a JSON object; anything else yields a parameterless key.
  pub fn from_json(kind: impl Into<String>, params: &Value) -> Self {
    match params {
      Value::Object(map) => Self::with_params(kind, map.iter().map(|(k, v)| (k.clone(), v.clone()))),
      _ => Self::new(kind),
    }
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn params(&self) -> &BTreeMap<String, Value> {
    &self.params
  }

  /// Prefix shared by every key of a resource kind.
  pub fn kind_prefix(kind: &str) -> String {
    format!("{}:", kind)
  }

  /// Query-string pairs in key order, for building the request URL.
  pub fn query_pairs(&self) -> Vec<(String, String)> {
    self
      .params
      .iter()
      .map(|(k, v)| {
        let value = match v {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        (k.clone(), value)
      })
      .collect()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // BTreeMap serializes in key order, and serde_json maps are sorted too
    let params = serde_json::to_string(&self.params).map_err(|_| fmt::Error)?;
    write!(f, "{}:{}", self.kind, params)
  }
}
