//! Telemetry values and the timestamped record written to the cache.
//!
//! A [`Record`] serializes to exactly one compact JSON line:
//!
//! ```text
//! {"ts":1704067200000,"values":{"humidity":41,"temp_porch":38.4}}
//! ```
//!
//! `serde_json` escapes control characters inside strings, so the serialized
//! form never contains a raw newline and a cache file stays one record per
//! line.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Sentinel reported by producers in place of a reading they could not take.
pub const SENSOR_ERROR: &str = "error";

/// A single scalar metric value.
///
/// Untagged so the JSON stays `"temp": 71.6` rather than a tagged object.
/// Integers are tried first so whole numbers round-trip without a `.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// `true` for the [`SENSOR_ERROR`] sentinel.
    pub fn is_sensor_error(&self) -> bool {
        matches!(self, Value::Text(s) if s == SENSOR_ERROR)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Value::Float(v as f64), Value::Integer)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Metric name to value mapping. Ordered so serialized output is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(BTreeMap<String, Value>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert a float only when it is finite.
    ///
    /// JSON has no NaN/inf; `serde_json` would write `null`, which does not
    /// read back as a [`Value`].
    pub fn insert_finite(&mut self, key: impl Into<String>, value: f64) {
        if value.is_finite() {
            self.0.insert(key.into(), Value::Float(value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn extend(&mut self, other: Values) {
        self.0.extend(other.0);
    }

    /// Compact JSON body for an HTTP submission.
    pub fn to_json(&self) -> String {
        // A string-keyed map of plain scalars cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Values {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One timestamped telemetry submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    pub values: Values,
}

impl Record {
    pub fn new(ts: u64, values: Values) -> Self {
        Self { ts, values }
    }

    /// Stamp `values` with the current wall-clock time.
    pub fn now(values: Values) -> Self {
        Self::new(unix_ms_now(), values)
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!("{{\"ts\":{},\"values\":{{}}}}", self.ts))
    }

    /// Parse one cache line. Surrounding whitespace (including `\r`) is ignored.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
