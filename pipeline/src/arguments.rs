use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Context key holding the scheduler-argument templates applied to every job.
pub const SCHEDULER_ARGS_KEY: &str = "msub_arguments";
/// Context keys holding default directory templates.
pub const WORKDIR_KEY: &str = "workdir";
pub const OUTDIR_KEY: &str = "outdir";
pub const ERRDIR_KEY: &str = "errdir";
/// Directory used when the context doesn't name one.
pub const DEFAULT_DIR: &str = ".";

/// A single value in an argument context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Num(serde_json::Number),
    List(Vec<String>),
}

impl fmt::Display for Value {
    /// How the value reads when substituted into a template.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(n) => write!(f, "{n}"),
            Self::List(items) => f.write_str(&items.join(" ")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Num(n.into())
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(str::to_owned).collect())
    }
}

/// Immutable mapping from names to values, used to expand templates.
///
/// Keys are kept sorted so serialized contexts diff cleanly.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments {
    values: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this context with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// New context with every key of `other` written over this one's.
    /// Neither input is modified.
    pub fn merge(&self, other: Option<&Arguments>) -> Arguments {
        let mut values = self.values.clone();
        if let Some(other) = other {
            for (k, v) in &other.values {
                values.insert(k.clone(), v.clone());
            }
        }
        Arguments { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Scheduler-argument templates; a single string counts as one argument.
    pub fn scheduler_args(&self) -> Vec<String> {
        match self.get(SCHEDULER_ARGS_KEY) {
            Some(Value::List(items)) => items.clone(),
            Some(other) => vec![other.to_string()],
            None => Vec::with_capacity(0),
        }
    }

    /// The (unresolved) directory template stored under `key`, or `"."`.
    pub fn dir_or_default(&self, key: &str) -> String {
        self.get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| DEFAULT_DIR.to_owned())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
