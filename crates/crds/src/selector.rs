//! Label selectors
//!
//! `LabelSelector` is the serialized form carried in resource specs
//! (hardware affinity terms). `Selector` is the flattened, evaluable form:
//! a conjunction of requirements that can be matched against a label map
//! or rendered into the `key=value,!key2` text the API server accepts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Label selector to match Kubernetes resources.
///
/// The results of `matchLabels` and `matchExpressions` are AND-ed.
/// An empty label selector matches all objects.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Map of {key,value} pairs, each equivalent to an `In` requirement with a single value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// List of label selector requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// A key, an operator and a set of values
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to
    pub key: String,

    /// Relationship between the key and the values
    pub operator: SelectorOperator,

    /// Values for `In` / `NotIn`; must be empty for `Exists` / `DoesNotExist`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Label selector operator
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One condition of a flattened selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// `key=value`
    Equals(String, String),
    /// `key!=value` (also matches when the key is absent)
    NotEquals(String, String),
    /// `key in (a,b)`
    In(String, BTreeSet<String>),
    /// `key notin (a,b)` (also matches when the key is absent)
    NotIn(String, BTreeSet<String>),
    /// `key`
    Exists(String),
    /// `!key`
    DoesNotExist(String),
}

impl Requirement {
    /// Whether a label map satisfies this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(values: &BTreeSet<String>) -> String {
            values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
        }
        match self {
            Requirement::Equals(key, value) => write!(f, "{key}={value}"),
            Requirement::NotEquals(key, value) => write!(f, "{key}!={value}"),
            Requirement::In(key, values) => write!(f, "{key} in ({})", join(values)),
            Requirement::NotIn(key, values) => write!(f, "{key} notin ({})", join(values)),
            Requirement::Exists(key) => write!(f, "{key}"),
            Requirement::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of label requirements
///
/// The empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector matching every object
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Add a requirement
    #[must_use]
    pub fn with(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Add `key=value`
    #[must_use]
    pub fn equals(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(Requirement::Equals(key.into(), value.into()))
    }

    /// Add `!key`
    #[must_use]
    pub fn without(self, key: impl Into<String>) -> Self {
        self.with(Requirement::DoesNotExist(key.into()))
    }

    /// Whether the selector has no requirements
    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Whether a label map satisfies every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}

impl From<&LabelSelector> for Selector {
    fn from(selector: &LabelSelector) -> Self {
        let mut requirements: Vec<Requirement> = selector
            .match_labels
            .iter()
            .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
            .collect();

        for expr in &selector.match_expressions {
            let values: BTreeSet<String> = expr.values.iter().cloned().collect();
            requirements.push(match expr.operator {
                SelectorOperator::In => Requirement::In(expr.key.clone(), values),
                SelectorOperator::NotIn => Requirement::NotIn(expr.key.clone(), values),
                SelectorOperator::Exists => Requirement::Exists(expr.key.clone()),
                SelectorOperator::DoesNotExist => Requirement::DoesNotExist(expr.key.clone()),
            });
        }

        Self { requirements }
    }
}
