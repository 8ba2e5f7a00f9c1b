//! Label selector rendering for `labelSelector` query parameters.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    Exists,
    DoesNotExist,
    In,
    NotIn,
    GreaterThan,
    LessThan,
    #[serde(untagged)]
    Other(String),
}

impl LabelSelector {
    #[must_use]
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            match_expressions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

impl Requirement {
    #[must_use]
    pub fn new(key: &str, operator: Operator, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    fn first_value(&self) -> &str {
        self.values.first().map_or("", String::as_str)
    }

    /// Selector syntax for this requirement; `None` for operators the API does not know.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        let key = &self.key;
        match &self.operator {
            Operator::Equals => Some(format!("{key}={}", self.first_value())),
            Operator::NotEquals => Some(format!("{key}!={}", self.first_value())),
            Operator::Exists => Some(key.clone()),
            Operator::DoesNotExist => Some(format!("!{key}")),
            Operator::In => Some(format!("{key} in ({})", self.values.join(","))),
            Operator::NotIn => Some(format!("{key} notin ({})", self.values.join(","))),
            Operator::GreaterThan => Some(format!("{key} > {}", self.first_value())),
            Operator::LessThan => Some(format!("{key} < {}", self.first_value())),
            Operator::Other(_) => None,
        }
    }
}

/// Match labels sorted by key, then expressions in declaration order.
#[must_use]
pub fn selector_to_string(selector: &LabelSelector) -> String {
    selector
        .match_labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .chain(selector.match_expressions.iter().filter_map(Requirement::render))
        .join(",")
}
