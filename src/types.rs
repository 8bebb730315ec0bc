//! Data model shared by the clustering pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClusterError;

/// One row from the keyword CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub keyword: String,
    pub volume: Option<i64>,
}

impl KeywordRecord {
    pub fn new(keyword: impl Into<String>, volume: Option<i64>) -> Self {
        Self { keyword: keyword.into(), volume }
    }
}

/// Search intent of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    /// Transactional
    Paid,
    /// Informational
    Organic,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Paid => "paid",
            IntentType::Organic => "organic",
        }
    }

    /// Capitalized label used in exported tables
    pub fn label(&self) -> &'static str {
        match self {
            IntentType::Paid => "Paid",
            IntentType::Organic => "Organic",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = ClusterError;

    /// Case-insensitive; surrounding whitespace is ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paid" => Ok(IntentType::Paid),
            "organic" => Ok(IntentType::Organic),
            other => Err(ClusterError::Validation(format!(
                "intent type must be 'paid' or 'organic', got '{}'",
                other
            ))),
        }
    }
}

/// User-authored hint that biases the prompt toward a cluster name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedCluster {
    pub name: String,
    #[serde(rename = "type")]
    pub intent: IntentType,
}

/// One cluster as returned by the model for a single batch.
///
/// Malformed candidates are kept so the merger can decide what to skip:
/// `name` is empty when missing, `keywords` is `None` when the model did not
/// return a list, `intent` is `None` when missing or unrecognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCandidate {
    pub name: String,
    pub keywords: Option<Vec<String>>,
    pub intent: Option<IntentType>,
}

impl ClusterCandidate {
    pub fn new(name: impl Into<String>, keywords: Vec<String>, intent: IntentType) -> Self {
        Self {
            name: name.into(),
            keywords: Some(keywords),
            intent: Some(intent),
        }
    }

    /// Check the fields the model is required to return
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.name.trim().is_empty() {
            return Err(ClusterError::Format("cluster is missing a name".into()));
        }
        if self.keywords.is_none() {
            return Err(ClusterError::Format(format!(
                "cluster '{}' has no keyword list",
                self.name
            )));
        }
        if self.intent.is_none() {
            return Err(ClusterError::Format(format!(
                "cluster '{}' has no paid/organic type",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether the merger can fold this candidate in
    pub fn is_mergeable(&self) -> bool {
        !self.name.is_empty() && self.keywords.is_some()
    }
}

/// A cluster accumulated across every batch of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCluster {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(rename = "type")]
    pub intent: Option<IntentType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse_is_case_insensitive() {
        assert_eq!("Paid".parse::<IntentType>().unwrap(), IntentType::Paid);
        assert_eq!(" ORGANIC ".parse::<IntentType>().unwrap(), IntentType::Organic);
        assert!("brand".parse::<IntentType>().is_err());
    }

    #[test]
    fn test_candidate_validation() {
        let ok = ClusterCandidate::new("Tickets", vec!["a".into()], IntentType::Paid);
        assert!(ok.validate().is_ok());

        let no_type = ClusterCandidate { intent: None, ..ok.clone() };
        assert!(no_type.validate().is_err());
        assert!(no_type.is_mergeable());

        let no_keywords = ClusterCandidate { keywords: None, ..ok.clone() };
        assert!(no_keywords.validate().is_err());
        assert!(!no_keywords.is_mergeable());

        let no_name = ClusterCandidate { name: String::new(), ..ok };
        assert!(!no_name.is_mergeable());
    }

    #[test]
    fn test_global_cluster_serializes_type_field() {
        let cluster = GlobalCluster {
            name: "Statue of Liberty Tickets".into(),
            keywords: vec!["statue of liberty tickets".into()],
            intent: Some(IntentType::Paid),
        };
        let json = serde_json::to_value(&cluster).unwrap();
        assert_eq!(json["type"], "paid");
    }
}
