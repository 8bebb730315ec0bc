//! Suggested-cluster hints: parsing and relevance check
//!
//! Hints are written one per line as `Cluster Name | paid` or
//! `Cluster Name | organic`.

use std::collections::HashSet;

use crate::error::{ClusterError, Result};
use crate::types::{IntentType, KeywordRecord, SuggestedCluster};

/// Parse a pipe-delimited hint block.
///
/// Blank input means no suggestions. A single malformed line invalidates the
/// whole block.
pub fn parse_suggested_clusters(text: &str) -> Result<Option<Vec<SuggestedCluster>>> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let mut suggestions = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        let (name, kind) = match fields.as_slice() {
            [name, kind] if !name.is_empty() && !kind.is_empty() => (*name, *kind),
            _ => {
                return Err(ClusterError::Validation(format!(
                    "line {}: expected 'name | paid|organic', got '{}'",
                    i + 1,
                    line
                )))
            }
        };

        let intent = kind
            .parse::<IntentType>()
            .map_err(|e| ClusterError::Validation(format!("line {}: {}", i + 1, e)))?;

        suggestions.push(SuggestedCluster {
            name: name.to_string(),
            intent,
        });
    }

    Ok(Some(suggestions))
}

/// True when at least one suggestion shares a word with the keyword set.
///
/// A word matches a keyword when they are equal or either contains the other,
/// compared lower-cased. No suggestions at all is trivially accepted.
pub fn validate_suggestions(suggestions: Option<&[SuggestedCluster]>, keywords: &[KeywordRecord]) -> bool {
    let suggestions = match suggestions {
        Some(list) if !list.is_empty() => list,
        _ => return true,
    };

    let vocabulary: HashSet<String> = keywords.iter().map(|k| k.keyword.to_lowercase()).collect();

    suggestions.iter().any(|cluster| {
        let name = cluster.name.to_lowercase();
        name.split_whitespace().any(|word| {
            vocabulary.contains(word)
                || vocabulary
                    .iter()
                    .any(|k| k.contains(word) || word.contains(k.as_str()))
        })
    })
}
