//! Parsing of model replies into cluster candidates

use serde_json::Value;

use crate::error::{ClusterError, Result};
use crate::types::{ClusterCandidate, IntentType};

/// Remove a surrounding markdown code fence, if the model added one
pub(crate) fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        trimmed
            .lines()
            .skip(1)
            .take_while(|l| !l.starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        trimmed.to_string()
    }
}

/// Parse one batch reply.
///
/// Returns `Err(Format)` when the text is not JSON or has no `clusters` list.
/// Individual malformed candidates are kept; see [`invalid_candidates`].
pub fn parse_cluster_response(text: &str) -> Result<Vec<ClusterCandidate>> {
    let json_text = strip_code_fence(text);

    let json: Value = serde_json::from_str(&json_text)
        .map_err(|e| ClusterError::Format(format!("response is not valid JSON: {}", e)))?;

    let clusters = json
        .get("clusters")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ClusterError::Format("clusters must be an array".to_string()))?;

    Ok(clusters.iter().map(candidate_from_value).collect())
}

fn candidate_from_value(value: &Value) -> ClusterCandidate {
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let keywords = value.get("keywords").and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    });

    let intent = value
        .get("type")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<IntentType>().ok());

    ClusterCandidate { name, keywords, intent }
}

/// Index and reason for every candidate missing a required field
pub fn invalid_candidates(candidates: &[ClusterCandidate]) -> Vec<(usize, ClusterError)> {
    candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.validate().err().map(|e| (i, e)))
        .collect()
}
