//! Prompt construction for keyword clustering
//!
//! Pure functions: identical inputs always produce identical prompts.

use crate::types::{KeywordRecord, SuggestedCluster};

/// System message sent alongside every clustering prompt
pub const SYSTEM_PROMPT: &str = "You are a keyword clustering expert. Create precise, specific clusters based on exact themes and distinguish between paid and organic intent.";

const CLUSTERING_PRINCIPLES: &str = r#"You are an LLM responsible for clustering up to 2,000+ keywords from a CSV file. Your task is to create precise, specific clusters based on exact themes within the dataset.

Step 1: Clustering Principles
    1. Create granular, specific clusters instead of broad categories
    2. Each cluster should represent a distinct theme or specific attraction
    3. Avoid overly broad categories like "Tours" or "Tickets"
    4. Use the exact location/attraction name in cluster titles
    5. Distinguish between paid and organic intent

Step 2: Cluster Types and Examples

A. Paid Intent Clusters (Transactional):
    • Specific attraction + transaction type:
      - "Statue of Liberty Tickets"
      - "Ellis Island Ferry Pass"
      - "Liberty Island Cruise Tickets"
    • Specific tour packages:
      - "Statue of Liberty Guided Tour"
      - "Ellis Island Audio Tour"
      - "Liberty Island Skip-the-Line Tour"

B. Organic Intent Clusters (Informational):
    • Specific attraction + information type:
      - "Statue of Liberty History"
      - "Ellis Island Visitor Guide"
      - "Liberty Island Facts"
    • Specific attraction + experience:
      - "Statue of Liberty Viewing Tips"
      - "Ellis Island Museum Guide"
      - "Liberty Island Photo Spots"

Step 3: Clustering Rules
    • Create specific clusters based on exact themes in the data
    • Each keyword belongs to only one cluster
    • Use only provided keywords (no new ones)
    • Account for spelling variations
    • Include location/attraction names in cluster titles
    • Separate paid and organic intent into different clusters
    • Avoid generic categories unless no specific theme exists"#;

const OUTPUT_SCHEMA: &str = r#"Please provide the clusters in the following JSON format:
{
    "clusters": [
        {
            "name": "Specific Cluster Name",
            "keywords": ["keyword1", "keyword2", ...],
            "type": "paid" or "organic"
        }
    ]
}"#;

/// Build the clustering prompt for one batch.
///
/// The suggested-clusters step is only included when at least one hint is given.
pub fn build_cluster_prompt(batch: &[KeywordRecord], suggestions: Option<&[SuggestedCluster]>) -> String {
    let suggestions_section = match suggestions {
        Some(list) if !list.is_empty() => suggestions_section(list),
        _ => String::new(),
    };

    let keyword_lines = batch
        .iter()
        .map(|k| k.keyword.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{principles}{suggestions}\n\nKeywords to analyze:\n{keywords}\n\n{schema}",
        principles = CLUSTERING_PRINCIPLES,
        suggestions = suggestions_section,
        keywords = keyword_lines,
        schema = OUTPUT_SCHEMA,
    )
}

fn suggestions_section(list: &[SuggestedCluster]) -> String {
    let hints = list
        .iter()
        .map(|c| format!("      - \"{}\" ({})", c.name, c.intent))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"

Step 4: Suggested Clusters
    • Use the following suggested clusters if they are relevant to the keywords:
{hints}
    • Only use suggested clusters that are relevant to the keywords
    • Create additional clusters if needed for unclustered keywords
    • Maintain the same cluster type (paid/organic) as suggested"#,
        hints = hints
    )
}

/// Ask the model which CSV columns hold keywords and volumes
pub fn build_column_prompt(headers: &[String]) -> String {
    format!(
        r#"Analyze these CSV headers and identify which columns contain keyword/search terms and volume data. Headers: {}. Return JSON format: {{"keywordIndex": number, "volumeIndex": number}}"#,
        headers.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntentType;

    fn batch() -> Vec<KeywordRecord> {
        vec![
            KeywordRecord::new("statue of liberty tickets", Some(5400)),
            KeywordRecord::new("statue of liberty history", None),
        ]
    }

    #[test]
    fn test_prompt_lists_batch_keywords_without_volume() {
        let prompt = build_cluster_prompt(&batch(), None);
        assert!(prompt.contains("Keywords to analyze:\nstatue of liberty tickets\nstatue of liberty history\n"));
        assert!(!prompt.contains("5400"));
        assert!(prompt.contains(r#""clusters": ["#));
        assert!(!prompt.contains("Step 4: Suggested Clusters"));
    }

    #[test]
    fn test_prompt_includes_suggestions_when_present() {
        let hints = vec![SuggestedCluster {
            name: "Statue of Liberty Tickets".into(),
            intent: IntentType::Paid,
        }];
        let prompt = build_cluster_prompt(&batch(), Some(&hints));
        assert!(prompt.contains("Step 4: Suggested Clusters"));
        assert!(prompt.contains(r#"- "Statue of Liberty Tickets" (paid)"#));
    }

    #[test]
    fn test_empty_suggestion_list_is_omitted() {
        let prompt = build_cluster_prompt(&batch(), Some(&[]));
        assert!(!prompt.contains("Step 4"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        assert_eq!(build_cluster_prompt(&batch(), None), build_cluster_prompt(&batch(), None));
    }

    #[test]
    fn test_column_prompt() {
        let prompt = build_column_prompt(&["Term".into(), "Searches".into()]);
        assert!(prompt.contains("Headers: Term, Searches."));
        assert!(prompt.contains(r#"{"keywordIndex": number, "volumeIndex": number}"#));
    }
}
