//! Keyword CSV import
//!
//! Finds the keyword and volume columns by header name, asks the model when
//! the headers are ambiguous, and falls back to the first two columns.

use csv::{ReaderBuilder, StringRecord, Trim};
use regex::Regex;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use crate::ai_client::LlmClient;
use crate::error::{ClusterError, Result};
use crate::prompt::build_column_prompt;
use crate::response::strip_code_fence;
use crate::run_log::RunLog;
use crate::types::KeywordRecord;

const KEYWORD_HEADERS: &[&str] = &["keyword", "search term", "query"];
const VOLUME_HEADERS: &[&str] = &["volume", "search volume", "impressions"];

/// Which columns hold the keyword and its volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub keyword: usize,
    pub volume: usize,
}

/// Raw header row and data rows of a CSV file
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

/// Read a CSV into memory; rows may have differing lengths
pub fn read_table<R: Read>(reader: R) -> Result<CsvTable> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.iter().map(String::from).collect();
    let rows = csv_reader.records().collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(CsvTable { headers, rows })
}

fn find_header(headers: &[String], needles: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.to_lowercase();
        needles.iter().any(|n| h.contains(n))
    })
}

/// Header-name heuristics: (keyword column, volume column)
pub fn detect_columns(headers: &[String]) -> (Option<usize>, Option<usize>) {
    (find_header(headers, KEYWORD_HEADERS), find_header(headers, VOLUME_HEADERS))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnReply {
    keyword_index: Option<usize>,
    volume_index: Option<usize>,
}

/// Parse the model's `{"keywordIndex": n, "volumeIndex": n}` reply
pub fn parse_column_reply(text: &str) -> Result<(Option<usize>, Option<usize>)> {
    let reply: ColumnReply = serde_json::from_str(&strip_code_fence(text))
        .map_err(|e| ClusterError::Format(format!("column mapping is not valid JSON: {}", e)))?;
    Ok((reply.keyword_index, reply.volume_index))
}

/// Resolve the column mapping, consulting the model only when a header is missing
pub async fn resolve_columns(
    headers: &[String],
    client: Option<&dyn LlmClient>,
    log: &mut RunLog,
) -> ColumnMapping {
    let (mut keyword, mut volume) = detect_columns(headers);

    if keyword.is_none() || volume.is_none() {
        if let Some(client) = client {
            let prompt = build_column_prompt(headers);
            let reply = match client.complete(&prompt).await {
                Ok(text) => parse_column_reply(&text),
                Err(e) => Err(e),
            };
            match reply {
                Ok((k, v)) => {
                    if let Some(k) = k.filter(|&i| i < headers.len()) {
                        keyword = Some(k);
                    }
                    if let Some(v) = v.filter(|&i| i < headers.len()) {
                        volume = Some(v);
                    }
                }
                Err(e) => log.error("Error identifying columns with LLM", &e),
            }
        }
    }

    ColumnMapping {
        keyword: keyword.unwrap_or(0),
        volume: volume.unwrap_or(1),
    }
}

fn leading_integer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d+").expect("static regex"))
}

/// Leading integer of a volume cell; thousands separators are ignored
pub fn parse_volume(cell: &str) -> Option<i64> {
    let cleaned: String = cell.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    leading_integer()
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
}

/// Turn table rows into keyword records, skipping rows without a keyword
pub fn extract_keywords(table: &CsvTable, mapping: ColumnMapping, log: &mut RunLog) -> Vec<KeywordRecord> {
    let mut keywords = Vec::with_capacity(table.rows.len());

    for (index, row) in table.rows.iter().enumerate() {
        // +2: one for the header row, one for 1-based line numbers
        let line = index + 2;
        let keyword = row.get(mapping.keyword).unwrap_or("").trim();
        if keyword.is_empty() {
            log.info(format!("Empty keyword found at line {}", line));
            continue;
        }
        let volume = row.get(mapping.volume).and_then(parse_volume);
        keywords.push(KeywordRecord::new(keyword, volume));
    }

    keywords
}

/// Load keywords from a CSV file
pub async fn import_keywords_csv(
    path: &Path,
    client: Option<&dyn LlmClient>,
    log: &mut RunLog,
) -> Result<Vec<KeywordRecord>> {
    log.info(format!("Processing file: {}", path.display()));

    let file = std::fs::File::open(path)?;
    let table = read_table(file)?;
    log.info(format!("CSV Headers: {}", table.headers.join(", ")));

    let mapping = resolve_columns(&table.headers, client, log).await;
    tracing::debug!("[Import] keyword column {}, volume column {}", mapping.keyword, mapping.volume);

    let keywords = extract_keywords(&table, mapping, log);
    log.info(format!("Successfully parsed {} keywords", keywords.len()));
    Ok(keywords)
}
