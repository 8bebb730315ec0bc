//! Export of merged clusters as a delimited table or a text summary

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{ClusterError, Result};
use crate::types::{GlobalCluster, IntentType, KeywordRecord};

pub const EXPORT_HEADERS: [&str; 5] = [
    "Cluster Type",
    "Cluster Name",
    "Cluster Volume",
    "Keyword",
    "Keyword Volume",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Csv,
    Tsv,
}

impl Delimiter {
    fn byte(&self) -> u8 {
        match self {
            Delimiter::Csv => b',',
            Delimiter::Tsv => b'\t',
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Delimiter::Csv => "csv",
            Delimiter::Tsv => "tsv",
        }
    }
}

impl FromStr for Delimiter {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Delimiter::Csv),
            "tsv" => Ok(Delimiter::Tsv),
            other => Err(ClusterError::Validation(format!("unknown export format: {}", other))),
        }
    }
}

/// Keyword -> volume lookup. The first occurrence of a keyword wins.
pub struct VolumeIndex<'a> {
    volumes: HashMap<&'a str, i64>,
}

impl<'a> VolumeIndex<'a> {
    pub fn new(keywords: &'a [KeywordRecord]) -> Self {
        let mut volumes = HashMap::with_capacity(keywords.len());
        for record in keywords {
            volumes
                .entry(record.keyword.as_str())
                .or_insert(record.volume.unwrap_or(0));
        }
        Self { volumes }
    }

    pub fn volume(&self, keyword: &str) -> i64 {
        self.volumes.get(keyword).copied().unwrap_or(0)
    }

    pub fn cluster_volume(&self, cluster: &GlobalCluster) -> i64 {
        cluster.keywords.iter().map(|k| self.volume(k)).sum()
    }
}

/// Clusters of one intent, in merge order
fn clusters_of(clusters: &[GlobalCluster], intent: IntentType) -> impl Iterator<Item = &GlobalCluster> {
    clusters.iter().filter(move |c| c.intent == Some(intent))
}

// Zero and unknown volumes render as an empty cell
fn volume_cell(volume: i64) -> String {
    if volume == 0 {
        String::new()
    } else {
        volume.to_string()
    }
}

/// Flat table: paid clusters first, then organic. Cluster name and volume
/// appear only on the first row of each cluster.
pub fn export_table(clusters: &[GlobalCluster], keywords: &[KeywordRecord], delimiter: Delimiter) -> Result<String> {
    let volumes = VolumeIndex::new(keywords);
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter.byte())
        .from_writer(Vec::new());

    writer.write_record(EXPORT_HEADERS)?;

    for intent in [IntentType::Paid, IntentType::Organic] {
        for cluster in clusters_of(clusters, intent) {
            let cluster_volume = volumes.cluster_volume(cluster).to_string();
            for (index, keyword) in cluster.keywords.iter().enumerate() {
                let (name, total) = if index == 0 {
                    (cluster.name.as_str(), cluster_volume.as_str())
                } else {
                    ("", "")
                };
                writer.write_record([
                    intent.label(),
                    name,
                    total,
                    keyword.as_str(),
                    volume_cell(volumes.volume(keyword)).as_str(),
                ])?;
            }
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ClusterError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| ClusterError::Format(format!("export is not UTF-8: {}", e)))
}

fn format_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

/// Human-readable listing grouped by intent
pub fn render_summary(clusters: &[GlobalCluster], keywords: &[KeywordRecord]) -> String {
    let volumes = VolumeIndex::new(keywords);
    let mut sections = Vec::new();

    for (intent, title) in [
        (IntentType::Paid, "Paid Intent Clusters"),
        (IntentType::Organic, "Organic Intent Clusters"),
    ] {
        let group: Vec<&GlobalCluster> = clusters_of(clusters, intent).collect();
        if group.is_empty() {
            continue;
        }

        let mut section = format!("{}\n", title);
        for cluster in group {
            section.push_str(&format!(
                "\n{} ({} keywords) • {} total volume\n",
                cluster.name,
                cluster.keywords.len(),
                format_thousands(volumes.cluster_volume(cluster))
            ));
            for keyword in &cluster.keywords {
                match volumes.volume(keyword) {
                    0 => section.push_str(&format!("  - {}\n", keyword)),
                    v => section.push_str(&format!("  - {} ({})\n", keyword, v)),
                }
            }
        }
        sections.push(section);
    }

    sections.join("\n")
}
