//! Global cluster accumulation across batches
//!
//! Clusters are keyed by exact, case-sensitive name. Keywords are appended in
//! call order and never deduplicated.

use std::collections::HashMap;

use crate::run_log::RunLog;
use crate::types::{ClusterCandidate, GlobalCluster};

/// Counts from a single merge call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub merged: usize,
    pub skipped: usize,
}

/// Insertion-ordered name → cluster map
#[derive(Debug, Default, Clone)]
pub struct ClusterSet {
    clusters: Vec<GlobalCluster>,
    index: HashMap<String, usize>,
}

impl ClusterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch's candidates into the set
    pub fn merge(&mut self, candidates: Vec<ClusterCandidate>, log: &mut RunLog) -> MergeStats {
        let mut stats = MergeStats::default();

        for candidate in candidates {
            if !candidate.is_mergeable() {
                log.error("Invalid batch cluster format", &format!("{:?}", candidate));
                stats.skipped += 1;
                continue;
            }

            let ClusterCandidate { name, keywords, intent } = candidate;
            let keywords = keywords.unwrap_or_default();

            match self.index.get(&name) {
                Some(&pos) => {
                    let existing = &mut self.clusters[pos];
                    if let (Some(new), Some(kept)) = (intent, existing.intent) {
                        if new != kept {
                            log.info(format!(
                                "Cluster {} returned as {}, keeping {}",
                                name, new, kept
                            ));
                        }
                    }
                    if existing.intent.is_none() {
                        existing.intent = intent;
                    }
                    log.info(format!(
                        "Merged {} keywords into existing cluster: {}",
                        keywords.len(),
                        name
                    ));
                    existing.keywords.extend(keywords);
                    stats.merged += 1;
                }
                None => {
                    log.info(format!(
                        "Created new cluster: {} with {} keywords",
                        name,
                        keywords.len()
                    ));
                    self.index.insert(name.clone(), self.clusters.len());
                    self.clusters.push(GlobalCluster { name, keywords, intent });
                    stats.created += 1;
                }
            }
        }

        stats
    }

    pub fn get(&self, name: &str) -> Option<&GlobalCluster> {
        self.index.get(name).map(|&pos| &self.clusters[pos])
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> &[GlobalCluster] {
        &self.clusters
    }

    pub fn into_clusters(self) -> Vec<GlobalCluster> {
        self.clusters
    }
}
