//! Sequential batch processing
//!
//! Keywords are split into fixed-size batches and sent to the model one batch
//! at a time. Cancellation is checked before each request; a request that has
//! started always finishes first.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::ai_client::LlmClient;
use crate::error::{ClusterError, Result};
use crate::merge::ClusterSet;
use crate::prompt::build_cluster_prompt;
use crate::response::{invalid_candidates, parse_cluster_response};
use crate::run_log::RunLog;
use crate::types::{ClusterCandidate, KeywordRecord, SuggestedCluster};
use crate::utils::safe_truncate;

/// Progress after a finished batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub elapsed_secs: f64,
    /// Unknown until the first batch completes
    pub eta_secs: Option<f64>,
    pub clusters: usize,
}

impl BatchProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// Remaining time projected from the average time per completed batch
pub fn estimate_remaining_secs(completed: usize, total: usize, elapsed_secs: f64) -> Option<f64> {
    if completed == 0 {
        return None;
    }
    let avg = elapsed_secs / completed as f64;
    Some(avg * total.saturating_sub(completed) as f64)
}

/// Contiguous slices of at most `batch_size` records, in input order
pub fn create_batches(records: &[KeywordRecord], batch_size: usize) -> Vec<&[KeywordRecord]> {
    records.chunks(batch_size.max(1)).collect()
}

/// Run-scoped state handed to the scheduler
pub struct BatchContext<'a> {
    pub cancel: Arc<AtomicBool>,
    pub log: &'a mut RunLog,
    pub on_progress: &'a mut (dyn FnMut(&BatchProgress) + Send),
}

impl BatchContext<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// What a scheduler run produced
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub clusters: ClusterSet,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

pub struct BatchScheduler<'a> {
    client: &'a dyn LlmClient,
    batch_size: usize,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(client: &'a dyn LlmClient, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ClusterError::Config("batch size must be at least 1".into()));
        }
        Ok(Self { client, batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Process every batch in order, merging as we go
    pub async fn run(
        &self,
        keywords: &[KeywordRecord],
        suggestions: Option<&[SuggestedCluster]>,
        ctx: &mut BatchContext<'_>,
    ) -> BatchOutcome {
        let start_time = Instant::now();
        let batches = create_batches(keywords, self.batch_size);
        let total = batches.len();
        let vocabulary: HashSet<&str> = keywords.iter().map(|k| k.keyword.as_str()).collect();

        let mut clusters = ClusterSet::new();
        let mut completed = 0;
        let mut failed = 0;
        let mut cancelled = false;

        ctx.log.info(format!(
            "Processing {} keywords in {} batches of up to {}",
            keywords.len(),
            total,
            self.batch_size
        ));

        for (i, batch) in batches.iter().enumerate() {
            if ctx.is_cancelled() {
                ctx.log.info(format!("Cancelled after {}/{} batches", completed, total));
                cancelled = true;
                break;
            }

            tracing::debug!("[Batch] {}/{}: {} keywords", i + 1, total, batch.len());

            match self.process_batch(batch, suggestions, ctx.log).await {
                Ok(candidates) => {
                    let candidates = drop_unknown_keywords(candidates, &vocabulary, ctx.log);
                    let stats = clusters.merge(candidates, ctx.log);
                    tracing::debug!(
                        "[Batch] {}/{} merged: {} new, {} existing, {} skipped",
                        i + 1, total, stats.created, stats.merged, stats.skipped
                    );
                }
                Err(e) => {
                    failed += 1;
                    ctx.log.error(format!("Error processing batch {}/{}", i + 1, total), &e);
                }
            }

            completed += 1;
            let elapsed = start_time.elapsed().as_secs_f64();
            let progress = BatchProgress {
                completed,
                total,
                elapsed_secs: elapsed,
                eta_secs: estimate_remaining_secs(completed, total, elapsed),
                clusters: clusters.len(),
            };
            (ctx.on_progress)(&progress);
        }

        // A cancel that arrived during the last request still ends the run as cancelled
        if !cancelled && ctx.is_cancelled() {
            ctx.log.info(format!("Cancelled after {}/{} batches", completed, total));
            cancelled = true;
        }

        BatchOutcome {
            clusters,
            total_batches: total,
            completed_batches: completed,
            failed_batches: failed,
            cancelled,
            elapsed_secs: start_time.elapsed().as_secs_f64(),
        }
    }

    /// One model call for one batch. Malformed candidates are logged, not dropped.
    async fn process_batch(
        &self,
        batch: &[KeywordRecord],
        suggestions: Option<&[SuggestedCluster]>,
        log: &mut RunLog,
    ) -> Result<Vec<ClusterCandidate>> {
        let prompt = build_cluster_prompt(batch, suggestions);
        let reply = self.client.complete(&prompt).await?;

        let candidates = parse_cluster_response(&reply).map_err(|e| {
            tracing::debug!("[Batch] Unparseable reply: {}", safe_truncate(&reply, 500));
            e
        })?;

        for (index, err) in invalid_candidates(&candidates) {
            log.error(format!("Invalid cluster format at index {}", index), &err);
        }

        Ok(candidates)
    }
}

/// Keep only keywords that exist in the input; the model may invent some.
/// A candidate left with no keywords at all is removed.
fn drop_unknown_keywords(
    candidates: Vec<ClusterCandidate>,
    vocabulary: &HashSet<&str>,
    log: &mut RunLog,
) -> Vec<ClusterCandidate> {
    candidates
        .into_iter()
        .filter_map(|mut candidate| {
            if let Some(keywords) = candidate.keywords.as_mut() {
                let before = keywords.len();
                keywords.retain(|k| vocabulary.contains(k.as_str()));
                let dropped = before - keywords.len();
                if dropped > 0 && keywords.is_empty() {
                    log.info(format!(
                        "Skipped cluster {}: none of its {} keywords are in the input",
                        candidate.name, dropped
                    ));
                    return None;
                }
                if dropped > 0 {
                    log.info(format!(
                        "Dropped {} keywords not present in the input from cluster: {}",
                        dropped, candidate.name
                    ));
                }
            }
            Some(candidate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::mock::MockLlmClient;

    fn records(n: usize) -> Vec<KeywordRecord> {
        (0..n).map(|i| KeywordRecord::new(format!("kw{}", i), Some(i as i64))).collect()
    }

    #[test]
    fn test_batch_count_and_order() {
        for (n, b) in [(0usize, 200usize), (1, 200), (200, 200), (201, 200), (450, 200), (7, 3), (9, 3)] {
            let input = records(n);
            let batches = create_batches(&input, b);
            assert_eq!(batches.len(), n.div_ceil(b), "n={} b={}", n, b);
            assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= b));

            let flattened: Vec<&KeywordRecord> = batches.iter().flat_map(|batch| batch.iter()).collect();
            let expected: Vec<&KeywordRecord> = input.iter().collect();
            assert_eq!(flattened, expected);
        }
    }

    #[test]
    fn test_last_batch_may_be_shorter() {
        let input = records(450);
        let batches = create_batches(&input, 200);
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![200, 200, 50]);
    }

    #[test]
    fn test_eta_projection() {
        assert_eq!(estimate_remaining_secs(0, 4, 0.0), None);
        assert_eq!(estimate_remaining_secs(1, 4, 10.0), Some(30.0));
        assert_eq!(estimate_remaining_secs(4, 4, 40.0), Some(0.0));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let client = MockLlmClient::new(vec![]);
        assert!(BatchScheduler::new(&client, 0).is_err());
    }

    fn reply(name: &str, keywords: &[&str]) -> Result<String> {
        Ok(serde_json::json!({
            "clusters": [{ "name": name, "keywords": keywords, "type": "paid" }]
        })
        .to_string())
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_abort_run() {
        let client = MockLlmClient::new(vec![
            reply("A", &["kw0", "kw1"]),
            Err(ClusterError::Transport("API error 500".into())),
            Ok("not json at all".into()),
            reply("A", &["kw6"]),
        ]);
        let scheduler = BatchScheduler::new(&client, 2).unwrap();
        let input = records(8);
        let mut log = RunLog::new();
        let mut events = Vec::new();
        let mut on_progress = |p: &BatchProgress| events.push(p.clone());
        let mut ctx = BatchContext {
            cancel: Arc::new(AtomicBool::new(false)),
            log: &mut log,
            on_progress: &mut on_progress,
        };

        let outcome = scheduler.run(&input, None, &mut ctx).await;

        assert_eq!(client.calls(), 4);
        assert_eq!(outcome.total_batches, 4);
        assert_eq!(outcome.completed_batches, 4);
        assert_eq!(outcome.failed_batches, 2);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.clusters.get("A").unwrap().keywords, vec!["kw0", "kw1", "kw6"]);
        assert_eq!(log.error_count(), 2);

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].completed, 1);
        assert!(events[0].eta_secs.is_some());
        assert_eq!(events[3].completed, 4);
        assert_eq!(events[3].eta_secs, Some(0.0));
    }

    #[tokio::test]
    async fn test_each_prompt_holds_only_its_batch() {
        let client = MockLlmClient::new(vec![]);
        let scheduler = BatchScheduler::new(&client, 2).unwrap();
        let input = records(3);
        let mut log = RunLog::new();
        let mut on_progress = |_: &BatchProgress| {};
        let mut ctx = BatchContext {
            cancel: Arc::new(AtomicBool::new(false)),
            log: &mut log,
            on_progress: &mut on_progress,
        };

        scheduler.run(&input, None, &mut ctx).await;

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("kw0\nkw1"));
        assert!(!prompts[0].contains("kw2"));
        assert!(prompts[1].contains("kw2"));
        assert!(!prompts[1].contains("kw0"));
    }

    #[tokio::test]
    async fn test_invented_keywords_are_dropped() {
        let client = MockLlmClient::new(vec![reply("A", &["kw0", "made up"])]);
        let scheduler = BatchScheduler::new(&client, 10).unwrap();
        let input = records(1);
        let mut log = RunLog::new();
        let mut on_progress = |_: &BatchProgress| {};
        let mut ctx = BatchContext {
            cancel: Arc::new(AtomicBool::new(false)),
            log: &mut log,
            on_progress: &mut on_progress,
        };

        let outcome = scheduler.run(&input, None, &mut ctx).await;
        assert_eq!(outcome.clusters.get("A").unwrap().keywords, vec!["kw0"]);
    }

    #[tokio::test]
    async fn test_cluster_of_only_invented_keywords_is_skipped() {
        let client = MockLlmClient::new(vec![Ok(serde_json::json!({
            "clusters": [
                { "name": "A", "keywords": ["made up", "also made up"], "type": "paid" },
                { "name": "B", "keywords": ["kw0"], "type": "organic" }
            ]
        })
        .to_string())]);
        let scheduler = BatchScheduler::new(&client, 10).unwrap();
        let input = records(1);
        let mut log = RunLog::new();
        let mut on_progress = |_: &BatchProgress| {};
        let mut ctx = BatchContext {
            cancel: Arc::new(AtomicBool::new(false)),
            log: &mut log,
            on_progress: &mut on_progress,
        };

        let outcome = scheduler.run(&input, None, &mut ctx).await;

        assert!(outcome.clusters.get("A").is_none());
        assert_eq!(outcome.clusters.len(), 1);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.message == "Skipped cluster A: none of its 2 keywords are in the input"));
    }

    #[tokio::test]
    async fn test_cancel_during_last_batch_is_reported() {
        let client = MockLlmClient::new(vec![reply("A", &["kw0"])]);
        let scheduler = BatchScheduler::new(&client, 1).unwrap();
        let input = records(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let mut log = RunLog::new();
        // Set while the only batch is being processed, after the loop's check
        let mut on_progress = move |_: &BatchProgress| flag.store(true, Ordering::SeqCst);
        let mut ctx = BatchContext {
            cancel,
            log: &mut log,
            on_progress: &mut on_progress,
        };

        let outcome = scheduler.run(&input, None, &mut ctx).await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.completed_batches, 1);
        assert_eq!(outcome.clusters.get("A").unwrap().keywords, vec!["kw0"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_sends_nothing() {
        let client = MockLlmClient::new(vec![]);
        let scheduler = BatchScheduler::new(&client, 1).unwrap();
        let input = records(3);
        let mut log = RunLog::new();
        let mut on_progress = |_: &BatchProgress| {};
        let mut ctx = BatchContext {
            cancel: Arc::new(AtomicBool::new(true)),
            log: &mut log,
            on_progress: &mut on_progress,
        };

        let outcome = scheduler.run(&input, None, &mut ctx).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.completed_batches, 0);
        assert_eq!(client.calls(), 0);
        assert!(outcome.clusters.is_empty());
    }
}
