//! Clustering run state machine
//!
//! `Idle → Running → Completed | Cancelled | Failed`. Setup problems (missing
//! credential, irrelevant suggestions, bad config) fail the run before any
//! batch is sent. Per-batch problems only show up in the run log.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::ai_client::LlmClient;
use crate::batch::{BatchContext, BatchProgress, BatchScheduler};
use crate::error::{ClusterError, Result};
use crate::run_log::RunLog;
use crate::settings::ClusterConfig;
use crate::suggestions::{parse_suggested_clusters, validate_suggestions};
use crate::types::{GlobalCluster, KeywordRecord, SuggestedCluster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled | RunState::Failed)
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::Completed,
            3 => RunState::Cancelled,
            4 => RunState::Failed,
            _ => RunState::Idle,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Completed => 2,
            RunState::Cancelled => 3,
            RunState::Failed => 4,
        }
    }
}

struct RunControl {
    cancel: Arc<AtomicBool>,
    state: AtomicU8,
}

impl RunControl {
    fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }
}

/// Cloneable handle for observing and cancelling a run from elsewhere
#[derive(Clone)]
pub struct RunHandle {
    control: Arc<RunControl>,
}

impl RunHandle {
    /// Request cancellation; takes effect before the next batch is sent
    pub fn cancel(&self) -> Result<()> {
        let state = self.control.state();
        if state != RunState::Running {
            return Err(ClusterError::InvalidState(state.as_str()));
        }
        tracing::info!("[Cancel] Clustering cancel requested");
        self.control.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }
}

/// Result of a finished (or cancelled) run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringReport {
    pub state: RunState,
    pub clusters: Vec<GlobalCluster>,
    pub keyword_count: usize,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub elapsed_secs: f64,
}

pub struct ClusteringOrchestrator<C: LlmClient> {
    client: C,
    config: ClusterConfig,
    control: Arc<RunControl>,
    log: RunLog,
    clusters: Vec<GlobalCluster>,
}

impl<C: LlmClient> ClusteringOrchestrator<C> {
    pub fn new(client: C, config: ClusterConfig) -> Self {
        Self {
            client,
            config,
            control: Arc::new(RunControl {
                cancel: Arc::new(AtomicBool::new(false)),
                state: AtomicU8::new(RunState::Idle.to_u8()),
            }),
            log: RunLog::new(),
            clusters: Vec::new(),
        }
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }

    pub fn cancel(&self) -> Result<()> {
        self.handle().cancel()
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Clusters from the most recent run (partial after cancel or failure)
    pub fn clusters(&self) -> &[GlobalCluster] {
        &self.clusters
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Start a run with already-parsed suggestions
    pub async fn start<F>(
        &mut self,
        keywords: &[KeywordRecord],
        suggestions: Option<Vec<SuggestedCluster>>,
        on_progress: F,
    ) -> Result<ClusteringReport>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        self.reset()?;
        self.run(keywords, suggestions, on_progress).await
    }

    /// Start a run from the raw `name | type` hint block.
    ///
    /// A malformed block is logged and the run continues without suggestions.
    pub async fn start_with_hint_text<F>(
        &mut self,
        keywords: &[KeywordRecord],
        hint_text: Option<&str>,
        on_progress: F,
    ) -> Result<ClusteringReport>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        self.reset()?;
        let suggestions = match hint_text.map(parse_suggested_clusters) {
            Some(Ok(parsed)) => parsed,
            Some(Err(e)) => {
                self.log.error("Error parsing suggested clusters", &e);
                None
            }
            None => None,
        };
        self.run(keywords, suggestions, on_progress).await
    }

    fn reset(&mut self) -> Result<()> {
        if self.state() == RunState::Running {
            return Err(ClusterError::InvalidState(RunState::Running.as_str()));
        }
        self.log.clear();
        self.clusters.clear();
        self.control.cancel.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn fail(&mut self, err: ClusterError) -> ClusterError {
        self.log.error("Clustering run failed", &err);
        self.control.set_state(RunState::Failed);
        err
    }

    fn check_setup(&self, keywords: &[KeywordRecord], suggestions: Option<&[SuggestedCluster]>) -> Result<()> {
        self.config.validate()?;
        self.client.check_ready()?;
        if keywords.is_empty() {
            return Err(ClusterError::EmptyInput);
        }
        if !validate_suggestions(suggestions, keywords) {
            return Err(ClusterError::Validation(
                "none of the suggested clusters relate to the uploaded keywords".into(),
            ));
        }
        Ok(())
    }

    async fn run<F>(
        &mut self,
        keywords: &[KeywordRecord],
        suggestions: Option<Vec<SuggestedCluster>>,
        mut on_progress: F,
    ) -> Result<ClusteringReport>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        if let Err(e) = self.check_setup(keywords, suggestions.as_deref()) {
            return Err(self.fail(e));
        }

        if let Some(list) = &suggestions {
            self.log.info(format!("Using {} suggested clusters", list.len()));
        }

        // Batch size was already checked by check_setup
        let scheduler = BatchScheduler::new(&self.client, self.config.batch_size)?;

        self.control.set_state(RunState::Running);

        let mut ctx = BatchContext {
            cancel: Arc::clone(&self.control.cancel),
            log: &mut self.log,
            on_progress: &mut on_progress,
        };
        let outcome = scheduler.run(keywords, suggestions.as_deref(), &mut ctx).await;

        let state = if outcome.cancelled {
            RunState::Cancelled
        } else {
            RunState::Completed
        };

        self.log.info(format!(
            "Clustering {}: {} clusters from {}/{} batches ({} failed) in {:.1}s",
            state.as_str(),
            outcome.clusters.len(),
            outcome.completed_batches,
            outcome.total_batches,
            outcome.failed_batches,
            outcome.elapsed_secs
        ));

        self.clusters = outcome.clusters.into_clusters();
        self.control.set_state(state);

        Ok(ClusteringReport {
            state,
            clusters: self.clusters.clone(),
            keyword_count: keywords.len(),
            total_batches: outcome.total_batches,
            completed_batches: outcome.completed_batches,
            failed_batches: outcome.failed_batches,
            elapsed_secs: outcome.elapsed_secs,
        })
    }
}
