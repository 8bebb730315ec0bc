pub mod ai_client;
pub mod batch;
pub mod error;
pub mod export;
pub mod import;
pub mod merge;
pub mod orchestrator;
pub mod prompt;
pub mod response;
pub mod run_log;
pub mod settings;
pub mod suggestions;
pub mod types;
pub mod utils;

pub use ai_client::{LlmClient, LlmConfig, OpenAiClient};
pub use batch::{BatchProgress, BatchScheduler};
pub use error::{ClusterError, Result};
pub use merge::ClusterSet;
pub use orchestrator::{ClusteringOrchestrator, ClusteringReport, RunHandle, RunState};
pub use run_log::RunLog;
pub use types::{ClusterCandidate, GlobalCluster, IntentType, KeywordRecord, SuggestedCluster};
