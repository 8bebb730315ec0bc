//! kwcluster CLI - cluster a keyword CSV with an LLM
//!
//! Usage: kwcluster-cli [OPTIONS] <COMMAND>
//!
//! Supports JSON output for scripting.

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use kwcluster_lib::{
    export::{self, Delimiter},
    import,
    settings,
    utils::format_duration,
    BatchProgress, ClusteringOrchestrator, LlmClient, OpenAiClient, RunLog, RunState,
};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "kwcluster-cli")]
#[command(version, about = "Keyword clustering CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Detailed logging (-v info, -vv debug)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster keywords from a CSV file
    Cluster {
        /// CSV with a keyword column and an optional volume column
        csv: PathBuf,
        /// File of suggested clusters, one `name | paid|organic` per line
        #[arg(long, short)]
        suggestions: Option<PathBuf>,
        /// Keywords per LLM request
        #[arg(long)]
        batch_size: Option<usize>,
        /// Model name override
        #[arg(long)]
        model: Option<String>,
        /// Export format for --output and --copy
        #[arg(long, default_value = "csv")]
        format: Delimiter,
        /// Write the exported table to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Copy the exported table to the clipboard
        #[arg(long)]
        copy: bool,
        /// Write the run log to this file
        #[arg(long)]
        log_out: Option<PathBuf>,
    },
    /// Settings management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current settings and usage stats
    Show,
    /// Store the OpenAI API key
    SetKey {
        key: String,
    },
    /// Remove the stored OpenAI API key
    ClearKey,
    /// Set a setting value
    Set {
        /// api_url, model, temperature, max_tokens, batch_size, request_timeout_secs
        field: String,
        value: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run_cli(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<(), String> {
    settings::init(settings::default_app_dir());

    match cli.command {
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "kwcluster-cli", &mut std::io::stdout());
            Ok(())
        }
        Commands::Config { cmd } => handle_config(cmd, cli.json),
        Commands::Cluster {
            csv,
            suggestions,
            batch_size,
            model,
            format,
            output,
            copy,
            log_out,
        } => {
            let opts = ClusterOpts {
                csv,
                suggestions,
                batch_size,
                model,
                format,
                output,
                copy,
                log_out,
            };
            handle_cluster(opts, cli.json, cli.quiet).await
        }
    }
}

// ============================================================================
// Cluster
// ============================================================================

struct ClusterOpts {
    csv: PathBuf,
    suggestions: Option<PathBuf>,
    batch_size: Option<usize>,
    model: Option<String>,
    format: Delimiter,
    output: Option<PathBuf>,
    copy: bool,
    log_out: Option<PathBuf>,
}

fn progress_line(p: &BatchProgress) -> String {
    let eta = p
        .eta_secs
        .map(|s| format_duration(s.round() as u64))
        .unwrap_or_else(|| "calculating...".to_string());
    format!(
        "[Batch] {}/{} chunks • Elapsed: {} • ETA: {}",
        p.completed,
        p.total,
        format_duration(p.elapsed_secs.round() as u64),
        eta
    )
}

fn write_run_log(path: &Path, import_log: &RunLog, run_log: &RunLog) -> Result<(), String> {
    let content = [import_log.render(), run_log.render()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, content).map_err(|e| format!("Failed to write log {}: {}", path.display(), e))
}

async fn handle_cluster(opts: ClusterOpts, json: bool, quiet: bool) -> Result<(), String> {
    let mut config = settings::cluster_config();
    if let Some(n) = opts.batch_size {
        config.batch_size = n;
    }
    if let Some(model) = opts.model {
        config.llm.model = model;
    }

    let client = OpenAiClient::from_settings(config.llm.clone()).map_err(|e| e.to_string())?;

    // Column detection only consults the model when a key is available
    let mut import_log = RunLog::new();
    let column_client: Option<&dyn LlmClient> = client.check_ready().ok().map(|_| &client as &dyn LlmClient);
    let keywords = import::import_keywords_csv(&opts.csv, column_client, &mut import_log)
        .await
        .map_err(|e| format!("Failed to read {}: {}", opts.csv.display(), e))?;

    let hint_text = match &opts.suggestions {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?,
        ),
        None => None,
    };

    if !quiet && !json {
        eprintln!(
            "Clustering {} keywords with {} (batch size {})",
            keywords.len(),
            config.llm.model,
            config.batch_size
        );
    }

    let mut orchestrator = ClusteringOrchestrator::new(client, config);

    // Ctrl-C stops scheduling new batches; the in-flight request finishes
    let handle = orchestrator.handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current batch...");
            let _ = handle.cancel();
        }
    });

    let show_progress = !quiet && !json;
    let result = orchestrator
        .start_with_hint_text(&keywords, hint_text.as_deref(), |p| {
            if show_progress {
                eprintln!("{}", progress_line(p));
            }
        })
        .await;
    watcher.abort();

    if let Some(path) = &opts.log_out {
        write_run_log(path, &import_log, orchestrator.log())?;
    }

    // Failed runs still spent tokens on column detection or earlier batches
    if let Err(e) = settings::add_openai_tokens(orchestrator.client().tokens_used()) {
        tracing::warn!("[Stats] Failed to record token usage: {}", e);
    }

    let report = result.map_err(|e| format!("Clustering failed: {}", e))?;

    if let Err(e) = settings::add_clustering_run(report.elapsed_secs, report.keyword_count) {
        tracing::warn!("[Stats] Failed to record run: {}", e);
    }

    if report.state == RunState::Cancelled && !json {
        eprintln!(
            "Cancelled: partial results from {}/{} batches",
            report.completed_batches, report.total_batches
        );
    }
    if report.failed_batches > 0 && !json {
        eprintln!(
            "{} of {} batches failed; see the run log for details",
            report.failed_batches, report.total_batches
        );
    }

    if opts.output.is_some() || opts.copy {
        let table = export::export_table(&report.clusters, &keywords, opts.format).map_err(|e| e.to_string())?;

        if let Some(path) = &opts.output {
            std::fs::write(path, &table).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            if !quiet && !json {
                eprintln!("Wrote {} clusters to {}", report.clusters.len(), path.display());
            }
        }

        if opts.copy {
            arboard::Clipboard::new()
                .and_then(|mut clipboard| clipboard.set_text(table))
                .map_err(|e| format!("Failed to copy to clipboard: {}", e))?;
            if !quiet && !json {
                eprintln!("Copied {} table to clipboard", opts.format.extension().to_uppercase());
            }
        }
    }

    if json {
        let out = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else if report.clusters.is_empty() {
        println!("No clusters produced");
    } else {
        println!("{}", export::render_summary(&report.clusters, &keywords));
    }

    Ok(())
}

// ============================================================================
// Config
// ============================================================================

fn handle_config(cmd: ConfigCommands, json: bool) -> Result<(), String> {
    match cmd {
        ConfigCommands::Show => {
            let s = settings::current();
            let key = settings::get_masked_openai_api_key();
            let stats = &s.processing_stats;

            if json {
                let value = serde_json::json!({
                    "openai_api_key": key,
                    "api_url": s.api_url,
                    "model": s.model,
                    "temperature": s.temperature,
                    "max_tokens": s.max_tokens,
                    "batch_size": s.batch_size,
                    "request_timeout_secs": s.request_timeout_secs,
                    "settings_path": settings::config_path(),
                    "processing_stats": stats,
                });
                println!("{}", serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?);
            } else {
                println!("openai-api-key:       {}", key.unwrap_or_else(|| "not set".to_string()));
                println!("api-url:              {}", s.api_url);
                println!("model:                {}", s.model);
                println!("temperature:          {}", s.temperature);
                println!("max-tokens:           {}", s.max_tokens);
                println!("batch-size:           {}", s.batch_size);
                println!("request-timeout-secs: {}", s.request_timeout_secs);
                if let Some(path) = settings::config_path() {
                    println!("settings-file:        {}", path.display());
                }
                println!();
                println!("runs:                 {}", stats.clustering_runs);
                println!("keywords-clustered:   {}", stats.total_keywords_clustered);
                println!("openai-tokens:        {}", stats.total_openai_tokens);
                println!(
                    "last-run:             {}",
                    format_duration(stats.last_clustering_secs.round() as u64)
                );
                println!(
                    "total-time:           {}",
                    format_duration(stats.total_clustering_secs.round() as u64)
                );
            }
        }
        ConfigCommands::SetKey { key } => {
            if key.trim().is_empty() {
                return Err("API key cannot be empty (use clear-key to remove it)".to_string());
            }
            settings::set_openai_api_key(key.trim().to_string()).map_err(|e| e.to_string())?;
            println!("OpenAI API key saved");
        }
        ConfigCommands::ClearKey => {
            settings::set_openai_api_key(String::new()).map_err(|e| e.to_string())?;
            println!("OpenAI API key cleared");
        }
        ConfigCommands::Set { field, value } => {
            settings::set_field(&field, &value).map_err(|e| e.to_string())?;
            if json {
                let mut obj = serde_json::Map::new();
                obj.insert(field, serde_json::Value::String(value));
                println!("{}", serde_json::Value::Object(obj));
            } else {
                println!("{} = {}", field, value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_cluster_flags() {
        let cli = Cli::try_parse_from([
            "kwcluster-cli",
            "-vv",
            "cluster",
            "keywords.csv",
            "--batch-size",
            "50",
            "--format",
            "tsv",
            "--copy",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Cluster { csv, batch_size, format, copy, .. } => {
                assert_eq!(csv, PathBuf::from("keywords.csv"));
                assert_eq!(batch_size, Some(50));
                assert_eq!(format, Delimiter::Tsv);
                assert!(copy);
            }
            _ => panic!("expected cluster command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["kwcluster-cli", "cluster", "k.csv", "--format", "xlsx"]).is_err());
    }

    #[test]
    fn test_progress_line() {
        let p = BatchProgress {
            completed: 3,
            total: 10,
            elapsed_secs: 65.2,
            eta_secs: Some(150.0),
            clusters: 12,
        };
        assert_eq!(progress_line(&p), "[Batch] 3/10 chunks • Elapsed: 1m 5s • ETA: 2m 30s");

        let first = BatchProgress { eta_secs: None, ..p };
        assert!(progress_line(&first).ends_with("ETA: calculating..."));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
