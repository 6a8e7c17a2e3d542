//! rfpbuddy - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use rfpbuddy::{
    cli::{Args, Commands, Verbosity},
    config::Config,
    orchestrator::{BatchState, BatchSummary},
    service::RfpService,
    storage::{MemoryStore, ResponseStore},
    telemetry::init_logging,
    types::{AggregatedResponse, Feedback, ProviderMode, RequirementId, ResponseId},
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.clone())?;

    if let Some(level) = args.verbosity().log_level() {
        config.logging.level = level.to_string();
    }
    config.logging.json |= args.json;
    init_logging(&config.logging)?;

    match &args.command {
        Commands::Batch {
            workspace,
            batch_id,
            mode,
            concurrency,
            scope,
        } => {
            run_batch(&args, config, workspace, batch_id, *mode, *concurrency, scope).await?;
        }
        Commands::Generate {
            workspace,
            id,
            mode,
        } => {
            run_generate(config, workspace, *id, *mode).await?;
        }
        Commands::Feedback {
            workspace,
            response_id,
            rating,
            feedback,
        } => {
            run_feedback(workspace, *response_id, *rating, *feedback).await?;
        }
        Commands::Config { init } => {
            show_config(&args, &config, *init)?;
        }
    }

    Ok(())
}

async fn open_workspace(path: &Path) -> Result<MemoryStore> {
    MemoryStore::load(path)
        .await
        .with_context(|| format!("Failed to open workspace {}", path.display()))
}

async fn run_batch(
    args: &Args,
    config: Config,
    workspace: &Path,
    batch_id: &str,
    mode: ProviderMode,
    concurrency: Option<usize>,
    scope: &str,
) -> Result<()> {
    let store = open_workspace(workspace).await?;
    let service = RfpService::from_config(config, Arc::new(store.clone())).await?;

    let handle = service
        .start_batch_from_store(scope, batch_id, concurrency, mode)
        .await?;
    let total = service.progress(&handle).total;

    let pb = if args.verbosity().show_progress() {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} | {msg}")?
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    } else {
        ProgressBar::hidden()
    };
    pb.set_message(format!("mode: {}", mode));

    let mut updates = service.subscribe(scope);
    let waiter = service.wait(&handle);
    tokio::pin!(waiter);
    let mut cancelled = false;

    let summary = loop {
        tokio::select! {
            summary = &mut waiter => break summary,
            changed = updates.changed() => {
                if changed.is_err() {
                    break (&mut waiter).await;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.batch_id == Some(handle.batch_id) {
                    pb.set_position(snapshot.completed as u64);
                    pb.set_message(format!(
                        "mode: {} | in flight: {} | errored: {}",
                        mode, snapshot.in_flight, snapshot.errored
                    ));
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                service.cancel_batch(&handle)?;
                cancelled = true;
                pb.set_message("cancelling; waiting for in-flight requirements");
            }
        }
    };
    pb.finish_and_clear();

    store
        .save(workspace)
        .await
        .with_context(|| format!("Failed to save workspace {}", workspace.display()))?;

    match summary {
        Some(summary) => print_summary(&summary),
        None => println!("{}", "Batch finished without a summary".yellow()),
    }

    if matches!(args.verbosity(), Verbosity::Verbose | Verbosity::VeryVerbose) {
        let stats = service.telemetry().get_stats();
        println!();
        println!("Providers:");
        for (kind, provider) in &stats.providers {
            println!(
                "  {:<10} calls: {:<4} success: {:>5.1}%  mean latency: {}ms",
                kind.display_name(),
                provider.calls(),
                provider.success_rate() * 100.0,
                provider.mean_latency_ms()
            );
        }
        println!(
            "  retries: {}  syntheses: {} ({} failed)",
            stats.retry_attempts, stats.syntheses, stats.synthesis_failures
        );
    }

    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    let state = match summary.state {
        BatchState::Completed => summary.state.to_string().green().bold(),
        BatchState::Cancelled => summary.state.to_string().yellow().bold(),
        _ => summary.state.to_string().red().bold(),
    };
    println!("Batch {} {}", summary.batch_id, state);
    println!(
        "  {} answered, {} failed, {} errored, {} skipped of {}",
        summary.answered.to_string().green(),
        summary.failed.to_string().yellow(),
        summary.errored.to_string().red(),
        summary.skipped(),
        summary.total
    );
}

async fn run_generate(config: Config, workspace: &Path, id: u64, mode: ProviderMode) -> Result<()> {
    let store = open_workspace(workspace).await?;
    let service = RfpService::from_config(config, Arc::new(store.clone())).await?;

    let response = service.generate_single(RequirementId(id), mode).await?;
    store.save(workspace).await?;

    print_response(&response);
    Ok(())
}

fn print_response(response: &AggregatedResponse) {
    println!("{} {}", "Response".bold(), response.id);
    for (kind, text) in &response.provider_responses {
        let status = if text.is_some() { "ok".green() } else { "failed".red() };
        println!("  {:<10} {}", kind.display_name(), status);
    }
    if !response.similar.is_empty() {
        println!("  similar:");
        for hit in &response.similar {
            println!("    {} ({:.2})", hit.reference, hit.score);
        }
    }
    println!();
    match response.final_text() {
        Some(text) => println!("{}", text),
        None => {
            let reason = response
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no answer".to_string());
            println!("{}", reason.red());
        }
    }
}

async fn run_feedback(
    workspace: &Path,
    response_id: Uuid,
    rating: Option<i32>,
    feedback: Option<Feedback>,
) -> Result<()> {
    let store = open_workspace(workspace).await?;
    let response = store
        .attach_feedback(ResponseId(response_id), rating, feedback)
        .await?;
    store.save(workspace).await?;

    println!(
        "{} feedback on response {} (rating: {}, feedback: {})",
        "Recorded".green(),
        response.id,
        response
            .rating
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string()),
        response
            .feedback
            .map(|f| format!("{:?}", f).to_lowercase())
            .unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}

fn show_config(args: &Args, config: &Config, init: bool) -> Result<()> {
    let path = args.config.clone().or_else(Config::default_path);

    if init {
        let path = path.context("No home directory; pass --config")?;
        if path.exists() {
            println!("{} {}", "Config already exists:".yellow(), path.display());
        } else {
            Config::default().save(&path)?;
            println!("{} {}", "Wrote default config to".green(), path.display());
        }
        return Ok(());
    }

    if let Some(path) = &path {
        println!("# {}", path.display());
    }
    println!("{}", toml::to_string_pretty(config)?);

    let enabled = config.enabled_providers();
    println!(
        "# enabled providers: {}",
        enabled
            .iter()
            .map(|k| k.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
