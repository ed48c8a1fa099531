//! Headless analysis command - `prlens analyze`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use prlens::adapters::{AdapterProvider, HttpAdapterProvider};
use prlens::analysis::{Orchestrator, ProgressChannel, ServerEvent, SessionId, StartAnalysis};
use prlens::config::AppConfig;

pub struct AnalyzeArgs {
    pub pr: String,
    pub repo: Option<String>,
    pub issue: Option<String>,
    pub documentation: bool,
    pub code_review: bool,
    pub output: Option<PathBuf>,
}

/// Renders a single run's progress on an `indicatif` bar and keeps its
/// terminal event for the caller.
pub struct ConsoleChannel {
    bar: ProgressBar,
    outcome: Mutex<Option<ServerEvent>>,
}

impl ConsoleChannel {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            outcome: Mutex::new(None),
        }
    }

    pub fn take_outcome(&self) -> Option<ServerEvent> {
        match self.outcome.lock() {
            Ok(mut outcome) => outcome.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl ProgressChannel for ConsoleChannel {
    fn publish(&self, _session: SessionId, event: ServerEvent) {
        match event {
            ServerEvent::Progress(p) if p.is_failure() => {
                self.bar
                    .abandon_with_message(style(p.message).red().to_string());
            }
            ServerEvent::Progress(p) => {
                self.bar.set_position(p.progress.clamp(0, 100) as u64);
                if p.progress >= 100 {
                    self.bar
                        .finish_with_message(style(p.message).green().to_string());
                } else {
                    self.bar.set_message(p.message);
                }
            }
            terminal => match self.outcome.lock() {
                Ok(mut outcome) => *outcome = Some(terminal),
                Err(poisoned) => *poisoned.into_inner() = Some(terminal),
            },
        }
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style =
        ProgressStyle::with_template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
    bar.set_style(style);
    bar.set_prefix("Analysis");
    bar
}

pub async fn cmd_analyze(config: AppConfig, args: AnalyzeArgs) -> Result<()> {
    let request = StartAnalysis {
        pr_id: Some(Value::String(args.pr)),
        repository: args.repo.map(Value::String),
        issue_key: args.issue.map(Value::String),
        generate_documentation: Value::Bool(args.documentation),
        generate_code_review: Value::Bool(args.code_review),
    }
    .into_request(&config.azure_devops.default_repo)?;

    let adapters = HttpAdapterProvider::new(config)
        .adapters()
        .context("Failed to initialize service clients")?;

    let channel = Arc::new(ConsoleChannel::new(progress_bar()));
    Orchestrator::new(SessionId::new(), channel.clone(), adapters)
        .run(request)
        .await;

    match channel.take_outcome() {
        Some(ServerEvent::AnalysisComplete(result)) => {
            let json = serde_json::to_string_pretty(&result)?;
            match &args.output {
                Some(path) => {
                    std::fs::write(path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!(
                        "{} Result written to {}",
                        style("✓").green(),
                        style(path.display()).cyan()
                    );
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Some(ServerEvent::AnalysisError(e)) => anyhow::bail!("Analysis failed: {}", e.error),
        _ => anyhow::bail!("Analysis ended without a result"),
    }
}
