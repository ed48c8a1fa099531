//! Typed error hierarchy for prlens.
//!
//! Three top-level enums cover the three places things can go wrong:
//! - `RunError` - fatal outcomes of one orchestrator run
//! - `GatewayError` - a start command rejected before any run begins
//! - `ConfigError` - loading or validating configuration

use std::fmt;

use thiserror::Error;

/// The remote step an orchestrator run was executing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    PullRequest,
    Commits,
    ChangedFiles,
    Documentation,
    CodeReview,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::PullRequest => "fetching pull request",
            Step::Commits => "fetching commits",
            Step::ChangedFiles => "fetching changed files",
            Step::Documentation => "generating documentation",
            Step::CodeReview => "generating code review",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal outcome of an analysis run. Any of these ends the run with an
/// `analysis_error` event.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Error fetching PR #{pr_id}")]
    PullRequestNotFound { pr_id: u64 },

    #[error("{step} failed: {source:#}")]
    Step {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl RunError {
    pub fn step(step: Step) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| RunError::Step { step, source }
    }
}

/// Reasons the session gateway refuses to start a run.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("PR ID is required")]
    MissingPrId,

    #[error("Invalid PR ID: {0}")]
    InvalidPrId(String),

    #[error("An analysis is already running for this session")]
    AlreadyRunning,

    #[error("Failed to initialize service clients: {0:#}")]
    Adapters(#[source] anyhow::Error),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid AI provider '{0}'. Valid values: openai, anthropic")]
    InvalidProvider(String),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}
