//! Remote service adapters.
//!
//! The orchestrator only sees the three traits below. Concrete clients talk
//! to Jira, Azure DevOps and an OpenAI-compatible or Anthropic endpoint over
//! `reqwest`; tests substitute in-memory doubles.
//!
//! | Module         | Trait          | Service                               |
//! |----------------|----------------|---------------------------------------|
//! | `jira`         | `IssueTracker` | Jira REST v2                          |
//! | `azure_devops` | `RepoHost`     | Azure DevOps Git pull request API     |
//! | `ai`           | `AiEngine`     | Chat completion / messages endpoints  |
//! | `prompts`      | -              | Prompt templates for the AI engine    |

pub mod ai;
pub mod azure_devops;
pub mod jira;
pub mod prompts;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analysis::models::{CombinedInput, Commit, FileChange, IssueSummary, PullRequest};
use crate::config::AppConfig;

pub use ai::AiAnalyzer;
pub use azure_devops::AzureDevOpsClient;
pub use jira::JiraClient;

/// Issue-tracker lookups. `Ok(None)` means the issue could not be found.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn issue_summary(&self, issue_key: &str) -> Result<Option<IssueSummary>>;
}

/// Repository-host pull request queries.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// `Ok(None)` means the pull request could not be fetched.
    async fn pull_request(&self, repo: &str, pr_id: u64) -> Result<Option<PullRequest>>;

    async fn commits(&self, repo: &str, pr_id: u64) -> Result<Vec<Commit>>;

    async fn added_lines(&self, repo: &str, pr_id: u64) -> Result<Vec<FileChange>>;
}

/// AI text generation over a pull request's combined input.
#[async_trait]
pub trait AiEngine: Send + Sync {
    async fn generate_documentation(&self, input: &CombinedInput) -> Result<String>;

    async fn generate_code_review(&self, input: &CombinedInput) -> Result<String>;
}

/// One set of adapters, used by exactly one run.
#[derive(Clone)]
pub struct Adapters {
    pub issues: Arc<dyn IssueTracker>,
    pub repo: Arc<dyn RepoHost>,
    pub ai: Arc<dyn AiEngine>,
}

/// Reachability summary served by `/api/config/test` and `prlens config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStatus {
    pub jira: bool,
    pub azure_devops: bool,
    pub ai_provider: Option<String>,
}

/// Builds adapters for each run and reports configuration health.
#[async_trait]
pub trait AdapterProvider: Send + Sync {
    fn adapters(&self) -> Result<Adapters>;

    async fn config_status(&self) -> ConfigStatus;
}

/// Provider backed by the real HTTP clients, built fresh for every run.
pub struct HttpAdapterProvider {
    config: AppConfig,
}

impl HttpAdapterProvider {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AdapterProvider for HttpAdapterProvider {
    fn adapters(&self) -> Result<Adapters> {
        Ok(Adapters {
            issues: Arc::new(JiraClient::new(&self.config.jira)?),
            repo: Arc::new(AzureDevOpsClient::new(&self.config.azure_devops)?),
            ai: Arc::new(AiAnalyzer::new(&self.config.ai)?),
        })
    }

    async fn config_status(&self) -> ConfigStatus {
        let jira = match JiraClient::new(&self.config.jira) {
            Ok(client) => client.test_connection().await,
            Err(e) => {
                tracing::warn!("jira client unavailable: {:#}", e);
                false
            }
        };
        let ai_provider = self
            .config
            .ai
            .is_configured()
            .then(|| self.config.ai.provider.to_string());
        ConfigStatus {
            jira,
            azure_devops: !self.config.azure_devops.organization.trim().is_empty(),
            ai_provider,
        }
    }
}
