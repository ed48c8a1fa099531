use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::GatewayError;

// ── Session ───────────────────────────────────────────────────────────

/// Identity of one connected client. Every event is addressed to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Remote records ────────────────────────────────────────────────────

/// Summary of an issue-tracker ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

/// Basic pull request metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub author: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One commit of a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    pub message: String,
}

/// Lines added to one file by a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: String,
    pub added_lines: Vec<String>,
}

// ── Requests ──────────────────────────────────────────────────────────

/// A validated analysis request. Immutable once accepted by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub pr_id: u64,
    pub repository: String,
    pub issue_key: Option<String>,
    pub generate_documentation: bool,
    pub generate_code_review: bool,
}

/// Raw `start_analysis` command as sent by the browser.
///
/// Fields stay untyped so that a loosely formed command still reaches
/// [`StartAnalysis::into_request`], where only `pr_id` can reject it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartAnalysis {
    #[serde(default)]
    pub pr_id: Option<Value>,
    #[serde(default)]
    pub repository: Option<Value>,
    #[serde(default)]
    pub issue_key: Option<Value>,
    #[serde(default = "flag_on")]
    pub generate_documentation: Value,
    #[serde(default = "flag_on")]
    pub generate_code_review: Value,
}

fn flag_on() -> Value {
    Value::Bool(true)
}

impl Default for StartAnalysis {
    fn default() -> Self {
        Self {
            pr_id: None,
            repository: None,
            issue_key: None,
            generate_documentation: flag_on(),
            generate_code_review: flag_on(),
        }
    }
}

impl StartAnalysis {
    /// Validate the command, filling in defaults.
    ///
    /// Only `pr_id` is checked. Repository and issue key are passed through
    /// as text, with empty strings treated as absent. A present flag is
    /// read by truthiness, so `null`, `0` and `""` turn a step off.
    pub fn into_request(self, default_repo: &str) -> Result<AnalysisRequest, GatewayError> {
        let pr_id = parse_pr_id(self.pr_id.as_ref())?;
        let repository = text(self.repository).unwrap_or_else(|| default_repo.to_string());
        Ok(AnalysisRequest {
            pr_id,
            repository,
            issue_key: text(self.issue_key),
            generate_documentation: truthy(&self.generate_documentation),
            generate_code_review: truthy(&self.generate_code_review),
        })
    }
}

fn text(value: Option<Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s,
        other => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn parse_pr_id(value: Option<&Value>) -> Result<u64, GatewayError> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Err(GatewayError::MissingPrId),
        Some(Value::String(s)) if s.trim().is_empty() => Err(GatewayError::MissingPrId),
        Some(Value::String(s)) => match s.trim().parse::<u64>() {
            Ok(0) => Err(GatewayError::MissingPrId),
            Ok(id) => Ok(id),
            Err(_) => Err(GatewayError::InvalidPrId(s.clone())),
        },
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Err(GatewayError::MissingPrId),
            Some(id) => Ok(id),
            None => Err(GatewayError::InvalidPrId(n.to_string())),
        },
        Some(other) => Err(GatewayError::InvalidPrId(other.to_string())),
    }
}

// ── Results ───────────────────────────────────────────────────────────

/// Pull request data gathered by the repository-host steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestData {
    pub basic: PullRequest,
    pub commits: Vec<Commit>,
    pub files: Vec<FileChange>,
}

/// Payload of the `analysis_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issue_data: Option<IssueSummary>,
    pub pr_data: PullRequestData,
    pub documentation: Option<String>,
    pub code_review: Option<String>,
}

/// Payload of the `analysis_error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub error: String,
}

impl AnalysisError {
    pub fn new(error: impl fmt::Display) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Payload of the `progress` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    /// Percentage in `0..=100`, or [`ProgressEvent::FAILED`].
    pub progress: i32,
}

impl ProgressEvent {
    /// Sentinel progress value marking the step at which a run failed.
    pub const FAILED: i32 = -1;

    pub fn new(message: impl Into<String>, progress: i32) -> Self {
        Self {
            message: message.into(),
            progress,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.progress == Self::FAILED
    }
}

/// The uniform payload fed to both AI generation calls, keyed the way the
/// prompts refer to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedInput {
    #[serde(rename = "pr_commits.json")]
    pub commits: Vec<Commit>,
    #[serde(rename = "pr_files_content.json")]
    pub files: Vec<FileChange>,
    #[serde(rename = "issue_data.json", default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<IssueSummary>,
}

impl CombinedInput {
    pub fn new(commits: &[Commit], files: &[FileChange], issue: Option<&IssueSummary>) -> Self {
        Self {
            commits: commits.to_vec(),
            files: files.to_vec(),
            issue: issue.cloned(),
        }
    }
}
