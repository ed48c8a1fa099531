use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use similar::{ChangeTag, TextDiff};

use super::RepoHost;
use crate::analysis::models::{Commit, FileChange, PullRequest};
use crate::config::AzureDevOpsSettings;

const API_VERSION: &str = "7.0";
const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

// ── Azure DevOps response shapes (subset of fields we care about) ─────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzPullRequest {
    pull_request_id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_by: Option<AzIdentity>,
    #[serde(default)]
    source_ref_name: String,
    #[serde(default)]
    target_ref_name: String,
    #[serde(default)]
    creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    repository: Option<AzRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzIdentity {
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzRepository {
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzList<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzCommit {
    commit_id: String,
    #[serde(default)]
    author: Option<AzGitUser>,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
struct AzGitUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzIteration {
    id: u64,
    #[serde(default)]
    source_ref_commit: Option<AzCommitRef>,
    #[serde(default)]
    target_ref_commit: Option<AzCommitRef>,
    #[serde(default)]
    common_ref_commit: Option<AzCommitRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzCommitRef {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzChanges {
    #[serde(default)]
    change_entries: Vec<AzChangeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzChangeEntry {
    change_type: String,
    item: AzItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzItem {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    is_folder: bool,
    #[serde(default)]
    git_object_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzItemContent {
    #[serde(default)]
    content: Option<String>,
}

impl From<AzPullRequest> for PullRequest {
    fn from(pr: AzPullRequest) -> Self {
        let url = pr
            .repository
            .and_then(|r| r.web_url)
            .map(|web| format!("{}/pullrequest/{}", web.trim_end_matches('/'), pr.pull_request_id));
        PullRequest {
            id: pr.pull_request_id,
            title: pr.title,
            description: pr.description.filter(|d| !d.trim().is_empty()),
            status: pr.status,
            author: pr.created_by.map(|c| c.display_name),
            source_branch: strip_ref(&pr.source_ref_name),
            target_branch: strip_ref(&pr.target_ref_name),
            created_at: pr.creation_date,
            url,
        }
    }
}

impl From<AzCommit> for Commit {
    fn from(commit: AzCommit) -> Self {
        let (author, date) = match commit.author {
            Some(a) => (a.name, a.date),
            None => (None, None),
        };
        Commit {
            id: commit.commit_id,
            author,
            date,
            message: commit.comment,
        }
    }
}

/// Strip the `refs/heads/` prefix Azure DevOps puts on branch names.
pub fn strip_ref(name: &str) -> String {
    name.strip_prefix("refs/heads/").unwrap_or(name).to_string()
}

/// Lines present in `new` but not in `old`, by line diff.
pub fn added_lines(old: &str, new: &str) -> Vec<String> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Insert)
        .map(|change| change.value().trim_end_matches(['\r', '\n']).to_string())
        .collect()
}

/// Azure DevOps Git client, authenticated with a personal access token.
pub struct AzureDevOpsClient {
    client: reqwest::Client,
    settings: AzureDevOpsSettings,
}

impl AzureDevOpsClient {
    pub fn new(settings: &AzureDevOpsSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build Azure DevOps HTTP client")?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    /// `{base}/{organization}/{project}/_apis/git/repositories/{repo}/{tail...}`
    fn repo_url(&self, repo: &str, tail: &[&str]) -> Result<Url> {
        if self.settings.organization.trim().is_empty() || self.settings.project.trim().is_empty() {
            anyhow::bail!("Azure DevOps organization and project must be configured");
        }
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        let mut url = Url::parse(base)
            .with_context(|| format!("Invalid Azure DevOps base URL: {}", base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Azure DevOps base URL cannot be a base: {}", base))?
            .pop_if_empty()
            .extend([
                self.settings.organization.as_str(),
                self.settings.project.as_str(),
                "_apis",
                "git",
                "repositories",
                repo,
            ])
            .extend(tail);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth("", Some(self.settings.pat.expose()))
            .header("Accept", "application/json")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        self.get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to Azure DevOps", what))?
            .error_for_status()
            .with_context(|| format!("Azure DevOps {} endpoint returned error status", what))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from Azure DevOps", what))
    }

    async fn latest_iteration(&self, repo: &str, pr_id: u64) -> Result<Option<AzIteration>> {
        let pr = pr_id.to_string();
        let url = self.repo_url(repo, &["pullRequests", &pr, "iterations"])?;
        let iterations: AzList<AzIteration> = self.get_json(url, "iterations").await?;
        Ok(iterations.value.into_iter().max_by_key(|it| it.id))
    }

    /// File content at a commit, or `None` when the item is missing or not text.
    async fn file_at(&self, repo: &str, path: &str, commit: &str) -> Result<Option<String>> {
        let mut url = self.repo_url(repo, &["items"])?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("versionDescriptor.version", commit)
            .append_pair("versionDescriptor.versionType", "commit")
            .append_pair("includeContent", "true");
        let resp = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {} from Azure DevOps", path))?;
        if !resp.status().is_success() {
            tracing::debug!(path, commit, status = %resp.status(), "item not available");
            return Ok(None);
        }
        match resp.json::<AzItemContent>().await {
            Ok(item) => Ok(item.content),
            Err(e) => {
                tracing::warn!(path, "skipping unreadable item: {}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl RepoHost for AzureDevOpsClient {
    async fn pull_request(&self, repo: &str, pr_id: u64) -> Result<Option<PullRequest>> {
        let pr = pr_id.to_string();
        let url = self.repo_url(repo, &["pullrequests", &pr])?;
        let resp = self
            .get(url)
            .send()
            .await
            .context("Failed to send pull request request to Azure DevOps")?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(repo, pr_id, %status, "pull request lookup returned an error status");
            return Ok(None);
        }

        let pr: AzPullRequest = resp
            .json()
            .await
            .context("Failed to parse pull request response from Azure DevOps")?;
        Ok(Some(pr.into()))
    }

    async fn commits(&self, repo: &str, pr_id: u64) -> Result<Vec<Commit>> {
        let pr = pr_id.to_string();
        let url = self.repo_url(repo, &["pullRequests", &pr, "commits"])?;
        let commits: AzList<AzCommit> = self.get_json(url, "commits").await?;
        Ok(commits.value.into_iter().map(Commit::from).collect())
    }

    async fn added_lines(&self, repo: &str, pr_id: u64) -> Result<Vec<FileChange>> {
        let Some(iteration) = self.latest_iteration(repo, pr_id).await? else {
            return Ok(Vec::new());
        };
        let source_commit = iteration
            .source_ref_commit
            .map(|c| c.commit_id)
            .ok_or_else(|| anyhow!("Iteration {} has no source commit", iteration.id))?;
        let base_commit = iteration
            .common_ref_commit
            .or(iteration.target_ref_commit)
            .map(|c| c.commit_id);

        let pr = pr_id.to_string();
        let it = iteration.id.to_string();
        let url = self.repo_url(repo, &["pullRequests", &pr, "iterations", &it, "changes"])?;
        let changes: AzChanges = self.get_json(url, "iteration changes").await?;

        let candidates: Vec<(String, String)> = changes
            .change_entries
            .into_iter()
            .filter(|entry| !entry.item.is_folder)
            .filter(|entry| entry.item.git_object_type.as_deref().unwrap_or("blob") == "blob")
            .filter(|entry| entry.change_type.contains("add") || entry.change_type.contains("edit"))
            .filter_map(|entry| entry.item.path.map(|path| (path, entry.change_type)))
            .collect();

        if candidates.len() > self.settings.max_files {
            tracing::warn!(
                repo,
                pr_id,
                total = candidates.len(),
                limit = self.settings.max_files,
                "pull request touches more files than the configured limit; truncating"
            );
        }

        let mut files = Vec::new();
        for (path, change_type) in candidates.into_iter().take(self.settings.max_files) {
            let Some(new_content) = self.file_at(repo, &path, &source_commit).await? else {
                continue;
            };
            let old_content = match (&base_commit, change_type.contains("edit")) {
                (Some(base), true) => self.file_at(repo, &path, base).await?.unwrap_or_default(),
                _ => String::new(),
            };
            let lines = added_lines(&old_content, &new_content);
            if lines.is_empty() {
                continue;
            }
            files.push(FileChange {
                path,
                change_type,
                added_lines: lines,
            });
        }
        Ok(files)
    }
}
