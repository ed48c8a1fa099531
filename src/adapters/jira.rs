use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::IssueTracker;
use crate::analysis::models::IssueSummary;
use crate::config::JiraSettings;

const ISSUE_FIELDS: &str = "summary,description,status,issuetype,priority,assignee";

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<Named>,
    #[serde(default)]
    issuetype: Option<Named>,
    #[serde(default)]
    priority: Option<Named>,
    #[serde(default)]
    assignee: Option<JiraUser>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    #[serde(rename = "displayName")]
    display_name: String,
}

impl From<JiraIssue> for IssueSummary {
    fn from(issue: JiraIssue) -> Self {
        let fields = issue.fields;
        IssueSummary {
            key: issue.key,
            summary: fields.summary,
            description: fields.description.filter(|d| !d.trim().is_empty()),
            status: fields.status.map(|s| s.name),
            issue_type: fields.issuetype.map(|t| t.name),
            priority: fields.priority.map(|p| p.name),
            assignee: fields.assignee.map(|a| a.display_name),
        }
    }
}

/// Jira REST v2 client.
///
/// Cloud instances authenticate with email + API token (basic auth); when no
/// email is configured the token is sent as a bearer PAT (Jira Data Center).
pub struct JiraClient {
    client: reqwest::Client,
    settings: JiraSettings,
}

impl JiraClient {
    pub fn new(settings: &JiraSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Jira HTTP client")?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    /// `{url}/rest/api/2/{segments...}`, each segment percent-encoded.
    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let base = self.settings.url.trim();
        let mut url =
            Url::parse(base).with_context(|| format!("Invalid Jira base URL: {}", base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Jira base URL cannot be a base: {}", base))?
            .pop_if_empty()
            .extend(["rest", "api", "2"])
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header("Accept", "application/json");
        let token = self.settings.api_token.expose();
        if !self.settings.email.is_empty() {
            request.basic_auth(&self.settings.email, Some(token))
        } else if !token.is_empty() {
            request.bearer_auth(token)
        } else {
            request
        }
    }

    /// Whether the configured credentials can reach `/myself`.
    pub async fn test_connection(&self) -> bool {
        if !self.settings.is_configured() {
            return false;
        }
        let url = match self.api_url(&["myself"]) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("jira connection test failed: {:#}", e);
                return false;
            }
        };
        match self.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!("jira connection test failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn issue_summary(&self, issue_key: &str) -> Result<Option<IssueSummary>> {
        if !self.settings.is_configured() {
            tracing::warn!(issue_key, "jira is not configured, skipping issue lookup");
            return Ok(None);
        }

        let url = self.api_url(&["issue", issue_key])?;
        let resp = self
            .get(url)
            .query(&[("fields", ISSUE_FIELDS)])
            .send()
            .await
            .with_context(|| format!("Failed to send issue request for {} to Jira", issue_key))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(issue_key, %status, "jira issue lookup returned an error status");
            return Ok(None);
        }

        let issue: JiraIssue = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Jira issue {}", issue_key))?;
        Ok(Some(issue.into()))
    }
}
