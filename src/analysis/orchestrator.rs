use std::sync::Arc;

use tracing::Instrument;

use super::channel::{ProgressChannel, ServerEvent};
use super::models::{
    AnalysisRequest, AnalysisResult, CombinedInput, IssueSummary, ProgressEvent, PullRequestData,
    SessionId,
};
use crate::adapters::Adapters;
use crate::errors::{RunError, Step};

/// Fixed progress percentages published after each step.
pub mod progress {
    pub const ISSUE_LOOKUP: i32 = 10;
    pub const ISSUE_DONE: i32 = 20;
    pub const PULL_REQUEST: i32 = 30;
    pub const COMMITS: i32 = 40;
    pub const FILES: i32 = 50;
    pub const DOCUMENTATION: i32 = 70;
    pub const DOCUMENTATION_DONE: i32 = 80;
    pub const CODE_REVIEW: i32 = 85;
    pub const CODE_REVIEW_DONE: i32 = 95;
    pub const COMPLETE: i32 = 100;
}

/// Runs one analysis request to completion for one session.
///
/// Every run ends with exactly one terminal event on the bound channel:
/// `analysis_complete` carrying the full result, or `analysis_error`
/// preceded by a `progress` event with [`ProgressEvent::FAILED`].
pub struct Orchestrator {
    session: SessionId,
    channel: Arc<dyn ProgressChannel>,
    adapters: Adapters,
}

impl Orchestrator {
    pub fn new(session: SessionId, channel: Arc<dyn ProgressChannel>, adapters: Adapters) -> Self {
        Self {
            session,
            channel,
            adapters,
        }
    }

    /// Execute the request and publish its outcome. Never fails: errors become
    /// an `analysis_error` event.
    pub async fn run(self, request: AnalysisRequest) {
        let span = tracing::info_span!(
            "analysis",
            session = %self.session,
            pr_id = request.pr_id,
            repo = %request.repository,
        );
        async move {
            tracing::info!("analysis started");
            match self.execute(&request).await {
                Ok(result) => {
                    tracing::info!(
                        commits = result.pr_data.commits.len(),
                        files = result.pr_data.files.len(),
                        "analysis complete"
                    );
                    self.publish(ServerEvent::AnalysisComplete(Box::new(result)));
                }
                Err(e) => {
                    tracing::error!("analysis failed: {}", e);
                    let message = e.to_string();
                    self.emit_progress(format!("Error: {}", message), ProgressEvent::FAILED);
                    self.publish(ServerEvent::error(message));
                }
            }
        }
        .instrument(span)
        .await
    }

    /// The step sequence. The first fatal error aborts the rest.
    async fn execute(&self, request: &AnalysisRequest) -> Result<AnalysisResult, RunError> {
        let repo = request.repository.as_str();
        let pr_id = request.pr_id;

        let issue_data = match request.issue_key.as_deref() {
            Some(key) => self.fetch_issue(key).await,
            None => {
                self.emit_progress("Skipping issue lookup (no issue key)", progress::ISSUE_DONE);
                None
            }
        };

        self.emit_progress(
            format!("Fetching PR #{} from {}...", pr_id, repo),
            progress::PULL_REQUEST,
        );
        let basic = self
            .adapters
            .repo
            .pull_request(repo, pr_id)
            .await
            .map_err(RunError::step(Step::PullRequest))?
            .ok_or(RunError::PullRequestNotFound { pr_id })?;

        self.emit_progress("Fetching PR commits...", progress::COMMITS);
        let commits = self
            .adapters
            .repo
            .commits(repo, pr_id)
            .await
            .map_err(RunError::step(Step::Commits))?;
        tracing::debug!(count = commits.len(), "commits fetched");

        self.emit_progress("Fetching changed files...", progress::FILES);
        let files = self
            .adapters
            .repo
            .added_lines(repo, pr_id)
            .await
            .map_err(RunError::step(Step::ChangedFiles))?;
        tracing::debug!(count = files.len(), "changed files fetched");

        let input = CombinedInput::new(&commits, &files, issue_data.as_ref());

        let documentation = if request.generate_documentation {
            self.emit_progress(
                "Generating technical documentation with AI...",
                progress::DOCUMENTATION,
            );
            let doc = self
                .adapters
                .ai
                .generate_documentation(&input)
                .await
                .map_err(RunError::step(Step::Documentation))?;
            self.emit_progress("✓ Documentation generated", progress::DOCUMENTATION_DONE);
            Some(doc)
        } else {
            None
        };

        let code_review = if request.generate_code_review {
            self.emit_progress("Generating code review with AI...", progress::CODE_REVIEW);
            let review = self
                .adapters
                .ai
                .generate_code_review(&input)
                .await
                .map_err(RunError::step(Step::CodeReview))?;
            self.emit_progress("✓ Code review generated", progress::CODE_REVIEW_DONE);
            Some(review)
        } else {
            None
        };

        self.emit_progress("✓ Analysis complete!", progress::COMPLETE);

        Ok(AnalysisResult {
            issue_data,
            pr_data: PullRequestData {
                basic,
                commits,
                files,
            },
            documentation,
            code_review,
        })
    }

    /// Issue lookup never fails the run: absence and errors both yield `None`.
    async fn fetch_issue(&self, key: &str) -> Option<IssueSummary> {
        self.emit_progress(format!("Fetching issue {}...", key), progress::ISSUE_LOOKUP);
        let issue = match self.adapters.issues.issue_summary(key).await {
            Ok(issue) => issue,
            Err(e) => {
                tracing::warn!(issue_key = key, "issue lookup failed: {:#}", e);
                None
            }
        };
        match &issue {
            Some(_) => {
                self.emit_progress(format!("✓ Issue {} fetched", key), progress::ISSUE_DONE)
            }
            None => self.emit_progress(
                format!("⚠ Could not fetch issue {}", key),
                progress::ISSUE_DONE,
            ),
        }
        issue
    }

    fn emit_progress(&self, message: impl Into<String>, progress: i32) {
        let event = ServerEvent::progress(message, progress);
        if let ServerEvent::Progress(p) = &event {
            tracing::debug!(progress = p.progress, "{}", p.message);
        }
        self.publish(event);
    }

    fn publish(&self, event: ServerEvent) {
        self.channel.publish(self.session, event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::{AiEngine, IssueTracker, RepoHost};
    use crate::analysis::channel::MemoryChannel;
    use crate::analysis::models::{Commit, FileChange, PullRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable adapters that count every call.
    #[derive(Default)]
    pub(crate) struct MockServices {
        pub issue: Option<IssueSummary>,
        pub issue_fails: bool,
        pub pr_missing: bool,
        pub commits_fail: bool,
        pub review_fails: bool,
        pub issue_calls: AtomicUsize,
        pub repo_calls: AtomicUsize,
        pub ai_calls: AtomicUsize,
    }

    impl MockServices {
        pub fn adapters(self: &Arc<Self>) -> Adapters {
            Adapters {
                issues: self.clone(),
                repo: self.clone(),
                ai: self.clone(),
            }
        }
    }

    pub(crate) fn sample_issue() -> IssueSummary {
        IssueSummary {
            key: "ABC-1".into(),
            summary: "fix bug".into(),
            description: None,
            status: None,
            issue_type: None,
            priority: None,
            assignee: None,
        }
    }

    #[async_trait]
    impl IssueTracker for MockServices {
        async fn issue_summary(&self, _key: &str) -> anyhow::Result<Option<IssueSummary>> {
            self.issue_calls.fetch_add(1, Ordering::SeqCst);
            if self.issue_fails {
                anyhow::bail!("jira unreachable");
            }
            Ok(self.issue.clone())
        }
    }

    #[async_trait]
    impl RepoHost for MockServices {
        async fn pull_request(
            &self,
            _repo: &str,
            pr_id: u64,
        ) -> anyhow::Result<Option<PullRequest>> {
            self.repo_calls.fetch_add(1, Ordering::SeqCst);
            if self.pr_missing {
                return Ok(None);
            }
            Ok(Some(PullRequest {
                id: pr_id,
                title: "Fix save".into(),
                description: None,
                status: "active".into(),
                author: None,
                source_branch: "fix".into(),
                target_branch: "main".into(),
                created_at: None,
                url: None,
            }))
        }

        async fn commits(&self, _repo: &str, _pr_id: u64) -> anyhow::Result<Vec<Commit>> {
            self.repo_calls.fetch_add(1, Ordering::SeqCst);
            if self.commits_fail {
                anyhow::bail!("500 Internal Server Error");
            }
            Ok((1..=2)
                .map(|i| Commit {
                    id: format!("c{i}"),
                    author: None,
                    date: None,
                    message: format!("commit {i}"),
                })
                .collect())
        }

        async fn added_lines(&self, _repo: &str, _pr_id: u64) -> anyhow::Result<Vec<FileChange>> {
            self.repo_calls.fetch_add(1, Ordering::SeqCst);
            Ok((1..=3)
                .map(|i| FileChange {
                    path: format!("/src/f{i}.rs"),
                    change_type: "edit".into(),
                    added_lines: vec![format!("line {i}")],
                })
                .collect())
        }
    }

    #[async_trait]
    impl AiEngine for MockServices {
        async fn generate_documentation(&self, input: &CombinedInput) -> anyhow::Result<String> {
            self.ai_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("docs for {} files", input.files.len()))
        }

        async fn generate_code_review(&self, _input: &CombinedInput) -> anyhow::Result<String> {
            self.ai_calls.fetch_add(1, Ordering::SeqCst);
            if self.review_fails {
                anyhow::bail!("model overloaded");
            }
            Ok("looks good".into())
        }
    }

    fn request(issue_key: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            pr_id: 42,
            repository: "demo".into(),
            issue_key: issue_key.map(str::to_string),
            generate_documentation: true,
            generate_code_review: true,
        }
    }

    async fn run(
        services: &Arc<MockServices>,
        req: AnalysisRequest,
    ) -> (Arc<MemoryChannel>, SessionId) {
        let channel = Arc::new(MemoryChannel::new());
        let session = SessionId::new();
        Orchestrator::new(session, channel.clone(), services.adapters())
            .run(req)
            .await;
        (channel, session)
    }

    fn complete_result(channel: &MemoryChannel, session: SessionId) -> AnalysisResult {
        let terminal = channel.terminal_events(session);
        assert_eq!(terminal.len(), 1, "expected exactly one terminal event");
        match terminal.into_iter().next() {
            Some(ServerEvent::AnalysisComplete(result)) => *result,
            other => panic!("Expected AnalysisComplete, got {:?}", other),
        }
    }

    fn error_message(channel: &MemoryChannel, session: SessionId) -> String {
        let terminal = channel.terminal_events(session);
        assert_eq!(terminal.len(), 1, "expected exactly one terminal event");
        match terminal.into_iter().next() {
            Some(ServerEvent::AnalysisError(e)) => e.error,
            other => panic!("Expected AnalysisError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_run_progress_sequence() {
        let services = Arc::new(MockServices {
            issue: Some(sample_issue()),
            ..Default::default()
        });
        let (channel, session) = run(&services, request(Some("ABC-1"))).await;

        assert_eq!(
            channel.progress_values(session),
            vec![10, 20, 30, 40, 50, 70, 80, 85, 95, 100]
        );
        let events = channel.events_for(session);
        assert!(matches!(events.last(), Some(ServerEvent::AnalysisComplete(_))));

        let result = complete_result(&channel, session);
        assert_eq!(result.issue_data.map(|i| i.key).as_deref(), Some("ABC-1"));
        assert_eq!(result.pr_data.basic.id, 42);
        assert_eq!(result.pr_data.commits.len(), 2);
        assert_eq!(result.pr_data.files.len(), 3);
        assert_eq!(result.documentation.as_deref(), Some("docs for 3 files"));
        assert_eq!(result.code_review.as_deref(), Some("looks good"));
    }

    #[tokio::test]
    async fn test_progress_is_non_decreasing() {
        let services = Arc::new(MockServices::default());
        let (channel, session) = run(&services, request(None)).await;
        let values = channel.progress_values(session);
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        assert_eq!(values.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_no_issue_key_skips_tracker() {
        let services = Arc::new(MockServices {
            issue: Some(sample_issue()),
            ..Default::default()
        });
        let (channel, session) = run(&services, request(None)).await;

        assert_eq!(services.issue_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.progress_values(session)[0], 20);
        assert!(complete_result(&channel, session).issue_data.is_none());
    }

    #[tokio::test]
    async fn test_issue_lookup_error_is_soft() {
        let services = Arc::new(MockServices {
            issue_fails: true,
            ..Default::default()
        });
        let (channel, session) = run(&services, request(Some("ABC-1"))).await;

        assert_eq!(services.issue_calls.load(Ordering::SeqCst), 1);
        let result = complete_result(&channel, session);
        assert!(result.issue_data.is_none());
        assert!(!channel.progress_values(session).contains(&ProgressEvent::FAILED));
    }

    #[tokio::test]
    async fn test_issue_not_found_is_soft() {
        let services = Arc::new(MockServices::default());
        let (channel, session) = run(&services, request(Some("ABC-404"))).await;
        let events = channel.events_for(session);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Progress(p) if p.progress == 20 && p.message.contains("ABC-404")
        )));
        assert!(complete_result(&channel, session).issue_data.is_none());
    }

    #[tokio::test]
    async fn test_missing_pull_request_is_fatal() {
        let services = Arc::new(MockServices {
            issue: Some(sample_issue()),
            pr_missing: true,
            ..Default::default()
        });
        let (channel, session) = run(&services, request(Some("ABC-1"))).await;

        assert_eq!(channel.progress_values(session), vec![10, 20, 30, -1]);
        let message = error_message(&channel, session);
        assert!(message.contains("42"));
        assert_eq!(message, "Error fetching PR #42");
        // Only the pull request lookup reached the repo host.
        assert_eq!(services.repo_calls.load(Ordering::SeqCst), 1);
        assert_eq!(services.ai_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_progress_precedes_error_event() {
        let services = Arc::new(MockServices {
            commits_fail: true,
            ..Default::default()
        });
        let (channel, session) = run(&services, request(None)).await;

        let events = channel.events_for(session);
        let n = events.len();
        match (&events[n - 2], &events[n - 1]) {
            (ServerEvent::Progress(p), ServerEvent::AnalysisError(e)) => {
                assert_eq!(p.progress, ProgressEvent::FAILED);
                assert_eq!(p.message, format!("Error: {}", e.error));
                assert!(e.error.contains("fetching commits failed"));
                assert!(e.error.contains("500 Internal Server Error"));
            }
            other => panic!("unexpected tail: {:?}", other),
        }
        assert_eq!(services.ai_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ai_failure_aborts_without_partial_result() {
        let services = Arc::new(MockServices {
            review_fails: true,
            ..Default::default()
        });
        let (channel, session) = run(&services, request(None)).await;

        assert_eq!(channel.progress_values(session), vec![20, 30, 40, 50, 70, 80, 85, -1]);
        assert!(error_message(&channel, session).contains("model overloaded"));
        assert!(
            !channel
                .events_for(session)
                .iter()
                .any(|e| matches!(e, ServerEvent::AnalysisComplete(_)))
        );
    }

    #[tokio::test]
    async fn test_generation_disabled_skips_ai() {
        let services = Arc::new(MockServices::default());
        let mut req = request(None);
        req.generate_documentation = false;
        req.generate_code_review = false;
        let (channel, session) = run(&services, req).await;

        assert_eq!(services.ai_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.progress_values(session), vec![20, 30, 40, 50, 100]);
        let result = complete_result(&channel, session);
        assert!(result.documentation.is_none());
        assert!(result.code_review.is_none());
    }

    #[tokio::test]
    async fn test_only_code_review() {
        let services = Arc::new(MockServices::default());
        let mut req = request(None);
        req.generate_documentation = false;
        let (channel, session) = run(&services, req).await;

        assert_eq!(services.ai_calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.progress_values(session), vec![20, 30, 40, 50, 85, 95, 100]);
        let result = complete_result(&channel, session);
        assert!(result.documentation.is_none());
        assert_eq!(result.code_review.as_deref(), Some("looks good"));
    }

    #[tokio::test]
    async fn test_events_only_addressed_to_bound_session() {
        let services = Arc::new(MockServices::default());
        let channel = Arc::new(MemoryChannel::new());
        let session = SessionId::new();
        let other = SessionId::new();
        Orchestrator::new(session, channel.clone(), services.adapters())
            .run(request(None))
            .await;
        assert!(channel.events_for(other).is_empty());
        assert!(!channel.events_for(session).is_empty());
    }
}
