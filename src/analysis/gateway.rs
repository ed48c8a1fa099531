use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use super::channel::{ProgressChannel, ServerEvent};
use super::models::{ProgressEvent, SessionId, StartAnalysis};
use super::orchestrator::Orchestrator;
use crate::adapters::AdapterProvider;
use crate::errors::GatewayError;

/// Sessions that currently have a run in flight.
type InFlight = Arc<Mutex<HashSet<SessionId>>>;

/// Accepts `start_analysis` commands and dispatches orchestrator runs.
///
/// Validation failures and rejected starts are answered synchronously with an
/// `analysis_error`. Accepted requests run on their own tokio task, so the
/// caller (a socket loop) never waits on remote calls.
pub struct SessionGateway {
    channel: Arc<dyn ProgressChannel>,
    provider: Arc<dyn AdapterProvider>,
    default_repo: String,
    in_flight: InFlight,
}

impl SessionGateway {
    pub fn new(
        channel: Arc<dyn ProgressChannel>,
        provider: Arc<dyn AdapterProvider>,
        default_repo: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            provider,
            default_repo: default_repo.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn default_repo(&self) -> &str {
        &self.default_repo
    }

    pub fn is_running(&self, session: SessionId) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&session))
            .unwrap_or(false)
    }

    /// Handle a start command from `session`.
    ///
    /// Returns the handle of the spawned run, or `None` when the command was
    /// rejected (the rejection has already been published to the session).
    pub fn start_analysis(
        &self,
        session: SessionId,
        command: StartAnalysis,
    ) -> Option<JoinHandle<()>> {
        match self.try_start(session, command) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(session = %session, "start_analysis rejected: {}", e);
                self.channel.publish(session, ServerEvent::error(&e));
                None
            }
        }
    }

    /// Answer a frame the gateway could not understand.
    pub fn reject(&self, session: SessionId, reason: impl std::fmt::Display) {
        tracing::warn!(session = %session, "rejected client frame: {}", reason);
        self.channel.publish(session, ServerEvent::error(reason));
    }

    fn try_start(
        &self,
        session: SessionId,
        command: StartAnalysis,
    ) -> Result<JoinHandle<()>, GatewayError> {
        let request = command.into_request(&self.default_repo)?;
        let guard = RunGuard::acquire(&self.in_flight, session)?;
        let adapters = self.provider.adapters().map_err(GatewayError::Adapters)?;

        tracing::info!(
            session = %session,
            pr_id = request.pr_id,
            repo = %request.repository,
            "dispatching analysis"
        );
        let channel = Arc::clone(&self.channel);
        let orchestrator = Orchestrator::new(session, Arc::clone(&channel), adapters);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(orchestrator.run(request))
                .catch_unwind()
                .await
            {
                let message = panic_message(panic.as_ref());
                tracing::error!(session = %session, "analysis task panicked: {}", message);
                channel.publish(
                    session,
                    ServerEvent::progress(format!("Error: {}", message), ProgressEvent::FAILED),
                );
                channel.publish(session, ServerEvent::error(message));
            }
        }))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Internal error: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Internal error: {}", s)
    } else {
        "Internal error: analysis task panicked".to_string()
    }
}

/// Marks a session busy for as long as it lives, including across a panic
/// in the run task.
struct RunGuard {
    in_flight: InFlight,
    session: SessionId,
}

impl RunGuard {
    fn acquire(in_flight: &InFlight, session: SessionId) -> Result<Self, GatewayError> {
        let mut set = in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(session) {
            return Err(GatewayError::AlreadyRunning);
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            session,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Adapters, ConfigStatus, RepoHost};
    use crate::analysis::channel::MemoryChannel;
    use crate::analysis::models::{Commit, FileChange, PullRequest};
    use crate::analysis::orchestrator::tests::{MockServices, sample_issue};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tokio::sync::Semaphore;

    struct StaticProvider {
        services: Arc<MockServices>,
        fail: bool,
    }

    #[async_trait]
    impl AdapterProvider for StaticProvider {
        fn adapters(&self) -> anyhow::Result<Adapters> {
            if self.fail {
                anyhow::bail!("AZDO_PAT is not set");
            }
            Ok(self.services.adapters())
        }

        async fn config_status(&self) -> ConfigStatus {
            ConfigStatus::default()
        }
    }

    fn gateway(services: Arc<MockServices>, fail: bool) -> (SessionGateway, Arc<MemoryChannel>) {
        let channel = Arc::new(MemoryChannel::new());
        let provider = Arc::new(StaticProvider { services, fail });
        (
            SessionGateway::new(channel.clone(), provider, "MedicineOneLibrary"),
            channel,
        )
    }

    fn command(value: serde_json::Value) -> StartAnalysis {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_missing_pr_id_rejected_synchronously() {
        let services = Arc::new(MockServices::default());
        let (gateway, channel) = gateway(services.clone(), false);
        let session = SessionId::new();

        assert!(gateway.start_analysis(session, command(json!({"pr_id": ""}))).is_none());

        let events = channel.events_for(session);
        assert_eq!(events, vec![ServerEvent::error("PR ID is required")]);
        assert!(channel.progress_values(session).is_empty());
        assert_eq!(services.repo_calls.load(Ordering::SeqCst), 0);
        assert!(!gateway.is_running(session));
    }

    #[tokio::test]
    async fn test_invalid_pr_id_rejected() {
        let (gateway, channel) = gateway(Arc::new(MockServices::default()), false);
        let session = SessionId::new();
        assert!(gateway.start_analysis(session, command(json!({"pr_id": "abc"}))).is_none());
        assert_eq!(
            channel.events_for(session),
            vec![ServerEvent::error("Invalid PR ID: abc")]
        );
    }

    #[tokio::test]
    async fn test_adapter_failure_reported_as_error() {
        let (gateway, channel) = gateway(Arc::new(MockServices::default()), true);
        let session = SessionId::new();
        assert!(gateway.start_analysis(session, command(json!({"pr_id": 42}))).is_none());

        let terminal = channel.terminal_events(session);
        assert_eq!(terminal.len(), 1);
        match &terminal[0] {
            ServerEvent::AnalysisError(e) => assert!(e.error.contains("AZDO_PAT")),
            other => panic!("Expected AnalysisError, got {:?}", other),
        }
        assert!(channel.progress_values(session).is_empty());
        // The in-flight marker is released when adapters cannot be built.
        assert!(!gateway.is_running(session));
    }

    #[tokio::test]
    async fn test_accepted_run_completes_with_default_repo() {
        let services = Arc::new(MockServices {
            issue: Some(sample_issue()),
            ..Default::default()
        });
        let (gateway, channel) = gateway(services, false);
        let session = SessionId::new();

        let handle = gateway
            .start_analysis(session, command(json!({"pr_id": "42", "issue_key": "ABC-1"})))
            .unwrap();
        handle.await.unwrap();

        assert_eq!(
            channel.progress_values(session),
            vec![10, 20, 30, 40, 50, 70, 80, 85, 95, 100]
        );
        let events = channel.events_for(session);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Progress(p) if p.message.contains("MedicineOneLibrary")
        )));
        assert!(matches!(events.last(), Some(ServerEvent::AnalysisComplete(_))));
        assert!(!gateway.is_running(session));
    }

    /// Repo host that parks until a permit is released, so a run can be held
    /// in flight.
    struct Parked {
        inner: Arc<MockServices>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl RepoHost for Parked {
        async fn pull_request(
            &self,
            repo: &str,
            pr_id: u64,
        ) -> anyhow::Result<Option<PullRequest>> {
            self.release.acquire().await?.forget();
            self.inner.pull_request(repo, pr_id).await
        }

        async fn commits(
            &self,
            repo: &str,
            pr_id: u64,
        ) -> anyhow::Result<Vec<Commit>> {
            self.inner.commits(repo, pr_id).await
        }

        async fn added_lines(
            &self,
            repo: &str,
            pr_id: u64,
        ) -> anyhow::Result<Vec<FileChange>> {
            self.inner.added_lines(repo, pr_id).await
        }
    }

    struct ParkedProvider {
        services: Arc<MockServices>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl AdapterProvider for ParkedProvider {
        fn adapters(&self) -> anyhow::Result<Adapters> {
            let mut adapters = self.services.adapters();
            adapters.repo = Arc::new(Parked {
                inner: self.services.clone(),
                release: self.release.clone(),
            });
            Ok(adapters)
        }

        async fn config_status(&self) -> ConfigStatus {
            ConfigStatus::default()
        }
    }

    #[tokio::test]
    async fn test_second_start_on_busy_session_rejected() {
        let services = Arc::new(MockServices::default());
        let release = Arc::new(Semaphore::new(0));
        let channel = Arc::new(MemoryChannel::new());
        let gateway = SessionGateway::new(
            channel.clone(),
            Arc::new(ParkedProvider {
                services,
                release: release.clone(),
            }),
            "demo",
        );
        let session = SessionId::new();

        let first = gateway
            .start_analysis(session, command(json!({"pr_id": 1})))
            .unwrap();
        assert!(gateway.is_running(session));

        assert!(gateway.start_analysis(session, command(json!({"pr_id": 2}))).is_none());
        assert!(channel.events_for(session).iter().any(|e| matches!(
            e,
            ServerEvent::AnalysisError(err) if err.error.contains("already running")
        )));

        // Another session is unaffected by the busy one.
        let other = SessionId::new();
        let other_run = gateway
            .start_analysis(other, command(json!({"pr_id": 3})))
            .unwrap();

        release.add_permits(2);
        first.await.unwrap();
        other_run.await.unwrap();

        assert!(!gateway.is_running(session));
        let completes = channel
            .events_for(session)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::AnalysisComplete(_)))
            .count();
        assert_eq!(completes, 1);

        // Once the first run is over, the session may start again.
        let again = gateway.start_analysis(session, command(json!({"pr_id": 4})));
        assert!(again.is_some());
        release.add_permits(1);
        again.unwrap().await.unwrap();
    }

    /// Repo host whose commit listing panics.
    struct Panicking(Arc<MockServices>);

    #[async_trait]
    impl RepoHost for Panicking {
        async fn pull_request(
            &self,
            repo: &str,
            pr_id: u64,
        ) -> anyhow::Result<Option<PullRequest>> {
            self.0.pull_request(repo, pr_id).await
        }

        async fn commits(&self, _repo: &str, _pr_id: u64) -> anyhow::Result<Vec<Commit>> {
            panic!("commit listing exploded")
        }

        async fn added_lines(&self, repo: &str, pr_id: u64) -> anyhow::Result<Vec<FileChange>> {
            self.0.added_lines(repo, pr_id).await
        }
    }

    struct PanickingProvider(Arc<MockServices>);

    #[async_trait]
    impl AdapterProvider for PanickingProvider {
        fn adapters(&self) -> anyhow::Result<Adapters> {
            let mut adapters = self.0.adapters();
            adapters.repo = Arc::new(Panicking(self.0.clone()));
            Ok(adapters)
        }

        async fn config_status(&self) -> ConfigStatus {
            ConfigStatus::default()
        }
    }

    #[tokio::test]
    async fn test_panicking_run_still_ends_with_error() {
        let channel = Arc::new(MemoryChannel::new());
        let provider = Arc::new(PanickingProvider(Arc::new(MockServices::default())));
        let gateway = SessionGateway::new(channel.clone(), provider, "demo");
        let session = SessionId::new();

        let handle = gateway
            .start_analysis(session, command(json!({"pr_id": 42})))
            .unwrap();
        handle.await.unwrap();

        assert_eq!(channel.progress_values(session), vec![20, 30, 40, -1]);
        let terminal = channel.terminal_events(session);
        assert_eq!(terminal.len(), 1);
        match &terminal[0] {
            ServerEvent::AnalysisError(e) => assert!(e.error.contains("commit listing exploded")),
            other => panic!("Expected AnalysisError, got {:?}", other),
        }
        assert!(matches!(
            channel.events_for(session).last(),
            Some(ServerEvent::AnalysisError(_))
        ));
        assert!(!gateway.is_running(session));
    }
}
