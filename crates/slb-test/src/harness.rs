//! A throwaway project with a file-backed ledger and a wired engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use slb_approval::{
    ApprovalEngine, ApprovalResult, Clock, CreateResult, Notifier, RegisteredSession, ReviewResult,
    SubmitReview,
};
use slb_config::Config;
use slb_core::{Decision, ProjectDir, RequestId};
use slb_storage::Ledger;

use crate::fixtures::{test_config, test_create_request, test_registration};
use crate::mocks::{ManualClock, RecordingNotifier};

/// A ledger in a temporary directory, deleted on drop.
pub struct TestLedger {
    dir: TempDir,
    ledger: Ledger,
}

impl TestLedger {
    /// Open a fresh ledger file.
    ///
    /// # Panics
    ///
    /// Panics if the temp directory or the database cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let ledger = Ledger::open(dir.path().join("state.db")).expect("open ledger");
        Self { dir, ledger }
    }

    /// The ledger handle.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("state.db")
    }

    /// Open a second, independent connection to the same file, as another
    /// `slb` process would.
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be opened.
    #[must_use]
    pub fn reopen(&self) -> Ledger {
        Ledger::open(self.path()).expect("reopen ledger")
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// A temporary project: state directory, work directory, ledger, manual
/// clock, recording notifier and an engine wired to all of them.
pub struct TestProject {
    dir: TempDir,
    config: Arc<Config>,
    /// The engine under test.
    pub engine: ApprovalEngine,
    /// Shared with the engine; advance it to cross deadlines.
    pub clock: ManualClock,
    /// Every notification the engine sent.
    pub notifier: RecordingNotifier,
}

impl TestProject {
    /// Project with the built-in configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Project with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the project cannot be set up.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let project = ProjectDir::new(dir.path());
        project.ensure().expect("create state dir");
        std::fs::create_dir_all(dir.path().join("work")).expect("create work dir");

        let config = Arc::new(config);
        let clock = ManualClock::new();
        let notifier = RecordingNotifier::new();
        let engine = Self::engine_for(&project, &config, &clock, &notifier);
        Self {
            dir,
            config,
            engine,
            clock,
            notifier,
        }
    }

    fn engine_for(
        project: &ProjectDir,
        config: &Arc<Config>,
        clock: &ManualClock,
        notifier: &RecordingNotifier,
    ) -> ApprovalEngine {
        let ledger = Ledger::open(project.database_path()).expect("open ledger");
        ApprovalEngine::builder(ledger, Arc::clone(config), project.clone())
            .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
            .notifier(Arc::new(notifier.clone()) as Arc<dyn Notifier>)
            .build()
            .expect("build engine")
    }

    /// A second engine on its own connection to the same ledger, standing in
    /// for a separate `slb` process. It shares the clock and notifier.
    #[must_use]
    pub fn second_process(&self) -> ApprovalEngine {
        Self::engine_for(&self.project(), &self.config, &self.clock, &self.notifier)
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Project state directory handle.
    #[must_use]
    pub fn project(&self) -> ProjectDir {
        ProjectDir::new(self.dir.path())
    }

    /// Directory commands run in.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Register an agent session using model `"test-model"`.
    pub async fn session(&self, agent: &str) -> RegisteredSession {
        self.session_with_model(agent, "test-model").await
    }

    /// Register an agent session.
    ///
    /// # Panics
    ///
    /// Panics if registration fails.
    pub async fn session_with_model(&self, agent: &str, model: &str) -> RegisteredSession {
        self.engine
            .start_session(test_registration(agent, model, &self.work_dir()))
            .await
            .expect("register session")
    }

    /// Register a human reviewer session.
    ///
    /// # Panics
    ///
    /// Panics if registration fails.
    pub async fn human_session(&self, agent: &str) -> RegisteredSession {
        let mut opts = test_registration(agent, "human", &self.work_dir());
        opts.human = true;
        self.engine.start_session(opts).await.expect("register human session")
    }

    /// Create a request for `command`, returning the full result.
    ///
    /// # Errors
    ///
    /// Whatever creation returns.
    pub async fn create(&self, session: &RegisteredSession, command: &str) -> ApprovalResult<CreateResult> {
        self.engine
            .create_request(test_create_request(session.session.id, command, &self.work_dir()))
            .await
    }

    /// Open a request that must not be skipped and return its id.
    ///
    /// # Panics
    ///
    /// Panics if creation fails or the command is classified safe.
    pub async fn open(&self, session: &RegisteredSession, command: &str) -> RequestId {
        self.create(session, command)
            .await
            .expect("create request")
            .request_id()
            .expect("request was persisted")
    }

    /// Approve `id` as `reviewer`.
    ///
    /// # Errors
    ///
    /// Whatever review submission returns.
    pub async fn approve(&self, reviewer: &RegisteredSession, id: RequestId) -> ApprovalResult<ReviewResult> {
        self.review(reviewer, id, Decision::Approve, "").await
    }

    /// Reject `id` as `reviewer`.
    ///
    /// # Errors
    ///
    /// Whatever review submission returns.
    pub async fn reject(
        &self,
        reviewer: &RegisteredSession,
        id: RequestId,
        reason: &str,
    ) -> ApprovalResult<ReviewResult> {
        self.review(reviewer, id, Decision::Reject, reason).await
    }

    /// Submit a review signed with the reviewer's own key.
    ///
    /// # Errors
    ///
    /// Whatever review submission returns.
    pub async fn review(
        &self,
        reviewer: &RegisteredSession,
        id: RequestId,
        decision: Decision,
        comments: &str,
    ) -> ApprovalResult<ReviewResult> {
        self.engine
            .submit_review(SubmitReview {
                session_id: reviewer.session.id,
                session_key: reviewer.key.to_hex(),
                request_id: id,
                decision,
                comments: comments.to_string(),
            })
            .await
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
