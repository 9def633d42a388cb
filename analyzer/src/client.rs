//! The analyzer orchestrator.
//!
//! [`AnalyzerClient`] drives the server lifecycle
//! (`initial/stopped → starting → running → stopping → stopped`, with
//! `startFailed` on spawn or connect failure) and runs analyses against it.
//! All state lives in the shared [`ExtensionStore`]; every server-state change
//! goes through one transition helper that logs the `(from, to)` pair.
//!
//! Errors never escape [`AnalyzerClient::run_analysis`]: each failure becomes
//! a user-visible message, a log entry and an [`AnalysisOutcome`] delivered to
//! the provider registry.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use konveyor_types::{
    AnalysisOutcome, AnalysisProfile, AnalysisRequestParams, ConfigurationIssue, FileChange,
    ProgressEvent, ProgressStage, ProgressUpdate, ServerState, check_analyzable,
    count_incidents_in_paths, total_incidents,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};

use crate::connector::{self, RetryPolicy};
use crate::error::AnalyzerError;
use crate::host::{Notifier, ProgressSink, ProviderRegistry, TaskManager};
use crate::process::{AnalyzerProcess, ChildHandle, LaunchSpec, ProcessExit, STOP_GRACE};
use crate::protocol::{self, method};
use crate::provider_config::write_provider_config;
use crate::rpc::RpcSession;
use crate::store::{ExtensionState, ExtensionStore};

pub const MANAGE_PROFILES: &str = "Manage Profiles";
const PROGRESS_TITLE: &str = "Running Analysis";

/// Resolved paths and knobs for launching the analyzer.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub binary_path: PathBuf,
    /// Bundled rulesets, used when the profile enables default rules.
    pub default_rulesets: PathBuf,
    /// Holds the analyzer log and the provider config file.
    pub data_dir: PathBuf,
    pub excluded_paths: Vec<String>,
    pub trace_rpc: bool,
    pub retry: RetryPolicy,
}

impl AnalyzerSettings {
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("analyzer.log")
    }

    #[must_use]
    pub fn provider_config_file(&self) -> PathBuf {
        self.data_dir.join("provider-config.json")
    }

    /// Default rulesets (when enabled) followed by the profile's custom rules.
    #[must_use]
    pub fn rules_paths(&self, profile: &AnalysisProfile) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(profile.custom_rules.len() + 1);
        if profile.use_default_rules {
            paths.push(self.default_rulesets.clone());
        }
        paths.extend(profile.custom_rules.iter().map(PathBuf::from));
        paths
    }
}

/// Host services the client reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub providers: Arc<dyn ProviderRegistry>,
    pub task_manager: Option<Arc<dyn TaskManager>>,
}

type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The analyzer child from spawn until teardown.
#[derive(Default)]
enum ProcessSlot {
    #[default]
    Empty,
    /// Spawned, pipe not connected yet. Dropping `abandon` tells `start()` to
    /// give up the connection.
    Launching {
        child: ChildHandle,
        abandon: oneshot::Sender<()>,
    },
    Attached(AnalyzerProcess),
}

impl ProcessSlot {
    fn take_launching(&mut self) -> Option<ChildHandle> {
        match std::mem::take(self) {
            Self::Launching { child, .. } => Some(child),
            other => {
                *self = other;
                None
            }
        }
    }

    fn take_attached(&mut self) -> Option<AnalyzerProcess> {
        match std::mem::take(self) {
            Self::Attached(process) => Some(process),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// What `attach` found once the pipe was connected.
enum AttachStep {
    Abandoned,
    Exited(ChildHandle),
    Attached(Arc<RpcSession>),
}

struct Inner {
    settings: AnalyzerSettings,
    store: Arc<ExtensionStore>,
    host: Collaborators,
    process: Mutex<ProcessSlot>,
    /// At most one analysis observes progress at a time.
    progress: Mutex<Option<ProgressCallback>>,
}

impl Inner {
    fn server_state(&self) -> ServerState {
        self.store.read(|state| state.server_state)
    }

    fn transition(&self, to: ServerState) -> ServerState {
        let mut from = to;
        self.store
            .mutate(|state| from = std::mem::replace(&mut state.server_state, to));
        if from != to {
            tracing::info!(from = %from, to = %to, "Server state transition");
        }
        from
    }

    /// Move to `to` only if the current state satisfies `allowed`.
    fn transition_from(
        &self,
        allowed: impl FnOnce(ServerState) -> bool,
        to: ServerState,
    ) -> Option<ServerState> {
        let mut from = None;
        self.store.mutate_if(|state| {
            if !allowed(state.server_state) {
                return false;
            }
            from = Some(std::mem::replace(&mut state.server_state, to));
            true
        });
        if let Some(from) = from {
            tracing::info!(from = %from, to = %to, "Server state transition");
        }
        from
    }

    fn on_process_exit(&self, exit: &ProcessExit) {
        let was_active = self
            .transition_from(
                |state| matches!(state, ServerState::Starting | ServerState::Running),
                ServerState::Stopped,
            )
            .is_some();
        if !was_active {
            tracing::debug!(?exit, "Analyzer exit observed outside starting/running");
            return;
        }

        // A child that never connected is cleaned up by `start()`.
        let process = lock(&self.process).take_attached();
        if let Some(process) = process {
            process.release();
        }

        if exit.is_failure() {
            let message = format!("Analyzer process {}.", exit.describe());
            tracing::error!("{message}");
            self.host.notifier.error(&message);
        }
    }

    fn on_progress(&self, params: Option<Value>) {
        let Some(update) = params.and_then(progress_update) else {
            tracing::trace!("Ignoring progress notification without a stage");
            return;
        };
        if let Some(callback) = lock(&self.progress).as_ref() {
            callback(update);
        }
    }
}

/// Interpret an `analysis.progress` payload. Unknown stages map to the
/// generic 50% update; payloads without a stage are ignored.
fn progress_update(mut params: Value) -> Option<ProgressUpdate> {
    let object = params.as_object_mut()?;
    let stage = object.get("stage")?.as_str()?;
    if ProgressStage::parse(stage).is_none() {
        let message = object.get("message").and_then(Value::as_str);
        return Some(ProgressUpdate::unknown_stage(message));
    }
    object
        .entry("timestamp")
        .or_insert_with(|| Value::String(String::new()));
    ProgressEvent::from_value(params).map(|event| ProgressUpdate::from_event(&event))
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender can never cancel.
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Clone)]
pub struct AnalyzerClient {
    inner: Arc<Inner>,
}

impl AnalyzerClient {
    #[must_use]
    pub fn new(settings: AnalyzerSettings, store: Arc<ExtensionStore>, host: Collaborators) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                host,
                process: Mutex::new(ProcessSlot::Empty),
                progress: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &AnalyzerSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ExtensionStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExtensionState> {
        self.inner.store.subscribe()
    }

    #[must_use]
    pub fn server_state(&self) -> ServerState {
        self.inner.server_state()
    }

    #[must_use]
    pub fn is_analyzing(&self) -> bool {
        self.inner.store.read(|state| state.is_analyzing)
    }

    /// Wait until the server reaches `target` or settles anywhere other than
    /// `starting`. Returns the state it settled in.
    pub async fn wait_for_server_state(&self, target: ServerState) -> ServerState {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|state| {
                state.server_state == target || state.server_state != ServerState::Starting
            })
            .await
            .map(|state| state.server_state);
        settled.unwrap_or_else(|_| self.server_state())
    }

    fn configuration_check(&self) -> Result<(), ConfigurationIssue> {
        self.inner
            .store
            .read(|state| check_analyzable(state.active_profile()))
    }

    /// The active profile has a label selector and at least one rule source.
    #[must_use]
    pub fn can_analyze(&self) -> bool {
        self.configuration_check().is_ok()
    }

    /// Like [`can_analyze`](Self::can_analyze), but on failure tells the user
    /// what is missing and offers to open the profile manager.
    pub async fn can_analyze_interactive(&self) -> bool {
        let Err(issue) = self.configuration_check() else {
            return true;
        };
        let message = match issue {
            ConfigurationIssue::NoActiveProfile | ConfigurationIssue::MissingLabelSelector => {
                "Label selector is not configured. Please configure it in the analysis profile."
            }
            ConfigurationIssue::NoRules => {
                "No rules are configured. Enable the default rules or add custom rules to the analysis profile."
            }
        };
        let notifier = &self.inner.host.notifier;
        let choice = notifier.error_with_actions(message, &[MANAGE_PROFILES]).await;
        if choice.as_deref() == Some(MANAGE_PROFILES) {
            notifier.open_profile_manager();
        }
        false
    }

    /// Spawn the analyzer and connect to it.
    ///
    /// Returns once the RPC session is listening and `start` has been sent;
    /// the move to `running` is observed through [`subscribe`](Self::subscribe).
    pub async fn start(&self) -> Result<(), AnalyzerError> {
        let state = self.server_state();
        if !state.can_start() {
            tracing::warn!(state = %state, "Analyzer start requested while not stopped; ignoring");
            return Ok(());
        }

        let profile = self.inner.store.read(|s| {
            check_analyzable(s.active_profile()).map(|()| s.active_profile().cloned())
        });
        let profile = match profile {
            Ok(Some(profile)) => profile,
            Ok(None) => return Err(ConfigurationIssue::NoActiveProfile.into()),
            Err(issue) => {
                tracing::warn!("Cannot start analyzer: {issue}");
                self.inner.host.notifier.error(&issue.to_string());
                return Err(issue.into());
            }
        };

        let settings = &self.inner.settings;
        if !settings.binary_path.is_file() {
            let err = AnalyzerError::BinaryNotFound {
                path: settings.binary_path.clone(),
            };
            tracing::error!("{err}");
            self.inner.host.notifier.error(&format!("Cannot start the analyzer: {err}"));
            return Err(err);
        }

        let providers = self.inner.host.providers.providers();
        let provider_config_path = settings.provider_config_file();
        write_provider_config(&provider_config_path, &providers)?;

        let launch = LaunchSpec {
            binary: settings.binary_path.clone(),
            pipe: connector::generate_pipe_name(),
            rules: settings.rules_paths(&profile),
            log_file: settings.log_file(),
            provider_config: (!providers.is_empty()).then_some(provider_config_path),
        };
        tracing::info!(
            binary = %launch.binary.display(),
            pipe = %launch.pipe,
            providers = providers.len(),
            "Starting analyzer"
        );

        // Entering `starting` and parking the child happen under the slot
        // lock, so `stop()` always finds the child it has to kill.
        let launched = {
            let mut slot = lock(&self.inner.process);
            if self
                .inner
                .transition_from(|s| s.can_start(), ServerState::Starting)
                .is_none()
            {
                None
            } else {
                Some(self.spawn_child(launch.command()).map(|child| {
                    let exited = child.exit_signal();
                    let (abandon, abandoned) = oneshot::channel();
                    *slot = ProcessSlot::Launching { child, abandon };
                    (exited, abandoned)
                }))
            }
        };
        let (exited, abandoned) = match launched {
            Some(Ok(launched)) => launched,
            Some(Err(err)) => {
                self.inner.transition_from(
                    |s| s == ServerState::Starting,
                    ServerState::StartFailed,
                );
                tracing::error!("{err}");
                self.inner.host.notifier.error(&format!("Failed to start the analyzer: {err}"));
                return Err(err);
            }
            None => {
                tracing::warn!("Analyzer was started concurrently; ignoring");
                return Ok(());
            }
        };

        let connected = tokio::select! {
            biased;
            _ = abandoned => {
                tracing::info!("Analyzer start abandoned before the pipe connected");
                return Ok(());
            }
            () = exited => {
                // The exit handler has already moved the state and reported.
                drop(lock(&self.inner.process).take_launching());
                return Err(AnalyzerError::ExitedDuringStartup);
            }
            result = connector::connect_pipe(&launch.pipe, settings.retry) => result,
        };

        match connected {
            Ok(stream) => self.attach(stream).await,
            Err(err) => {
                let Some(child) = lock(&self.inner.process).take_launching() else {
                    return Ok(());
                };
                self.inner.transition_from(
                    |s| s == ServerState::Starting,
                    ServerState::StartFailed,
                );
                tracing::error!("{err}");
                self.inner
                    .host
                    .notifier
                    .error(&format!("Failed to connect to the analyzer: {err}"));
                child.shutdown(std::time::Duration::ZERO).await;
                Err(err.into())
            }
        }
    }

    /// Spawn `command` with its exit routed to the state machine.
    pub(crate) fn spawn_child(
        &self,
        command: tokio::process::Command,
    ) -> Result<ChildHandle, AnalyzerError> {
        let weak = Arc::downgrade(&self.inner);
        ChildHandle::spawn(command, move |exit| {
            if let Some(inner) = weak.upgrade() {
                inner.on_process_exit(&exit);
            }
        })
    }

    /// Build the RPC session over the connected stream for the launching
    /// child, begin listening and send `start`.
    pub(crate) async fn attach<S>(&self, stream: S) -> Result<(), AnalyzerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let step = {
            let mut slot = lock(&self.inner.process);
            match slot.take_launching() {
                None => AttachStep::Abandoned,
                // The state and the slot change under this lock together, so
                // an exit handler either saw `Starting` with the process
                // attached or has already left `Starting`.
                Some(child) if self.server_state() != ServerState::Starting => {
                    AttachStep::Exited(child)
                }
                Some(child) => {
                    let session = Arc::new(RpcSession::new(stream, self.inner.settings.trace_rpc));
                    self.register_handlers(&session);
                    session.listen();
                    *slot = ProcessSlot::Attached(AnalyzerProcess::new(Arc::clone(&session), child));
                    AttachStep::Attached(session)
                }
            }
        };

        let session = match step {
            AttachStep::Abandoned => {
                tracing::info!("Analyzer start was abandoned before the pipe connected");
                return Ok(());
            }
            AttachStep::Exited(child) => {
                child.shutdown(STOP_GRACE).await;
                return Err(AnalyzerError::ExitedDuringStartup);
            }
            AttachStep::Attached(session) => session,
        };
        session
            .send_notification(method::START, Some(protocol::start_params()))
            .await?;
        Ok(())
    }

    fn register_handlers(&self, session: &RpcSession) {
        let weak = Arc::downgrade(&self.inner);
        session.on_notification(method::STARTED, move |_| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.transition_from(|s| s == ServerState::Starting, ServerState::Running);
            }
        });

        let weak = Arc::downgrade(&self.inner);
        session.on_notification(method::PROGRESS, move |params| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_progress(params);
            }
        });

        session.on_unhandled_notification(|method, params| {
            tracing::debug!(method, ?params, "Unhandled analyzer notification");
        });
        session.on_error(|err| tracing::error!("Analyzer RPC error: {err}"));
        session.on_close(|| tracing::info!("Analyzer RPC connection closed"));
    }

    fn session(&self) -> Option<Arc<RpcSession>> {
        match &*lock(&self.inner.process) {
            ProcessSlot::Attached(process) => Some(Arc::clone(process.session())),
            ProcessSlot::Empty | ProcessSlot::Launching { .. } => None,
        }
    }

    /// Stop the analyzer: end the RPC session, then give the child a grace
    /// period before killing it. A child still waiting for its pipe is killed
    /// at once and the pending `start()` returns without error.
    pub async fn stop(&self) {
        let from = self.inner.transition_from(
            |s| matches!(s, ServerState::Starting | ServerState::Running),
            ServerState::Stopping,
        );
        let slot = std::mem::take(&mut *lock(&self.inner.process));

        match slot {
            ProcessSlot::Attached(process) => {
                tracing::info!(pid = process.pid(), "Stopping analyzer");
                process.shutdown().await;
            }
            ProcessSlot::Launching { child, abandon } => {
                tracing::info!(pid = child.pid(), "Stopping analyzer before its pipe connected");
                drop(abandon);
                child.shutdown(std::time::Duration::ZERO).await;
            }
            ProcessSlot::Empty => {}
        }
        if from.is_some() {
            self.inner.transition(ServerState::Stopped);
        }
    }

    pub async fn restart(&self) -> Result<(), AnalyzerError> {
        self.stop().await;
        self.start().await
    }

    /// Run an analysis of the whole workspace, or only of `file_paths`.
    ///
    /// Returns `None` when skipped because the server is not running or an
    /// analysis is already in progress.
    pub async fn run_analysis(&self, file_paths: Option<Vec<String>>) -> Option<AnalysisOutcome> {
        let state = self.server_state();
        if !state.is_running() {
            tracing::warn!(state = %state, "Analyzer server is not running; skipping analysis");
            return None;
        }

        let claimed = self.inner.store.mutate_if(|state| {
            if state.is_analyzing {
                return false;
            }
            state.set_analyzing(true);
            state.last_analysis_error = None;
            true
        });
        if !claimed {
            tracing::warn!("Analysis already in progress; ignoring request");
            self.inner.host.notifier.warn("An analysis is already running.");
            return None;
        }

        let sink = self.inner.host.notifier.begin_progress(PROGRESS_TITLE);
        self.install_progress(Arc::clone(&sink));

        let outcome = self.analyze(file_paths, sink.as_ref()).await;

        *lock(&self.inner.progress) = None;
        self.inner.store.mutate(|state| {
            state.set_analyzing(false);
            if let AnalysisOutcome::Failed { error } = &outcome {
                state.last_analysis_error = Some(error.clone());
            }
        });
        self.inner.host.providers.emit_analysis_complete(&outcome);
        Some(outcome)
    }

    fn install_progress(&self, sink: Arc<dyn ProgressSink>) {
        let store = Arc::clone(&self.inner.store);
        *lock(&self.inner.progress) = Some(Box::new(move |update: ProgressUpdate| {
            sink.report(&update);
            store.mutate(|state| {
                state.analysis_progress = update.percent;
                state.analysis_progress_message.clone_from(&update.webview_message);
            });
        }));
    }

    async fn analyze(&self, file_paths: Option<Vec<String>>, sink: &dyn ProgressSink) -> AnalysisOutcome {
        let notifier = &self.inner.host.notifier;

        let profile = self.inner.store.read(|s| s.active_profile().cloned());
        let profile = match profile {
            Some(profile) if profile.has_label_selector() => profile,
            _ => {
                let error = ConfigurationIssue::MissingLabelSelector.to_string();
                tracing::warn!("Analysis aborted: {error}");
                notifier.error(&error);
                return AnalysisOutcome::Failed { error };
            }
        };

        let params = AnalysisRequestParams::new(
            profile.label_selector.clone(),
            file_paths,
            self.inner.settings.excluded_paths.clone(),
        );
        let before = params
            .included_paths
            .as_deref()
            .map(|paths| self.inner.store.read(|s| count_incidents_in_paths(&s.rule_sets, paths)));

        let Some(session) = self.session() else {
            let error = "Analyzer server is not running.".to_string();
            notifier.error(&error);
            return AnalysisOutcome::Failed { error };
        };
        let request = match protocol::analyze_params(&params) {
            Ok(request) => request,
            Err(err) => return self.fail(format!("Failed to encode analysis request: {err}")),
        };

        tracing::info!(
            label_selector = %params.label_selector,
            partial = params.is_partial(),
            reset_cache = params.reset_cache,
            "Requesting analysis"
        );

        let mut cancel = sink.cancellation();
        let response = tokio::select! {
            response = session.send_request(method::ANALYZE, Some(request)) => response,
            () = cancelled(&mut cancel) => {
                tracing::info!("Analysis cancelled; the server keeps running the request");
                notifier.info("Analysis was cancelled.");
                return AnalysisOutcome::Cancelled;
            }
        };

        let result = match response {
            Ok(result) => result,
            Err(err) => return self.fail(format!("Analysis failed: {err}")),
        };
        let mut rule_sets = match protocol::parse_analyze_result(result) {
            Ok(rule_sets) => rule_sets,
            Err(reason) => {
                return self.fail(format!(
                    "Analysis failed: {}",
                    AnalyzerError::MalformedResponse(reason)
                ));
            }
        };

        for rule_set in &mut rule_sets {
            rule_set.active_profile_name = Some(profile.name.clone());
        }
        let incident_count = total_incidents(&rule_sets);
        let after = params
            .included_paths
            .as_deref()
            .map(|paths| count_incidents_in_paths(&rule_sets, paths));

        self.inner.store.mutate(|state| state.load_rule_sets(rule_sets));
        if let Some(task_manager) = &self.inner.host.task_manager {
            task_manager.init();
        }

        if let (Some(before), Some(after)) = (before, after) {
            tracing::info!(before, after, "Partial analysis incident counts for analyzed files");
        }
        tracing::info!(incident_count, "Analysis completed");
        if incident_count == 0 {
            notifier.info("Analysis completed. No incidents were found.");
        } else {
            notifier.info(&format!("Analysis completed. Found {incident_count} incidents."));
        }
        AnalysisOutcome::Succeeded { incident_count }
    }

    fn fail(&self, error: String) -> AnalysisOutcome {
        tracing::error!("{error}");
        self.inner.host.notifier.error(&error);
        AnalysisOutcome::Failed { error }
    }

    /// Forward edited file contents to the analyzer. No-op unless running.
    pub async fn notify_file_changes(&self, changes: Vec<FileChange>) {
        if !self.server_state().is_running() {
            tracing::debug!("Analyzer server is not running; dropping file changes");
            return;
        }
        if changes.is_empty() {
            return;
        }
        let Some(session) = self.session() else {
            return;
        };

        let params = match protocol::file_changes_params(&changes) {
            Ok(params) => params,
            Err(err) => {
                tracing::error!("Failed to encode file changes: {err}");
                return;
            }
        };
        if let Err(err) = session
            .send_request(method::NOTIFY_FILE_CHANGES, Some(params))
            .await
        {
            tracing::error!(count = changes.len(), "Failed to notify analyzer of file changes: {err}");
        }
    }
}
