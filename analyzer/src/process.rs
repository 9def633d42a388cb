//! The spawned analyzer child and the RPC session that talks to it.
//!
//! [`ChildHandle`] owns the OS process: a monitor task waits for it to exit
//! (or kills it on request) and reports a [`ProcessExit`]. Child stderr is
//! drained through a [`ProgressParser`] into the log. [`AnalyzerProcess`]
//! pairs the handle with its [`RpcSession`] so both are torn down together.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::AnalyzerError;
use crate::progress::ProgressParser;
use crate::rpc::RpcSession;

/// Target for the analyzer's own stderr output.
pub const STDERR_TARGET: &str = "konveyor_analyzer::stderr";

/// How long a stopping analyzer gets to exit on its own before being killed.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

const VERBOSITY: &str = "-4";

/// Everything needed to build the analyzer command line.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub pipe: String,
    pub rules: Vec<PathBuf>,
    pub log_file: PathBuf,
    pub provider_config: Option<PathBuf>,
}

impl LaunchSpec {
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        let rules = self
            .rules
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");

        let mut args: Vec<OsString> = vec![
            "-server-pipe".into(),
            self.pipe.clone().into(),
            "-rules".into(),
            rules.into(),
            "-log-file".into(),
            self.log_file.clone().into(),
            "-verbosity".into(),
            VERBOSITY.into(),
            "-progress-output".into(),
            "stderr".into(),
            "-progress-format".into(),
            "json".into(),
        ];
        if let Some(path) = &self.provider_config {
            args.push("-provider-config".into());
            args.push(path.clone().into());
        }
        args
    }

    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args());
        cmd
    }
}

/// How the analyzer process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own. `code` is `None` when terminated by a signal.
    Exited { code: Option<i32> },
    /// Killed by us.
    Killed,
    WaitFailed(String),
}

impl ProcessExit {
    /// Non-zero exit, death by signal, or a failed wait.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Exited { code } => *code != Some(0),
            Self::Killed => false,
            Self::WaitFailed(_) => true,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Exited { code: Some(code) } => format!("exited with code {code}"),
            Self::Exited { code: None } => "was terminated by a signal".to_string(),
            Self::Killed => "was stopped".to_string(),
            Self::WaitFailed(err) => format!("could not be monitored: {err}"),
        }
    }
}

pub struct ChildHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
    exited: watch::Receiver<bool>,
}

impl ChildHandle {
    /// Spawn `command` with stderr piped into the log.
    ///
    /// `on_exit` runs exactly once, on the monitor task, before
    /// [`has_exited`](Self::has_exited) turns `true`. Dropping the handle
    /// kills the child.
    pub fn spawn(
        mut command: Command,
        on_exit: impl FnOnce(ProcessExit) + Send + 'static,
    ) -> Result<Self, AnalyzerError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| AnalyzerError::Spawn {
            path: PathBuf::from(command.as_std().get_program()),
            source,
        })?;
        let pid = child.id();
        tracing::info!(pid, "Spawned analyzer process");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited) = watch::channel(false);
        let monitor = tokio::spawn(async move {
            let exit = wait_or_kill(&mut child, kill_rx).await;
            tracing::info!(pid, ?exit, "Analyzer process ended");
            on_exit(exit);
            let _ = exited_tx.send(true);
        });

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            monitor: Some(monitor),
            exited,
        })
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Resolves once the child is gone and its exit has been reported.
    pub async fn wait_exited(&self) {
        self.exit_signal().await;
    }

    /// Like [`wait_exited`](Self::wait_exited), but detached from the handle
    /// so the handle itself can be moved elsewhere.
    pub fn exit_signal(&self) -> impl Future<Output = ()> + Send + 'static + use<> {
        let mut exited = self.exited.clone();
        async move {
            // An error means the monitor is gone, which also means the child is.
            let _ = exited.wait_for(|done| *done).await;
        }
    }

    /// Give the child `grace` to exit on its own, then kill it.
    pub async fn shutdown(mut self, grace: Duration) {
        if !self.has_exited()
            && tokio::time::timeout(grace, self.wait_exited()).await.is_err()
        {
            tracing::debug!(pid = self.pid, "Analyzer did not exit in time, killing");
            if let Some(kill) = self.kill_tx.take() {
                let _ = kill.send(());
            }
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
    }
}

async fn wait_or_kill(child: &mut Child, kill_rx: oneshot::Receiver<()>) -> ProcessExit {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ProcessExit::Exited { code: status.code() },
            Err(err) => ProcessExit::WaitFailed(err.to_string()),
        },
        // Also taken when the handle is dropped.
        _ = kill_rx => {
            if let Err(err) = child.kill().await {
                tracing::warn!("Failed to kill analyzer process: {err}");
            }
            ProcessExit::Killed
        }
    }
}

async fn drain_stderr(mut stderr: ChildStderr) {
    let mut parser = ProgressParser::new(|event| {
        tracing::debug!(
            target: STDERR_TARGET,
            stage = event.stage.as_str(),
            message = event.message.as_deref().unwrap_or_default(),
            "Analyzer progress"
        );
    })
    .with_line_handler(|line| tracing::warn!(target: STDERR_TARGET, "{line}"));

    let mut buf = vec![0u8; 8192];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => parser.feed(&buf[..n]),
            Err(err) => {
                tracing::debug!("Analyzer stderr closed: {err}");
                break;
            }
        }
    }
}

/// A running analyzer: the child process and its connected RPC session.
pub struct AnalyzerProcess {
    session: Arc<RpcSession>,
    child: ChildHandle,
}

impl AnalyzerProcess {
    #[must_use]
    pub fn new(session: Arc<RpcSession>, child: ChildHandle) -> Self {
        Self { session, child }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<RpcSession> {
        &self.session
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.pid()
    }

    /// Stop listening, end and dispose the session, then stop the child.
    pub async fn shutdown(self) {
        self.session.stop_listening();
        if tokio::time::timeout(STOP_GRACE, self.session.end())
            .await
            .is_err()
        {
            tracing::debug!("Timed out flushing analyzer RPC pipe");
        }
        self.session.dispose();
        self.child.shutdown(STOP_GRACE).await;
    }

    /// Tear down after the child has already exited.
    pub fn release(self) {
        self.session.stop_listening();
        self.session.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(provider_config: Option<PathBuf>) -> LaunchSpec {
        LaunchSpec {
            binary: PathBuf::from("/opt/kai-analyzer-rpc"),
            pipe: "/tmp/konveyor-rpc-abc.sock".to_string(),
            rules: vec![
                PathBuf::from("/assets/rulesets"),
                PathBuf::from("/home/me/rules"),
            ],
            log_file: PathBuf::from("/data/analyzer.log"),
            provider_config,
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn args_follow_cli_contract() {
        let args = strings(&launch(Some(PathBuf::from("/data/provider-config.json"))).args());
        assert_eq!(
            args,
            vec![
                "-server-pipe",
                "/tmp/konveyor-rpc-abc.sock",
                "-rules",
                "/assets/rulesets,/home/me/rules",
                "-log-file",
                "/data/analyzer.log",
                "-verbosity",
                "-4",
                "-progress-output",
                "stderr",
                "-progress-format",
                "json",
                "-provider-config",
                "/data/provider-config.json",
            ]
        );
    }

    #[test]
    fn provider_config_flag_is_optional() {
        let args = strings(&launch(None).args());
        assert!(!args.iter().any(|a| a == "-provider-config"));
        assert_eq!(args.last().map(String::as_str), Some("json"));
    }

    #[test]
    fn exit_classification() {
        assert!(!ProcessExit::Exited { code: Some(0) }.is_failure());
        assert!(ProcessExit::Exited { code: Some(2) }.is_failure());
        assert!(ProcessExit::Exited { code: None }.is_failure());
        assert!(!ProcessExit::Killed.is_failure());
        assert!(ProcessExit::WaitFailed("x".to_string()).is_failure());
    }

    #[tokio::test]
    async fn spawn_failure_names_binary() {
        let cmd = Command::new("/nonexistent/kai-analyzer-rpc");
        let err = ChildHandle::spawn(cmd, |_| {}).err().unwrap();
        match err {
            AnalyzerError::Spawn { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/kai-analyzer-rpc"));
            }
            other => panic!("expected Spawn, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_is_reported_before_flag_flips() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);
        let child = ChildHandle::spawn(cmd, move |exit| tx.send(exit).unwrap()).unwrap();

        child.wait_exited().await;
        assert!(child.has_exited());
        assert_eq!(rx.try_recv().unwrap(), ProcessExit::Exited { code: Some(3) });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_kills_after_grace() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let child = ChildHandle::spawn(cmd, move |exit| tx.send(exit).unwrap()).unwrap();

        child.shutdown(Duration::from_millis(50)).await;
        assert_eq!(rx.try_recv().unwrap(), ProcessExit::Killed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_waits_for_voluntary_exit() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 0.1"]);
        let child = ChildHandle::spawn(cmd, move |exit| tx.send(exit).unwrap()).unwrap();

        child.shutdown(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv().unwrap(), ProcessExit::Exited { code: Some(0) });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_closes_session_before_killing() {
        let (client, server) = tokio::io::duplex(1024);
        let session = Arc::new(RpcSession::new(client, false));
        session.listen();

        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let child = ChildHandle::spawn(cmd, |_| {}).unwrap();
        let process = AnalyzerProcess::new(Arc::clone(&session), child);

        let (read, _write) = tokio::io::split(server);
        let mut peer = crate::codec::FrameReader::new(read);

        process.shutdown().await;
        assert!(session.is_closed());
        assert!(peer.read_frame().await.unwrap().is_none());
    }
}
