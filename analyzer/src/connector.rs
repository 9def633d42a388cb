//! Connects to the pipe the freshly spawned analyzer is about to create.
//!
//! The analyzer creates its end of the pipe asynchronously after start-up, so
//! early connection attempts are expected to fail. [`connect_with_retry`]
//! retries on a fixed interval up to a bounded attempt count.

use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// Every 2 seconds for up to 5 minutes.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("analyzer never created pipe {pipe} after {attempts} connection attempts")]
    PipeNotCreated { pipe: String, attempts: u32 },
    #[error("could not connect to analyzer pipe {pipe} after {attempts} attempts: {source}")]
    Failed {
        pipe: String,
        attempts: u32,
        source: io::Error,
    },
}

/// A platform-specific unique pipe name for one analyzer instance.
#[must_use]
pub fn generate_pipe_name() -> String {
    let id = uuid::Uuid::new_v4().simple();
    if cfg!(windows) {
        format!(r"\\.\pipe\konveyor-rpc-{id}")
    } else {
        std::env::temp_dir()
            .join(format!("konveyor-rpc-{id}.sock"))
            .to_string_lossy()
            .into_owned()
    }
}

/// Run `connect` until it succeeds or `policy.max_attempts` is exhausted.
///
/// A failed attempt's socket is dropped before sleeping. If every failure was
/// `NotFound` the pipe never existed, which is reported separately.
pub async fn connect_with_retry<S, F, Fut>(
    pipe: &str,
    policy: RetryPolicy,
    mut connect: F,
) -> Result<S, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<S>>,
{
    let attempts = policy.max_attempts.max(1);
    // Most recent failure other than NotFound; absent means the pipe never existed.
    let mut other_error = None;

    for attempt in 1..=attempts {
        match connect().await {
            Ok(stream) => {
                tracing::debug!(pipe, attempt, "Connected to analyzer pipe");
                return Ok(stream);
            }
            Err(err) => {
                tracing::trace!(pipe, attempt, "Analyzer pipe not ready: {err}");
                if err.kind() != io::ErrorKind::NotFound {
                    other_error = Some(err);
                }
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    let pipe = pipe.to_string();
    Err(match other_error {
        Some(source) => ConnectError::Failed {
            pipe,
            attempts,
            source,
        },
        None => ConnectError::PipeNotCreated { pipe, attempts },
    })
}

#[cfg(unix)]
pub type PipeStream = tokio::net::UnixStream;

#[cfg(windows)]
pub type PipeStream = tokio::net::windows::named_pipe::NamedPipeClient;

#[cfg(unix)]
async fn connect_once(pipe: &str) -> io::Result<PipeStream> {
    tokio::net::UnixStream::connect(pipe).await
}

#[cfg(windows)]
async fn connect_once(pipe: &str) -> io::Result<PipeStream> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(pipe)
}

/// Connect to the analyzer's pipe with the given retry policy.
pub async fn connect_pipe(pipe: &str, policy: RetryPolicy) -> Result<PipeStream, ConnectError> {
    connect_with_retry(pipe, policy, || connect_once(pipe)).await
}
