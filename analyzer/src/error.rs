use std::io;
use std::path::PathBuf;

use konveyor_types::ConfigurationIssue;
use thiserror::Error;

use crate::connector::ConnectError;
use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationIssue),
    #[error("analyzer binary not found at {}", path.display())]
    BinaryNotFound { path: PathBuf },
    #[error("failed to write provider config {}: {source}", path.display())]
    ProviderConfig { path: PathBuf, source: io::Error },
    #[error("failed to spawn analyzer {}: {source}", path.display())]
    Spawn { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("analyzer exited before its RPC pipe was connected")]
    ExitedDuringStartup,
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),
}
