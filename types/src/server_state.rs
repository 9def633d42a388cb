//! Lifecycle state of the analyzer RPC server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the analyzer server process as seen by the client.
///
/// Exactly one value is current at a time. The orchestrator is the only
/// writer; every change goes through its transition method, which logs the
/// `(from, to)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerState {
    #[default]
    Initial,
    Starting,
    Running,
    Stopping,
    Stopped,
    StartFailed,
    ConfigurationNeeded,
    ConfigurationReady,
    Initializing,
}

impl ServerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::StartFailed => "startFailed",
            Self::ConfigurationNeeded => "configurationNeeded",
            Self::ConfigurationReady => "configurationReady",
            Self::Initializing => "initializing",
        }
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// States from which `start()` may spawn a new server.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(
            self,
            Self::Initial
                | Self::Stopped
                | Self::StartFailed
                | Self::ConfigurationNeeded
                | Self::ConfigurationReady
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
