//! Client and process orchestrator for the Konveyor analyzer RPC server.

pub mod assets;
pub mod codec;
pub mod connector;
pub mod host;
pub mod process;
pub mod progress;
pub mod rpc;
pub mod store;

pub(crate) mod protocol;

mod client;
mod error;
mod provider_config;

pub use assets::{Platform, bundle_jars, resolve_analyzer_binary};
pub use client::{AnalyzerClient, AnalyzerSettings, Collaborators, MANAGE_PROFILES};
pub use connector::{ConnectError, RetryPolicy};
pub use error::AnalyzerError;
pub use host::{Notifier, ProgressSink, ProviderRegistry, TaskManager};
pub use progress::ProgressParser;
pub use provider_config::write_provider_config;
pub use rpc::{RpcError, RpcSession};
pub use store::{ExtensionState, ExtensionStore};
