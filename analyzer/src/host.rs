//! Services the orchestrator consumes from its host.
//!
//! The client never talks to a UI, a provider registry or a task list
//! directly. Hosts implement these traits; the CLI provides terminal
//! versions and tests provide recording ones.

use std::sync::Arc;

use async_trait::async_trait;
use konveyor_types::{AnalysisOutcome, ProgressUpdate, ProviderRegistration};
use tokio::sync::watch;

/// User-facing messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    /// Show an error with action buttons and wait for the user's choice.
    /// `None` means the message was dismissed.
    async fn error_with_actions(&self, message: &str, actions: &[&str]) -> Option<String>;

    fn open_profile_manager(&self);

    /// Open a cancellable progress surface.
    fn begin_progress(&self, title: &str) -> Arc<dyn ProgressSink>;
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, update: &ProgressUpdate);

    /// Flips to `true` when the user cancels.
    fn cancellation(&self) -> watch::Receiver<bool>;
}

pub trait ProviderRegistry: Send + Sync {
    fn providers(&self) -> Vec<ProviderRegistration>;

    /// Called once per analysis run, whatever its outcome.
    fn emit_analysis_complete(&self, outcome: &AnalysisOutcome);
}

pub trait TaskManager: Send + Sync {
    /// Rebuild tasks after new results are loaded.
    fn init(&self);
}
