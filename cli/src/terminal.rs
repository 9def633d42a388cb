//! Terminal implementations of the host services.
//!
//! User-facing messages and progress go to stderr; stdout carries only the
//! analysis summary.

use std::io::{IsTerminal, Write, stderr};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use konveyor_analyzer::{Notifier, ProgressSink, ProviderRegistry};
use konveyor_types::{AnalysisOutcome, ProgressUpdate, ProviderRegistration};
use tokio::sync::watch;

pub struct TerminalNotifier {
    config_path: Option<String>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl TerminalNotifier {
    pub fn new(config_path: Option<String>) -> Self {
        Self {
            config_path,
            cancel: Mutex::new(None),
        }
    }

    /// Cancel the progress surface opened by the current analysis, if any.
    pub fn cancel_progress(&self) {
        let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = cancel.as_ref() {
            let _ = tx.send(true);
        }
    }
}

fn print_line(prefix: &str, message: &str) {
    let mut err = stderr().lock();
    let _ = writeln!(err, "{prefix}{message}");
}

#[async_trait]
impl Notifier for TerminalNotifier {
    fn info(&self, message: &str) {
        print_line("", message);
    }

    fn warn(&self, message: &str) {
        print_line("warning: ", message);
    }

    fn error(&self, message: &str) {
        print_line("error: ", message);
    }

    async fn error_with_actions(&self, message: &str, actions: &[&str]) -> Option<String> {
        self.error(message);
        if !actions.is_empty() {
            print_line("  available: ", &actions.join(", "));
        }
        // Non-interactive: actions are listed but never chosen.
        None
    }

    fn open_profile_manager(&self) {
        match &self.config_path {
            Some(path) => print_line("Edit analysis profiles in ", path),
            None => print_line("", "Add [[profiles]] to the konveyor config file."),
        }
    }

    fn begin_progress(&self, title: &str) -> Arc<dyn ProgressSink> {
        let (tx, rx) = watch::channel(false);
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        print_line("", &format!("{title} (Ctrl-C to cancel)"));
        Arc::new(TerminalProgress {
            cancel: rx,
            last: Mutex::new(None),
            overwrite: stderr().is_terminal(),
        })
    }
}

struct TerminalProgress {
    cancel: watch::Receiver<bool>,
    last: Mutex<Option<String>>,
    overwrite: bool,
}

impl ProgressSink for TerminalProgress {
    fn report(&self, update: &ProgressUpdate) {
        let line = format!("[{:>3}%] {}", update.percent, update.notification_message);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(line.as_str()) {
            return;
        }

        let mut err = stderr().lock();
        if self.overwrite {
            let _ = write!(err, "\r\x1b[2K{line}");
            if update.percent >= 100 {
                let _ = writeln!(err);
            }
        } else {
            let _ = writeln!(err, "{line}");
        }
        let _ = err.flush();
        *last = Some(line);
    }

    fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}

/// Providers declared in the config file.
pub struct ConfiguredProviders {
    providers: Vec<ProviderRegistration>,
}

impl ConfiguredProviders {
    pub fn new(providers: Vec<ProviderRegistration>) -> Self {
        Self { providers }
    }
}

impl ProviderRegistry for ConfiguredProviders {
    fn providers(&self) -> Vec<ProviderRegistration> {
        self.providers.clone()
    }

    fn emit_analysis_complete(&self, outcome: &AnalysisOutcome) {
        for provider in &self.providers {
            tracing::info!(
                provider = %provider.name,
                success = outcome.is_success(),
                incident_count = outcome.incident_count(),
                error = outcome.error(),
                "Analysis complete"
            );
        }
    }
}
