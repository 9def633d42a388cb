//! Core domain types for the Konveyor analyzer client.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The analyzer crate, the config loader and the CLI all speak these types.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod analysis;
mod profile;
mod progress;
mod server_state;

pub use analysis::{
    AnalysisOutcome, AnalysisRequestParams, EnhancedIncident, FileChange, Incident, Link,
    RuleSet, Violation, count_incidents_in_paths, enhance_incidents, total_incidents,
};
pub use profile::{AnalysisProfile, ConfigurationIssue, ProviderRegistration, check_analyzable};
pub use progress::{ProgressEvent, ProgressStage, ProgressUpdate};
pub use server_state::ServerState;
