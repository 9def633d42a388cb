//! Analysis profiles and provider registrations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A user-selected configuration bundle for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label_selector: String,
    #[serde(default = "default_true")]
    pub use_default_rules: bool,
    #[serde(default)]
    pub custom_rules: Vec<String>,
}

const fn default_true() -> bool {
    true
}

impl AnalysisProfile {
    #[must_use]
    pub fn has_label_selector(&self) -> bool {
        !self.label_selector.trim().is_empty()
    }

    #[must_use]
    pub fn has_rules(&self) -> bool {
        self.use_default_rules || !self.custom_rules.is_empty()
    }
}

/// Why the active profile cannot be analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigurationIssue {
    #[error("No active analysis profile is selected.")]
    NoActiveProfile,
    #[error("The active analysis profile has no label selector configured.")]
    MissingLabelSelector,
    #[error("No rules are configured: enable the default rules or add custom rules to the active profile.")]
    NoRules,
}

/// Check that a profile has a label selector and at least one rule source.
pub fn check_analyzable(profile: Option<&AnalysisProfile>) -> Result<(), ConfigurationIssue> {
    let profile = profile.ok_or(ConfigurationIssue::NoActiveProfile)?;
    if !profile.has_label_selector() {
        return Err(ConfigurationIssue::MissingLabelSelector);
    }
    if !profile.has_rules() {
        return Err(ConfigurationIssue::NoRules);
    }
    Ok(())
}

/// A named language provider and the opaque config the analyzer hands it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub name: String,
    #[serde(rename = "providerConfig", alias = "provider_config")]
    pub provider_config: Value,
}
