//! Analysis request and result types.
//!
//! Results form a three-level hierarchy: a [`RuleSet`] owns [`Violation`]s keyed
//! by rule id, and each violation owns concrete [`Incident`] locations. Field
//! names follow the analyzer's JSON output.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of the `analysis_engine.Analyze` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequestParams {
    pub label_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_paths: Option<Vec<String>>,
    pub reset_cache: bool,
    pub excluded_paths: Vec<String>,
}

impl AnalysisRequestParams {
    /// Build request params.
    ///
    /// An empty `included_paths` list is a full-workspace run: the paths are
    /// omitted and the analyzer's incident cache is reset.
    #[must_use]
    pub fn new(
        label_selector: impl Into<String>,
        included_paths: Option<Vec<String>>,
        excluded_paths: Vec<String>,
    ) -> Self {
        let included_paths = included_paths.filter(|paths| !paths.is_empty());
        Self {
            label_selector: label_selector.into(),
            reset_cache: included_paths.is_none(),
            included_paths,
            excluded_paths,
        }
    }

    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.included_paths.is_some()
    }
}

/// A file change forwarded to the analyzer via `analysis_engine.NotifyFileChanges`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
    pub saved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub violations: BTreeMap<String, Violation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub insights: BTreeMap<String, Violation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    /// Name of the profile the analysis ran under. Stamped by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile_name: Option<String>,
}

impl RuleSet {
    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.violations.values().flat_map(|v| v.incidents.iter())
    }

    #[must_use]
    pub fn incident_count(&self) -> usize {
        self.violations.values().map(|v| v.incidents.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub uri: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl Incident {
    /// Filesystem path of the incident, if its URI is a `file:` URI.
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        url::Url::parse(&self.uri)
            .ok()
            .and_then(|u| u.to_file_path().ok())
    }
}

/// An incident flattened out of its ruleset and violation, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedIncident {
    #[serde(flatten)]
    pub incident: Incident,
    pub ruleset_name: Option<String>,
    pub violation_id: String,
    pub violation_description: String,
    pub violation_category: Option<String>,
    pub active_profile_name: Option<String>,
}

#[must_use]
pub fn enhance_incidents(rule_sets: &[RuleSet]) -> Vec<EnhancedIncident> {
    let mut out = Vec::new();
    for rule_set in rule_sets {
        for (violation_id, violation) in &rule_set.violations {
            for incident in &violation.incidents {
                out.push(EnhancedIncident {
                    incident: incident.clone(),
                    ruleset_name: rule_set.name.clone(),
                    violation_id: violation_id.clone(),
                    violation_description: violation.description.clone(),
                    violation_category: violation.category.clone(),
                    active_profile_name: rule_set.active_profile_name.clone(),
                });
            }
        }
    }
    out
}

#[must_use]
pub fn total_incidents(rule_sets: &[RuleSet]) -> usize {
    rule_sets.iter().map(RuleSet::incident_count).sum()
}

/// Count incidents located in any of `paths`.
///
/// Paths are compared against the incident's `file:` URI converted to a path;
/// URIs that are not file URIs are compared verbatim.
#[must_use]
pub fn count_incidents_in_paths(rule_sets: &[RuleSet], paths: &[String]) -> usize {
    let wanted: HashSet<PathBuf> = paths.iter().map(PathBuf::from).collect();
    rule_sets
        .iter()
        .flat_map(RuleSet::incidents)
        .filter(|incident| match incident.file_path() {
            Some(path) => wanted.contains(&path),
            None => wanted.contains(&PathBuf::from(&incident.uri)),
        })
        .count()
}

/// Outcome reported to every registered provider once an analysis run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Succeeded { incident_count: usize },
    Failed { error: String },
    Cancelled,
}

impl AnalysisOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    #[must_use]
    pub fn incident_count(&self) -> Option<usize> {
        match self {
            Self::Succeeded { incident_count } => Some(*incident_count),
            Self::Failed { .. } | Self::Cancelled => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            Self::Succeeded { .. } | Self::Cancelled => None,
        }
    }
}
