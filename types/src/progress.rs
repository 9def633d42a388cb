//! Progress events emitted by the analyzer and their UI projections.
//!
//! The analyzer reports progress as [`ProgressEvent`]s, either as NDJSON on
//! stderr or as `analysis.progress` RPC notifications. Each event maps onto a
//! single [`ProgressUpdate`] carrying two differently-worded messages: a short
//! one for the notification toast and a detailed one for the analysis panel.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One of the seven fixed phases of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Init,
    ProviderInit,
    ProviderPrepare,
    RuleParsing,
    RuleExecution,
    DependencyAnalysis,
    Complete,
}

impl ProgressStage {
    pub const ALL: [Self; 7] = [
        Self::Init,
        Self::ProviderInit,
        Self::ProviderPrepare,
        Self::RuleParsing,
        Self::RuleExecution,
        Self::DependencyAnalysis,
        Self::Complete,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ProviderInit => "provider_init",
            Self::ProviderPrepare => "provider_prepare",
            Self::RuleParsing => "rule_parsing",
            Self::RuleExecution => "rule_execution",
            Self::DependencyAnalysis => "dependency_analysis",
            Self::Complete => "complete",
        }
    }

    /// Parse a wire stage name. Returns `None` for anything outside the closed set.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == value)
    }
}

/// A validated progress event.
///
/// Only `timestamp` and `stage` are checked; `message` and numeric fields of
/// the wrong type are read as absent and unknown fields are carried through in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: String,
    pub stage: ProgressStage,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub current: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_percent",
        skip_serializing_if = "Option::is_none"
    )]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        _ => None,
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| v.as_u64()))
}

fn lenient_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| v.as_f64()))
}

impl ProgressEvent {
    #[must_use]
    pub fn new(timestamp: impl Into<String>, stage: ProgressStage) -> Self {
        Self {
            timestamp: timestamp.into(),
            stage,
            message: None,
            current: None,
            total: None,
            percent: None,
            metadata: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_counts(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    /// Validate a parsed JSON value as a progress event.
    ///
    /// Returns `None` unless the value is an object with a string `timestamp`
    /// and a `stage` drawn from [`ProgressStage::ALL`].
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        if !object.get("timestamp").is_some_and(Value::is_string) {
            return None;
        }
        object
            .get("stage")
            .and_then(Value::as_str)
            .and_then(ProgressStage::parse)?;
        serde_json::from_value(value).ok()
    }

    /// `current / total` as a fraction in `[0, 1]`, when both are known.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        match (self.current, self.total) {
            (Some(current), Some(total)) if total > 0 => {
                Some((current.min(total) as f64) / (total as f64))
            }
            _ => None,
        }
    }
}

/// Percent band start for each stage.
const PROVIDER_INIT_PERCENT: f64 = 10.0;
const PROVIDER_PREPARE_SPAN: f64 = 5.0;
const RULE_PARSING_PERCENT: f64 = 20.0;
const RULE_EXECUTION_SPAN: f64 = 70.0;
const DEPENDENCY_ANALYSIS_PERCENT: f64 = 90.0;
const UNKNOWN_STAGE_PERCENT: u8 = 50;

/// One progress step projected onto both UI surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    /// Short text for the OS-level progress notification.
    pub notification_message: String,
    /// Detailed text for the in-editor analysis panel.
    pub webview_message: String,
}

impl ProgressUpdate {
    fn new(percent: f64, notification: impl Into<String>, webview: impl Into<String>) -> Self {
        Self {
            percent: percent.round().clamp(0.0, 100.0) as u8,
            notification_message: notification.into(),
            webview_message: webview.into(),
        }
    }

    /// Project a progress event onto the stage-ordered percentage scale.
    #[must_use]
    pub fn from_event(event: &ProgressEvent) -> Self {
        let counts = event.current.zip(event.total).filter(|(_, t)| *t > 0);
        let message = event.message.as_deref().filter(|m| !m.trim().is_empty());

        match event.stage {
            ProgressStage::Init => {
                Self::new(0.0, "Initializing...", "Initializing analysis...")
            }
            ProgressStage::ProviderInit => Self::new(
                PROVIDER_INIT_PERCENT,
                "Initializing providers...",
                message.unwrap_or("Initializing language providers..."),
            ),
            ProgressStage::ProviderPrepare => match (counts, event.fraction()) {
                (Some((current, total)), Some(fraction)) => Self::new(
                    PROVIDER_INIT_PERCENT + PROVIDER_PREPARE_SPAN * fraction,
                    format!("Preparing providers ({current}/{total})"),
                    match message {
                        Some(m) => format!("Preparing {m} ({current}/{total})"),
                        None => format!("Preparing providers: {current}/{total}"),
                    },
                ),
                _ => Self::new(
                    PROVIDER_INIT_PERCENT,
                    "Preparing providers...",
                    message.unwrap_or("Preparing language providers..."),
                ),
            },
            ProgressStage::RuleParsing => match event.total {
                Some(total) => Self::new(
                    RULE_PARSING_PERCENT,
                    format!("Loaded {total} rules"),
                    format!("Loaded {total} rules, starting execution..."),
                ),
                None => Self::new(RULE_PARSING_PERCENT, "Loading rules...", "Parsing rules..."),
            },
            ProgressStage::RuleExecution => match (counts, event.fraction()) {
                (Some((current, total)), Some(fraction)) => {
                    let percent = RULE_PARSING_PERCENT + RULE_EXECUTION_SPAN * fraction;
                    let webview = match message {
                        Some(rule_id) => {
                            format!("Processing rule {rule_id} ({current}/{total})")
                        }
                        None => format!(
                            "Processing rules: {current}/{total} ({}%)",
                            percent.round() as u8
                        ),
                    };
                    Self::new(
                        percent,
                        format!("Processing rules: {current}/{total}"),
                        webview,
                    )
                }
                _ => Self::new(
                    RULE_PARSING_PERCENT,
                    "Executing rules...",
                    message.map_or_else(|| "Executing rules...".to_string(), |m| {
                        format!("Processing rule {m}")
                    }),
                ),
            },
            ProgressStage::DependencyAnalysis => Self::new(
                DEPENDENCY_ANALYSIS_PERCENT,
                "Analyzing dependencies...",
                message.unwrap_or("Analyzing project dependencies..."),
            ),
            ProgressStage::Complete => {
                Self::new(100.0, "Analysis complete", "Analysis complete!")
            }
        }
    }

    /// Fallback for a stage name the client does not recognize.
    #[must_use]
    pub fn unknown_stage(message: Option<&str>) -> Self {
        let text = message.filter(|m| !m.trim().is_empty()).unwrap_or("Processing...");
        Self {
            percent: UNKNOWN_STAGE_PERCENT,
            notification_message: text.to_string(),
            webview_message: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_parse_is_closed() {
        for stage in ProgressStage::ALL {
            assert_eq!(ProgressStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(ProgressStage::parse("bogus"), None);
        assert_eq!(ProgressStage::parse("INIT"), None);
    }

    #[test]
    fn from_value_requires_string_timestamp() {
        let missing = serde_json::json!({ "stage": "init" });
        assert!(ProgressEvent::from_value(missing).is_none());

        let numeric = serde_json::json!({ "timestamp": 12, "stage": "init" });
        assert!(ProgressEvent::from_value(numeric).is_none());
    }

    #[test]
    fn from_value_rejects_unknown_stage() {
        let value = serde_json::json!({ "timestamp": "t", "stage": "invalid_stage" });
        assert!(ProgressEvent::from_value(value).is_none());
    }

    #[test]
    fn from_value_keeps_extra_fields() {
        let value = serde_json::json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "stage": "rule_execution",
            "current": 3,
            "total": 10,
            "ruleId": "java-ee-00001"
        });
        let event = ProgressEvent::from_value(value.clone()).unwrap();
        assert_eq!(event.current, Some(3));
        assert_eq!(event.extra["ruleId"], "java-ee-00001");
        assert_eq!(serde_json::to_value(&event).unwrap(), value);
    }

    #[test]
    fn from_value_tolerates_mistyped_counts() {
        let value = serde_json::json!({
            "timestamp": "t",
            "stage": "provider_prepare",
            "current": "two"
        });
        let event = ProgressEvent::from_value(value).unwrap();
        assert_eq!(event.current, None);
    }

    #[test]
    fn from_value_tolerates_non_string_message() {
        let value = serde_json::json!({
            "timestamp": "t",
            "stage": "rule_execution",
            "message": 5,
            "current": 2,
            "total": 4
        });
        let event = ProgressEvent::from_value(value).unwrap();
        assert_eq!(event.message, None);
        assert_eq!(event.current, Some(2));
        assert_eq!(ProgressUpdate::from_event(&event).percent, 55);
    }

    #[test]
    fn percent_bands_follow_stage_order() {
        let percents: Vec<u8> = [
            ProgressEvent::new("t", ProgressStage::Init),
            ProgressEvent::new("t", ProgressStage::ProviderInit),
            ProgressEvent::new("t", ProgressStage::ProviderPrepare).with_counts(1, 2),
            ProgressEvent::new("t", ProgressStage::RuleParsing).with_counts(0, 40),
            ProgressEvent::new("t", ProgressStage::RuleExecution).with_counts(20, 40),
            ProgressEvent::new("t", ProgressStage::DependencyAnalysis),
            ProgressEvent::new("t", ProgressStage::Complete),
        ]
        .iter()
        .map(|e| ProgressUpdate::from_event(e).percent)
        .collect();

        assert_eq!(percents, vec![0, 10, 13, 20, 55, 90, 100]);
    }

    #[test]
    fn rule_execution_webview_names_rule() {
        let event = ProgressEvent::new("t", ProgressStage::RuleExecution)
            .with_counts(5, 10)
            .with_message("jakarta-00042");
        let update = ProgressUpdate::from_event(&event);
        assert_eq!(update.notification_message, "Processing rules: 5/10");
        assert_eq!(update.webview_message, "Processing rule jakarta-00042 (5/10)");
    }

    #[test]
    fn rule_execution_clamps_overshoot() {
        let event = ProgressEvent::new("t", ProgressStage::RuleExecution).with_counts(12, 10);
        assert_eq!(ProgressUpdate::from_event(&event).percent, 90);
    }

    #[test]
    fn zero_total_does_not_divide() {
        let event = ProgressEvent::new("t", ProgressStage::RuleExecution).with_counts(0, 0);
        let update = ProgressUpdate::from_event(&event);
        assert_eq!(update.percent, 20);
        assert_eq!(update.notification_message, "Executing rules...");
    }

    #[test]
    fn unknown_stage_falls_back_to_half() {
        let update = ProgressUpdate::unknown_stage(Some("warming caches"));
        assert_eq!(update.percent, 50);
        assert_eq!(update.webview_message, "warming caches");
        assert_eq!(ProgressUpdate::unknown_stage(None).notification_message, "Processing...");
    }
}
