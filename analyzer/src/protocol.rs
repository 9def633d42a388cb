//! Wire messages exchanged with the analyzer RPC server.

use serde::Serialize;
use serde_json::Value;

use konveyor_types::{AnalysisRequestParams, FileChange, RuleSet};

/// Method names of the analyzer RPC protocol.
pub mod method {
    /// Client → server notification that begins server initialization.
    pub const START: &str = "start";
    /// Server → client notification: the server is ready for requests.
    pub const STARTED: &str = "started";
    /// Server → client notification carrying a progress event.
    pub const PROGRESS: &str = "analysis.progress";
    pub const ANALYZE: &str = "analysis_engine.Analyze";
    pub const NOTIFY_FILE_CHANGES: &str = "analysis_engine.NotifyFileChanges";
}

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// A frame received from the server, classified by shape.
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, ResponseError>,
    },
    ServerRequest {
        id: Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

pub(crate) fn classify(frame: &Value) -> Option<Incoming> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame.get("method").and_then(Value::as_str);

    match (id, method) {
        (Some(id), None) => {
            let id = id.as_u64()?;
            let outcome = if let Some(error) = frame.get("error") {
                Err(ResponseError {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                    data: error.get("data").cloned(),
                })
            } else {
                Ok(frame.get("result").cloned().unwrap_or(Value::Null))
            };
            Some(Incoming::Response { id, outcome })
        }
        (Some(id), Some(method)) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method: method.to_string(),
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method: method.to_string(),
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

pub(crate) fn method_not_found(id: Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

pub(crate) fn start_params() -> Value {
    serde_json::json!({ "type": "start" })
}

pub(crate) fn analyze_params(params: &AnalysisRequestParams) -> Result<Value, serde_json::Error> {
    serde_json::to_value(params)
}

pub(crate) fn file_changes_params(changes: &[FileChange]) -> Result<Value, serde_json::Error> {
    Ok(serde_json::json!({ "changes": serde_json::to_value(changes)? }))
}

/// Validate an `analysis_engine.Analyze` result and extract its rulesets.
///
/// The result must be an object whose `Rulesets` is an array of ruleset
/// objects. A `null` list is how the analyzer reports an empty result.
pub(crate) fn parse_analyze_result(result: Value) -> Result<Vec<RuleSet>, String> {
    let Value::Object(mut object) = result else {
        return Err(format!("expected an object, got {}", value_kind(&result)));
    };
    match object.remove("Rulesets") {
        None => Err("response has no Rulesets field".to_string()),
        Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                if !entry.is_object() {
                    return Err(format!(
                        "Rulesets[{index}] is {}, not an object",
                        value_kind(&entry)
                    ));
                }
                serde_json::from_value(entry).map_err(|e| format!("Rulesets[{index}]: {e}"))
            })
            .collect(),
        Some(other) => Err(format!("Rulesets is {}, not an array", value_kind(&other))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_missing_params() {
        let json = serde_json::to_value(Request::new(3, method::ANALYZE, None)).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 3);
        assert_eq!(json["method"], "analysis_engine.Analyze");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn start_notification_shape() {
        let json =
            serde_json::to_value(Notification::new(method::START, Some(start_params()))).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["params"]["type"], "start");
    }

    #[test]
    fn classify_success_response() {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 4, "result": { "ok": true } });
        assert_eq!(
            classify(&frame),
            Some(Incoming::Response {
                id: 4,
                outcome: Ok(serde_json::json!({ "ok": true }))
            })
        );
    }

    #[test]
    fn classify_error_response() {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "error": { "code": -32000, "message": "analysis failed" }
        });
        let Some(Incoming::Response { id, outcome }) = classify(&frame) else {
            panic!("expected response");
        };
        assert_eq!(id, 5);
        let err = outcome.unwrap_err();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "analysis failed");
    }

    #[test]
    fn classify_null_result_response() {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 6, "result": null });
        assert_eq!(
            classify(&frame),
            Some(Incoming::Response {
                id: 6,
                outcome: Ok(Value::Null)
            })
        );
    }

    #[test]
    fn classify_notification_and_server_request() {
        let notification = serde_json::json!({ "jsonrpc": "2.0", "method": "started" });
        assert!(matches!(
            classify(&notification),
            Some(Incoming::Notification { method, params: None }) if method == "started"
        ));

        let request = serde_json::json!({ "jsonrpc": "2.0", "id": "a", "method": "workspace/configuration" });
        assert!(matches!(
            classify(&request),
            Some(Incoming::ServerRequest { method, .. }) if method == "workspace/configuration"
        ));
    }

    #[test]
    fn classify_rejects_shapeless_frames() {
        assert_eq!(classify(&serde_json::json!({ "jsonrpc": "2.0" })), None);
        assert_eq!(
            classify(&serde_json::json!({ "id": "not-numeric", "result": 1 })),
            None
        );
    }

    #[test]
    fn method_not_found_echoes_id() {
        let response = method_not_found(serde_json::json!(9), "client/registerCapability");
        assert_eq!(response["id"], 9);
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert!(
            response["error"]["message"]
                .as_str()
                .unwrap()
                .contains("client/registerCapability")
        );
    }

    #[test]
    fn file_changes_are_wrapped() {
        let params = file_changes_params(&[FileChange {
            path: "/ws/a.java".to_string(),
            content: "class A {}".to_string(),
            saved: true,
        }])
        .unwrap();
        assert_eq!(params["changes"][0]["path"], "/ws/a.java");
        assert_eq!(params["changes"][0]["saved"], true);
    }

    #[test]
    fn analyze_result_with_rulesets() {
        let rule_sets = parse_analyze_result(serde_json::json!({
            "Rulesets": [{ "name": "eap8", "violations": {} }, { "name": "cloud" }]
        }))
        .unwrap();
        assert_eq!(rule_sets.len(), 2);
        assert_eq!(rule_sets[1].name.as_deref(), Some("cloud"));
    }

    #[test]
    fn analyze_result_null_rulesets_is_empty() {
        assert!(
            parse_analyze_result(serde_json::json!({ "Rulesets": null }))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn analyze_result_malformed_shapes() {
        assert!(parse_analyze_result(serde_json::json!([])).is_err());
        assert!(parse_analyze_result(serde_json::json!({})).is_err());
        assert!(parse_analyze_result(serde_json::json!({ "Rulesets": "nope" })).is_err());
        assert!(parse_analyze_result(serde_json::json!({ "Rulesets": [42] })).is_err());
        assert!(
            parse_analyze_result(serde_json::json!({ "Rulesets": [{ "violations": 3 }] }))
                .is_err()
        );
    }
}
