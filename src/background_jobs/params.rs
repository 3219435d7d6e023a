//! Job parameters and the dedupe signature derived from them.
//!
//! Params travel as a generic JSON object so callers at the API boundary can
//! pass whatever a job type needs. Handlers are expected to parse them into
//! one of the typed structs below as soon as they start.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub type JobParams = Map<String, JsonValue>;

/// Param key shared by all jobs working on the same dataset.
pub const WORKLOAD_KEY: &str = "dataset_id";

/// Param keys that contribute to the dedupe signature, for every job type.
///
/// Keys absent from a job's params are skipped. A job with none of them has
/// no signature and is never deduplicated.
pub const DEDUPE_KEY_FIELDS: [&str; 5] = ["dataset_id", "hunt_id", "hostname", "question", "mode"];

/// Turns a JSON value into a params map. Anything but an object yields an
/// empty map.
pub fn params_from_json(value: JsonValue) -> JobParams {
    match value {
        JsonValue::Object(map) => map,
        _ => JobParams::new(),
    }
}

/// Builds the dedupe signature for a params map, in `DEDUPE_KEY_FIELDS` order.
pub fn dedupe_signature(params: &JobParams) -> Option<String> {
    let parts: Vec<String> = DEDUPE_KEY_FIELDS
        .iter()
        .filter_map(|key| match params.get(*key) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(format!("{key}={s}")),
            Some(other) => Some(format!("{key}={other}")),
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}

/// Params for TRIAGE, ANOMALY, KEYWORD_SCAN and IOC_EXTRACT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetParams {
    pub dataset_id: String,
}

/// Params for HOST_PROFILE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfileParams {
    pub hunt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Params for REPORT and HOST_INVENTORY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntParams {
    pub hunt_id: String,
}

/// Params for QUERY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub dataset_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_uses_only_present_key_fields() {
        let params = params_from_json(json!({
            "mode": "deep",
            "dataset_id": "d1",
            "row_limit": 500,
        }));
        assert_eq!(
            dedupe_signature(&params).as_deref(),
            Some("dataset_id=d1|mode=deep")
        );
    }

    #[test]
    fn test_signature_ignores_key_order_and_nulls() {
        let a = params_from_json(json!({"hunt_id": "h1", "hostname": "ws-01", "question": null}));
        let b = params_from_json(json!({"hostname": "ws-01", "hunt_id": "h1"}));
        assert_eq!(dedupe_signature(&a), dedupe_signature(&b));
    }

    #[test]
    fn test_signature_renders_non_string_values() {
        let params = params_from_json(json!({"hunt_id": 42}));
        assert_eq!(dedupe_signature(&params).as_deref(), Some("hunt_id=42"));
    }

    #[test]
    fn test_no_key_fields_means_no_signature() {
        let params = params_from_json(json!({"row_limit": 500}));
        assert!(dedupe_signature(&params).is_none());
        assert!(dedupe_signature(&JobParams::new()).is_none());
    }

    #[test]
    fn test_params_from_non_object_is_empty() {
        assert!(params_from_json(json!(["dataset_id"])).is_empty());
        assert!(params_from_json(JsonValue::Null).is_empty());
    }

    #[test]
    fn test_typed_params_parse() {
        let params: HostProfileParams =
            serde_json::from_value(json!({"hunt_id": "h1"})).unwrap();
        assert_eq!(params.hunt_id, "h1");
        assert!(params.hostname.is_none());

        let query: QueryParams = serde_json::from_value(json!({
            "dataset_id": "d1",
            "question": "which hosts ran psexec?",
        }))
        .unwrap();
        assert_eq!(query.mode, None);

        assert!(serde_json::from_value::<DatasetParams>(json!({"hunt_id": "h1"})).is_err());
    }
}
