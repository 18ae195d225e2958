//! Wire types for the build platform's REST API.
//!
//! Field names are the platform's and must not change.

use serde::{Deserialize, Serialize};

/// Hook type the trigger endpoint expects.
pub const HOOK_TYPE: &str = "bitrise";

/// Status value of an accepted trigger.
pub const TRIGGER_OK: &str = "ok";

/// Body of `POST /app/{app_slug}/build/start.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerParams {
    pub hook_info: HookInfo,
    pub build_params: BuildParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub build_trigger_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildParams {
    pub commit_hash: String,
    pub commit_message: String,
    pub tag: String,
    pub branch: String,
    pub branch_repo_owner: String,
    pub branch_dest: String,
    pub branch_dest_repo_owner: String,
    pub pull_request_id: i64,
    pub pull_request_repository_url: String,
    pub pull_request_merge_branch: String,
    pub pull_request_head_branch: String,
    pub workflow_id: String,
    pub skip_git_status_report: bool,
    pub environments: Vec<EnvironmentParam>,
    pub worker: WorkerParams,
}

/// One environment variable override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentParam {
    pub mapped_to: String,
    pub value: String,
    pub is_expand: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerParams {
    pub only_with_stack_id: String,
    pub machine_type: String,
}

impl TriggerParams {
    /// JSON rendering for logs, with the trigger token masked.
    pub fn redacted_json(&self) -> String {
        let mut copy = self.clone();
        copy.hook_info.build_trigger_token = crate::config::redact(&self.hook_info.build_trigger_token);
        serde_json::to_string_pretty(&copy).unwrap_or_default()
    }
}

/// Successful answer of the trigger endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredBuild {
    /// Must be `"ok"`; a missing field decodes as empty and is rejected.
    #[serde(default)]
    pub status: String,
    /// App slug the build belongs to.
    #[serde(default)]
    pub slug: String,
    /// Opaque build execution identifier.
    #[serde(default)]
    pub build_slug: String,
}

impl TriggeredBuild {
    pub fn is_ok(&self) -> bool {
        self.status == TRIGGER_OK
    }
}

/// Envelope of `GET /apps/{app_slug}/builds/{build_slug}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SnapshotEnvelope {
    pub data: RemoteBuildSnapshot,
}

/// One poll response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteBuildSnapshot {
    #[serde(default)]
    pub started_on_worker_at: Option<String>,
    #[serde(default)]
    pub triggered_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub is_on_hold: bool,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub build_number: i64,
    /// Numeric status: 0 running/on hold, 1 success, 2 error, 3 aborted, 4 aborted with success.
    #[serde(default)]
    pub status: i64,
    /// Textual status, the authority for classification.
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub abort_reason: Option<String>,
    #[serde(default)]
    pub machine_type_id: Option<String>,
    #[serde(default)]
    pub stack_identifier: Option<String>,
    #[serde(default)]
    pub original_build_params: OriginalBuildParams,
}

/// Echo of the parameters a build was started with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginalBuildParams {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub environments: Vec<EnvironmentParam>,
}

/// Body of `POST /apps/{app_slug}/builds/{build_slug}/abort`.
///
/// Serialises to `{}` when no field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub abort_with_success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub skip_notifications: bool,
}

impl AbortRequest {
    pub fn with_reason(reason: &str) -> Self {
        AbortRequest {
            abort_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// Answer of the abort endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortAck {
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_response_without_status_is_not_ok() {
        let triggered: TriggeredBuild =
            serde_json::from_str(r#"{"slug":"app","build_slug":"b1"}"#).unwrap();
        assert!(!triggered.is_ok());
        assert_eq!(triggered.build_slug, "b1");
    }

    #[test]
    fn test_snapshot_decodes_platform_payload() {
        let body = r#"{"data":{
            "started_on_worker_at":"2023-01-01T00:00:00Z",
            "triggered_at":"2022-12-31T23:59:00Z",
            "finished_at":null,
            "is_on_hold":false,
            "slug":"b1",
            "build_number":42,
            "status":0,
            "status_text":"in-progress",
            "abort_reason":null,
            "machine_type_id":"g2.4core",
            "stack_identifier":"osx-xcode-15",
            "original_build_params":{"branch":"main","workflow_id":"ci","environments":[{"mapped_to":"A","value":"1","is_expand":true}]}
        }}"#;
        let envelope: SnapshotEnvelope = serde_json::from_str(body).unwrap();
        let snapshot = envelope.data;
        assert_eq!(snapshot.status_text, "in-progress");
        assert_eq!(snapshot.build_number, 42);
        assert!(snapshot.finished_at.is_none());
        assert_eq!(snapshot.original_build_params.environments.len(), 1);
    }

    #[test]
    fn test_empty_abort_request_is_empty_object() {
        let json = serde_json::to_string(&AbortRequest::default()).unwrap();
        assert_eq!(json, "{}");

        let json = serde_json::to_string(&AbortRequest::with_reason("hung")).unwrap();
        assert_eq!(json, r#"{"abort_reason":"hung"}"#);
    }

    #[test]
    fn test_redacted_json_masks_trigger_token() {
        let params = TriggerParams {
            hook_info: HookInfo {
                kind: HOOK_TYPE.to_string(),
                build_trigger_token: "secret-token".to_string(),
            },
            build_params: BuildParams::default(),
        };
        let rendered = params.redacted_json();
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("\"type\": \"bitrise\""));
    }
}
