use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The subset of KServe's `LLMInferenceService` that the controller reads.
/// The spec is owned by KServe and is carried opaquely.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "serving.kserve.io",
    version = "v1alpha1",
    kind = "LLMInferenceService",
    root = "LlmInferenceService",
    status = "LlmInferenceServiceStatus",
    namespaced
)]
pub struct LlmInferenceServiceSpec {
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LlmInferenceServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<LlmInferenceServiceCondition>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LlmInferenceServiceCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LlmInferenceService {
    /// Whether KServe reports the service's `Ready` condition as `True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .iter()
            .flat_map(|s| s.conditions.iter())
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }

    pub fn url(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
    }
}
