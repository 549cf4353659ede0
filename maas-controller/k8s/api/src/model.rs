use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Holds a JSON-encoded list of the tier names allowed to reach a model. An
/// absent annotation or an empty list leaves the model open to every tier.
pub const TIERS_ANNOTATION: &str = "alpha.maas.opendatahub.io/tiers";

/// Declares a model that should be exposed through the MaaS gateway.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "maas.opendatahub.io",
    version = "v1alpha1",
    kind = "MaaSModel",
    status = "MaaSModelStatus",
    shortname = "maasmodel",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MaaSModelSpec {
    pub model_ref: ModelReference,
}

/// Points at the object that actually serves the model. `kind` selects the
/// backend implementation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ModelReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaaSModelStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Set only while the model is `Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_gateway_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_gateway_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route_hostnames: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    Pending,
    Ready,
    Failed,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

// === impl MaaSModel ===

impl MaaSModel {
    /// The backend kind discriminator.
    pub fn backend_kind(&self) -> &str {
        &self.spec.model_ref.kind
    }

    /// The namespace of the referenced backend object, defaulting to the
    /// model's own namespace.
    pub fn backend_namespace(&self) -> Option<&str> {
        self.spec
            .model_ref
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(self.metadata.namespace.as_deref())
    }

    /// The raw tier allowlist annotation, if set.
    pub fn tiers_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()?
            .get(TIERS_ANNOTATION)
            .map(String::as_str)
    }
}

// === impl Phase ===

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Unsupported => "Unsupported",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_serializes_route_fields_in_camel_case() {
        let status = MaaSModelStatus {
            phase: Some(Phase::Ready),
            endpoint: Some("https://maas.example.com/llm/opt".to_string()),
            route_name: Some("opt-kserve-route".to_string()),
            route_namespace: Some("llm".to_string()),
            route_gateway_name: Some("maas-default-gateway".to_string()),
            route_gateway_namespace: Some("openshift-ingress".to_string()),
            route_hostnames: vec!["maas.example.com".to_string()],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "phase": "Ready",
                "endpoint": "https://maas.example.com/llm/opt",
                "routeName": "opt-kserve-route",
                "routeNamespace": "llm",
                "routeGatewayName": "maas-default-gateway",
                "routeGatewayNamespace": "openshift-ingress",
                "routeHostnames": ["maas.example.com"],
            })
        );
    }

    #[test]
    fn backend_namespace_defaults_to_model_namespace() {
        let mut model = MaaSModel::new(
            "opt",
            MaaSModelSpec {
                model_ref: ModelReference {
                    kind: "llmisvc".to_string(),
                    name: "opt".to_string(),
                    namespace: None,
                },
            },
        );
        model.metadata.namespace = Some("models".to_string());
        assert_eq!(model.backend_namespace(), Some("models"));

        model.spec.model_ref.namespace = Some("serving".to_string());
        assert_eq!(model.backend_namespace(), Some("serving"));
    }
}
