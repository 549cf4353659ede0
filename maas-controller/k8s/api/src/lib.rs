#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod llmisvc;
pub mod model;

pub use self::{
    llmisvc::{LlmInferenceService, LlmInferenceServiceSpec, LlmInferenceServiceStatus},
    model::{
        Condition, MaaSModel, MaaSModelSpec, MaaSModelStatus, ModelReference, Phase,
        TIERS_ANNOTATION,
    },
};
pub use k8s_openapi::{
    api::{self, apps::v1::Deployment, coordination::v1::Lease, core::v1::ConfigMap},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, Preconditions, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};

pub mod gateway {
    pub use gateway_api::apis::standard::{
        gateways::{Gateway, GatewayListeners, GatewaySpec, GatewayStatus, GatewayStatusAddresses},
        httproutes::{HTTPRoute, HTTPRouteParentRefs, HTTPRouteSpec},
    };
}
