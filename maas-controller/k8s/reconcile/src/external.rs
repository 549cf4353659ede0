//! The `ExternalModel` kind.
//!
//! Models served outside the cluster are declared but not yet routed. Route
//! reconciliation, status, and endpoint derivation report
//! [`HandlerError::NotImplemented`], which leaves these models `Unsupported`.
//! Once implemented, the route will be `maas-model-<name>` in the model's
//! namespace, controlled by the model, so deletion already cleans it up.

use crate::{
    handler::{BackendHandler, HandlerError, ModelEndpoint, RouteId, RouteReference, RouteResolver},
    route,
};
use maas_controller_k8s_api::{Client, MaaSModel, ResourceExt};
use tokio::time::Duration;

pub const KIND: &str = "ExternalModel";

#[derive(Clone)]
pub struct Handler {
    client: Client,
    timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct Resolver;

// === impl Handler ===

impl Handler {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait::async_trait]
impl BackendHandler for Handler {
    fn owned_by_core(&self) -> bool {
        true
    }

    async fn reconcile_route(&self, _model: &MaaSModel) -> Result<RouteReference, HandlerError> {
        Err(HandlerError::NotImplemented(KIND.to_string()))
    }

    async fn status(
        &self,
        _model: &MaaSModel,
        _route: &RouteReference,
    ) -> Result<ModelEndpoint, HandlerError> {
        Err(HandlerError::NotImplemented(KIND.to_string()))
    }

    async fn model_endpoint(&self, _model: &MaaSModel) -> Result<String, HandlerError> {
        Err(HandlerError::NotImplemented(KIND.to_string()))
    }

    async fn cleanup_on_delete(&self, model: &MaaSModel) -> Result<(), HandlerError> {
        let id = Resolver.http_route_for_model(model)?;
        route::delete_if_owned(&self.client, &id, model, self.timeout).await
    }
}

// === impl Resolver ===

impl RouteResolver for Resolver {
    fn http_route_for_model(&self, model: &MaaSModel) -> Result<RouteId, HandlerError> {
        let namespace = model
            .namespace()
            .ok_or_else(|| HandlerError::Unavailable("MaaSModel has no namespace".to_string()))?;
        Ok(RouteId {
            name: route::owned_route_name(&model.name_any()),
            namespace,
        })
    }
}
