//! The `llmisvc` kind: models served by a KServe `LLMInferenceService`.
//!
//! KServe creates and owns the HTTPRoute for each LLMInferenceService, so this
//! handler only observes it. A model is `Ready` once the LLMInferenceService
//! reports its `Ready` condition as `True` and an endpoint is known. The
//! endpoint is the service's `status.url` when KServe publishes one, else
//! `https://<hostname>/<namespace>/<name>` using the first route hostname.

use crate::handler::{
    bounded, BackendHandler, HandlerError, ModelEndpoint, RouteId, RouteReference, RouteResolver,
};
use maas_controller_k8s_api::{
    gateway::{Gateway, HTTPRoute},
    Api, Client, LlmInferenceService, MaaSModel, Resource, ResourceExt,
};
use tokio::time::Duration;

pub const KIND: &str = "llmisvc";

/// The gateway routes attach to when they don't name one themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone)]
pub struct Handler {
    client: Client,
    gateway: GatewayRef,
    timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct Resolver;

/// KServe's name for the route it creates for an LLMInferenceService.
pub fn route_name(service_name: &str) -> String {
    format!("{service_name}-kserve-route")
}

/// Whether `model` is backed by the LLMInferenceService `namespace/name`.
pub fn references(model: &MaaSModel, namespace: &str, name: &str) -> bool {
    model.backend_kind() == KIND
        && model.spec.model_ref.name == name
        && model.backend_namespace() == Some(namespace)
}

// === impl Handler ===

impl Handler {
    pub fn new(client: Client, gateway: GatewayRef, timeout: Duration) -> Self {
        Self {
            client,
            gateway,
            timeout,
        }
    }

    async fn inference_service(
        &self,
        model: &MaaSModel,
    ) -> Result<LlmInferenceService, HandlerError> {
        let namespace = model
            .backend_namespace()
            .ok_or_else(|| HandlerError::Unavailable("MaaSModel has no namespace".to_string()))?;
        let name = &model.spec.model_ref.name;
        let api = Api::<LlmInferenceService>::namespaced(self.client.clone(), namespace);
        bounded(self.timeout, api.get_opt(name))
            .await?
            .ok_or_else(|| {
                HandlerError::Unavailable(format!(
                    "LLMInferenceService {namespace}/{name} not found"
                ))
            })
    }

    async fn observe_route(
        &self,
        model: &MaaSModel,
        service: &LlmInferenceService,
    ) -> Result<RouteReference, HandlerError> {
        let id = Resolver.http_route_for_model(model)?;
        let api = Api::<HTTPRoute>::namespaced(self.client.clone(), &id.namespace);
        let route = bounded(self.timeout, api.get_opt(&id.name))
            .await?
            .ok_or_else(|| HandlerError::Unavailable(format!("HTTPRoute {id} not found")))?;

        if !is_owned_by(&route, service) {
            return Err(HandlerError::Unavailable(format!(
                "HTTPRoute {id} is not owned by LLMInferenceService {}/{}",
                service.namespace().unwrap_or_default(),
                service.name_any(),
            )));
        }

        let gateway = route_gateway(&route, &id.namespace, &self.gateway);
        let mut hostnames = route_hostnames(&route);
        if hostnames.is_empty() {
            let api = Api::<Gateway>::namespaced(self.client.clone(), &gateway.namespace);
            if let Some(gw) = bounded(self.timeout, api.get_opt(&gateway.name)).await? {
                hostnames = gateway_hostnames(&gw);
            }
        }
        tracing::debug!(route = %id, gateway = %gateway.name, ?hostnames, "Observed HTTPRoute");

        Ok(RouteReference {
            name: id.name,
            namespace: id.namespace,
            gateway_name: gateway.name,
            gateway_namespace: gateway.namespace,
            hostnames,
        })
    }
}

#[async_trait::async_trait]
impl BackendHandler for Handler {
    fn owned_by_core(&self) -> bool {
        false
    }

    async fn reconcile_route(&self, model: &MaaSModel) -> Result<RouteReference, HandlerError> {
        let service = self.inference_service(model).await?;
        self.observe_route(model, &service).await
    }

    async fn status(
        &self,
        model: &MaaSModel,
        route: &RouteReference,
    ) -> Result<ModelEndpoint, HandlerError> {
        let service = self.inference_service(model).await?;
        Ok(ModelEndpoint {
            endpoint: endpoint(&service, route),
            ready: service.is_ready(),
        })
    }

    async fn model_endpoint(&self, model: &MaaSModel) -> Result<String, HandlerError> {
        let service = self.inference_service(model).await?;
        let route = match recorded_route(model) {
            Some(route) => route,
            None => self.observe_route(model, &service).await?,
        };
        known_endpoint(model, &service, &route)
    }

    async fn cleanup_on_delete(&self, model: &MaaSModel) -> Result<(), HandlerError> {
        tracing::debug!(model = %model.name_any(), "HTTPRoute is owned by KServe; nothing to delete");
        Ok(())
    }
}

// === impl Resolver ===

impl RouteResolver for Resolver {
    fn http_route_for_model(&self, model: &MaaSModel) -> Result<RouteId, HandlerError> {
        let namespace = model
            .backend_namespace()
            .ok_or_else(|| HandlerError::Unavailable("MaaSModel has no namespace".to_string()))?;
        Ok(RouteId {
            name: route_name(&model.spec.model_ref.name),
            namespace: namespace.to_string(),
        })
    }
}

/// Whether the route carries an owner reference to the inference service.
pub(crate) fn is_owned_by(route: &HTTPRoute, service: &LlmInferenceService) -> bool {
    let kind = LlmInferenceService::kind(&());
    let name = service.name_any();
    let uid = service.meta().uid.as_deref();
    route
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| {
            owner.kind == kind
                && owner.name == name
                && uid.map_or(true, |uid| owner.uid == uid)
        })
}

/// The first Gateway the route attaches to, or `default` if it names none.
pub(crate) fn route_gateway(route: &HTTPRoute, route_ns: &str, default: &GatewayRef) -> GatewayRef {
    route
        .spec
        .parent_refs
        .iter()
        .flatten()
        .find(|p| p.kind.as_deref().map_or(true, |k| k == "Gateway"))
        .map(|p| GatewayRef {
            name: p.name.clone(),
            namespace: p.namespace.clone().unwrap_or_else(|| route_ns.to_string()),
        })
        .unwrap_or_else(|| default.clone())
}

pub(crate) fn route_hostnames(route: &HTTPRoute) -> Vec<String> {
    route
        .spec
        .hostnames
        .iter()
        .flatten()
        .filter(|h| !h.is_empty() && !h.starts_with('*'))
        .cloned()
        .collect()
}

/// Concrete listener hostnames, falling back to the gateway's addresses.
pub(crate) fn gateway_hostnames(gateway: &Gateway) -> Vec<String> {
    let mut hostnames = Vec::<String>::new();
    for hostname in gateway.spec.listeners.iter().filter_map(|l| l.hostname.as_ref()) {
        if !hostname.is_empty() && !hostname.starts_with('*') && !hostnames.contains(hostname) {
            hostnames.push(hostname.clone());
        }
    }
    if hostnames.is_empty() {
        hostnames = gateway
            .status
            .iter()
            .flat_map(|s| s.addresses.iter().flatten())
            .map(|a| a.value.clone())
            .filter(|v| !v.is_empty())
            .collect();
    }
    hostnames
}

/// The route last written to the model's status. A status without both a
/// route name and namespace means the route has to be observed again.
pub(crate) fn recorded_route(model: &MaaSModel) -> Option<RouteReference> {
    model.status.as_ref().and_then(RouteReference::from_status)
}

pub(crate) fn known_endpoint(
    model: &MaaSModel,
    service: &LlmInferenceService,
    route: &RouteReference,
) -> Result<String, HandlerError> {
    endpoint(service, route).ok_or_else(|| {
        HandlerError::Unavailable(format!(
            "no URL or hostname is known for {}",
            model.name_any()
        ))
    })
}

pub(crate) fn endpoint(service: &LlmInferenceService, route: &RouteReference) -> Option<String> {
    if let Some(url) = service.url() {
        return Some(url.to_string());
    }
    let hostname = route.hostnames.first()?;
    Some(format!(
        "https://{hostname}/{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    ))
}
