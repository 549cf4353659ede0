use ahash::AHashMap as HashMap;
use maas_controller_k8s_api::{MaaSModel, MaaSModelStatus};
use std::{fmt, future::Future, sync::Arc};
use tokio::time::{self, Duration};

/// The capabilities every backend kind provides to the reconciler.
#[async_trait::async_trait]
pub trait BackendHandler: Send + Sync {
    /// Whether routes for this kind are created (and therefore deleted) by
    /// this controller rather than by the backend technology itself.
    fn owned_by_core(&self) -> bool;

    /// Ensures the model's route exists and describes it. Must be idempotent.
    async fn reconcile_route(&self, model: &MaaSModel) -> Result<RouteReference, HandlerError>;

    /// Derives the model's endpoint and readiness from the route reported by
    /// `reconcile_route`.
    async fn status(
        &self,
        model: &MaaSModel,
        route: &RouteReference,
    ) -> Result<ModelEndpoint, HandlerError>;

    /// Derives the model's endpoint without changing anything in the cluster.
    async fn model_endpoint(&self, model: &MaaSModel) -> Result<String, HandlerError>;

    /// Removes routes this handler created. Absent routes are not an error.
    async fn cleanup_on_delete(&self, model: &MaaSModel) -> Result<(), HandlerError>;
}

/// Names the HTTPRoute that fronts a model, whoever owns it.
pub trait RouteResolver: Send + Sync {
    fn http_route_for_model(&self, model: &MaaSModel) -> Result<RouteId, HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("backend kind {0} is not implemented")]
    NotImplemented(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Kube(#[from] maas_controller_k8s_api::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteId {
    pub name: String,
    pub namespace: String,
}

/// Describes the route that exposes a model and the gateway it attaches to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteReference {
    pub name: String,
    pub namespace: String,
    pub gateway_name: String,
    pub gateway_namespace: String,
    pub hostnames: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub endpoint: Option<String>,
    pub ready: bool,
}

#[derive(Clone)]
pub struct Backend {
    pub handler: Arc<dyn BackendHandler>,
    pub resolver: Arc<dyn RouteResolver>,
}

/// Maps backend kinds to their handlers. Built once at startup.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: HashMap<String, Backend>,
}

// === impl HandlerError ===

impl HandlerError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
}

/// Bounds a cluster request by `timeout`.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    request: impl Future<Output = Result<T, maas_controller_k8s_api::Error>>,
) -> Result<T, HandlerError> {
    match time::timeout(timeout, request).await {
        Ok(res) => res.map_err(Into::into),
        Err(_) => Err(HandlerError::Timeout(timeout)),
    }
}

// === impl RouteId ===

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl RouteReference ===

impl RouteReference {
    /// Reads a route reference back from a model's status, if one was
    /// recorded.
    pub fn from_status(status: &MaaSModelStatus) -> Option<Self> {
        Some(Self {
            name: status.route_name.clone()?,
            namespace: status.route_namespace.clone()?,
            gateway_name: status.route_gateway_name.clone().unwrap_or_default(),
            gateway_namespace: status.route_gateway_namespace.clone().unwrap_or_default(),
            hostnames: status.route_hostnames.clone(),
        })
    }

    pub(crate) fn write_to(&self, status: &mut MaaSModelStatus) {
        fn non_empty(s: &str) -> Option<String> {
            (!s.is_empty()).then(|| s.to_string())
        }

        status.route_name = non_empty(&self.name);
        status.route_namespace = non_empty(&self.namespace);
        status.route_gateway_name = non_empty(&self.gateway_name);
        status.route_gateway_namespace = non_empty(&self.gateway_namespace);
        status.route_hostnames = self.hostnames.clone();
    }
}

// === impl Registry ===

impl Registry {
    pub fn register(
        mut self,
        kind: impl ToString,
        handler: Arc<dyn BackendHandler>,
        resolver: Arc<dyn RouteResolver>,
    ) -> Self {
        self.kinds
            .insert(kind.to_string(), Backend { handler, resolver });
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Backend> {
        self.kinds.get(kind)
    }

    /// Names the route for a model, or `None` if its kind is not registered.
    pub fn http_route_for_model(&self, model: &MaaSModel) -> Option<Result<RouteId, HandlerError>> {
        let backend = self.get(model.backend_kind())?;
        Some(backend.resolver.http_route_for_model(model))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds = self.kinds().collect::<Vec<_>>();
        kinds.sort_unstable();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}
