//! Reconciles `MaaSModel` resources.
//!
//! Each model names a backend kind. The [`Registry`] maps kinds to a
//! [`BackendHandler`] that knows how the backend's route is exposed and
//! when the model is ready, paired with a [`RouteResolver`] that names the
//! route without touching the cluster.
//!
//! A kind that is declared but has no working handler reports
//! [`HandlerError::NotImplemented`]. The reconciler records such models as
//! `Unsupported` and does not retry them until they change.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
mod controller;
pub mod external;
mod handler;
pub mod llmisvc;
mod metrics;
mod resource_id;
pub mod route;
mod status;

#[cfg(test)]
mod tests;

pub use self::{
    backoff::Backoff,
    controller::{run, Context, Error, FINALIZER},
    handler::{
        Backend, BackendHandler, HandlerError, ModelEndpoint, Registry, RouteId, RouteReference,
        RouteResolver,
    },
    metrics::ControllerMetrics,
    resource_id::ResourceId,
};
use maas_controller_k8s_api::Client;
use std::sync::Arc;
use tokio::time::Duration;

/// Builds the registry of every supported backend kind.
pub fn registry(client: Client, gateway: llmisvc::GatewayRef, timeout: Duration) -> Registry {
    Registry::default()
        .register(
            llmisvc::KIND,
            Arc::new(llmisvc::Handler::new(client.clone(), gateway, timeout)),
            Arc::new(llmisvc::Resolver),
        )
        .register(
            external::KIND,
            Arc::new(external::Handler::new(client, timeout)),
            Arc::new(external::Resolver),
        )
}
