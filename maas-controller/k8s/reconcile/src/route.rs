//! Helpers for routes that this controller owns.

use crate::handler::{bounded, HandlerError, RouteId};
use maas_controller_k8s_api::{
    gateway::HTTPRoute, Api, Client, DeleteParams, MaaSModel, ObjectMeta, Preconditions,
    Resource, ResourceExt,
};
use tokio::time::Duration;

/// The deterministic name of a route created for a model.
pub fn owned_route_name(model_name: &str) -> String {
    format!("maas-model-{model_name}")
}

/// Whether `meta` carries a controller owner reference to `model`.
pub fn is_controlled_by(meta: &ObjectMeta, model: &MaaSModel) -> bool {
    let Some(uid) = model.meta().uid.as_deref() else {
        return false;
    };
    let kind = MaaSModel::kind(&());
    meta.owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.uid == uid && owner.kind == kind)
}

/// Deletes the route `id` if, and only if, it is controlled by `model`.
///
/// A missing route is treated as already deleted. Routes owned by anything
/// else are left in place.
pub async fn delete_if_owned(
    client: &Client,
    id: &RouteId,
    model: &MaaSModel,
    timeout: Duration,
) -> Result<(), HandlerError> {
    let api = Api::<HTTPRoute>::namespaced(client.clone(), &id.namespace);
    let Some(route) = bounded(timeout, api.get_opt(&id.name)).await? else {
        tracing::debug!(route = %id, "HTTPRoute already deleted");
        return Ok(());
    };

    if !is_controlled_by(&route.metadata, model) {
        tracing::info!(route = %id, "HTTPRoute is not owned by the model; leaving it in place");
        return Ok(());
    }

    let params = DeleteParams {
        preconditions: Some(Preconditions {
            uid: route.uid(),
            resource_version: None,
        }),
        ..Default::default()
    };
    match bounded(timeout, api.delete(&id.name, &params)).await {
        Ok(_) => {
            tracing::info!(route = %id, "Deleted HTTPRoute");
            Ok(())
        }
        Err(HandlerError::Kube(maas_controller_k8s_api::Error::Api(rsp))) if rsp.code == 404 => {
            Ok(())
        }
        Err(error) => Err(error),
    }
}
