use crate::{
    handler::{bounded, HandlerError, Registry},
    llmisvc,
    status::{self, Outcome},
    Backoff, ControllerMetrics, ResourceId,
};
use futures::prelude::*;
use kube::runtime::{
    controller::{self, Action, Controller},
    finalizer::{self, finalizer, Event},
    reflector::ObjectRef,
    watcher,
};
use maas_controller_k8s_api::{
    Api, Client, LlmInferenceService, MaaSModel, MaaSModelStatus, Patch, PatchParams, Resource,
    ResourceExt,
};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, info, instrument, warn};

pub const FINALIZER: &str = "maas.opendatahub.io/model-cleanup";

const FIELD_MANAGER: &str = "maas.opendatahub.io";

const READY_RESYNC: Duration = Duration::from_secs(5 * 60);
const PENDING_RECHECK: Duration = Duration::from_secs(30);

pub struct Context {
    pub client: Client,
    pub registry: Registry,
    pub backoff: Backoff,
    pub metrics: ControllerMetrics,
    pub request_timeout: Duration,
}

/// What deleting a model asked of its backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Removal {
    /// The kind has no handler, so nothing was ever created for it.
    Unregistered,
    /// Routes for the kind belong to the backend technology.
    NotOwned,
    NotImplemented,
    Deleted,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} backend failed: {source}")]
    Backend {
        kind: String,
        #[source]
        source: HandlerError,
    },

    #[error("{kind} cleanup failed: {source}")]
    Cleanup {
        kind: String,
        #[source]
        source: HandlerError,
    },

    #[error("failed to update status: {0}")]
    Status(#[source] HandlerError),

    #[error(transparent)]
    Finalizer(Box<finalizer::Error<Error>>),
}

/// Runs the model controller until `shutdown` completes.
///
/// When `inference_services` is set, changes to an LLMInferenceService
/// retrigger every model that references it.
pub async fn run(
    ctx: Arc<Context>,
    models: Api<MaaSModel>,
    inference_services: Option<Api<LlmInferenceService>>,
    concurrency: u16,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let mut controller = Controller::new(models, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .graceful_shutdown_on(shutdown);

    if let Some(api) = inference_services {
        let store = controller.store();
        controller = controller.watches(api, watcher::Config::default(), move |svc| {
            let namespace = svc.namespace().unwrap_or_default();
            let name = svc.name_any();
            store
                .state()
                .into_iter()
                .filter(|model| llmisvc::references(model, &namespace, &name))
                .map(|model| ObjectRef::from_obj(&*model))
                .collect::<Vec<_>>()
        });
    }

    info!(kinds = ?ctx.registry, concurrency, "Starting model controller");
    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(model = %obj, "Reconciled"),
                Err(controller::Error::ReconcilerFailed(error, obj)) => {
                    warn!(model = %obj, %error, "Reconcile failed")
                }
                Err(error) => warn!(%error, "Controller error"),
            }
        })
        .await;
    info!("Model controller stopped");
}

#[instrument(skip_all, fields(ns = ?model.metadata.namespace, name = %model.name_any()))]
async fn reconcile(model: Arc<MaaSModel>, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(namespace) = model.namespace() else {
        return Ok(Action::await_change());
    };
    let api = Api::<MaaSModel>::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, FINALIZER, model, |event| async {
        match event {
            Event::Apply(model) => apply(&api, &model, &ctx).await,
            Event::Cleanup(model) => cleanup(&model, &ctx).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

fn error_policy(model: Arc<MaaSModel>, error: &Error, ctx: Arc<Context>) -> Action {
    let action = retry(&ctx.backoff, &resource_id(&model));
    debug!(model = %model.name_any(), %error, ?action, "Retrying");
    action
}

pub(crate) fn retry(backoff: &Backoff, id: &ResourceId) -> Action {
    Action::requeue(backoff.next(id))
}

async fn apply(api: &Api<MaaSModel>, model: &MaaSModel, ctx: &Context) -> Result<Action, Error> {
    let started = time::Instant::now();
    let kind = model.backend_kind();
    let status::Evaluation { status, outcome } =
        status::evaluate(&ctx.registry, model, chrono::Utc::now()).await;

    let phase = status.phase.map_or("", |p| p.as_str());
    ctx.metrics.reconciled(kind, phase, started);

    if needs_patch(model, &status) {
        let patch = Patch::Apply(serde_json::json!({
            "apiVersion": MaaSModel::api_version(&()),
            "kind": MaaSModel::kind(&()),
            "status": status,
        }));
        let params = PatchParams::apply(FIELD_MANAGER).force();
        bounded(
            ctx.request_timeout,
            api.patch_status(&model.name_any(), &params, &patch),
        )
        .await
        .map_err(Error::Status)?;
        ctx.metrics.status_patched();
        info!(%kind, %phase, endpoint = ?status.endpoint, "Updated status");
    }

    next_action(outcome, &ctx.backoff, &resource_id(model)).map_err(|source| Error::Backend {
        kind: kind.to_string(),
        source,
    })
}

/// A status is written only when it differs from the one the model carries.
pub(crate) fn needs_patch(model: &MaaSModel, status: &MaaSModelStatus) -> bool {
    model.status.as_ref() != Some(status)
}

/// Decides when to look at a model again. Failures are returned so that
/// `error_policy` backs them off.
pub(crate) fn next_action(
    outcome: Outcome,
    backoff: &Backoff,
    id: &ResourceId,
) -> Result<Action, HandlerError> {
    let action = match outcome {
        Outcome::Ready => Action::requeue(READY_RESYNC),
        Outcome::Pending => Action::requeue(PENDING_RECHECK),
        Outcome::Unsupported => Action::await_change(),
        Outcome::Failed(error) => return Err(error),
    };
    backoff.reset(id);
    Ok(action)
}

async fn cleanup(model: &MaaSModel, ctx: &Context) -> Result<Action, Error> {
    let kind = model.backend_kind();
    match remove_routes(&ctx.registry, model).await {
        Ok(removal) => {
            debug!(%kind, ?removal, "Cleaned up");
            if removal == Removal::Deleted {
                info!(%kind, "Deleted owned routes");
            }
        }
        Err(source) => {
            ctx.metrics.cleaned_up(kind, false);
            return Err(Error::Cleanup {
                kind: kind.to_string(),
                source,
            });
        }
    }

    ctx.metrics.cleaned_up(kind, true);
    ctx.backoff.reset(&resource_id(model));
    Ok(Action::await_change())
}

/// Deletes the routes this controller created for a model. Kinds whose
/// routes are owned by the backend technology are left alone.
pub(crate) async fn remove_routes(
    registry: &Registry,
    model: &MaaSModel,
) -> Result<Removal, HandlerError> {
    let Some(backend) = registry.get(model.backend_kind()) else {
        return Ok(Removal::Unregistered);
    };
    if !backend.handler.owned_by_core() {
        return Ok(Removal::NotOwned);
    }
    match backend.handler.cleanup_on_delete(model).await {
        Ok(()) => Ok(Removal::Deleted),
        Err(error) if error.is_not_implemented() => Ok(Removal::NotImplemented),
        Err(error) => Err(error),
    }
}

fn resource_id(model: &MaaSModel) -> ResourceId {
    ResourceId::new(model.namespace().unwrap_or_default(), model.name_any())
}
