use crate::{
    controller::{needs_patch, next_action, remove_routes, retry, Removal},
    external,
    handler::{
        BackendHandler, HandlerError, ModelEndpoint, Registry, RouteId, RouteReference,
        RouteResolver,
    },
    llmisvc,
    status::{evaluate, Outcome, READY_CONDITION},
    Backoff, ResourceId,
};
use chrono::{DateTime, TimeZone, Utc};
use kube::runtime::controller::Action;
use maas_controller_k8s_api::{
    MaaSModel, MaaSModelSpec, MaaSModelStatus, ModelReference, ObjectMeta, Phase,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[derive(Default)]
struct Fake {
    route: Option<fn() -> HandlerError>,
    status: Option<fn() -> HandlerError>,
    endpoint: Option<&'static str>,
    ready: bool,
    owned: bool,
    cleanup: Option<fn() -> HandlerError>,
    calls: Mutex<Vec<&'static str>>,
}

#[async_trait::async_trait]
impl BackendHandler for Fake {
    fn owned_by_core(&self) -> bool {
        self.owned
    }

    async fn reconcile_route(&self, _model: &MaaSModel) -> Result<RouteReference, HandlerError> {
        self.calls.lock().push("reconcile_route");
        if let Some(error) = self.route {
            return Err(error());
        }
        Ok(route())
    }

    async fn status(
        &self,
        _model: &MaaSModel,
        _route: &RouteReference,
    ) -> Result<ModelEndpoint, HandlerError> {
        self.calls.lock().push("status");
        if let Some(error) = self.status {
            return Err(error());
        }
        Ok(ModelEndpoint {
            endpoint: self.endpoint.map(Into::into),
            ready: self.ready,
        })
    }

    async fn model_endpoint(&self, _model: &MaaSModel) -> Result<String, HandlerError> {
        self.endpoint
            .map(Into::into)
            .ok_or_else(|| HandlerError::Unavailable("no endpoint".to_string()))
    }

    async fn cleanup_on_delete(&self, _model: &MaaSModel) -> Result<(), HandlerError> {
        self.calls.lock().push("cleanup_on_delete");
        if let Some(error) = self.cleanup {
            return Err(error());
        }
        Ok(())
    }
}

struct FixedResolver;

impl RouteResolver for FixedResolver {
    fn http_route_for_model(&self, _model: &MaaSModel) -> Result<RouteId, HandlerError> {
        Ok(RouteId {
            name: "route".to_string(),
            namespace: "ns".to_string(),
        })
    }
}

fn route() -> RouteReference {
    RouteReference {
        name: "llama-kserve-route".to_string(),
        namespace: "models".to_string(),
        gateway_name: "maas-default-gateway".to_string(),
        gateway_namespace: "openshift-ingress".to_string(),
        hostnames: vec!["maas.example.com".to_string()],
    }
}

fn model(kind: &str) -> MaaSModel {
    MaaSModel {
        metadata: ObjectMeta {
            name: Some("llama".to_string()),
            namespace: Some("models".to_string()),
            generation: Some(3),
            uid: Some("model-uid".to_string()),
            ..Default::default()
        },
        spec: MaaSModelSpec {
            model_ref: ModelReference {
                kind: kind.to_string(),
                name: "llama".to_string(),
                namespace: None,
            },
        },
        status: None,
    }
}

fn registry(fake: Arc<Fake>) -> Registry {
    Registry::default().register("fake", fake, Arc::new(FixedResolver))
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("timestamp must be valid")
}

fn ready_condition(status: &MaaSModelStatus) -> &maas_controller_k8s_api::Condition {
    status
        .conditions
        .iter()
        .find(|c| c.type_ == READY_CONDITION)
        .expect("Ready condition must be set")
}

#[tokio::test]
async fn ready_backend() {
    let fake = Arc::new(Fake {
        endpoint: Some("https://maas.example.com/models/llama"),
        ready: true,
        ..Default::default()
    });
    let eval = evaluate(&registry(fake.clone()), &model("fake"), t(0)).await;

    assert!(matches!(eval.outcome, Outcome::Ready));
    assert_eq!(eval.status.phase, Some(Phase::Ready));
    assert_eq!(
        eval.status.endpoint.as_deref(),
        Some("https://maas.example.com/models/llama")
    );
    assert_eq!(eval.status.route_name.as_deref(), Some("llama-kserve-route"));
    assert_eq!(
        eval.status.route_gateway_namespace.as_deref(),
        Some("openshift-ingress")
    );
    assert_eq!(eval.status.route_hostnames, vec!["maas.example.com"]);
    assert_eq!(eval.status.observed_generation, Some(3));

    let cond = ready_condition(&eval.status);
    assert_eq!(cond.status, "True");
    assert_eq!(cond.reason, "Ready");
    assert_eq!(cond.observed_generation, Some(3));
    assert_eq!(*fake.calls.lock(), vec!["reconcile_route", "status"]);
}

#[tokio::test]
async fn not_ready_backend_is_pending_without_endpoint() {
    let fake = Arc::new(Fake {
        endpoint: Some("https://maas.example.com/models/llama"),
        ready: false,
        ..Default::default()
    });
    let eval = evaluate(&registry(fake), &model("fake"), t(0)).await;

    assert!(matches!(eval.outcome, Outcome::Pending));
    assert_eq!(eval.status.phase, Some(Phase::Pending));
    assert_eq!(eval.status.endpoint, None);
    assert_eq!(eval.status.route_name.as_deref(), Some("llama-kserve-route"));
    assert_eq!(ready_condition(&eval.status).reason, "BackendNotReady");
}

#[tokio::test]
async fn ready_without_endpoint_is_pending() {
    let fake = Arc::new(Fake {
        endpoint: None,
        ready: true,
        ..Default::default()
    });
    let eval = evaluate(&registry(fake), &model("fake"), t(0)).await;
    assert!(matches!(eval.outcome, Outcome::Pending));
    assert_eq!(eval.status.endpoint, None);
}

#[tokio::test]
async fn route_failure_is_retried() {
    let fake = Arc::new(Fake {
        route: Some(|| HandlerError::Unavailable("HTTPRoute models/x not found".to_string())),
        ..Default::default()
    });
    let eval = evaluate(&registry(fake.clone()), &model("fake"), t(0)).await;

    assert!(matches!(eval.outcome, Outcome::Failed(HandlerError::Unavailable(_))));
    assert_eq!(eval.status.phase, Some(Phase::Failed));
    assert_eq!(eval.status.route_name, None);
    let cond = ready_condition(&eval.status);
    assert_eq!(cond.reason, "ReconcileFailed");
    assert_eq!(cond.message, "HTTPRoute models/x not found");
    assert_eq!(*fake.calls.lock(), vec!["reconcile_route"]);
}

#[tokio::test]
async fn status_failure_keeps_route_reference() {
    let fake = Arc::new(Fake {
        status: Some(|| HandlerError::Timeout(tokio::time::Duration::from_secs(5))),
        ..Default::default()
    });
    let eval = evaluate(&registry(fake), &model("fake"), t(0)).await;

    assert!(matches!(eval.outcome, Outcome::Failed(HandlerError::Timeout(_))));
    assert_eq!(eval.status.phase, Some(Phase::Failed));
    assert_eq!(eval.status.route_name.as_deref(), Some("llama-kserve-route"));
    assert_eq!(ready_condition(&eval.status).reason, "StatusFailed");
}

#[tokio::test]
async fn not_implemented_is_unsupported() {
    let fake = Arc::new(Fake {
        route: Some(|| HandlerError::NotImplemented("fake".to_string())),
        ..Default::default()
    });
    let eval = evaluate(&registry(fake.clone()), &model("fake"), t(0)).await;

    assert!(matches!(eval.outcome, Outcome::Unsupported));
    assert_eq!(eval.status.phase, Some(Phase::Unsupported));
    assert_eq!(eval.status.route_name, None);
    assert_eq!(ready_condition(&eval.status).reason, "Unsupported");
    assert_eq!(*fake.calls.lock(), vec!["reconcile_route"]);
}

#[tokio::test]
async fn not_implemented_status_is_unsupported() {
    let fake = Arc::new(Fake {
        status: Some(|| HandlerError::NotImplemented("fake".to_string())),
        ..Default::default()
    });
    let eval = evaluate(&registry(fake), &model("fake"), t(0)).await;
    assert!(matches!(eval.outcome, Outcome::Unsupported));
    assert_eq!(eval.status.phase, Some(Phase::Unsupported));
}

#[tokio::test]
async fn unregistered_kind_is_unsupported() {
    let fake = Arc::new(Fake::default());
    let eval = evaluate(&registry(fake.clone()), &model("Unknown"), t(0)).await;

    assert!(matches!(eval.outcome, Outcome::Unsupported));
    assert_eq!(eval.status.phase, Some(Phase::Unsupported));
    let cond = ready_condition(&eval.status);
    assert_eq!(cond.status, "False");
    assert_eq!(cond.reason, "Unsupported");
    assert!(fake.calls.lock().is_empty());
}

#[tokio::test]
async fn external_model_is_unsupported() {
    // ExternalModel's handler never reaches the cluster before reporting
    // that it is not implemented.
    let client = kube::Client::try_from(kube::Config::new(
        "http://127.0.0.1:1".parse().expect("valid url"),
    ))
    .expect("client must build");
    let registry = Registry::default().register(
        external::KIND,
        Arc::new(external::Handler::new(
            client,
            tokio::time::Duration::from_secs(1),
        )),
        Arc::new(external::Resolver),
    );
    let eval = evaluate(&registry, &model(external::KIND), t(0)).await;
    assert!(matches!(eval.outcome, Outcome::Unsupported));
    assert_eq!(eval.status.phase, Some(Phase::Unsupported));
}

#[tokio::test]
async fn reevaluation_is_stable() {
    let fake = Arc::new(Fake {
        endpoint: Some("https://maas.example.com/models/llama"),
        ready: true,
        ..Default::default()
    });
    let registry = registry(fake);
    let mut m = model("fake");

    let first = evaluate(&registry, &m, t(0)).await;
    m.status = Some(first.status.clone());
    let second = evaluate(&registry, &m, t(60)).await;

    assert_eq!(first.status, second.status);
}

#[tokio::test]
async fn transition_time_changes_with_condition() {
    let registry_pending = registry(Arc::new(Fake {
        ready: false,
        ..Default::default()
    }));
    let registry_ready = registry(Arc::new(Fake {
        endpoint: Some("https://maas.example.com/models/llama"),
        ready: true,
        ..Default::default()
    }));
    let mut m = model("fake");

    let pending = evaluate(&registry_pending, &m, t(0)).await;
    let pending_time = ready_condition(&pending.status).last_transition_time.clone();
    m.status = Some(pending.status);

    let again = evaluate(&registry_pending, &m, t(30)).await;
    assert_eq!(
        ready_condition(&again.status).last_transition_time,
        pending_time
    );
    m.status = Some(again.status);

    let ready = evaluate(&registry_ready, &m, t(90)).await;
    assert_ne!(
        ready_condition(&ready.status).last_transition_time,
        pending_time
    );
    assert_eq!(
        ready_condition(&ready.status).last_transition_time.as_deref(),
        Some("2023-11-14T22:14:50Z")
    );
    assert_eq!(ready.status.conditions.len(), 1);
}

#[test]
fn resolvers_name_routes() {
    let mut m = model(llmisvc::KIND);
    m.spec.model_ref.namespace = Some("serving".to_string());
    assert_eq!(
        llmisvc::Resolver
            .http_route_for_model(&m)
            .expect("route must resolve"),
        RouteId {
            name: "llama-kserve-route".to_string(),
            namespace: "serving".to_string(),
        }
    );

    let m = model(external::KIND);
    assert_eq!(
        external::Resolver
            .http_route_for_model(&m)
            .expect("route must resolve"),
        RouteId {
            name: "maas-model-llama".to_string(),
            namespace: "models".to_string(),
        }
    );
}

#[test]
fn registry_resolves_registered_kinds_only() {
    let registry = registry(Arc::new(Fake::default()));
    assert!(registry.http_route_for_model(&model("fake")).is_some());
    assert!(registry.http_route_for_model(&model("Unknown")).is_none());
}

#[tokio::test]
async fn cleanup_skips_routes_owned_by_the_backend() {
    let fake = Arc::new(Fake {
        owned: false,
        ..Default::default()
    });
    let removal = remove_routes(&registry(fake.clone()), &model("fake"))
        .await
        .expect("cleanup must succeed");
    assert_eq!(removal, Removal::NotOwned);
    assert!(fake.calls.lock().is_empty());
}

#[tokio::test]
async fn cleanup_deletes_owned_routes() {
    let fake = Arc::new(Fake {
        owned: true,
        ..Default::default()
    });
    let removal = remove_routes(&registry(fake.clone()), &model("fake"))
        .await
        .expect("cleanup must succeed");
    assert_eq!(removal, Removal::Deleted);
    assert_eq!(*fake.calls.lock(), vec!["cleanup_on_delete"]);
}

#[tokio::test]
async fn cleanup_tolerates_unimplemented_and_unregistered_kinds() {
    let fake = Arc::new(Fake {
        owned: true,
        cleanup: Some(|| HandlerError::NotImplemented("fake".to_string())),
        ..Default::default()
    });
    let registry = registry(fake);
    assert_eq!(
        remove_routes(&registry, &model("fake")).await.unwrap(),
        Removal::NotImplemented
    );
    assert_eq!(
        remove_routes(&registry, &model("Unknown")).await.unwrap(),
        Removal::Unregistered
    );
}

#[tokio::test]
async fn cleanup_failure_is_returned() {
    let fake = Arc::new(Fake {
        owned: true,
        cleanup: Some(|| HandlerError::Unavailable("apiserver down".to_string())),
        ..Default::default()
    });
    assert!(matches!(
        remove_routes(&registry(fake), &model("fake")).await,
        Err(HandlerError::Unavailable(_))
    ));
}

#[test]
fn outcomes_schedule_the_next_reconcile() {
    let backoff = Backoff::default();
    let id = ResourceId::new("models".to_string(), "llama".to_string());
    let secs = tokio::time::Duration::from_secs;

    assert_eq!(
        next_action(Outcome::Ready, &backoff, &id).unwrap(),
        Action::requeue(secs(5 * 60))
    );
    assert_eq!(
        next_action(Outcome::Pending, &backoff, &id).unwrap(),
        Action::requeue(secs(30))
    );
    assert_eq!(
        next_action(Outcome::Unsupported, &backoff, &id).unwrap(),
        Action::await_change()
    );
}

#[test]
fn failures_back_off_until_a_success() {
    let backoff = Backoff::default();
    let id = ResourceId::new("models".to_string(), "llama".to_string());
    let secs = tokio::time::Duration::from_secs;
    let failed = || Outcome::Failed(HandlerError::Unavailable("route missing".to_string()));

    for expected in [1, 2, 4] {
        let error = next_action(failed(), &backoff, &id).expect_err("failure must be retried");
        assert!(matches!(error, HandlerError::Unavailable(_)));
        assert_eq!(retry(&backoff, &id), Action::requeue(secs(expected)));
    }

    // Unsupported models wait for a change and start over afterwards.
    assert_eq!(
        next_action(Outcome::Unsupported, &backoff, &id).unwrap(),
        Action::await_change()
    );
    assert_eq!(retry(&backoff, &id), Action::requeue(secs(1)));
}

#[tokio::test]
async fn converged_status_is_not_patched() {
    let fake = Arc::new(Fake {
        endpoint: Some("https://maas.example.com/models/llama"),
        ready: true,
        ..Default::default()
    });
    let registry = registry(fake);
    let mut m = model("fake");

    let first = evaluate(&registry, &m, t(0)).await;
    assert!(needs_patch(&m, &first.status));

    m.status = Some(first.status);
    let second = evaluate(&registry, &m, t(300)).await;
    assert!(!needs_patch(&m, &second.status));
}
