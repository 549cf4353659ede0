use crate::handler::{HandlerError, Registry, RouteReference};
use chrono::{DateTime, SecondsFormat, Utc};
use maas_controller_k8s_api::{Condition, MaaSModel, MaaSModelStatus, Phase};

pub(crate) const READY_CONDITION: &str = "Ready";

/// How a model's reconciliation concluded, and so when to look at it again.
#[derive(Debug)]
pub(crate) enum Outcome {
    Ready,
    Pending,
    Unsupported,
    Failed(HandlerError),
}

#[derive(Debug)]
pub(crate) struct Evaluation {
    pub status: MaaSModelStatus,
    pub outcome: Outcome,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    Route,
    Status,
}

/// Runs the model's backend handler and computes the status it should carry.
///
/// Nothing is written; the caller persists `status` if it differs from what
/// the model already has.
pub(crate) async fn evaluate(
    registry: &Registry,
    model: &MaaSModel,
    now: DateTime<Utc>,
) -> Evaluation {
    let kind = model.backend_kind();
    let Some(backend) = registry.get(kind) else {
        let message = format!("backend kind {kind:?} is not supported");
        return unsupported(model, message, now);
    };

    let route = match backend.handler.reconcile_route(model).await {
        Ok(route) => route,
        Err(error) => return failed(model, None, Step::Route, error, now),
    };

    let endpoint = match backend.handler.status(model, &route).await {
        Ok(endpoint) => endpoint,
        Err(error) => return failed(model, Some(&route), Step::Status, error, now),
    };

    let mut status = base(model, Some(&route));
    let outcome = match endpoint.endpoint {
        Some(url) if endpoint.ready => {
            status.phase = Some(Phase::Ready);
            status.endpoint = Some(url);
            set_ready(&mut status, model, true, "Ready", "model is ready", now);
            Outcome::Ready
        }
        _ => {
            status.phase = Some(Phase::Pending);
            let message = if endpoint.ready {
                "backend is ready but no endpoint is known"
            } else {
                "backend is not ready"
            };
            set_ready(&mut status, model, false, "BackendNotReady", message, now);
            Outcome::Pending
        }
    };
    Evaluation { status, outcome }
}

fn unsupported(model: &MaaSModel, message: String, now: DateTime<Utc>) -> Evaluation {
    let mut status = base(model, None);
    status.phase = Some(Phase::Unsupported);
    set_ready(&mut status, model, false, "Unsupported", &message, now);
    Evaluation {
        status,
        outcome: Outcome::Unsupported,
    }
}

fn failed(
    model: &MaaSModel,
    route: Option<&RouteReference>,
    step: Step,
    error: HandlerError,
    now: DateTime<Utc>,
) -> Evaluation {
    if error.is_not_implemented() {
        return unsupported(model, error.to_string(), now);
    }

    let reason = match step {
        Step::Route => "ReconcileFailed",
        Step::Status => "StatusFailed",
    };
    let mut status = base(model, route);
    status.phase = Some(Phase::Failed);
    set_ready(&mut status, model, false, reason, &error.to_string(), now);
    Evaluation {
        status,
        outcome: Outcome::Failed(error),
    }
}

/// A status with the model's existing conditions carried over, so transition
/// times survive re-evaluation.
fn base(model: &MaaSModel, route: Option<&RouteReference>) -> MaaSModelStatus {
    let mut status = MaaSModelStatus {
        observed_generation: model.metadata.generation,
        conditions: model
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
        ..Default::default()
    };
    if let Some(route) = route {
        route.write_to(&mut status);
    }
    status
}

fn set_ready(
    status: &mut MaaSModelStatus,
    model: &MaaSModel,
    ready: bool,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    let value = if ready { "True" } else { "False" };
    let prior = status
        .conditions
        .iter()
        .position(|c| c.type_ == READY_CONDITION);

    let last_transition_time = match prior.map(|i| &status.conditions[i]) {
        Some(c) if c.status == value && c.reason == reason && c.last_transition_time.is_some() => {
            c.last_transition_time.clone()
        }
        _ => Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    };

    let condition = Condition {
        type_: READY_CONDITION.to_string(),
        status: value.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time,
        observed_generation: model.metadata.generation,
    };
    match prior {
        Some(i) => status.conditions[i] = condition,
        None => status.conditions.push(condition),
    }
}
