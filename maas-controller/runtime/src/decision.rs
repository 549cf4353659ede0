use crate::core::{
    authorize, AuthorizeError, DiscoverModels, GroupKey, TierResolver, TierSource,
};
use bytes::Bytes;
use futures::future;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{http, server::conn::http1, Request, Response};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    time::{self, Duration},
};
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

/// Request bodies larger than this are rejected.
pub(crate) const MAX_BODY_BYTES: usize = 64 * 1024;

const TIERS_LOOKUP: &str = "/v1/tiers/lookup";
const MODELS_AUTHORIZE: &str = "/v1/models/authorize";

type Body = Full<Bytes>;

/// Answers the policy-enforcement point's tier lookups and model
/// authorization checks.
///
/// Tier lookups are served from a short-lived per-identity cache; model
/// authorization always reads the current model index.
pub struct Decisions<M, T> {
    models: M,
    tiers: Arc<TierResolver<T>>,
    read_timeout: Duration,
    metrics: DecisionMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct DecisionMetrics {
    requests: Family<RequestLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RequestLabels {
    endpoint: &'static str,
    outcome: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct TierLookupRequest {
    groups: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TierLookupResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    tier: String,
}

#[derive(Debug, Serialize)]
struct AuthorizeResponse {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

#[derive(Copy, Clone, Debug)]
enum Endpoint {
    TiersLookup,
    ModelsAuthorize,
}

/// A request that was refused before reaching a decision.
#[derive(Debug)]
struct Rejection {
    status: http::StatusCode,
    outcome: &'static str,
    message: String,
}

// === impl Decisions ===

impl<M, T> Clone for Decisions<M, T>
where
    M: Clone,
{
    fn clone(&self) -> Self {
        Self {
            models: self.models.clone(),
            tiers: self.tiers.clone(),
            read_timeout: self.read_timeout,
            metrics: self.metrics.clone(),
        }
    }
}

impl<M, T> Decisions<M, T>
where
    M: DiscoverModels,
    T: TierSource,
{
    pub fn new(
        models: M,
        tiers: Arc<TierResolver<T>>,
        read_timeout: Duration,
        metrics: DecisionMetrics,
    ) -> Self {
        Self {
            models,
            tiers,
            read_timeout,
            metrics,
        }
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, Rejection>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let collect = Limited::new(body, MAX_BODY_BYTES).collect();
        match time::timeout(self.read_timeout, collect).await {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(error)) if error.downcast_ref::<LengthLimitError>().is_some() => {
                Err(Rejection {
                    status: http::StatusCode::PAYLOAD_TOO_LARGE,
                    outcome: "too_large",
                    message: format!("request body exceeds {MAX_BODY_BYTES} bytes"),
                })
            }
            Ok(Err(error)) => Err(Rejection {
                status: http::StatusCode::BAD_REQUEST,
                outcome: "bad_request",
                message: format!("failed to read request body: {error}"),
            }),
            Err(_) => Err(Rejection {
                status: http::StatusCode::REQUEST_TIMEOUT,
                outcome: "timeout",
                message: "timed out reading request body".to_string(),
            }),
        }
    }

    fn lookup_tier(&self, body: &[u8]) -> Result<TierLookupResponse, Rejection> {
        let req = serde_json::from_slice::<TierLookupRequest>(body).map_err(Rejection::json)?;
        let key = GroupKey::new(&req.groups);
        let rsp = match self.tiers.resolve(&key) {
            Some(tier) => TierLookupResponse {
                tier: Some(tier.name.clone()),
                display_name: Some(tier.display_name.clone()),
            },
            None => TierLookupResponse::default(),
        };
        Ok(rsp)
    }

    fn authorize_model(&self, body: &[u8]) -> Result<AuthorizeResponse, Rejection> {
        let req = serde_json::from_slice::<AuthorizeRequest>(body).map_err(Rejection::json)?;
        if req.path.is_empty() {
            return Err(Rejection::bad_request("path is required"));
        }
        if req.tier.is_empty() {
            return Err(Rejection::bad_request("tier is required"));
        }

        match authorize(&self.models, &req.path, &req.tier) {
            Ok(decision) => {
                debug!(path = %req.path, tier = %req.tier, %decision);
                Ok(AuthorizeResponse {
                    allowed: decision.allowed,
                    reason: decision.reason,
                })
            }
            Err(error @ (AuthorizeError::MalformedPath | AuthorizeError::MissingModelName)) => {
                Err(Rejection::bad_request(error.to_string()))
            }
            Err(error @ AuthorizeError::NotFound(_)) => Err(Rejection {
                status: http::StatusCode::NOT_FOUND,
                outcome: "not_found",
                message: error.to_string(),
            }),
            Err(error @ AuthorizeError::InvalidAllowlist { .. }) => {
                error!(%error, "Model is misconfigured");
                Err(Rejection {
                    status: http::StatusCode::INTERNAL_SERVER_ERROR,
                    outcome: "error",
                    message: error.to_string(),
                })
            }
        }
    }
}

impl<M, T, B> tower::Service<Request<B>> for Decisions<M, T>
where
    M: DiscoverModels + Clone + Send + Sync + 'static,
    T: TierSource + Send + Sync + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), path = %req.uri().path());
        let endpoint = match req.uri().path() {
            TIERS_LOOKUP => Endpoint::TiersLookup,
            MODELS_AUTHORIZE => Endpoint::ModelsAuthorize,
            path => {
                let message = format!("no decision endpoint at {path}");
                return Box::pin(future::ready(error_response(
                    http::StatusCode::NOT_FOUND,
                    &message,
                )));
            }
        };
        if req.method() != http::Method::POST {
            self.metrics.observe(endpoint, "method_not_allowed");
            return Box::pin(future::ready(
                error_response(http::StatusCode::METHOD_NOT_ALLOWED, "method not allowed").map(
                    |mut rsp| {
                        rsp.headers_mut().insert(
                            http::header::ALLOW,
                            http::HeaderValue::from_static("POST"),
                        );
                        rsp
                    },
                ),
            ));
        }

        let decisions = self.clone();
        Box::pin(async move {
            let rsp = match decisions.read_body(req.into_body()).await {
                Err(rejection) => Err(rejection),
                Ok(body) => match endpoint {
                    Endpoint::TiersLookup => decisions.lookup_tier(&body).map(|rsp| {
                        let outcome = if rsp.tier.is_some() { "tier" } else { "no_tier" };
                        (outcome, serde_json::to_vec(&rsp))
                    }),
                    Endpoint::ModelsAuthorize => decisions.authorize_model(&body).map(|rsp| {
                        let outcome = if rsp.allowed { "allowed" } else { "denied" };
                        (outcome, serde_json::to_vec(&rsp))
                    }),
                },
            };
            match rsp {
                Ok((outcome, bytes)) => {
                    decisions.metrics.observe(endpoint, outcome);
                    json_response(http::StatusCode::OK, bytes?)
                }
                Err(Rejection {
                    status,
                    outcome,
                    message,
                }) => {
                    decisions.metrics.observe(endpoint, outcome);
                    debug!(%status, %message, "Rejected decision request");
                    error_response(status, &message)
                }
            }
        })
    }
}

// === impl DecisionMetrics ===

impl DecisionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "requests",
            "Total number of decision requests by endpoint and outcome",
            metrics.requests.clone(),
        );
        metrics
    }

    fn observe(&self, endpoint: Endpoint, outcome: &'static str) {
        self.requests
            .get_or_create(&RequestLabels {
                endpoint: endpoint.as_str(),
                outcome,
            })
            .inc();
    }
}

// === impl Endpoint ===

impl Endpoint {
    fn as_str(&self) -> &'static str {
        match self {
            Self::TiersLookup => "tiers_lookup",
            Self::ModelsAuthorize => "models_authorize",
        }
    }
}

// === impl Rejection ===

impl Rejection {
    fn bad_request(message: impl ToString) -> Self {
        Self {
            status: http::StatusCode::BAD_REQUEST,
            outcome: "bad_request",
            message: message.to_string(),
        }
    }

    fn json(error: serde_json::Error) -> Self {
        Self::bad_request(format!("invalid request body: {error}"))
    }
}

fn json_response(status: http::StatusCode, bytes: Vec<u8>) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("decision response must be valid"))
}

fn error_response(status: http::StatusCode, message: &str) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&ErrorResponse { error: message })?;
    json_response(status, bytes)
}

/// Serves decisions over plain HTTP until `drain` is signaled.
#[instrument(skip_all, fields(port = %addr.port()))]
pub(crate) async fn serve<M, T>(
    addr: SocketAddr,
    decisions: Decisions<M, T>,
    drain: drain::Watch,
) -> anyhow::Result<()>
where
    M: DiscoverModels + Clone + Send + Sync + 'static,
    T: TierSource + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Decision server listening");

    loop {
        let (io, client) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
            _ = drain.clone().signaled() => {
                debug!("Decision server shutting down");
                return Ok(());
            }
        };

        let svc = TowerToHyperService::new(decisions.clone());
        let drain = drain.clone();
        tokio::spawn(
            async move {
                let conn = http1::Builder::new().serve_connection(TokioIo::new(io), svc);
                tokio::pin!(conn);
                tokio::select! {
                    res = conn.as_mut() => {
                        if let Err(error) = res {
                            debug!(%error, "Connection closed");
                        }
                    }
                    release = drain.signaled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(error) = release.release_after(conn).await {
                            debug!(%error, "Connection closed during shutdown");
                        }
                    }
                }
            }
            .instrument(info_span!("conn", %client)),
        );
    }
}
