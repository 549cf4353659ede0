use crate::{
    core::TierResolver,
    decision::{self, DecisionMetrics, Decisions},
    index,
    k8s::{self, Client, ConfigMap, LlmInferenceService, MaaSModel, Resource},
    leader, lease,
    reconcile::{self, llmisvc::GatewayRef},
    ModelDiscover, TierDiscover,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "maas-controller",
    about = "Reconciles MaaS models and serves tier and model authorization decisions"
)]
pub struct Args {
    #[clap(long, default_value = "maas=info,warn", env = "MAAS_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address of the plain-HTTP decision server.
    #[clap(long, default_value = "0.0.0.0:8080")]
    decision_addr: SocketAddr,

    /// How long a caller may take to send a decision request body.
    #[clap(long, default_value = "2000")]
    decision_timeout_ms: u64,

    /// How long a resolved tier is reused for the same group set.
    #[clap(long, default_value = "300")]
    tier_cache_ttl_secs: u64,

    #[clap(long, default_value = "tier-to-group-mapping")]
    tier_mapping_name: String,

    #[clap(long, default_value = "maas-api")]
    tier_mapping_namespace: String,

    /// The gateway reported for routes that don't name a parent Gateway.
    #[clap(long, default_value = "maas-default-gateway")]
    gateway_name: String,

    #[clap(long, default_value = "openshift-ingress")]
    gateway_namespace: String,

    #[clap(long, default_value = "maas-controller")]
    controller_deployment_name: String,

    #[clap(long, default_value = "opendatahub", env = "POD_NAMESPACE")]
    controller_namespace: String,

    /// Bounds every request the reconciler makes to the API server.
    #[clap(long, default_value = "5000")]
    request_timeout_ms: u64,

    #[clap(long, default_value = "8")]
    reconcile_concurrency: u16,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            decision_addr,
            decision_timeout_ms,
            tier_cache_ttl_secs,
            tier_mapping_name,
            tier_mapping_namespace,
            gateway_name,
            gateway_namespace,
            controller_deployment_name,
            controller_namespace,
            request_timeout_ms,
            reconcile_concurrency,
        } = self;

        let models_index = index::models::Index::shared();
        let tiers_index = index::tiers::Index::shared(&tier_mapping_namespace, &tier_mapping_name);

        let mut prom = <Registry>::default();
        index::metrics::register(
            prom.sub_registry_with_prefix("index"),
            models_index.clone(),
            tiers_index.clone(),
        );
        let controller_metrics =
            reconcile::ControllerMetrics::register(prom.sub_registry_with_prefix("model_controller"));
        let decision_metrics = DecisionMetrics::register(prom.sub_registry_with_prefix("decision"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Spawn resource watches.

        let models = runtime.watch_all::<MaaSModel>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(models_index.clone(), models)
                .instrument(info_span!("maasmodels")),
        );

        let config_maps = runtime.watch_namespaced::<ConfigMap>(
            tier_mapping_namespace.clone(),
            watcher::Config::default().fields(&format!("metadata.name={tier_mapping_name}")),
        );
        tokio::spawn(
            kubert::index::namespaced(tiers_index.clone(), config_maps)
                .instrument(info_span!("tiermapping")),
        );

        // Run the reconciler on the replica that holds the write lease.

        let client = runtime.client();
        let request_timeout = Duration::from_millis(request_timeout_ms);
        let registry = reconcile::registry(
            client.clone(),
            GatewayRef {
                name: gateway_name,
                namespace: gateway_namespace,
            },
            request_timeout,
        );
        let inference_services = if api_resource_exists::<LlmInferenceService>(&client).await {
            Some(k8s::Api::<LlmInferenceService>::all(client.clone()))
        } else {
            tracing::warn!(
                "llminferenceservices.serving.kserve.io resource kind not found, skipping watches"
            );
            None
        };
        let reconciler = leader::Reconciler {
            ctx: Arc::new(reconcile::Context {
                client: client.clone(),
                registry,
                backoff: reconcile::Backoff::default(),
                metrics: controller_metrics,
                request_timeout,
            }),
            models: k8s::Api::<MaaSModel>::all(client),
            inference_services,
            concurrency: reconcile_concurrency,
        };
        tokio::spawn(
            reconciler
                .run(claims, hostname, runtime.shutdown_handle())
                .instrument(info_span!("model_controller")),
        );

        // Serve decisions on every replica.

        let tier_resolver = Arc::new(TierResolver::new(
            TierDiscover::new(tiers_index),
            Duration::from_secs(tier_cache_ttl_secs),
        ));
        let decisions = Decisions::new(
            ModelDiscover::new(models_index),
            tier_resolver,
            Duration::from_millis(decision_timeout_ms),
            decision_metrics,
        );
        tokio::spawn(decision::serve(
            decision_addr,
            decisions,
            runtime.shutdown_handle(),
        ));

        info!("Started");
        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
