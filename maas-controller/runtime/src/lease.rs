use crate::k8s::{self, Deployment, Lease, ObjectMeta, OwnerReference, Patch, PatchParams, Resource};
use anyhow::{Context, Result};
use kubert::lease::{Claim, ClaimParams, LeaseManager};
use std::sync::Arc;
use tokio::{sync::watch, time::Duration};

pub(crate) const LEASE_NAME: &str = "maas-controller-write";

const FIELD_MANAGER: &str = "maas-controller";
const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

const CLAIM: ClaimParams = ClaimParams {
    lease_duration: Duration::from_secs(30),
    renew_grace_period: Duration::from_secs(1),
};

/// Ensures the write Lease exists and starts competing for it as `hostname`.
///
/// The Lease is owned by the controller Deployment and goes away with it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    deployment_name: &str,
    hostname: &str,
) -> Result<watch::Receiver<Arc<Claim>>> {
    let deployment = k8s::Api::<Deployment>::namespaced(runtime.client(), ns)
        .get(deployment_name)
        .await
        .with_context(|| format!("failed to fetch Deployment {ns}/{deployment_name}"))?;
    let owner = deployment
        .controller_owner_ref(&())
        .context("Deployment has no name or uid")?;

    let api = k8s::Api::<Lease>::namespaced(runtime.client(), ns);
    create_if_missing(&api, write_lease(ns, owner)).await?;

    let (claims, _task) = LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, CLAIM)
        .await?;
    Ok(claims)
}

async fn create_if_missing(api: &k8s::Api<Lease>, lease: Lease) -> Result<()> {
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    match api.patch(LEASE_NAME, &params, &Patch::Apply(lease)).await {
        Ok(lease) => {
            tracing::info!(name = LEASE_NAME, version = ?lease.metadata.resource_version, "Created write Lease");
            Ok(())
        }
        Err(k8s::Error::Api(error)) if error.code == 409 => {
            tracing::debug!(name = LEASE_NAME, "Write Lease exists");
            Ok(())
        }
        Err(error) => Err(error).context("failed to create write Lease"),
    }
}

/// An empty Lease that the apply only creates: resource version `0` conflicts
/// with any existing object.
fn write_lease(ns: &str, owner: OwnerReference) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            resource_version: Some("0".to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(
                [(COMPONENT_LABEL.to_string(), FIELD_MANAGER.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    }
}
