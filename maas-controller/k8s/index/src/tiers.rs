use anyhow::{Context, Result};
use maas_controller_core::{Tier, TierMapping};
use maas_controller_k8s_api::{ConfigMap, ResourceExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;

/// The ConfigMap key holding the YAML tier list.
pub const TIERS_KEY: &str = "tiers";

pub type SharedIndex = Arc<RwLock<Index>>;

/// Tracks the tier mapping ConfigMap.
///
/// Only the configured ConfigMap is considered; every other ConfigMap event
/// is ignored. The mapping is replaced as a whole on each valid update.
#[derive(Debug)]
pub struct Index {
    namespace: String,
    name: String,
    mapping: Arc<TierMapping>,
}

/// One entry of the `tiers` YAML document.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TierConfig {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    level: u32,
    #[serde(default)]
    groups: Vec<String>,
}

// === impl Index ===

impl Index {
    pub fn shared(namespace: impl ToString, name: impl ToString) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            mapping: Default::default(),
        }))
    }

    pub fn mapping(&self) -> Arc<TierMapping> {
        self.mapping.clone()
    }

    fn is_mapping(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

impl kubert::index::IndexNamespacedResource<ConfigMap> for Index {
    fn apply(&mut self, cm: ConfigMap) {
        let namespace = cm.namespace().unwrap_or_default();
        let name = cm.name_unchecked();
        if !self.is_mapping(&namespace, &name) {
            return;
        }

        let data = cm
            .data
            .as_ref()
            .and_then(|data| data.get(TIERS_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        match parse(data) {
            Ok(mapping) => {
                tracing::info!(%namespace, %name, tiers = mapping.len(), "Loaded tier mapping");
                self.mapping = Arc::new(mapping);
            }
            Err(error) => {
                tracing::error!(%namespace, %name, error = %format_args!("{error:#}"), "Invalid tier mapping; keeping the previous one");
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.is_mapping(&namespace, &name) {
            tracing::warn!(%namespace, %name, "Tier mapping deleted; no group resolves to a tier");
            self.mapping = Default::default();
        }
    }
}

/// Parses the YAML tier list stored in the mapping ConfigMap.
pub fn parse(data: &str) -> Result<TierMapping> {
    if data.trim().is_empty() {
        return Ok(TierMapping::default());
    }
    let tiers = serde_yaml::from_str::<Vec<TierConfig>>(data).context("invalid tiers YAML")?;
    let mapping = TierMapping::new(tiers.into_iter().map(|t| {
        let display_name = t
            .display_name
            .or(t.description)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| t.name.clone());
        (
            Tier {
                name: t.name,
                display_name,
                level: t.level,
            },
            t.groups,
        )
    }))?;
    Ok(mapping)
}
