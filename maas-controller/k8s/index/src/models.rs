use ahash::AHashMap as HashMap;
use maas_controller_core::ModelAccess;
use maas_controller_k8s_api::{MaaSModel, ResourceExt};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Indexes models by name, then by namespace.
#[derive(Debug, Default)]
pub struct Index {
    by_name: HashMap<String, BTreeMap<String, ModelAccess>>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Returns every model with the given name, ordered by namespace.
    pub fn models_named(&self, name: &str) -> Vec<ModelAccess> {
        self.by_name
            .get(name)
            .map(|by_ns| by_ns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The total number of indexed models.
    pub fn len(&self) -> usize {
        self.by_name.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl kubert::index::IndexNamespacedResource<MaaSModel> for Index {
    fn apply(&mut self, model: MaaSModel) {
        let Some(namespace) = model.namespace() else {
            tracing::warn!(name = %model.name_any(), "Ignoring MaaSModel without a namespace");
            return;
        };
        let name = model.name_unchecked();
        let tiers = model.tiers_annotation().map(ToString::to_string);
        tracing::debug!(%namespace, %name, ?tiers, "Indexing model");

        let access = ModelAccess {
            namespace: namespace.clone(),
            name: name.clone(),
            tiers,
        };
        self.by_name
            .entry(name)
            .or_default()
            .insert(namespace, access);
    }

    fn delete(&mut self, namespace: String, name: String) {
        tracing::debug!(%namespace, %name, "Removing model");
        if let Some(by_ns) = self.by_name.get_mut(&name) {
            by_ns.remove(&namespace);
            if by_ns.is_empty() {
                self.by_name.remove(&name);
            }
        }
    }

    // Since apply only reindexes a single model at a time, there's no need to
    // handle resets specially.
}
