#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use maas_controller_core as core;
pub use maas_controller_k8s_api as k8s;
pub use maas_controller_k8s_index as index;
pub use maas_controller_k8s_reconcile as reconcile;

mod args;
mod decision;
mod leader;
mod lease;

pub use self::{
    args::Args,
    decision::{DecisionMetrics, Decisions},
};

use std::sync::Arc;

/// Serves model lookups from the watched model index.
#[derive(Clone, Debug)]
pub struct ModelDiscover(index::models::SharedIndex);

/// Serves the tier mapping most recently loaded from the cluster.
#[derive(Clone, Debug)]
pub struct TierDiscover(index::tiers::SharedIndex);

// === impl ModelDiscover ===

impl ModelDiscover {
    pub fn new(index: index::models::SharedIndex) -> Self {
        Self(index)
    }
}

impl core::DiscoverModels for ModelDiscover {
    fn models_named(&self, name: &str) -> Vec<core::ModelAccess> {
        self.0.read().models_named(name)
    }
}

// === impl TierDiscover ===

impl TierDiscover {
    pub fn new(index: index::tiers::SharedIndex) -> Self {
        Self(index)
    }
}

impl core::TierSource for TierDiscover {
    fn tier_mapping(&self) -> Arc<core::TierMapping> {
        self.0.read().mapping()
    }
}
