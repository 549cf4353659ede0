//! Cluster-backed indexes for the decision endpoints.
//!
//! - [`models::Index`] holds every `MaaSModel` in the cluster, keyed by name
//!   and then namespace, so a request path that only names a model can be
//!   resolved without knowing its namespace.
//! - [`tiers::Index`] holds the tier mapping parsed from a single ConfigMap.
//!
//! Both are fed by `kubert::index` watches and are eventually consistent with
//! the API server: a model that was just created may not be visible for a
//! short time.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
pub mod models;
pub mod tiers;
