//! MaaS controller domain logic.
//!
//! This crate knows nothing about the cluster. It answers two questions for
//! the policy-enforcement point:
//!
//! - Which tier does a set of groups resolve to? Tiers are ordered by level
//!   and a caller gets the highest-level tier any of its groups maps to.
//!   Results are cached per group set for a bounded interval.
//! - May a tier reach the model named by a request path? Every call consults
//!   the current model registry; nothing is cached.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authorize;
pub mod tier;

pub use self::{
    authorize::{
        authorize, model_name_from_path, AllowedTiers, AuthorizeError, Decision, DiscoverModels,
        ModelAccess,
    },
    tier::{
        cache::{GroupKey, TierResolver, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL},
        Tier, TierMapping, TierMappingError, TierSource,
    },
};
