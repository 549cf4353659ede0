pub mod cache;

use ahash::AHashMap as HashMap;
use std::sync::Arc;

/// A named subscription class. Higher levels are more privileged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub display_name: String,
    pub level: u32,
}

/// Maps group identifiers to tiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TierMapping {
    tiers_by_group: HashMap<String, Vec<Arc<Tier>>>,
    len: usize,
}

/// Provides the current tier mapping.
pub trait TierSource {
    fn tier_mapping(&self) -> Arc<TierMapping>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TierMappingError {
    #[error("tier name must not be empty")]
    EmptyName,

    #[error("duplicate tier name: {0}")]
    DuplicateName(String),

    #[error("tiers {0} and {1} share level {2}")]
    DuplicateLevel(String, String, u32),
}

// === impl TierMapping ===

impl TierMapping {
    /// Builds a mapping from `(tier, groups)` pairs. Tier names and levels
    /// must be unique so that resolution never has to break a tie.
    pub fn new<G>(tiers: impl IntoIterator<Item = (Tier, G)>) -> Result<Self, TierMappingError>
    where
        G: IntoIterator<Item = String>,
    {
        let mut by_name = HashMap::<String, Arc<Tier>>::new();
        let mut by_level = HashMap::<u32, String>::new();
        let mut tiers_by_group = HashMap::<String, Vec<Arc<Tier>>>::new();

        for (tier, groups) in tiers {
            if tier.name.is_empty() {
                return Err(TierMappingError::EmptyName);
            }
            if by_name.contains_key(&tier.name) {
                return Err(TierMappingError::DuplicateName(tier.name));
            }
            if let Some(other) = by_level.get(&tier.level) {
                return Err(TierMappingError::DuplicateLevel(
                    other.clone(),
                    tier.name,
                    tier.level,
                ));
            }
            by_level.insert(tier.level, tier.name.clone());

            let tier = Arc::new(tier);
            by_name.insert(tier.name.clone(), tier.clone());
            for group in groups {
                let tiers = tiers_by_group.entry(group).or_default();
                if !tiers.iter().any(|t| t.name == tier.name) {
                    tiers.push(tier.clone());
                }
            }
        }

        Ok(Self {
            tiers_by_group,
            len: by_name.len(),
        })
    }

    /// Returns the highest-level tier reachable through any of `groups`.
    pub fn resolve<'g>(&self, groups: impl IntoIterator<Item = &'g str>) -> Option<Arc<Tier>> {
        groups
            .into_iter()
            .filter_map(|g| self.tiers_by_group.get(g))
            .flatten()
            .max_by_key(|t| t.level)
            .cloned()
    }

    /// The number of distinct tiers.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
