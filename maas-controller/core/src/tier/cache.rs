use super::{Tier, TierSource};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};

/// How long a resolved tier is reused before the mapping is consulted again.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// The most identities cached at once. A full cache drops expired entries
/// first, then the entry closest to expiry.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Identifies a caller for caching purposes: its sorted, de-duplicated groups.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey(Arc<[String]>);

/// Resolves group sets to tiers, caching results per identity.
///
/// Entries are replaced whole, so a reader racing a refresh sees either the
/// previous resolution or the new one.
#[derive(Debug)]
pub struct TierResolver<S> {
    source: S,
    ttl: Duration,
    capacity: usize,
    cache: RwLock<HashMap<GroupKey, Entry>>,
}

#[derive(Clone, Debug)]
struct Entry {
    tier: Option<Arc<Tier>>,
    expires_at: Instant,
}

// === impl GroupKey ===

impl GroupKey {
    pub fn new<S: AsRef<str>>(groups: impl IntoIterator<Item = S>) -> Self {
        let mut groups = groups
            .into_iter()
            .map(|g| g.as_ref().to_string())
            .collect::<Vec<_>>();
        groups.sort_unstable();
        groups.dedup();
        Self(groups.into())
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

// === impl TierResolver ===

impl<S: TierSource> TierResolver<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            capacity: DEFAULT_CACHE_CAPACITY,
            cache: Default::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn resolve(&self, key: &GroupKey) -> Option<Arc<Tier>> {
        let now = Instant::now();
        if let Some(entry) = self.cache.read().get(key) {
            if entry.expires_at > now {
                tracing::trace!(groups = ?key.0, "Tier cache hit");
                return entry.tier.clone();
            }
        }

        let tier = self.source.tier_mapping().resolve(key.groups());
        tracing::debug!(groups = ?key.0, tier = ?tier.as_ref().map(|t| &t.name), "Resolved tier");

        let mut cache = self.cache.write();
        if cache.len() >= self.capacity && !cache.contains_key(key) {
            cache.retain(|_, e| e.expires_at > now);
            while cache.len() >= self.capacity {
                let Some(oldest) = cache
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                tracing::debug!(groups = ?oldest.0, "Evicting cached tier");
                cache.remove(&oldest);
            }
        }
        cache.insert(
            key.clone(),
            Entry {
                tier: tier.clone(),
                expires_at: now + self.ttl,
            },
        );
        tier
    }

    /// The number of cached identities, including expired ones.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    pub fn ttl(&self) -> time::Duration {
        self.ttl
    }
}
