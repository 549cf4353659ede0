use crate::ResourceId;
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use tokio::time::Duration;

/// Per-object exponential backoff for failed reconciliations.
///
/// The first failure waits `min`; each consecutive failure doubles the delay
/// up to `max`. A successful reconciliation resets the object.
#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempts: Mutex<HashMap<ResourceId, u32>>,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5 * 60))
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempts: Mutex::new(HashMap::default()),
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next(&self, id: &ResourceId) -> Duration {
        let mut attempts = self.attempts.lock();
        let n = attempts.entry(id.clone()).or_default();
        let delay = self
            .min
            .checked_mul(1u32.checked_shl(*n).unwrap_or(u32::MAX))
            .map_or(self.max, |d| d.min(self.max));
        *n = n.saturating_add(1);
        delay
    }

    pub fn reset(&self, id: &ResourceId) {
        self.attempts.lock().remove(id);
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn doubles_to_cap() {
        let backoff = Backoff::default();
        let id = ResourceId::new("ns".to_string(), "model".to_string());
        let delays = (0..12).map(|_| backoff.next(&id).as_secs()).collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300, 300]
        );
    }

    #[test]
    fn reset_restarts_sequence() {
        let backoff = Backoff::default();
        let id = ResourceId::new("ns".to_string(), "model".to_string());
        backoff.next(&id);
        backoff.next(&id);
        backoff.reset(&id);
        assert_eq!(backoff.tracked(), 0);
        assert_eq!(backoff.next(&id), Duration::from_secs(1));
    }

    #[test]
    fn objects_are_independent() {
        let backoff = Backoff::default();
        let a = ResourceId::new("ns".to_string(), "a".to_string());
        let b = ResourceId::new("ns".to_string(), "b".to_string());
        backoff.next(&a);
        backoff.next(&a);
        assert_eq!(backoff.next(&b), Duration::from_secs(1));
        assert_eq!(backoff.next(&a), Duration::from_secs(4));
    }

    #[test]
    fn survives_many_failures() {
        let backoff = Backoff::default();
        let id = ResourceId::new("ns".to_string(), "model".to_string());
        for _ in 0..100 {
            backoff.next(&id);
        }
        assert_eq!(backoff.next(&id), Duration::from_secs(300));
    }
}
