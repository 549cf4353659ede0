use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    cleanups: Family<CleanupLabels, Counter>,
    status_patches: Counter,
    duration: Histogram,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    kind: String,
    phase: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CleanupLabels {
    kind: String,
    result: &'static str,
}

// === impl ControllerMetrics ===

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self {
            reconciles: Family::default(),
            cleanups: Family::default(),
            status_patches: Counter::default(),
            duration: Histogram::new([0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        }
    }
}

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "reconciles",
            "Total number of model reconciliations by backend kind and resulting phase",
            metrics.reconciles.clone(),
        );
        reg.register(
            "cleanups",
            "Total number of model deletion cleanups by backend kind and result",
            metrics.cleanups.clone(),
        );
        reg.register(
            "status_patches",
            "Total number of model status updates written",
            metrics.status_patches.clone(),
        );
        reg.register(
            "reconcile_duration_seconds",
            "Time spent reconciling a model",
            metrics.duration.clone(),
        );
        metrics
    }

    pub(crate) fn reconciled(&self, kind: &str, phase: &'static str, started: time::Instant) {
        self.reconciles
            .get_or_create(&OutcomeLabels {
                kind: kind.to_string(),
                phase,
            })
            .inc();
        self.duration.observe(started.elapsed().as_secs_f64());
    }

    pub(crate) fn cleaned_up(&self, kind: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.cleanups
            .get_or_create(&CleanupLabels {
                kind: kind.to_string(),
                result,
            })
            .inc();
    }

    pub(crate) fn status_patched(&self) {
        self.status_patches.inc();
    }
}
