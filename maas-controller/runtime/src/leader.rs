use crate::{
    k8s::{Api, LlmInferenceService, MaaSModel},
    reconcile,
};
use futures::prelude::*;
use kubert::lease::Claim;
use std::sync::Arc;
use tokio::{
    sync::{oneshot, watch},
    time,
};
use tracing::{debug, info};

/// Runs the model reconciler whenever this replica holds the write Lease.
///
/// The reconciler is stopped when the claim is lost and restarted if it is
/// regained. Decisions are served by every replica regardless.
pub(crate) struct Reconciler {
    pub ctx: Arc<reconcile::Context>,
    pub models: Api<MaaSModel>,
    pub inference_services: Option<Api<LlmInferenceService>>,
    pub concurrency: u16,
}

impl Reconciler {
    pub(crate) async fn run(
        self,
        mut claims: watch::Receiver<Arc<Claim>>,
        hostname: String,
        drain: drain::Watch,
    ) {
        loop {
            tokio::select! {
                held = acquired(&mut claims, &hostname) => {
                    if !held {
                        debug!("Lease claims closed");
                        return;
                    }
                }
                _ = drain.clone().signaled() => return,
            }

            info!(%hostname, "Acquired write lease; starting reconciler");
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let controller = reconcile::run(
                self.ctx.clone(),
                self.models.clone(),
                self.inference_services.clone(),
                self.concurrency,
                stop_rx.map(|_| ()),
            );
            tokio::pin!(controller);

            tokio::select! {
                () = &mut controller => return,
                () = lost(&mut claims, &hostname) => {
                    info!(%hostname, "Lost write lease; stopping reconciler");
                    let _ = stop_tx.send(());
                    controller.await;
                }
                release = drain.clone().signaled() => {
                    let _ = stop_tx.send(());
                    release.release_after(controller).await;
                    return;
                }
            }
        }
    }
}

/// Waits until `hostname` holds the claim. Returns false if the claim
/// channel closes first.
async fn acquired(claims: &mut watch::Receiver<Arc<Claim>>, hostname: &str) -> bool {
    loop {
        if claims.borrow_and_update().is_current_for(hostname) {
            return true;
        }
        if claims.changed().await.is_err() {
            return false;
        }
    }
}

/// Completes once `hostname` no longer holds a current claim.
async fn lost(claims: &mut watch::Receiver<Arc<Claim>>, hostname: &str) {
    loop {
        let claim = claims.borrow_and_update().clone();
        if !claim.is_current_for(hostname) {
            return;
        }
        let remaining = (claim.expiry - chrono::Utc::now())
            .to_std()
            .unwrap_or_default();
        tokio::select! {
            res = claims.changed() => {
                if res.is_err() {
                    return;
                }
            }
            _ = time::sleep(remaining) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(holder: &str, expiry: chrono::DateTime<chrono::Utc>) -> Arc<Claim> {
        Arc::new(Claim {
            holder: holder.to_string(),
            expiry,
        })
    }

    #[tokio::test]
    async fn acquires_when_claimed() {
        let (tx, mut rx) = watch::channel(claim("other", chrono::DateTime::<chrono::Utc>::MAX_UTC));
        let task = tokio::spawn(async move { acquired(&mut rx, "me").await });
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        tx.send(claim("me", chrono::DateTime::<chrono::Utc>::MAX_UTC))
            .expect("receiver must be live");
        assert!(task.await.expect("task must not panic"));
    }

    #[tokio::test]
    async fn acquire_fails_when_closed() {
        let (tx, mut rx) = watch::channel(claim("other", chrono::DateTime::<chrono::Utc>::MAX_UTC));
        drop(tx);
        assert!(!acquired(&mut rx, "me").await);
    }

    #[tokio::test]
    async fn lost_when_claimed_by_another() {
        let (tx, mut rx) = watch::channel(claim("me", chrono::DateTime::<chrono::Utc>::MAX_UTC));
        let task = tokio::spawn(async move { lost(&mut rx, "me").await });
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        tx.send(claim("other", chrono::DateTime::<chrono::Utc>::MAX_UTC))
            .expect("receiver must be live");
        task.await.expect("task must not panic");
    }

    #[tokio::test]
    async fn lost_when_expired() {
        let (_tx, mut rx) = watch::channel(claim("me", chrono::DateTime::<chrono::Utc>::MIN_UTC));
        lost(&mut rx, "me").await;
    }
}
