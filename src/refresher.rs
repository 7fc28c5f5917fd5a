//! Background loop that keeps the local cache in sync with the server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::loader::FeatureFlagLoader;

static SYNC_PERMIT: OnceLock<Arc<Semaphore>> = OnceLock::new();

/// The single permit shared by every refresher in the process.
pub fn process_permit() -> Arc<Semaphore> {
    Arc::clone(SYNC_PERMIT.get_or_init(|| Arc::new(Semaphore::new(1))))
}

/// Outcome of the most recent refresh pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Idle,
    Succeeded { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, message: String },
}

/// Re-runs the loader on a fixed interval.
///
/// A pass holds the permit from the start of the load until the end of the
/// following sleep, so no two passes sharing a permit ever overlap. Failed
/// passes are logged and retried after the normal interval.
pub struct Refresher {
    loader: Arc<dyn FeatureFlagLoader>,
    interval: Duration,
    permit: Arc<Semaphore>,
}

impl Refresher {
    pub fn new(loader: Arc<dyn FeatureFlagLoader>, interval: Duration) -> Self {
        Self {
            loader,
            interval,
            permit: process_permit(),
        }
    }

    /// Scope mutual exclusion to `permit` instead of the process-wide one.
    pub fn with_permit(mut self, permit: Arc<Semaphore>) -> Self {
        self.permit = permit;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until `cancel` fires, publishing each pass outcome on `status`.
    pub async fn run(&self, cancel: CancellationToken, status: watch::Sender<RefreshStatus>) {
        tracing::info!(interval = ?self.interval, "started feature flag refresher");

        while !cancel.is_cancelled() {
            tracing::debug!("waiting for permit to refresh feature flags");
            let _permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.permit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("refresh permit was closed, stopping refresher");
                        break;
                    }
                },
            };

            tracing::info!(at = %Utc::now().to_rfc3339(), "refreshing feature flags from the Grapio server");
            match self.loader.load_flags(&cancel).await {
                Ok(()) => {
                    status.send_replace(RefreshStatus::Succeeded { at: Utc::now() });
                }
                Err(Error::Cancelled) => break,
                Err(e) => {
                    tracing::error!("failed to refresh feature flags: {}", e);
                    status.send_replace(RefreshStatus::Failed {
                        at: Utc::now(),
                        message: e.to_string(),
                    });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
            tracing::debug!("releasing permit after refreshing feature flags");
        }

        tracing::info!("stopped feature flag refresher");
    }

    /// Starts the loop on the Tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> RefresherHandle {
        let (status_tx, status_rx) = watch::channel(RefreshStatus::Idle);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { self.run(task_cancel, status_tx).await });
        RefresherHandle {
            cancel,
            status: status_rx,
            task,
        }
    }
}

/// Running refresher.
pub struct RefresherHandle {
    cancel: CancellationToken,
    status: watch::Receiver<RefreshStatus>,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshStatus> {
        self.status.clone()
    }

    /// Cancels the loop and waits for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct InstrumentedLoader {
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
        failures_left: AtomicUsize,
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl FeatureFlagLoader for InstrumentedLoader {
        async fn load_flags(&self, _cancel: &CancellationToken) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.events.lock().unwrap().push("start");

            tokio::time::sleep(Duration::from_millis(5)).await;

            self.events.lock().unwrap().push("end");
            self.active.fetch_sub(1, Ordering::SeqCst);

            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(Error::SyncFailed {
                    code: tonic::Code::Unavailable,
                    message: "server down".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_refreshers_sharing_a_permit_never_overlap() {
        let loader = Arc::new(InstrumentedLoader::default());
        let permit = Arc::new(Semaphore::new(1));
        let cancel = CancellationToken::new();

        let first = Refresher::new(loader.clone(), Duration::from_millis(1))
            .with_permit(permit.clone())
            .spawn(cancel.child_token());
        let second = Refresher::new(loader.clone(), Duration::from_millis(1))
            .with_permit(permit.clone())
            .spawn(cancel.child_token());

        tokio::time::sleep(Duration::from_millis(150)).await;
        first.stop().await.unwrap();
        second.stop().await.unwrap();

        assert!(loader.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(loader.max_active.load(Ordering::SeqCst), 1);
        let events = loader.events.lock().unwrap();
        for pair in events.chunks(2) {
            assert_eq!(pair, ["start", "end"]);
        }
    }

    #[tokio::test]
    async fn test_failed_pass_does_not_stop_the_loop() {
        let loader = Arc::new(InstrumentedLoader {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let handle = Refresher::new(loader.clone(), Duration::from_millis(1))
            .with_permit(Arc::new(Semaphore::new(1)))
            .spawn(CancellationToken::new());

        let mut status = handle.subscribe();
        let succeeded = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, RefreshStatus::Succeeded { .. })),
        )
        .await
        .is_ok();
        assert!(succeeded);

        handle.stop().await.unwrap();
        assert!(loader.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failure_is_published_as_status() {
        let loader = Arc::new(InstrumentedLoader {
            failures_left: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });
        let handle = Refresher::new(loader, Duration::from_secs(3600))
            .with_permit(Arc::new(Semaphore::new(1)))
            .spawn(CancellationToken::new());

        let mut status = handle.subscribe();
        let failed = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, RefreshStatus::Failed { .. })),
        )
        .await
        .is_ok();
        assert!(failed);

        match handle.status() {
            RefreshStatus::Failed { message, .. } => assert!(message.contains("server down")),
            other => panic!("unexpected status: {other:?}"),
        }
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_interrupts_the_interval_and_releases_the_permit() {
        let loader = Arc::new(InstrumentedLoader::default());
        let permit = Arc::new(Semaphore::new(1));
        let handle = Refresher::new(loader.clone(), Duration::from_secs(3600))
            .with_permit(permit.clone())
            .spawn(CancellationToken::new());

        while loader.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let stopped = tokio::time::timeout(Duration::from_secs(5), handle.stop()).await;
        assert!(stopped.is_ok());
        assert_eq!(permit.available_permits(), 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_permit_is_process_wide() {
        assert!(Arc::ptr_eq(&process_permit(), &process_permit()));
    }
}
