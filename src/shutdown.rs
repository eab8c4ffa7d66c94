//! Process-wide shutdown coordination.
//!
//! Listener loops watch the `stopping` token, and everything they start is
//! spawned on one task tracker so shutdown can wait for it. Relays still
//! running when the grace period ends are told to drop their sockets.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    stopping: CancellationToken,
    abandon: CancellationToken,
    tracker: TaskTracker,
    grace_period: Duration,
    started: AtomicBool,
}

impl Shutdown {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                stopping: CancellationToken::new(),
                abandon: CancellationToken::new(),
                tracker: TaskTracker::new(),
                grace_period,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Cancelled once shutdown is requested; never reset.
    pub fn stopping(&self) -> CancellationToken {
        self.inner.stopping.clone()
    }

    /// A token for one connection pair, cancelled when the grace period runs out.
    pub fn pair_token(&self) -> CancellationToken {
        self.inner.abandon.child_token()
    }

    pub async fn abandoned(&self) {
        self.inner.abandon.cancelled().await
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(task);
    }

    /// Stops every listener, then waits for in-flight work for at most the grace period.
    ///
    /// Returns as soon as all tracked work has finished, so the grace period is an
    /// upper bound on how long shutdown takes, not a fixed delay. Work still running
    /// at the deadline is abandoned.
    ///
    /// Only the first call does anything; later calls return `false` immediately.
    pub async fn request(&self) -> bool {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        let Inner {
            stopping,
            abandon,
            tracker,
            grace_period,
            ..
        } = &*self.inner;

        stopping.cancel();
        tracker.close();
        log::info!(
            "Shutting down: waiting up to {:?} for {} tasks",
            grace_period,
            tracker.len()
        );

        match timeout(*grace_period, tracker.wait()).await {
            Ok(()) => log::info!("Finished all tasks"),
            Err(e) => {
                let _: Elapsed = e;
                log::warn!("Grace period elapsed, abandoning {} tasks", tracker.len());
            }
        }
        abandon.cancel();

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn only_first_request_runs() {
        let shutdown = Shutdown::new(Duration::from_millis(10));
        assert!(!shutdown.stopping().is_cancelled());
        assert!(shutdown.request().await);
        assert!(shutdown.stopping().is_cancelled());
        assert!(!shutdown.clone().request().await);
    }

    #[tokio::test]
    async fn every_observer_sees_stopping() {
        let shutdown = Shutdown::new(Duration::from_millis(10));
        let before = shutdown.stopping();
        let waiters = (0..8)
            .map(|_| {
                let stopping = shutdown.stopping();
                tokio::spawn(async move { stopping.cancelled().await })
            })
            .collect::<Vec<_>>();

        shutdown.request().await;

        for waiter in waiters {
            timeout(WAIT, waiter).await.unwrap().unwrap();
        }
        assert!(before.is_cancelled());
        assert!(shutdown.stopping().is_cancelled());
    }

    #[tokio::test]
    async fn returns_early_when_work_finishes() {
        let shutdown = Shutdown::new(Duration::from_secs(60));
        shutdown.spawn(sleep(Duration::from_millis(50)));

        assert!(timeout(WAIT, shutdown.request()).await.unwrap());
    }

    #[tokio::test]
    async fn abandons_work_after_grace_period() {
        let shutdown = Shutdown::new(Duration::from_millis(100));
        let pair = shutdown.pair_token();
        shutdown.spawn({
            let pair = pair.clone();
            async move { pair.cancelled().await }
        });
        shutdown.spawn(async { sleep(Duration::from_secs(3600)).await });

        assert!(timeout(WAIT, shutdown.request()).await.unwrap());
        assert!(pair.is_cancelled());
        assert!(shutdown.pair_token().is_cancelled());
        timeout(WAIT, shutdown.abandoned()).await.unwrap();
    }
}
