//! One-shot release of collaborator handles.
//!
//! Every stage keeps its collaborator handle inside a [`StageHandle`]. The
//! handle can be closed from the stage itself (for example when the inbound
//! audio ends) and from the [`SessionCleanup`] coordinator when the session is
//! torn down. Whichever comes first performs the release; all later calls are
//! no-ops.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Upper bound on a single collaborator release.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(3);

/// The three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingest,
    Dialog,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "ingest"),
            Stage::Dialog => write!(f, "dialog"),
            Stage::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// A collaborator resource that must be released when its stage ends.
#[async_trait]
pub trait Release: Send {
    async fn release(&mut self) -> Result<()>;
}

/// A stage's collaborator handle plus its connected and closed flags.
pub struct StageHandle<R> {
    stage: Stage,
    resource: Mutex<R>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl<R: Release> StageHandle<R> {
    pub fn new(stage: Stage, resource: R) -> Arc<Self> {
        Arc::new(Self {
            stage,
            resource: Mutex::new(resource),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// False once the collaborator has failed or been closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the collaborator degraded. Further I/O on it is skipped.
    pub fn mark_degraded(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!(stage = %self.stage, "Collaborator degraded; further I/O on it is skipped.");
        }
    }

    /// Locks the resource for I/O. Returns `None` once the handle is closed.
    pub async fn lock(&self) -> Option<MutexGuard<'_, R>> {
        if self.is_closed() {
            return None;
        }
        let guard = self.resource.lock().await;
        // The handle may have been closed while we waited for the lock.
        if self.is_closed() { None } else { Some(guard) }
    }

    /// Releases the resource. Returns true only for the call that actually
    /// performed the release.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!(stage = %self.stage, "Stage already closed.");
            return false;
        }
        self.connected.store(false, Ordering::Release);

        let mut resource = self.resource.lock().await;
        match tokio::time::timeout(RELEASE_TIMEOUT, resource.release()).await {
            Ok(Ok(())) => info!(stage = %self.stage, "Stage closed."),
            Ok(Err(e)) => warn!(stage = %self.stage, error = ?e, "Stage close reported an error."),
            Err(_) => warn!(stage = %self.stage, "Stage close timed out."),
        }
        true
    }
}

/// Type-erased view of a [`StageHandle`] used by the cleanup coordinator.
#[async_trait]
pub trait Closer: Send + Sync {
    fn stage(&self) -> Stage;
    async fn close(&self) -> bool;
}

#[async_trait]
impl<R: Release + 'static> Closer for StageHandle<R> {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn close(&self) -> bool {
        StageHandle::<R>::close(self).await
    }
}

/// Closes every registered stage exactly once when the session ends.
///
/// If the coordinator is dropped before [`SessionCleanup::close_all`] ran
/// (for example because the session future was aborted), the remaining
/// closes are spawned onto the current runtime.
#[derive(Default)]
pub struct SessionCleanup {
    handles: Vec<Arc<dyn Closer>>,
}

impl SessionCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: Arc<dyn Closer>) {
        self.handles.push(handle);
    }

    /// Closes all stages. Returns how many were closed by this call.
    pub async fn close_all(mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        let mut closed = 0;
        for handle in handles {
            if handle.close().await {
                closed += 1;
            }
        }
        closed
    }
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for handle in handles {
                        handle.close().await;
                    }
                });
            }
            Err(_) => warn!(
                pending = handles.len(),
                "Session cleanup dropped outside a runtime; stages left open."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counted(Arc<AtomicUsize>);

    #[async_trait]
    impl Release for Counted {
        async fn release(&mut self) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_closes_release_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = StageHandle::new(Stage::Ingest, Counted(count.clone()));

        let (a, b, c) = tokio::join!(handle.close(), handle.close(), handle.close());

        assert_eq!([a, b, c].iter().filter(|closed| **closed).count(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_closed());
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn lock_is_refused_after_close() {
        let handle = StageHandle::new(Stage::Synthesis, Counted(Arc::new(AtomicUsize::new(0))));
        assert!(handle.lock().await.is_some());
        handle.close().await;
        assert!(handle.lock().await.is_none());
    }

    #[tokio::test]
    async fn cleanup_skips_stages_closed_by_themselves() {
        let counts: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let ingest = StageHandle::new(Stage::Ingest, Counted(counts[0].clone()));
        let dialog = StageHandle::new(Stage::Dialog, Counted(counts[1].clone()));
        let synthesis = StageHandle::new(Stage::Synthesis, Counted(counts[2].clone()));

        let mut cleanup = SessionCleanup::new();
        cleanup.register(ingest.clone());
        cleanup.register(dialog);
        cleanup.register(synthesis);

        ingest.close().await;
        assert_eq!(cleanup.close_all().await, 2);
        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn dropped_cleanup_still_closes() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = StageHandle::new(Stage::Dialog, Counted(count.clone()));
        {
            let mut cleanup = SessionCleanup::new();
            cleanup.register(handle.clone());
        }
        for _ in 0..50 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_closed());
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Ingest.to_string(), "ingest");
        assert_eq!(Stage::Dialog.to_string(), "dialog");
        assert_eq!(Stage::Synthesis.to_string(), "synthesis");
    }
}
