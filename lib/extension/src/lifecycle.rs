//! Offscreen document lifecycle.
//!
//! The platform allows one offscreen document at a time, and creating a
//! second one while the first is still being created fails. The lifecycle
//! is a three-state machine held behind one async mutex:
//!
//! ```text
//! Absent ──acquire──▶ Pending { creation, users } ──created──▶ Live { document, users }
//!    ▲                    │ failed / abandoned                     │ last release / teardown
//!    └────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! A caller arriving while a creation is in flight joins that creation
//! instead of starting another. Each state carries a generation number so a
//! caller that joined a creation which was torn down before finishing can
//! tell its document is gone.
//!
//! Creation runs on its own task, and every registered user is accounted
//! for even when the caller's future is dropped: a dropped
//! [`OffscreenLease`] releases itself, and a caller cancelled while waiting
//! for creation gives its place back.

use crate::platform::{OffscreenDocument, OffscreenPlatform};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use identity_relay_protocol::LifecycleError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Creation = Shared<BoxFuture<'static, Result<Arc<dyn OffscreenDocument>, LifecycleError>>>;

enum Slot {
    Absent,
    Pending {
        generation: u64,
        creation: Creation,
        users: usize,
    },
    Live {
        generation: u64,
        document: Arc<dyn OffscreenDocument>,
        users: usize,
    },
}

type SharedSlot = Arc<Mutex<Slot>>;

/// A document handed out by [`OffscreenLifecycle::acquire`].
///
/// Give it back through [`OffscreenLifecycle::release`]. A lease dropped
/// without being released is released on a background task.
pub struct OffscreenLease {
    generation: u64,
    document: Arc<dyn OffscreenDocument>,
    slot: Option<SharedSlot>,
}

impl OffscreenLease {
    /// Returns the leased document.
    #[must_use]
    pub fn document(&self) -> &Arc<dyn OffscreenDocument> {
        &self.document
    }
}

impl Drop for OffscreenLease {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let generation = self.generation;
        let document = Arc::clone(&self.document);
        spawn_cleanup("release dropped lease", async move {
            if let Err(e) = release_user(&slot, generation, &document).await {
                warn!(error = %e, "failed to close offscreen document");
            }
        });
    }
}

/// Registration of a caller waiting on a creation in flight.
///
/// Gives the user back if dropped before [`disarm`](Self::disarm).
struct Waiter {
    slot: SharedSlot,
    generation: u64,
    creation: Creation,
    user: usize,
    armed: bool,
}

impl Waiter {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.armed || self.user == 0 {
            return;
        }
        let slot = Arc::clone(&self.slot);
        let generation = self.generation;
        let creation = self.creation.clone();
        let user = self.user;
        spawn_cleanup("abandon offscreen creation", async move {
            abandon(slot, generation, creation, user).await;
        });
    }
}

/// Owner of the single offscreen document.
pub struct OffscreenLifecycle<P> {
    platform: Arc<P>,
    slot: SharedSlot,
    next_generation: AtomicU64,
    creations: AtomicUsize,
}

impl<P: OffscreenPlatform> OffscreenLifecycle<P> {
    /// Creates a lifecycle with no document.
    #[must_use]
    pub fn new(platform: P) -> Self {
        Self {
            platform: Arc::new(platform),
            slot: Arc::new(Mutex::new(Slot::Absent)),
            next_generation: AtomicU64::new(1),
            creations: AtomicUsize::new(0),
        }
    }

    /// Returns the live document, creating it if needed.
    ///
    /// Does not register the caller as a user; the document stays until
    /// [`teardown`](Self::teardown) or the last lease is released.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::CreateFailed` if creation fails, and
    /// `LifecycleError::DocumentClosed` if the document was torn down while
    /// this caller was waiting for it.
    pub async fn ensure(&self) -> Result<Arc<dyn OffscreenDocument>, LifecycleError> {
        self.obtain(0).await.map(|(_, document)| document)
    }

    /// Returns the live document and registers the caller as a user.
    ///
    /// # Errors
    ///
    /// See [`ensure`](Self::ensure).
    pub async fn acquire(&self) -> Result<OffscreenLease, LifecycleError> {
        let (generation, document) = self.obtain(1).await?;
        Ok(OffscreenLease {
            generation,
            document,
            slot: Some(Arc::clone(&self.slot)),
        })
    }

    /// Gives back a lease. Closes the document when its last user leaves.
    ///
    /// Releasing a lease whose document was already torn down does nothing.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::CloseFailed` if closing fails; the document
    /// is forgotten either way.
    pub async fn release(&self, mut lease: OffscreenLease) -> Result<(), LifecycleError> {
        let Some(slot) = lease.slot.clone() else {
            return Ok(());
        };
        let result = release_user(&slot, lease.generation, &lease.document).await;
        lease.slot = None;
        result
    }

    /// Closes the document unconditionally. Does nothing if there is none.
    ///
    /// A creation in flight is awaited and its document closed. Callers
    /// waiting on that creation get `LifecycleError::DocumentClosed`.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::CloseFailed` if closing fails.
    pub async fn teardown(&self) -> Result<(), LifecycleError> {
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, Slot::Absent) {
            Slot::Absent => Ok(()),
            Slot::Pending {
                generation,
                creation,
                ..
            } => match creation.await {
                Ok(document) => {
                    info!(generation, "closing offscreen document created during teardown");
                    document.close().await
                }
                Err(_) => Ok(()),
            },
            Slot::Live {
                generation,
                document,
                ..
            } => {
                info!(generation, "tearing down offscreen document");
                document.close().await
            }
        }
    }

    /// Returns true if a document is live.
    pub async fn is_live(&self) -> bool {
        matches!(*self.slot.lock().await, Slot::Live { .. })
    }

    /// Number of documents created so far.
    #[must_use]
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    async fn obtain(
        &self,
        user: usize,
    ) -> Result<(u64, Arc<dyn OffscreenDocument>), LifecycleError> {
        let (generation, creation) = {
            let mut slot = self.slot.lock().await;
            match &mut *slot {
                Slot::Live {
                    generation,
                    document,
                    users,
                } => {
                    *users += user;
                    return Ok((*generation, Arc::clone(document)));
                }
                Slot::Pending {
                    generation,
                    creation,
                    users,
                } => {
                    debug!(generation = *generation, "joining offscreen creation in flight");
                    *users += user;
                    (*generation, creation.clone())
                }
                Slot::Absent => {
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    self.creations.fetch_add(1, Ordering::SeqCst);
                    let creation = self.start_creation();
                    debug!(generation, "creating offscreen document");
                    *slot = Slot::Pending {
                        generation,
                        creation: creation.clone(),
                        users: user,
                    };
                    (generation, creation)
                }
            }
        };
        let mut waiter = Waiter {
            slot: Arc::clone(&self.slot),
            generation,
            creation: creation.clone(),
            user,
            armed: true,
        };

        let result = creation.await;

        let mut slot = self.slot.lock().await;
        waiter.disarm();
        match result {
            Ok(document) => match &mut *slot {
                Slot::Pending {
                    generation: current,
                    users,
                    ..
                } if *current == generation => {
                    let users = *users;
                    *slot = Slot::Live {
                        generation,
                        document: Arc::clone(&document),
                        users,
                    };
                    Ok((generation, document))
                }
                Slot::Live {
                    generation: current,
                    document: live,
                    ..
                } if *current == generation => Ok((generation, Arc::clone(live))),
                _ => Err(LifecycleError::DocumentClosed),
            },
            Err(e) => {
                if matches!(&*slot, Slot::Pending { generation: current, .. } if *current == generation)
                {
                    warn!(generation, error = %e, "offscreen document creation failed");
                    *slot = Slot::Absent;
                }
                Err(e)
            }
        }
    }

    fn start_creation(&self) -> Creation {
        let platform = Arc::clone(&self.platform);
        let task = tokio::spawn(async move { platform.create_document().await });
        async move {
            task.await.unwrap_or_else(|e| {
                Err(LifecycleError::CreateFailed {
                    reason: e.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }
}

async fn release_user(
    slot: &Mutex<Slot>,
    generation: u64,
    document: &Arc<dyn OffscreenDocument>,
) -> Result<(), LifecycleError> {
    let mut slot = slot.lock().await;
    let Slot::Live {
        generation: current,
        users,
        ..
    } = &mut *slot
    else {
        return Ok(());
    };
    if *current != generation {
        return Ok(());
    }
    *users = users.saturating_sub(1);
    if *users > 0 {
        debug!(users = *users, "offscreen document still in use");
        return Ok(());
    }
    *slot = Slot::Absent;
    info!(generation, "closing offscreen document after last use");
    document.close().await
}

/// Gives back the place of a caller that stopped waiting for a creation.
async fn abandon(slot: SharedSlot, generation: u64, creation: Creation, user: usize) {
    let live = {
        let mut guard = slot.lock().await;
        match &mut *guard {
            Slot::Pending {
                generation: current,
                users,
                ..
            } if *current == generation => {
                *users = users.saturating_sub(user);
                if *users > 0 {
                    return;
                }
                None
            }
            Slot::Live {
                generation: current,
                document,
                ..
            } if *current == generation => Some(Arc::clone(document)),
            _ => return,
        }
    };
    if let Some(document) = live {
        if let Err(e) = release_user(&slot, generation, &document).await {
            warn!(error = %e, "failed to close offscreen document");
        }
        return;
    }

    let result = creation.await;
    let mut guard = slot.lock().await;
    let unused = matches!(
        &*guard,
        Slot::Pending { generation: current, users: 0, .. } if *current == generation
    );
    if !unused {
        return;
    }
    *guard = Slot::Absent;
    if let Ok(document) = result {
        info!(generation, "closing offscreen document nobody waited for");
        if let Err(e) = document.close().await {
            warn!(error = %e, "failed to close offscreen document");
        }
    }
}

fn spawn_cleanup(task: &'static str, cleanup: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(cleanup);
        }
        Err(e) => warn!(task, error = %e, "no runtime for offscreen cleanup"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use identity_relay_protocol::{RelayRequest, RelayResponse};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingDocument {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl OffscreenDocument for CountingDocument {
        async fn forward(&self, _request: RelayRequest) -> RelayResponse {
            RelayResponse::SignedOut
        }

        async fn close(&self) -> Result<(), LifecycleError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct SlowPlatform {
        created: Mutex<Vec<Arc<CountingDocument>>>,
        fail: AtomicBool,
    }

    impl SlowPlatform {
        async fn total_closes(&self) -> usize {
            self.created
                .lock()
                .await
                .iter()
                .map(|doc| doc.closes.load(Ordering::SeqCst))
                .sum()
        }
    }

    #[async_trait]
    impl OffscreenPlatform for Arc<SlowPlatform> {
        async fn create_document(&self) -> Result<Arc<dyn OffscreenDocument>, LifecycleError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(LifecycleError::CreateFailed {
                    reason: "only a single offscreen document may be created".to_string(),
                });
            }
            let document = Arc::new(CountingDocument::default());
            self.created.lock().await.push(Arc::clone(&document));
            Ok(document)
        }
    }

    fn lifecycle() -> (Arc<SlowPlatform>, Arc<OffscreenLifecycle<Arc<SlowPlatform>>>) {
        let platform = Arc::new(SlowPlatform::default());
        let lifecycle = Arc::new(OffscreenLifecycle::new(Arc::clone(&platform)));
        (platform, lifecycle)
    }

    #[tokio::test]
    async fn concurrent_ensure_creates_once() {
        let (platform, lifecycle) = lifecycle();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.ensure().await })
            })
            .collect();
        let mut documents = Vec::new();
        for handle in handles {
            documents.push(handle.await.expect("join").expect("ensure"));
        }

        assert_eq!(lifecycle.creations(), 1);
        assert_eq!(platform.created.lock().await.len(), 1);
        assert!(documents.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(lifecycle.is_live().await);
    }

    #[tokio::test]
    async fn ensure_returns_live_document() {
        let (_platform, lifecycle) = lifecycle();
        let first = lifecycle.ensure().await.expect("ensure");
        let second = lifecycle.ensure().await.expect("ensure");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lifecycle.creations(), 1);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let (platform, lifecycle) = lifecycle();
        lifecycle.teardown().await.expect("teardown when absent");

        lifecycle.ensure().await.expect("ensure");
        lifecycle.teardown().await.expect("teardown");
        lifecycle.teardown().await.expect("teardown again");

        assert!(!lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 1);
    }

    #[tokio::test]
    async fn last_release_closes() {
        let (platform, lifecycle) = lifecycle();
        let first = lifecycle.acquire().await.expect("acquire");
        let second = lifecycle.acquire().await.expect("acquire");

        lifecycle.release(first).await.expect("release");
        assert!(lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 0);

        lifecycle.release(second).await.expect("release");
        assert!(!lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 1);

        let third = lifecycle.acquire().await.expect("acquire after close");
        assert_eq!(lifecycle.creations(), 2);
        lifecycle.release(third).await.expect("release");
    }

    #[tokio::test]
    async fn concurrent_acquire_shares_document_until_both_release() {
        let (platform, lifecycle) = lifecycle();
        let a = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.acquire().await }
        });
        let b = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.acquire().await }
        });
        let a = a.await.expect("join").expect("acquire");
        let b = b.await.expect("join").expect("acquire");
        assert!(Arc::ptr_eq(a.document(), b.document()));
        assert_eq!(lifecycle.creations(), 1);

        lifecycle.release(a).await.expect("release");
        assert_eq!(platform.total_closes().await, 0);
        lifecycle.release(b).await.expect("release");
        assert_eq!(platform.total_closes().await, 1);
    }

    #[tokio::test]
    async fn teardown_during_creation_closes_new_document() {
        let (platform, lifecycle) = lifecycle();
        let waiter = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        lifecycle.teardown().await.expect("teardown");
        let result = waiter.await.expect("join");
        assert!(matches!(result, Err(LifecycleError::DocumentClosed)));
        assert!(!lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 1);
    }

    #[tokio::test]
    async fn failed_creation_resets_to_absent() {
        let (platform, lifecycle) = lifecycle();
        platform.fail.store(true, Ordering::SeqCst);

        let err = lifecycle.acquire().await.err().expect("creation fails");
        assert_eq!(err.code(), "lifecycle/create-failed");
        assert!(!lifecycle.is_live().await);

        platform.fail.store(false, Ordering::SeqCst);
        let lease = lifecycle.acquire().await.expect("retry");
        assert_eq!(lifecycle.creations(), 2);
        lifecycle.release(lease).await.expect("release");
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn dropped_lease_is_released() {
        let (platform, lifecycle) = lifecycle();
        let lease = lifecycle.acquire().await.expect("acquire");
        drop(lease);

        settle().await;
        assert!(!lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 1);
    }

    #[tokio::test]
    async fn cancelled_acquire_gives_back_its_place() {
        let (platform, lifecycle) = lifecycle();
        let cancelled = tokio::time::timeout(Duration::from_millis(5), lifecycle.acquire()).await;
        assert!(cancelled.is_err());

        settle().await;
        assert!(!lifecycle.is_live().await);
        assert_eq!(lifecycle.creations(), 1);
        assert_eq!(platform.total_closes().await, 1);

        let lease = lifecycle.acquire().await.expect("acquire");
        assert_eq!(lifecycle.creations(), 2);
        lifecycle.release(lease).await.expect("release");
        assert_eq!(platform.total_closes().await, 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_other_users_alone() {
        let (platform, lifecycle) = lifecycle();
        let kept = tokio::spawn({
            let lifecycle = Arc::clone(&lifecycle);
            async move { lifecycle.acquire().await }
        });
        let cancelled = tokio::time::timeout(Duration::from_millis(5), lifecycle.acquire()).await;
        assert!(cancelled.is_err());

        let kept = kept.await.expect("join").expect("acquire");
        settle().await;
        assert!(lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 0);

        lifecycle.release(kept).await.expect("release");
        assert!(!lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 1);
        assert_eq!(lifecycle.creations(), 1);
    }

    #[tokio::test]
    async fn stale_release_is_ignored() {
        let (platform, lifecycle) = lifecycle();
        let lease = lifecycle.acquire().await.expect("acquire");
        lifecycle.teardown().await.expect("teardown");
        let fresh = lifecycle.acquire().await.expect("acquire");

        lifecycle.release(lease).await.expect("stale release");
        assert!(lifecycle.is_live().await);
        assert_eq!(platform.total_closes().await, 1);
        lifecycle.release(fresh).await.expect("release");
    }
}
