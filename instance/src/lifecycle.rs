//! Instance lifecycle.
//!
//! ```text
//! Uninitialized -> Initializing -> Bootstrapping -> Ready <-> Syncing
//!                               \-> Adopting ----/
//! ```
//!
//! Startup opens the engine and makes sure the table exists. If the shared
//! store already holds a snapshot the instance adopts it before becoming
//! ready; otherwise it seeds the store from whatever it has locally. Once
//! ready it listens on the change channel and reconciles after each
//! notification.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tabsync_engine::ChangeNotification;
use tokio::sync::{broadcast, watch};

use crate::config::SyncConfig;
use crate::coordinator::{ReconcileOutcome, Statement, SyncCoordinator, SyncGuard};
use crate::engine::{LocalEngine, QueryRow, SqliteEngine};
use crate::error::{Notice, Result, SyncError};
use crate::notifier::{ChangeNotifier, ChannelHub, Subscription};
use crate::store::{KeyValueStore, SnapshotStore};

/// Where an instance is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Uninitialized,
    Initializing,
    /// No shared snapshot existed; seeding it from local state
    Bootstrapping,
    /// Adopting the shared snapshot before first use
    Adopting,
    Ready,
    /// Ready, with a reconcile running
    Syncing,
    /// Startup failed; `start` may be retried
    Failed,
    Closed,
}

impl Phase {
    /// Whether queries are accepted.
    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Syncing)
    }

    /// Whether startup is still under way.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            Phase::Uninitialized | Phase::Initializing | Phase::Bootstrapping | Phase::Adopting
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Initializing => "initializing",
            Phase::Bootstrapping => "bootstrapping",
            Phase::Adopting => "adopting",
            Phase::Ready => "ready",
            Phase::Syncing => "syncing",
            Phase::Failed => "failed",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events an instance reports to its own UI.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    /// Another instance changed shared state and this one has caught up.
    Changed(ChangeNotification),
    /// Something failed in the background.
    SyncFailed(Notice),
}

/// One isolated database instance kept consistent with its peers.
///
/// Cheap to clone; clones share the same instance.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    settle_delay: Duration,
    coordinator: SyncCoordinator,
    notifier: Arc<ChangeNotifier>,
    phase: watch::Sender<Phase>,
    events: broadcast::Sender<LocalEvent>,
    subscription: Mutex<Option<Subscription>>,
}

impl Instance {
    /// Create an instance without starting it.
    ///
    /// The instance joins the change channel immediately; notifications that
    /// arrive before it is ready are handled once it is.
    pub fn new(
        config: SyncConfig,
        engine: Arc<dyn LocalEngine>,
        kv: Arc<dyn KeyValueStore>,
        hub: Arc<ChannelHub>,
    ) -> Self {
        let notifier = Arc::new(ChangeNotifier::join(hub, config.channel_name.clone()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (phase, _) = watch::channel(Phase::Uninitialized);

        let coordinator = SyncCoordinator::new(
            engine,
            SnapshotStore::new(kv, config.snapshot_keys()),
            notifier.clone(),
            config.table.clone(),
            events.clone(),
        );

        Self {
            inner: Arc::new(InstanceInner {
                settle_delay: config.settle_delay,
                coordinator,
                notifier,
                phase,
                events,
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Open a SQLite-backed instance from `config` and start it.
    pub async fn open(
        config: SyncConfig,
        kv: Arc<dyn KeyValueStore>,
        hub: Arc<ChannelHub>,
    ) -> Result<Self> {
        let engine = SqliteEngine::connect(&config.database_url, config.table.clone()).await?;
        let instance = Self::new(config, Arc::new(engine), kv, hub);
        instance.start().await?;
        Ok(instance)
    }

    /// Run startup: ensure the table, adopt or seed, then listen.
    ///
    /// Does nothing unless the instance is uninitialized or a previous start
    /// failed. On failure the phase becomes [`Phase::Failed`].
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;

        let claimed = inner.phase.send_if_modified(|phase| match *phase {
            Phase::Uninitialized | Phase::Failed => {
                *phase = Phase::Initializing;
                true
            }
            _ => false,
        });
        if !claimed {
            return Ok(());
        }

        tracing::info!(member_id = %inner.notifier.member_id(), "Instance starting");

        match self.bootstrap().await {
            Ok(()) => {
                // close() may have run while starting up
                if inner.phase() != Phase::Closed {
                    inner.set_phase(Phase::Ready);
                    self.listen();
                    tracing::info!(member_id = %inner.notifier.member_id(), "Instance ready");
                }
                Ok(())
            }
            Err(e) => {
                if inner.phase() != Phase::Closed {
                    inner.set_phase(Phase::Failed);
                }
                inner.emit(LocalEvent::SyncFailed(e.notice()));
                Err(e)
            }
        }
    }

    async fn bootstrap(&self) -> Result<()> {
        let inner = &self.inner;
        let coordinator = &inner.coordinator;

        coordinator.engine().ensure_schema().await?;

        if coordinator.snapshots().has_snapshot()? {
            inner.set_phase(Phase::Adopting);
            let outcome = coordinator.reconcile().await?;
            tracing::debug!(outcome = ?outcome, "Startup reconcile finished");
        } else {
            inner.set_phase(Phase::Bootstrapping);
            coordinator.seed_from_local().await?;
        }

        Ok(())
    }

    fn listen(&self) {
        let weak = Arc::downgrade(&self.inner);
        let settle_delay = self.inner.settle_delay;

        let subscription = self.inner.notifier.subscribe(move |notification| {
            let weak = weak.clone();
            async move {
                tokio::time::sleep(settle_delay).await;
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.on_notification(notification).await;
                }
            }
        });

        if let Some(subscription) = subscription {
            *self.inner.subscription.lock() = Some(subscription);
        }
    }

    /// Run a statement. Mutations are propagated to the other instances.
    ///
    /// Fails fast with [`SyncError::NotReady`] until startup has finished;
    /// nothing is queued.
    pub async fn execute_query(&self, statement: impl Into<Statement>) -> Result<Vec<QueryRow>> {
        if !self.is_ready() {
            return Err(SyncError::NotReady);
        }

        let statement = statement.into();
        self.inner.coordinator.apply_mutation(&statement).await
    }

    /// Reconcile with the shared store now.
    ///
    /// Returns [`ReconcileOutcome::Skipped`] if a reconcile is already
    /// running.
    pub async fn sync_now(&self) -> Result<ReconcileOutcome> {
        if !self.is_ready() {
            return Err(SyncError::NotReady);
        }

        let Some(guard) = self.inner.coordinator.try_begin_sync() else {
            return Ok(ReconcileOutcome::Skipped);
        };

        let result = self.inner.reconcile_with(&guard).await;
        if let Err(e) = &result {
            self.inner.emit(LocalEvent::SyncFailed(e.notice()));
        }
        result
    }

    /// Whether queries are accepted.
    pub fn is_ready(&self) -> bool {
        self.phase().is_ready()
    }

    /// Whether startup is still under way.
    pub fn is_loading(&self) -> bool {
        self.phase().is_loading()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// Watch phase changes.
    pub fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Subscribe to local events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LocalEvent> {
        self.inner.events.subscribe()
    }

    /// Member id on the change channel.
    pub fn member_id(&self) -> &str {
        self.inner.notifier.member_id()
    }

    /// The coordinator driving this instance.
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }

    /// Stop listening, leave the channel and release the engine.
    pub async fn close(&self) {
        let previous = self.inner.phase.send_replace(Phase::Closed);
        if previous == Phase::Closed {
            return;
        }

        let subscription = self.inner.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.inner.notifier.close();
        self.inner.coordinator.engine().close().await;

        tracing::info!(member_id = %self.inner.notifier.member_id(), "Instance closed");
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("member_id", &self.member_id())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl InstanceInner {
    fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Phase changed");
        }
    }

    fn emit(&self, event: LocalEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Reconcile under `guard`, showing [`Phase::Syncing`] while it runs.
    async fn reconcile_with(&self, guard: &SyncGuard<'_>) -> Result<ReconcileOutcome> {
        let entered = self.phase.send_if_modified(|phase| {
            if *phase == Phase::Ready {
                *phase = Phase::Syncing;
                true
            } else {
                false
            }
        });
        if !entered {
            return Err(SyncError::NotReady);
        }

        let result = self.coordinator.reconcile_locked(guard).await;

        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Syncing {
                *phase = Phase::Ready;
                true
            } else {
                false
            }
        });

        result
    }

    async fn on_notification(&self, notification: ChangeNotification) {
        if !self.phase().is_ready() {
            tracing::debug!(phase = %self.phase(), "Notification ignored, instance not ready");
            return;
        }

        let Some(guard) = self.coordinator.try_begin_sync() else {
            tracing::debug!(
                table = %notification.table,
                "Reconcile already in flight, dropping notification"
            );
            return;
        };

        match self.reconcile_with(&guard).await {
            Ok(ReconcileOutcome::Adopted { captured_at, .. }) => {
                if notification.is_newer_than(captured_at) {
                    tracing::warn!(
                        expected = ?notification.snapshot_at,
                        adopted = ?captured_at,
                        "Adopted a snapshot older than the one announced"
                    );
                }
                self.emit(LocalEvent::Changed(notification));
            }
            Ok(ReconcileOutcome::Seeded(_)) => self.emit(LocalEvent::Changed(notification)),
            Ok(ReconcileOutcome::Skipped) => {}
            Err(SyncError::NotReady) => {}
            Err(e) => {
                tracing::error!(error = %e, "Reconcile after notification failed");
                self.emit(LocalEvent::SyncFailed(e.notice()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn phase_predicates() {
        assert!(Phase::Ready.is_ready());
        assert!(Phase::Syncing.is_ready());
        assert!(!Phase::Adopting.is_ready());

        assert!(Phase::Uninitialized.is_loading());
        assert!(Phase::Bootstrapping.is_loading());
        assert!(!Phase::Failed.is_loading());
        assert!(!Phase::Closed.is_loading());
    }

    #[tokio::test]
    async fn not_ready_before_start() {
        let engine = SqliteEngine::connect("sqlite::memory:", SyncConfig::default().table)
            .await
            .unwrap();
        let instance = Instance::new(
            SyncConfig::default(),
            Arc::new(engine),
            Arc::new(MemoryStore::new()),
            ChannelHub::new_shared(),
        );

        assert!(instance.is_loading());
        let err = instance
            .execute_query("SELECT * FROM patients")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotReady));
        assert!(matches!(instance.sync_now().await, Err(SyncError::NotReady)));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_close_is_final() {
        let instance = Instance::open(
            SyncConfig::default(),
            Arc::new(MemoryStore::new()),
            ChannelHub::new_shared(),
        )
        .await
        .unwrap();

        assert_eq!(instance.phase(), Phase::Ready);
        instance.start().await.unwrap();
        assert_eq!(instance.phase(), Phase::Ready);

        instance.close().await;
        instance.close().await;
        assert_eq!(instance.phase(), Phase::Closed);
        assert!(matches!(
            instance.execute_query("SELECT 1").await,
            Err(SyncError::NotReady)
        ));
    }
}
