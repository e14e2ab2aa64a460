//! Sync coordinator.
//!
//! Ties the local engine to the shared store and the change channel. A local
//! mutation dumps the whole table and announces it; an announcement from
//! elsewhere triggers a reconcile that replaces the local table with the
//! shared snapshot.
//!
//! # Ordering
//!
//! Nothing orders snapshot writes against notifications, and there is no
//! cross-instance lock. The last dump wins; a mutation made while another
//! instance's dump is in flight can be lost.
//!
//! Within one instance, mutations and reconciles share a table lock. A
//! mutation issued during a reconcile waits for the rewrite to finish, so
//! its dump never sees a half-rebuilt table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tabsync_engine::{
    ChangeNotification, MutationIntent, RecordId, ReconcilePlan, SnapshotMeta, TableSchema,
    Timestamp,
};
use tokio::sync::{broadcast, Mutex};

use crate::engine::{LocalEngine, QueryRow};
use crate::error::{Result, SyncError};
use crate::lifecycle::LocalEvent;
use crate::notifier::ChangeNotifier;
use crate::store::SnapshotStore;

/// A statement to run against the local engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Positional parameters
    pub params: Vec<Value>,
    /// Explicit mutation descriptor; overrides what the SQL text suggests
    pub intent: Option<MutationIntent>,
}

impl Statement {
    /// Create a statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            intent: None,
        }
    }

    /// Builder-style method to append a parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Builder-style method to set all parameters.
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Builder-style method to declare what the statement mutates.
    pub fn with_intent(mut self, intent: MutationIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// The mutation this statement performs, if any.
    ///
    /// The explicit descriptor wins; otherwise the SQL text is classified.
    pub fn mutation(&self) -> Option<MutationIntent> {
        self.intent
            .clone()
            .or_else(|| MutationIntent::infer(&self.sql))
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

/// Result of a reconcile call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Another reconcile was already running; nothing was done.
    Skipped,
    /// The shared store was empty and has been seeded from local state.
    /// `None` means another instance seeded it first.
    Seeded(Option<SnapshotMeta>),
    /// The local table was replaced with the shared snapshot.
    Adopted {
        /// Rows written
        records: usize,
        /// Effective high-water mark
        high_water_mark: RecordId,
        /// First id the local sequence will hand out
        next_id: RecordId,
        /// Capture time of the adopted snapshot, if known
        captured_at: Option<Timestamp>,
    },
}

impl ReconcileOutcome {
    /// Whether local state may have changed.
    pub fn changed_local_state(&self) -> bool {
        matches!(self, ReconcileOutcome::Adopted { .. })
    }
}

/// Proof that the caller holds the in-flight slot.
///
/// Released when dropped.
#[derive(Debug)]
pub struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Per-instance coordinator.
pub struct SyncCoordinator {
    engine: Arc<dyn LocalEngine>,
    snapshots: SnapshotStore,
    notifier: Arc<ChangeNotifier>,
    schema: TableSchema,
    events: broadcast::Sender<LocalEvent>,
    in_flight: AtomicBool,
    table_lock: Mutex<()>,
}

impl SyncCoordinator {
    /// Create a coordinator.
    pub fn new(
        engine: Arc<dyn LocalEngine>,
        snapshots: SnapshotStore,
        notifier: Arc<ChangeNotifier>,
        schema: TableSchema,
        events: broadcast::Sender<LocalEvent>,
    ) -> Self {
        Self {
            engine,
            snapshots,
            notifier,
            schema,
            events,
            in_flight: AtomicBool::new(false),
            table_lock: Mutex::new(()),
        }
    }

    /// The local engine.
    pub fn engine(&self) -> &Arc<dyn LocalEngine> {
        &self.engine
    }

    /// The snapshot store.
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Execute a statement and, if it mutates, propagate the new state.
    ///
    /// Engine errors are returned unchanged and nothing is propagated. Once
    /// the engine has committed, the rows are returned even if the dump or
    /// the publish fails; that failure is reported as a
    /// [`LocalEvent::SyncFailed`].
    ///
    /// Waits for a running reconcile to finish before touching the table.
    pub async fn apply_mutation(&self, statement: &Statement) -> Result<Vec<QueryRow>> {
        let _table = self.table_lock.lock().await;

        let rows = self
            .engine
            .execute(&statement.sql, &statement.params)
            .await?;

        if let Some(intent) = statement.mutation() {
            if intent.is_unknown_table() {
                tracing::warn!(sql = %statement.sql, "Could not tell which table a mutation touched");
            }

            if let Err(e) = self.propagate(intent).await {
                let _ = self.events.send(LocalEvent::SyncFailed(e.notice()));
            }
        }

        Ok(rows)
    }

    /// Dump the whole local table and announce it.
    ///
    /// Returns the notification that was published.
    pub async fn propagate(&self, intent: MutationIntent) -> Result<ChangeNotification> {
        let records = self.engine.fetch_records().await?;
        let meta = self.snapshots.dump(records)?;

        let notification =
            ChangeNotification::new(intent, crate::now_millis()).with_snapshot_at(meta.captured_at);
        let delivered = self.notifier.publish(notification.clone());

        tracing::debug!(
            table = %notification.table,
            action = %notification.action,
            high_water_mark = meta.high_water_mark,
            delivered,
            "Change published"
        );

        Ok(notification)
    }

    /// Claim the in-flight slot, or `None` if a reconcile is running.
    pub fn try_begin_sync(&self) -> Option<SyncGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard {
                flag: &self.in_flight,
            })
    }

    /// Whether a reconcile is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Bring the local table in line with the shared store.
    ///
    /// A call made while another reconcile is running returns
    /// [`ReconcileOutcome::Skipped`]; it is dropped, not queued.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let Some(guard) = self.try_begin_sync() else {
            tracing::debug!("Reconcile already in flight, skipping");
            return Ok(ReconcileOutcome::Skipped);
        };

        self.reconcile_locked(&guard).await
    }

    /// Reconcile while holding the in-flight slot.
    ///
    /// # Errors
    ///
    /// A snapshot the table cannot hold is rejected before anything is
    /// deleted. A failure after the delete aborts with
    /// [`SyncError::PartialReconcile`] and leaves the local table partially
    /// rewritten; the next successful reconcile repairs it.
    pub async fn reconcile_locked(&self, _guard: &SyncGuard<'_>) -> Result<ReconcileOutcome> {
        let _table = self.table_lock.lock().await;

        let Some(stored) = self.snapshots.restore()? else {
            let seeded = self.seed_unlocked().await?;
            return Ok(ReconcileOutcome::Seeded(seeded));
        };

        let captured_at = stored.captured_at;
        let plan = ReconcilePlan::new(stored.snapshot, stored.high_water_mark);
        plan.validate(&self.schema)?;

        if plan.duplicates() > 0 {
            tracing::warn!(duplicates = plan.duplicates(), "Snapshot repeats ids, keeping the first");
        }
        if plan.stored_mark_lagged() {
            tracing::warn!(
                high_water_mark = plan.high_water_mark(),
                "Stored high-water mark lags the snapshot payload"
            );
        }

        self.engine.delete_all().await?;

        let total = plan.len();
        for (applied, record) in plan.records().iter().enumerate() {
            if let Err(e) = self.engine.insert_record(record).await {
                return Err(SyncError::PartialReconcile {
                    applied,
                    total,
                    source: Box::new(e),
                });
            }
        }

        self.engine
            .reset_sequence(plan.next_id())
            .await
            .map_err(|e| SyncError::PartialReconcile {
                applied: total,
                total,
                source: Box::new(e),
            })?;

        tracing::info!(
            table = %self.schema.name,
            records = total,
            next_id = plan.next_id(),
            "Adopted shared snapshot"
        );

        Ok(ReconcileOutcome::Adopted {
            records: total,
            high_water_mark: plan.high_water_mark(),
            next_id: plan.next_id(),
            captured_at,
        })
    }

    /// Seed the shared store from the local table if it holds no snapshot.
    pub async fn seed_from_local(&self) -> Result<Option<SnapshotMeta>> {
        let _table = self.table_lock.lock().await;
        self.seed_unlocked().await
    }

    async fn seed_unlocked(&self) -> Result<Option<SnapshotMeta>> {
        let local = self.engine.fetch_records().await?;
        self.snapshots.ensure_seeded(local)
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("table", &self.schema.name)
            .field("keys", self.snapshots.keys())
            .field("in_flight", &self.is_syncing())
            .finish_non_exhaustive()
    }
}
