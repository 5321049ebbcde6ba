//! Workspaces
//!
//! A [`Workspace`] bundles the entity store of one tenant with the release
//! manager reconciling it. The manager receives the store by shared
//! reference and never points back at the workspace.

use chrono::{DateTime, Utc};
use engine_dispatch::{DispatchGateway, RetryPolicy};
use engine_release::{Reconciler, ReconcilerConfig, ReleaseManager, DEFAULT_EARLY_RESULT_LIMIT};
use engine_store::{ChangeNotifier, EntityStore, SnapshotSink, StoreError, WorkspaceSnapshot};
use engine_types::{Clock, WorkspaceId};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Process-wide collaborators shared by every workspace
#[derive(Clone)]
pub struct WorkspaceServices {
    /// Bounded dispatch pool shared across workspaces
    pub gateway: Arc<DispatchGateway>,
    pub clock: Arc<dyn Clock>,
    pub snapshots: Arc<dyn SnapshotSink>,
    pub retry: RetryPolicy,
    pub reconciler: ReconcilerConfig,

    /// Capacity of each workspace's change notifier
    pub notification_capacity: usize,
    pub early_result_limit: usize,
}

impl WorkspaceServices {
    pub fn new(
        gateway: Arc<DispatchGateway>,
        clock: Arc<dyn Clock>,
        snapshots: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            gateway,
            clock,
            snapshots,
            retry: RetryPolicy::default(),
            reconciler: ReconcilerConfig::default(),
            notification_capacity: 1024,
            early_result_limit: DEFAULT_EARLY_RESULT_LIMIT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn with_early_result_limit(mut self, limit: usize) -> Self {
        self.early_result_limit = limit;
        self
    }
}

impl fmt::Debug for WorkspaceServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceServices")
            .field("clock", &self.clock)
            .field("retry", &self.retry)
            .field("reconciler", &self.reconciler)
            .field("notification_capacity", &self.notification_capacity)
            .field("early_result_limit", &self.early_result_limit)
            .finish_non_exhaustive()
    }
}

/// One tenant's state and its reconciliation machinery
pub struct Workspace {
    id: WorkspaceId,
    store: Arc<EntityStore>,
    notifier: Arc<ChangeNotifier>,
    manager: Arc<ReleaseManager>,
    clock: Arc<dyn Clock>,
    snapshots: Arc<dyn SnapshotSink>,
    reconciler: ReconcilerConfig,
}

impl Workspace {
    pub fn new(id: WorkspaceId, services: &WorkspaceServices) -> Self {
        let notifier = Arc::new(ChangeNotifier::new(services.notification_capacity));
        let store = Arc::new(EntityStore::new(Arc::clone(&notifier)));
        let manager = Arc::new(ReleaseManager::new(
            Arc::clone(&store),
            Arc::clone(&services.gateway),
            Arc::clone(&services.clock),
            services.retry.clone(),
        )
        .with_early_result_limit(services.early_result_limit));
        info!(workspace_id = %id, "Workspace created");
        Self {
            id,
            store,
            notifier,
            manager,
            clock: Arc::clone(&services.clock),
            snapshots: Arc::clone(&services.snapshots),
            reconciler: services.reconciler.clone(),
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn manager(&self) -> &Arc<ReleaseManager> {
        &self.manager
    }

    /// The reconciliation loop for this workspace, not yet running
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            self.reconciler.clone(),
        )
    }

    /// Render the current state and hand it to the snapshot sink
    pub fn save_snapshot(&self, taken_at: DateTime<Utc>) -> Result<WorkspaceSnapshot, StoreError> {
        let snapshot = self.store.snapshot(self.id, taken_at);
        self.snapshots.save(&snapshot)?;
        info!(
            workspace_id = %self.id,
            resources = snapshot.resources.len(),
            release_targets = snapshot.release_targets.len(),
            "Workspace snapshot saved"
        );
        Ok(snapshot)
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("release_targets", &self.store.release_targets().len())
            .finish_non_exhaustive()
    }
}
