//! Workspace registry
//!
//! Maps workspace ids to workspaces, creating them on first use. Lifecycle
//! is `new() → run() → close()`: while running, every workspace (existing or
//! created later) has its reconciler spawned exactly once; `close()` stops
//! them all and refuses further workspaces.

use engine_types::{Shutdown, ShutdownTrigger, WorkspaceId};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::workspace::{Workspace, WorkspaceServices};

#[derive(Debug)]
enum Lifecycle {
    New,
    Running { trigger: ShutdownTrigger },
    Closed,
}

#[derive(Debug)]
struct RegistryState {
    workspaces: BTreeMap<WorkspaceId, Arc<Workspace>>,
    lifecycle: Lifecycle,
    reconcilers: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct Registry {
    services: WorkspaceServices,
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(services: WorkspaceServices) -> Self {
        Self {
            services,
            state: RwLock::new(RegistryState {
                workspaces: BTreeMap::new(),
                lifecycle: Lifecycle::New,
                reconcilers: Vec::new(),
            }),
        }
    }

    pub fn services(&self) -> &WorkspaceServices {
        &self.services
    }

    pub fn get(&self, id: &WorkspaceId) -> Option<Arc<Workspace>> {
        self.state.read().workspaces.get(id).cloned()
    }

    /// Ids of every known workspace, in order
    pub fn ids(&self) -> Vec<WorkspaceId> {
        self.state.read().workspaces.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().workspaces.is_empty()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state.read().lifecycle, Lifecycle::Running { .. })
    }

    /// Look a workspace up, creating it on first use
    pub fn get_or_create(&self, id: WorkspaceId) -> Result<Arc<Workspace>> {
        if let Some(workspace) = self.get(&id) {
            return Ok(workspace);
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        if matches!(state.lifecycle, Lifecycle::Closed) {
            return Err(EngineError::Closed);
        }
        if let Some(workspace) = state.workspaces.get(&id) {
            return Ok(Arc::clone(workspace));
        }

        let workspace = Arc::new(Workspace::new(id, &self.services));
        state.workspaces.insert(id, Arc::clone(&workspace));
        if let Lifecycle::Running { trigger } = &state.lifecycle {
            let handle = spawn_reconciler(&workspace, trigger.subscribe());
            state.reconcilers.push(handle);
        }
        Ok(workspace)
    }

    /// Start a reconciler for every workspace, now and as they appear
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        match state.lifecycle {
            Lifecycle::New => {}
            Lifecycle::Running { .. } => {
                return Err(EngineError::Lifecycle("registry already running".into()))
            }
            Lifecycle::Closed => return Err(EngineError::Closed),
        }

        let (trigger, _) = ShutdownTrigger::new();
        for workspace in state.workspaces.values() {
            state
                .reconcilers
                .push(spawn_reconciler(workspace, trigger.subscribe()));
        }
        info!(workspaces = state.workspaces.len(), "Workspace registry running");
        state.lifecycle = Lifecycle::Running { trigger };
        Ok(())
    }

    /// Stop every reconciler and wait for them to finish
    pub async fn close(&self) {
        let handles = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            if let Lifecycle::Running { trigger } = &state.lifecycle {
                trigger.trigger();
            }
            state.lifecycle = Lifecycle::Closed;
            std::mem::take(&mut state.reconcilers)
        };

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Reconciler task failed");
            }
        }
        info!("Workspace registry closed");
    }
}

fn spawn_reconciler(workspace: &Arc<Workspace>, shutdown: Shutdown) -> JoinHandle<()> {
    let reconciler = workspace.reconciler();
    tokio::spawn(reconciler.run(shutdown))
}
