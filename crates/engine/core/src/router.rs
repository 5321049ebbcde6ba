//! Event routing
//!
//! The handler table is a closed `match` over [`EventKind`]: adding a kind
//! without a handler does not compile.

use engine_store::ChangeSet;
use engine_types::{EventKind, RawEvent};
use tracing::{debug, instrument};

use crate::error::HandlerError;
use crate::handlers;
use crate::workspace::Workspace;

/// Decodes envelopes and applies them to their workspace
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRouter;

impl EventRouter {
    pub fn new() -> Self {
        Self
    }

    /// Apply one event; returns the changes it committed
    #[instrument(
        skip(self, workspace, event),
        fields(workspace_id = %event.workspace_id, event_type = %event.event_type)
    )]
    pub fn route(&self, workspace: &Workspace, event: &RawEvent) -> Result<ChangeSet, HandlerError> {
        let kind = event.kind()?;
        let mut cs = ChangeSet::new(event.timestamp);
        dispatch(kind, workspace, &mut cs, event)?;
        debug!(changes = cs.len(), "Event applied");
        Ok(cs)
    }
}

fn dispatch(
    kind: EventKind,
    ws: &Workspace,
    cs: &mut ChangeSet,
    event: &RawEvent,
) -> Result<(), HandlerError> {
    use EventKind::*;
    match kind {
        ResourceCreated | ResourceUpdated => handlers::upsert_resource(ws, cs, event),
        ResourceDeleted => handlers::remove_resource(ws, cs, event),
        DeploymentCreated | DeploymentUpdated => handlers::upsert_deployment(ws, cs, event),
        DeploymentDeleted => handlers::remove_deployment(ws, cs, event),
        EnvironmentCreated | EnvironmentUpdated => handlers::upsert_environment(ws, cs, event),
        EnvironmentDeleted => handlers::remove_environment(ws, cs, event),
        SystemCreated | SystemUpdated => handlers::upsert_system(ws, cs, event),
        SystemDeleted => handlers::remove_system(ws, cs, event),
        DeploymentVersionCreated => handlers::create_deployment_version(ws, cs, event),
        PolicyCreated | PolicyUpdated => handlers::upsert_policy(ws, cs, event),
        PolicyDeleted => handlers::remove_policy(ws, cs, event),
        PolicyBypassCreated => handlers::create_bypass(ws, cs, event),
        PolicyBypassDeleted => handlers::remove_bypass(ws, cs, event),
        PolicySkipCreated => handlers::create_skip(ws, cs, event),
        PolicySkipDeleted => handlers::remove_skip(ws, cs, event),
        JobAgentCreated | JobAgentUpdated => handlers::upsert_job_agent(ws, cs, event),
        JobAgentDeleted => handlers::remove_job_agent(ws, cs, event),
        WorkflowTemplateCreated => handlers::create_workflow_template(ws, cs, event),
        WorkflowCreated => handlers::create_workflow(ws, cs, event),
        GithubEntityCreated => handlers::create_github_entity(ws, cs, event),
        GithubEntityDeleted => handlers::remove_github_entity(ws, cs, event),
        ApprovalCreated => handlers::create_approval(ws, cs, event),
        JobUpdated => handlers::update_job(ws, cs, event),
        ReleaseTargetRedeploy => handlers::redeploy(ws, cs, event),
        WorkspaceSave => handlers::save(ws, event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceServices;
    use chrono::{DateTime, Utc};
    use engine_dispatch::{AgentRegistry, DispatchGateway, GatewayConfig, InMemoryJobLedger};
    use engine_store::{ChangeType, InMemorySnapshotSink};
    use engine_types::{
        Condition, Deployment, EntityKind, Environment, Resource, Selector, SystemClock,
        WorkspaceId,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn workspace(sink: Arc<InMemorySnapshotSink>) -> Workspace {
        let gateway = Arc::new(DispatchGateway::new(
            AgentRegistry::new(),
            Arc::new(InMemoryJobLedger::new()),
            GatewayConfig::default(),
        ));
        Workspace::new(
            WorkspaceId::generate(),
            &WorkspaceServices::new(gateway, Arc::new(SystemClock), sink),
        )
    }

    fn event(ws: &Workspace, kind: EventKind, data: impl serde::Serialize) -> RawEvent {
        RawEvent::new(kind, ws.id(), DateTime::<Utc>::default(), data).unwrap()
    }

    #[test]
    fn test_create_then_delete() {
        let ws = workspace(Arc::new(InMemorySnapshotSink::new()));
        let router = EventRouter::new();

        let cs = router
            .route(&ws, &event(&ws, EventKind::ResourceCreated, Resource::new("r1", "service")))
            .unwrap();
        assert_eq!(cs.count(EntityKind::Resource, ChangeType::Insert), 1);
        assert_eq!(
            ws.store().resources().get(&"r1".into()).unwrap().workspace_id,
            Some(ws.id())
        );

        let cs = router
            .route(&ws, &event(&ws, EventKind::ResourceDeleted, json!({ "id": "r1" })))
            .unwrap();
        assert_eq!(cs.count(EntityKind::Resource, ChangeType::Delete), 1);
        assert!(ws.store().resources().is_empty());
    }

    #[test]
    fn test_error_classes() {
        let ws = workspace(Arc::new(InMemorySnapshotSink::new()));
        let router = EventRouter::new();

        let unknown = RawEvent {
            event_type: "resource.exploded".into(),
            workspace_id: ws.id(),
            timestamp: DateTime::<Utc>::default(),
            data: json!({}),
        };
        assert!(matches!(router.route(&ws, &unknown), Err(HandlerError::Decode(_))));

        let malformed = event(&ws, EventKind::DeploymentCreated, json!({ "name": "no id" }));
        assert!(matches!(router.route(&ws, &malformed), Err(HandlerError::Decode(_))));

        let orphan = event(
            &ws,
            EventKind::WorkflowCreated,
            json!({ "id": "w1", "workflowTemplateId": "missing" }),
        );
        assert!(matches!(router.route(&ws, &orphan), Err(HandlerError::Validation(_))));
        assert!(ws.store().workflows().is_empty());
    }

    #[test]
    fn test_same_event_twice_changes_nothing() {
        let ws = workspace(Arc::new(InMemorySnapshotSink::new()));
        let router = EventRouter::new();
        let events = [
            event(&ws, EventKind::ResourceCreated, Resource::new("r1", "service")),
            event(
                &ws,
                EventKind::DeploymentCreated,
                Deployment::new("d1", "s1").with_selector(Selector::json(Condition::eq("kind", "service"))),
            ),
            event(
                &ws,
                EventKind::EnvironmentCreated,
                Environment::new("e1", "s1").with_selector(Selector::All),
            ),
        ];
        for e in &events {
            router.route(&ws, e).unwrap();
        }
        let before = ws.store().snapshot(ws.id(), DateTime::<Utc>::default());

        for e in &events {
            assert!(router.route(&ws, e).unwrap().is_empty());
        }
        assert_eq!(ws.store().snapshot(ws.id(), DateTime::<Utc>::default()), before);
        assert_eq!(before.release_targets.len(), 1);
    }

    #[test]
    fn test_save_hands_snapshot_to_sink() {
        let sink = Arc::new(InMemorySnapshotSink::new());
        let ws = workspace(Arc::clone(&sink));
        let router = EventRouter::new();
        router
            .route(&ws, &event(&ws, EventKind::ResourceCreated, Resource::new("r1", "service")))
            .unwrap();
        router
            .route(&ws, &event(&ws, EventKind::WorkspaceSave, json!({})))
            .unwrap();

        let saved = sink.latest(ws.id()).unwrap();
        assert_eq!(saved.resources.len(), 1);
    }
}
