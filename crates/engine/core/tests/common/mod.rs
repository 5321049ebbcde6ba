#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use engine_core::{
    publish, Consumer, ConsumerConfig, InMemoryDeadLetterQueue, InMemoryLog, InMemoryProgressStore,
    PartitionedLog, ProgressStore, Registry, Workspace, WorkspaceServices,
};
use engine_dispatch::{AgentRegistry, DispatchGateway, GatewayConfig, InMemoryAgent, InMemoryJobLedger};
use engine_release::ReconcileSummary;
use engine_store::InMemorySnapshotSink;
use engine_types::{
    Clock, Condition, Deployment, DeploymentVersion, Environment, EventKind, ManualClock, RawEvent,
    ReleaseTarget, Resource, Selector, Shutdown, WorkspaceId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TOPIC: &str = "workspace-events";
pub const PARTITIONS: u32 = 4;

pub fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn target() -> ReleaseTarget {
    ReleaseTarget::new("d1", "e1", "r1")
}

/// One engine process: consumer, registry and a recording agent
pub struct Engine {
    pub log: Arc<dyn PartitionedLog>,
    pub progress: Arc<dyn ProgressStore>,
    pub dead_letters: Arc<InMemoryDeadLetterQueue>,
    pub snapshots: Arc<InMemorySnapshotSink>,
    pub agent: Arc<InMemoryAgent>,
    pub clock: ManualClock,
    pub registry: Arc<Registry>,
    pub consumer: Consumer,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_log(Arc::new(InMemoryLog::new()), Arc::new(InMemoryProgressStore::new()), t0())
    }

    pub fn with_log(log: Arc<dyn PartitionedLog>, progress: Arc<dyn ProgressStore>, now: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(now);
        let agent = Arc::new(InMemoryAgent::default());
        let agents = AgentRegistry::new();
        agents.register(agent.clone());
        let gateway = Arc::new(DispatchGateway::new(
            agents,
            Arc::new(InMemoryJobLedger::new()),
            GatewayConfig::default(),
        ));
        let snapshots = Arc::new(InMemorySnapshotSink::new());
        let registry = Arc::new(Registry::new(WorkspaceServices::new(
            gateway,
            Arc::new(clock.clone()),
            snapshots.clone(),
        )));
        let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
        let consumer = Consumer::new(
            ConsumerConfig {
                topic: TOPIC.to_string(),
                partitions: (0..PARTITIONS).collect(),
                ..ConsumerConfig::default()
            },
            Arc::clone(&log),
            Arc::clone(&progress),
            dead_letters.clone(),
            Arc::clone(&registry),
        );
        Self {
            log,
            progress,
            dead_letters,
            snapshots,
            agent,
            clock,
            registry,
            consumer,
        }
    }

    pub async fn publish(&self, ws: WorkspaceId, kind: EventKind, data: impl Serialize) -> (u32, i64) {
        let event = RawEvent::new(kind, ws, self.clock.now(), data).unwrap();
        publish(self.log.as_ref(), TOPIC, PARTITIONS, &event).await.unwrap()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn workspace(&self, ws: WorkspaceId) -> Arc<Workspace> {
        self.registry.get(&ws).expect("workspace exists")
    }

    /// Apply everything published so far, then reconcile every workspace
    pub async fn step(&self) -> BTreeMap<WorkspaceId, ReconcileSummary> {
        self.consumer.drain().await.unwrap();
        let mut summaries = BTreeMap::new();
        for id in self.registry.ids() {
            let summary = self
                .workspace(id)
                .manager()
                .reconcile_all(Shutdown::never())
                .await;
            summaries.insert(id, summary);
        }
        summaries
    }

    /// Ids of jobs the agent received, in dispatch order
    pub fn dispatched_ids(&self) -> Vec<String> {
        self.agent
            .dispatched()
            .iter()
            .map(|j| j.id.to_string())
            .collect()
    }
}

pub fn service_selector() -> Selector {
    Selector::json(Condition::eq("kind", "service"))
}

pub fn env_selector(env: &str) -> Selector {
    Selector::json(Condition::eq("metadata.env", env))
}

/// `r1` (service, prod), `d1` claiming services, `e1` claiming prod, in `s1`
pub async fn seed_match(engine: &Engine, ws: WorkspaceId) {
    engine
        .publish(
            ws,
            EventKind::ResourceCreated,
            Resource::new("r1", "service").with_metadata("env", "prod"),
        )
        .await;
    engine
        .publish(
            ws,
            EventKind::DeploymentCreated,
            Deployment::new("d1", "s1").with_selector(service_selector()),
        )
        .await;
    engine
        .publish(
            ws,
            EventKind::EnvironmentCreated,
            Environment::new("e1", "s1").with_selector(env_selector("prod")),
        )
        .await;
}

pub async fn publish_version(engine: &Engine, ws: WorkspaceId, id: &str, created_at: DateTime<Utc>) {
    engine
        .publish(
            ws,
            EventKind::DeploymentVersionCreated,
            DeploymentVersion::new(id, "d1", created_at),
        )
        .await;
}
