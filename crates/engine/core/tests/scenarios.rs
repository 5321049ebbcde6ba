//! End-to-end scenarios: events go through the log and the consumer, jobs
//! come out of the agent.

mod common;

use chrono::Duration;
use common::*;
use engine_policy::PolicyDecision;
use engine_release::{Phase, ReconcileOutcome};
use engine_types::{
    Environment, EventKind, JobId, JobStatus, JobUpdate, OverrideScope, Policy, PolicyBypass,
    PolicyRule, PolicyTarget, ReleaseTarget, RolloutRule, RolloutType, RuleKind, TimeWindow,
    VersionId, WorkspaceId,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn linear_rollout() -> Policy {
    Policy::new("rollout")
        .with_target(PolicyTarget::new("all"))
        .with_rule(PolicyRule::new(
            "linear",
            RuleKind::EnvironmentVersionRollout(RolloutRule {
                rollout_type: RolloutType::Linear,
                position_growth_factor: 1.0,
                time_scale_interval: 60,
            }),
        ))
}

/// Every environment in `ids` claims the prod resource
async fn publish_prod_environments(engine: &Engine, ws: WorkspaceId, ids: &[&str]) {
    for id in ids {
        engine
            .publish(
                ws,
                EventKind::EnvironmentCreated,
                Environment::new(*id, "s1").with_selector(env_selector("prod")),
            )
            .await;
    }
}

async fn dispatch_single_match(engine: &Engine, ws: WorkspaceId) -> JobId {
    seed_match(engine, ws).await;
    publish_version(engine, ws, "v1", t0()).await;
    let summaries = engine.step().await;
    let dispatched = summaries[&ws].dispatched();
    assert_eq!(dispatched.len(), 1);
    dispatched[0]
}

async fn narrow_environment_out(engine: &Engine, ws: WorkspaceId) {
    engine
        .publish(
            ws,
            EventKind::EnvironmentUpdated,
            Environment::new("e1", "s1").with_selector(env_selector("staging")),
        )
        .await;
    let summaries = engine.step().await;
    assert_eq!(summaries[&ws].changes.destroyed, vec![target()]);
}

async fn defer_then_admit_rollout(engine: &Engine, ws: WorkspaceId) {
    seed_match(engine, ws).await;
    publish_prod_environments(engine, ws, &["e0", "e00"]).await;
    engine.publish(ws, EventKind::PolicyCreated, linear_rollout()).await;
    publish_version(engine, ws, "v2", t0()).await;

    engine.clock.set(at(30));
    let early = engine.step().await;
    assert_eq!(
        early[&ws].outcomes[&target()],
        ReconcileOutcome::Deferred(at(120))
    );

    engine.clock.set(at(121));
    let admitted = engine.step().await;
    assert!(matches!(
        admitted[&ws].outcomes[&target()],
        ReconcileOutcome::Dispatched(_)
    ));
}

async fn bypass_rollout_for_hotfix(engine: &Engine, ws: WorkspaceId) {
    seed_match(engine, ws).await;
    publish_prod_environments(engine, ws, &["e0", "e00"]).await;
    engine.publish(ws, EventKind::PolicyCreated, linear_rollout()).await;
    engine
        .publish(
            ws,
            EventKind::PolicyBypassCreated,
            PolicyBypass {
                id: "b1".into(),
                scope: OverrideScope::target(&target()),
                window: TimeWindow {
                    start: t0(),
                    end: Some(at(3600)),
                },
                reason: "hotfix".to_string(),
            },
        )
        .await;
    publish_version(engine, ws, "v2", engine.now()).await;

    let summaries = engine.step().await;
    assert!(matches!(
        summaries[&ws].outcomes[&target()],
        ReconcileOutcome::Dispatched(_)
    ));
    let state = engine.workspace(ws).manager().target_state(&target()).unwrap();
    assert_eq!(
        state.last_decision,
        Some(PolicyDecision::Allowed {
            reason: "bypass:b1".to_string()
        })
    );
}

async fn redeploy_after_success(engine: &Engine, ws: WorkspaceId) -> (JobId, JobId) {
    let first = dispatch_single_match(engine, ws).await;
    engine
        .publish(
            ws,
            EventKind::JobUpdated,
            JobUpdate {
                job_id: first,
                status: JobStatus::Succeeded,
                message: None,
            },
        )
        .await;
    let settled = engine.step().await;
    assert_eq!(settled[&ws].outcomes[&target()], ReconcileOutcome::UpToDate);

    engine
        .publish(ws, EventKind::ReleaseTargetRedeploy, target())
        .await;
    let redeployed = engine.step().await;
    let dispatched = redeployed[&ws].dispatched();
    assert_eq!(dispatched.len(), 1);
    (first, dispatched[0])
}

#[tokio::test]
async fn test_single_match_dispatches_once() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    let job_id = dispatch_single_match(&engine, ws).await;

    let workspace = engine.workspace(ws);
    assert_eq!(
        workspace.store().release_targets().into_iter().collect::<Vec<_>>(),
        vec![target()]
    );
    assert_eq!(engine.agent.dispatch_count(), 1);
    assert_eq!(engine.agent.count_for(&job_id), 1);
    let job = workspace.manager().job(&job_id).unwrap();
    assert_eq!(job.agent_kind, "github-action");
    assert_eq!(job.version_id(), Some(&VersionId::new("v1")));

    // Nothing new arrived: the next pass dispatches nothing
    let again = engine.step().await;
    assert!(again[&ws].dispatched().is_empty());
    assert_eq!(engine.agent.dispatch_count(), 1);
}

#[tokio::test]
async fn test_narrowed_selector_destroys_target_and_cancels_job() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    let job_id = dispatch_single_match(&engine, ws).await;
    narrow_environment_out(&engine, ws).await;

    let workspace = engine.workspace(ws);
    assert!(workspace.store().release_targets().is_empty());
    assert_eq!(
        workspace.manager().job(&job_id).unwrap().status,
        JobStatus::Cancelled
    );
    assert_eq!(
        workspace.manager().target_state(&target()).unwrap().phase,
        Phase::Terminal
    );

    engine.clock.advance(Duration::minutes(5));
    engine.step().await;
    assert_eq!(engine.agent.dispatch_count(), 1);
}

#[tokio::test]
async fn test_linear_rollout_defers_third_environment() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    defer_then_admit_rollout(&engine, ws).await;

    let manager = engine.workspace(ws).manager().clone();
    assert_eq!(manager.jobs_for(&target()).len(), 1);
    let dispatched_for_e1 = engine
        .agent
        .dispatched()
        .iter()
        .filter(|job| job.release_target() == Some(&target()))
        .count();
    assert_eq!(dispatched_for_e1, 1);

    // e0 sits at position 0 and was admitted on the first pass
    let e0 = ReleaseTarget::new("d1", "e0", "r1");
    assert_eq!(manager.jobs_for(&e0).len(), 1);
    assert_eq!(engine.agent.dispatch_count(), 3);
}

#[tokio::test]
async fn test_bypass_admits_ahead_of_rollout() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    bypass_rollout_for_hotfix(&engine, ws).await;
    assert_eq!(engine.workspace(ws).manager().jobs_for(&target()).len(), 1);
}

#[tokio::test]
async fn test_redeploy_dispatches_same_version_under_new_id() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    let (first, second) = redeploy_after_success(&engine, ws).await;

    assert_ne!(first, second);
    let manager = engine.workspace(ws).manager().clone();
    let job = manager.job(&second).unwrap();
    assert_eq!(job.version_id(), Some(&VersionId::new("v1")));
    assert_eq!(job.status, JobStatus::Dispatched);
    assert_eq!(engine.agent.count_for(&second), 1);
    assert_eq!(engine.agent.dispatch_count(), 2);
}

#[tokio::test]
async fn test_unknown_redeploy_target_is_dead_lettered() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    seed_match(&engine, ws).await;
    engine
        .publish(
            ws,
            EventKind::ReleaseTargetRedeploy,
            ReleaseTarget::new("d1", "e9", "r1"),
        )
        .await;
    engine.step().await;

    let letters = engine.dead_letters.letters();
    assert_eq!(letters.len(), 1);
    assert!(letters[0].reason.contains("e9"));
}

async fn restore_environment(engine: &Engine, ws: WorkspaceId) {
    engine
        .publish(
            ws,
            EventKind::EnvironmentUpdated,
            Environment::new("e1", "s1").with_selector(env_selector("prod")),
        )
        .await;
}

#[tokio::test]
async fn test_revived_target_job_ids_survive_replay() {
    let original = Engine::new();
    let ws = WorkspaceId::generate();
    let first = dispatch_single_match(&original, ws).await;
    narrow_environment_out(&original, ws).await;
    restore_environment(&original, ws).await;
    let revived = original.step().await[&ws].dispatched();
    let expected = JobId::derive(&[&target().key(), "v1", "1"]);
    assert_eq!(revived, vec![expected]);

    // The replay reconciles once, after the target was destroyed and
    // recreated, yet must land on the same job
    let replay = Engine::with_log(
        Arc::clone(&original.log),
        Arc::new(engine_core::InMemoryProgressStore::new()),
        original.now(),
    );
    replay.step().await;
    let manager = replay.workspace(ws).manager().clone();
    assert_eq!(manager.job(&expected).unwrap().status, JobStatus::Dispatched);
    assert!(manager.job(&first).is_none());
    assert_eq!(replay.dispatched_ids(), vec![expected.to_string()]);
}

#[tokio::test]
async fn test_replay_rebuilds_identical_state() {
    let original = Engine::new();
    let (a, b, c, d) = (
        WorkspaceId::generate(),
        WorkspaceId::generate(),
        WorkspaceId::generate(),
        WorkspaceId::generate(),
    );

    dispatch_single_match(&original, a).await;
    narrow_environment_out(&original, a).await;
    defer_then_admit_rollout(&original, b).await;
    bypass_rollout_for_hotfix(&original, d).await;
    redeploy_after_success(&original, c).await;

    // Same log, fresh progress: a new process consuming from offset 0
    let replay = Engine::with_log(
        Arc::clone(&original.log),
        Arc::new(engine_core::InMemoryProgressStore::new()),
        original.now(),
    );
    replay.step().await;

    assert_eq!(replay.registry.ids(), original.registry.ids());
    for ws in original.registry.ids() {
        let before = original.workspace(ws).store().snapshot(ws, t0());
        let after = replay.workspace(ws).store().snapshot(ws, t0());
        assert_eq!(before, after, "workspace {ws} diverged on replay");

        let active = |engine: &Engine| -> BTreeSet<JobId> {
            engine
                .workspace(ws)
                .manager()
                .jobs()
                .into_iter()
                .filter(|job| job.status.is_active())
                .map(|job| job.id)
                .collect()
        };
        assert_eq!(active(&replay), active(&original), "workspace {ws} jobs diverged");
    }

    // Replay only re-sends jobs the first run already dispatched, each once
    let sent: BTreeSet<_> = original.dispatched_ids().into_iter().collect();
    let resent = replay.dispatched_ids();
    let unique: BTreeSet<_> = resent.iter().cloned().collect();
    assert_eq!(unique.len(), resent.len());
    assert!(unique.is_subset(&sent));
    assert!(!unique.is_empty());
}
