//! Consumer behaviour: progress, poison messages, halts and restarts.

mod common;

use common::*;
use engine_core::{
    EngineError, FileLog, FileProgressStore, InMemoryProgressStore, PartitionKey, PartitionedLog,
    Progress, ProgressStore,
};
use engine_types::{EventKind, Resource, WorkspaceId};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn key_for(ws: WorkspaceId) -> PartitionKey {
    PartitionKey::new(TOPIC, ws.partition(PARTITIONS))
}

async fn publish_resources(engine: &Engine, ws: WorkspaceId, ids: &[&str]) {
    for id in ids {
        engine
            .publish(ws, EventKind::ResourceCreated, Resource::new(*id, "service"))
            .await;
    }
}

#[tokio::test]
async fn test_progress_resumes_after_last_applied() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    publish_resources(&engine, ws, &["r1", "r2", "r3"]).await;

    let first = engine.consumer.drain().await.unwrap();
    assert_eq!(first.applied, 3);
    let saved = engine.progress.load(&key_for(ws)).await.unwrap().unwrap();
    assert_eq!(saved.last_applied, 2);
    assert_eq!(saved.resume_offset(), 3);

    publish_resources(&engine, ws, &["r4", "r5"]).await;
    let second = engine.consumer.drain().await.unwrap();
    assert_eq!(second.total(), 2);
    assert_eq!(
        engine.progress.load(&key_for(ws)).await.unwrap().unwrap().last_applied,
        4
    );
    assert_eq!(engine.workspace(ws).store().resources().len(), 5);

    // Fully caught up: draining again touches nothing
    assert_eq!(engine.consumer.drain().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_undecodable_messages_are_skipped() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    let key = key_for(ws);
    let ts = t0().timestamp_millis();

    engine
        .log
        .append(TOPIC, key.partition, "garbage", "{not json".to_string(), ts)
        .await
        .unwrap();
    let unknown_kind = json!({
        "eventType": "resource.exploded",
        "workspaceId": ws,
        "timestamp": t0(),
        "data": {}
    });
    engine
        .log
        .append(TOPIC, key.partition, "unknown", unknown_kind.to_string(), ts)
        .await
        .unwrap();
    let bad_payload = json!({
        "eventType": "resource.created",
        "workspaceId": ws,
        "timestamp": t0(),
        "data": {"id": 42}
    });
    engine
        .log
        .append(TOPIC, key.partition, "bad", bad_payload.to_string(), ts)
        .await
        .unwrap();
    publish_resources(&engine, ws, &["r1"]).await;

    let stats = engine.consumer.drain().await.unwrap();
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.applied, 1);
    assert!(engine.dead_letters.is_empty());
    assert_eq!(engine.progress.load(&key).await.unwrap().unwrap().last_applied, 3);
    assert_eq!(engine.workspace(ws).store().resources().len(), 1);
}

#[tokio::test]
async fn test_invalid_entities_are_dead_lettered() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    engine
        .publish(ws, EventKind::ResourceCreated, Resource::new("r1", ""))
        .await;
    engine
        .publish(
            ws,
            EventKind::WorkflowCreated,
            json!({"id": "wf1", "workflowTemplateId": "missing", "inputs": {}}),
        )
        .await;
    publish_resources(&engine, ws, &["r2"]).await;

    let stats = engine.consumer.drain().await.unwrap();
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.applied, 1);

    let letters = engine.dead_letters.letters();
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0].offset, 0);
    assert_eq!(letters[1].offset, 1);
    assert!(letters[0].reason.contains("r1"));
    assert!(letters[1].payload.contains("wf1"));

    // Dead-lettered offsets still count as consumed
    assert_eq!(
        engine.progress.load(&key_for(ws)).await.unwrap().unwrap().last_applied,
        2
    );
}

#[tokio::test]
async fn test_closed_registry_halts_partition() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    let key = key_for(ws);
    publish_resources(&engine, ws, &["r1"]).await;
    engine.consumer.drain().await.unwrap();

    engine.registry.close().await;
    let other = loop {
        let candidate = WorkspaceId::generate();
        if candidate.partition(PARTITIONS) == key.partition {
            break candidate;
        }
    };
    publish_resources(&engine, other, &["r2"]).await;

    let err = engine.consumer.drain().await.unwrap_err();
    assert!(matches!(err, EngineError::Closed));
    assert!(engine.consumer.health().get(&key).unwrap().is_halted());
    assert!(!engine.consumer.health().is_healthy());

    // The failed message was not consumed
    let saved = engine.progress.load(&key).await.unwrap().unwrap();
    assert_eq!(saved, Progress::new(0, t0().timestamp_millis()));
}

#[tokio::test]
async fn test_file_backed_restart_resumes() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("log");
    let progress_path = dir.path().join("progress.json");
    let ws = WorkspaceId::generate();

    {
        let engine = Engine::with_log(
            Arc::new(FileLog::open(&log_dir).await.unwrap()),
            Arc::new(FileProgressStore::open(&progress_path).await.unwrap()),
            t0(),
        );
        seed_match(&engine, ws).await;
        publish_version(&engine, ws, "v1", t0()).await;
        let stats = engine.consumer.drain().await.unwrap();
        assert_eq!(stats.applied, 4);
    }

    let log: Arc<dyn PartitionedLog> = Arc::new(FileLog::open(&log_dir).await.unwrap());
    let restarted = Engine::with_log(
        Arc::clone(&log),
        Arc::new(FileProgressStore::open(&progress_path).await.unwrap()),
        t0(),
    );
    publish_resources(&restarted, ws, &["r2"]).await;
    let stats = restarted.consumer.drain().await.unwrap();
    assert_eq!(stats.total(), 1);
    assert_eq!(
        restarted.progress.load(&key_for(ws)).await.unwrap().unwrap().last_applied,
        4
    );

    // A fresh progress store replays the whole partition
    let replay = Engine::with_log(log, Arc::new(InMemoryProgressStore::new()), t0());
    let stats = replay.consumer.drain().await.unwrap();
    assert_eq!(stats.applied, 5);
    let workspace = replay.workspace(ws);
    assert_eq!(workspace.store().resources().len(), 2);
    assert_eq!(workspace.store().release_targets().len(), 1);
}

#[tokio::test]
async fn test_replay_twice_is_idempotent() {
    let engine = Engine::new();
    let ws = WorkspaceId::generate();
    seed_match(&engine, ws).await;
    publish_version(&engine, ws, "v1", t0()).await;
    engine.step().await;

    let replays = [
        Engine::with_log(Arc::clone(&engine.log), Arc::new(InMemoryProgressStore::new()), t0()),
        Engine::with_log(Arc::clone(&engine.log), Arc::new(InMemoryProgressStore::new()), t0()),
    ];
    let mut snapshots = Vec::new();
    for replay in &replays {
        replay.step().await;
        snapshots.push(replay.workspace(ws).store().snapshot(ws, t0()));
        assert_eq!(replay.dispatched_ids(), engine.dispatched_ids());
    }
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[0], engine.workspace(ws).store().snapshot(ws, t0()));
}
