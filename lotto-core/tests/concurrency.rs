use futures::future::join_all;
use lotto_core::{
    ConflictKind, DrawEngine, DrawStatus, LotteryError, MemoryStore, RandomSource, SqliteStore,
};
use std::sync::Arc;
use tempfile::tempdir;

fn engine(store: Arc<MemoryStore>) -> Arc<DrawEngine> {
    Arc::new(DrawEngine::new(store, "race", RandomSource::default()))
}

#[tokio::test]
async fn test_concurrent_starts_commit_once() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store);

    let clients: Vec<String> = (0..8).map(|i| format!("client-{}", i)).collect();
    let results = join_all(clients.iter().map(|id| engine.start(id, None))).await;

    let winners: Vec<&String> = clients
        .iter()
        .zip(&results)
        .filter(|(_, r)| r.is_ok())
        .map(|(id, _)| id)
        .collect();
    assert_eq!(winners.len(), 1);
    assert!(results.iter().filter(|r| r.is_err()).all(|r| matches!(
        r,
        Err(LotteryError::Conflict(ConflictKind::AlreadyInProgress))
    )));

    let state = engine.current().await.unwrap();
    assert_eq!(state.controller_id.as_ref(), Some(winners[0]));
    assert!(state.numbers.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_steps_grow_by_exactly_one() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store);
    engine.start("host", None).await.unwrap();

    for generation in 0..6 {
        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.step_from("host", generation).await })
            })
            .collect();

        let results = join_all(tasks).await;
        let committed = results
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(committed, 1, "generation {}", generation);

        let state = engine.current().await.unwrap();
        assert_eq!(state.numbers.len(), generation + 1);
    }

    let state = engine.current().await.unwrap();
    assert_eq!(state.status, DrawStatus::Completed);

    let mut unique = state.numbers.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unpinned_steps_never_overshoot() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store);
    engine.start("host", None).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.step("host").await })
        })
        .collect();

    let committed = join_all(tasks)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();

    assert_eq!(committed, 6);
    assert_eq!(engine.current().await.unwrap().numbers.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_connections_race_on_start() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("lotto.db");

    let mut engines = Vec::new();
    for i in 0..4 {
        let store = SqliteStore::new(&db_path).await.unwrap();
        engines.push((
            format!("client-{}", i),
            Arc::new(DrawEngine::new(Arc::new(store), "race", RandomSource::default())),
        ));
    }

    let tasks: Vec<_> = engines
        .iter()
        .map(|(id, engine)| {
            let id = id.clone();
            let engine = Arc::clone(engine);
            tokio::spawn(async move { engine.start(&id, None).await })
        })
        .collect();

    let committed = join_all(tasks)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();
    assert_eq!(committed, 1);

    let (_, reader) = &engines[0];
    let state = reader.current().await.unwrap();
    assert_eq!(state.status, DrawStatus::InProgress);
}
