//! Vector store integration tests.
//!
//! These run against a real PostgreSQL server with the pgvector extension
//! and are gated on `SEMDEX_TEST_DATABASE_URL`; without it every test
//! returns early. Point the URL at a dedicated test database — the suite
//! migrates a `chunks` table with dimension 3.

use std::path::Path;
use std::sync::Arc;

use semdex::db;
use semdex::models::{ChunkMetadata, NewChunk};
use semdex::store::VectorStore;
use semdex::workspace::workspace_id;
use sqlx::postgres::PgPool;

const DIM: usize = 3;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("SEMDEX_TEST_DATABASE_URL").ok()?;
    Some(db::connect(&url).await.expect("connect test database"))
}

/// Fresh store for one test, with its own workspace partition, migrated
/// and cleared.
async fn test_store(pool: &PgPool, test_name: &str) -> VectorStore {
    let ws = workspace_id(Path::new(&format!("/semdex-test/{test_name}")));
    let store = VectorStore::new(pool.clone(), ws, "test-model".to_string());
    store.migrate(DIM).await.expect("migrate");
    store.clear_all().await.expect("clear");
    store
}

fn row(path: &str, mtime: i64, content: &str, embedding: [f32; DIM]) -> NewChunk {
    NewChunk {
        path: path.to_string(),
        mtime_ms: mtime,
        content: content.to_string(),
        embedding: embedding.to_vec(),
        metadata: ChunkMetadata {
            start_line: 1,
            end_line: 1,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn migrate_is_idempotent_and_reports_dimension() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "migrate").await;

    store.migrate(DIM).await.expect("second migrate");
    assert_eq!(store.schema_dimension().await.unwrap(), Some(DIM));
}

#[tokio::test]
async fn insert_then_bookkeeping_queries() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "bookkeeping").await;

    store
        .insert(&[
            row("docs/a.md", 100, "alpha", [1.0, 0.0, 0.0]),
            row("docs/a.md", 100, "alpha continued", [0.9, 0.1, 0.0]),
            row("docs/b.md", 200, "beta", [0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap();

    let mut paths = store.indexed_paths().await.unwrap();
    paths.sort();
    assert_eq!(paths, vec!["docs/a.md", "docs/b.md"]);

    let mtimes = store
        .mtimes_for(&["docs/a.md".to_string(), "docs/b.md".to_string()])
        .await
        .unwrap();
    assert_eq!(mtimes["docs/a.md"], 100);
    assert_eq!(mtimes["docs/b.md"], 200);
    assert_eq!(store.indexed_file_count().await.unwrap(), 2);
    assert_eq!(store.last_updated().await.unwrap(), Some(200));
}

#[tokio::test]
async fn delete_operations_scope_correctly() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "deletes").await;

    store
        .insert(&[
            row("a.md", 1, "a", [1.0, 0.0, 0.0]),
            row("b.md", 1, "b", [0.0, 1.0, 0.0]),
            row("c.md", 1, "c", [0.0, 0.0, 1.0]),
        ])
        .await
        .unwrap();

    store.delete_for(&["a.md".to_string()]).await.unwrap();
    let mut paths = store.indexed_paths().await.unwrap();
    paths.sort();
    assert_eq!(paths, vec!["b.md", "c.md"]);

    store.delete_absent(&["b.md".to_string()]).await.unwrap();
    assert_eq!(store.indexed_paths().await.unwrap(), vec!["b.md"]);

    // Empty keep-set clears the partition.
    store.delete_absent(&[]).await.unwrap();
    assert!(store.indexed_paths().await.unwrap().is_empty());
}

#[tokio::test]
async fn similar_ranks_and_thresholds() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "similar").await;

    store
        .insert(&[
            row("exact.md", 1, "exact match", [1.0, 0.0, 0.0]),
            row("close.md", 1, "close match", [0.9, 0.4, 0.0]),
            row("far.md", 1, "unrelated", [0.0, 0.0, 1.0]),
        ])
        .await
        .unwrap();

    let hits = store.similar(&[1.0, 0.0, 0.0], 10, 0.5, None).await.unwrap();
    let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
    assert_eq!(paths, vec!["exact.md", "close.md"]);
    assert!(hits[0].similarity > hits[1].similarity);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);

    // min_similarity = 1.0 only returns the exact vector.
    let exact = store.similar(&[1.0, 0.0, 0.0], 10, 1.0, None).await.unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].path, "exact.md");
}

#[tokio::test]
async fn similar_excludes_skipped_markers_and_honors_scope() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "skipped-scope").await;

    let marker = NewChunk::skipped_marker("empty.md", 1, "empty file", 0, DIM);
    store
        .insert(&[
            row("src/a.md", 1, "content a", [1.0, 0.0, 0.0]),
            row("lib/b.md", 1, "content b", [1.0, 0.0, 0.0]),
            marker,
        ])
        .await
        .unwrap();

    let hits = store.similar(&[1.0, 0.0, 0.0], 10, 0.0, None).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.path != "empty.md"));

    let scoped = store
        .similar(&[1.0, 0.0, 0.0], 10, 0.0, Some(&["src/a.md".to_string()]))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].path, "src/a.md");
}

#[tokio::test]
async fn workspaces_are_isolated() {
    let Some(pool) = test_pool().await else { return };
    let store_a = test_store(&pool, "isolation-a").await;
    let store_b = test_store(&pool, "isolation-b").await;

    store_a
        .insert(&[row("a.md", 1, "workspace a", [1.0, 0.0, 0.0])])
        .await
        .unwrap();
    store_b
        .insert(&[row("b.md", 1, "workspace b", [1.0, 0.0, 0.0])])
        .await
        .unwrap();

    let hits = store_a.similar(&[1.0, 0.0, 0.0], 10, 0.0, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "a.md");

    store_b.clear_all().await.unwrap();
    assert_eq!(store_a.indexed_file_count().await.unwrap(), 1);
}

#[tokio::test]
async fn models_version_independently() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "models").await;
    let other = VectorStore::new(
        pool.clone(),
        store.workspace_id().to_string(),
        "other-model".to_string(),
    );
    other.clear_all().await.unwrap();

    store
        .insert(&[row("doc.md", 1, "model one rows", [1.0, 0.0, 0.0])])
        .await
        .unwrap();
    other
        .insert(&[row("doc.md", 1, "model two rows", [0.0, 1.0, 0.0])])
        .await
        .unwrap();

    let stats = store.per_model_stats().await.unwrap();
    let models: Vec<&str> = stats.iter().map(|s| s.model.as_str()).collect();
    assert_eq!(models, vec!["other-model", "test-model"]);
    assert!(stats.iter().all(|s| s.row_count == 1));

    // Clearing one model leaves the other's rows alone.
    store.clear_all().await.unwrap();
    assert_eq!(other.indexed_file_count().await.unwrap(), 1);
}

#[tokio::test]
async fn advisory_lock_serializes_critical_sections() {
    let Some(pool) = test_pool().await else { return };
    let store = test_store(&pool, "lock").await;
    let ws = store.workspace_id().to_string();

    let events: Arc<tokio::sync::Mutex<Vec<String>>> = Arc::default();
    let mut handles = Vec::new();
    for task in 0..2 {
        let store = VectorStore::new(pool.clone(), ws.clone(), "test-model".to_string());
        let events = Arc::clone(&events);
        handles.push(tokio::spawn(async move {
            store
                .with_workspace_lock(|| async move {
                    events.lock().await.push(format!("enter-{task}"));
                    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
                    events.lock().await.push(format!("exit-{task}"));
                    Ok(())
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let log = events.lock().await;
    assert_eq!(log.len(), 4);
    // Whichever task entered first must exit before the other enters.
    assert!(log[0].starts_with("enter"));
    assert_eq!(
        log[1],
        log[0].replace("enter", "exit"),
        "critical sections interleaved: {log:?}"
    );
}
