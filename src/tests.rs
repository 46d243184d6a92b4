use crate::auth::AuthService;
use crate::cache::{CacheInfo, ChapterFetcher, ChapterStore};
use crate::config::Config;
use crate::content::ContentClient;
use crate::db::Database;
use crate::error::AppError;
use crate::server::{AppState, create_router};
use crate::sync::{ProgressReconciler, RemoteProgressClient};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn test_store() -> ChapterStore {
    ChapterStore::open_memory().unwrap()
}

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Content API stand-in. Chapter 404 answers `success: false`, chapter 99
/// answers without content, everything fails with 503 while `down` is set.
async fn content_chapter(
    State(down): State<Arc<AtomicBool>>,
    Path((work_id, chapter)): Path<(String, i64)>,
) -> impl IntoResponse {
    if down.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }
    let body = match chapter {
        404 => serde_json::json!({ "success": false, "message": "Chapter not found" }),
        99 => serde_json::json!({ "success": true, "data": { "title": "Broken" } }),
        n => serde_json::json!({
            "success": true,
            "data": {
                "title": format!("Chapter {}", n),
                "content": format!("Text of {} chapter {}", work_id, n),
                "chapterNumber": n,
            }
        }),
    };
    Json(body).into_response()
}

async fn spawn_content_api() -> (String, Arc<AtomicBool>) {
    let down = Arc::new(AtomicBool::new(false));
    let router = Router::new()
        .route(
            "/api/novels/{work_id}/chapters/{chapter}",
            get(content_chapter),
        )
        .with_state(down.clone());
    (spawn_server(router).await, down)
}

async fn spawn_sync_server() -> (String, String, Database) {
    let db = Database::open_memory().unwrap();
    let auth = AuthService::new(db.clone(), 30);
    let token = auth.issue_token("u1").unwrap().token;
    let state = AppState::new(db.clone(), auth);
    (spawn_server(create_router(state)).await, token, db)
}

// ========== CACHE STORE ==========

#[test]
fn cache_put_twice_is_idempotent() {
    let store = test_store();
    store.put("W", 1, "One", "same text").unwrap();
    store.put("W", 1, "One", "same text").unwrap();

    assert_eq!(store.list_chapter_numbers("W").unwrap(), vec![1]);
    assert_eq!(
        store.cache_info("W").unwrap(),
        CacheInfo {
            count: 1,
            total_bytes: 9
        }
    );
}

#[test]
fn cache_ascii_size_is_byte_length() {
    let store = test_store();
    let content = "a".repeat(1000);
    let chapter = store.put("W", 1, "t", &content).unwrap();
    assert_eq!(chapter.size_bytes, 1000);
}

#[test]
fn cache_multibyte_size_is_encoded_length() {
    let store = test_store();
    let content = "日本語のテキスト"; // 8 chars, 3 bytes each
    let chapter = store.put("W", 1, "t", content).unwrap();

    assert_eq!(content.chars().count(), 8);
    assert_eq!(chapter.size_bytes, 24);
    assert_eq!(store.get("W", 1).unwrap().unwrap().size_bytes, 24);
}

#[test]
fn cache_info_and_clear_scenario() {
    let store = test_store();
    let sizes: i64 = [
        store.put("W", 1, "One", "first").unwrap().size_bytes,
        store.put("W", 2, "Two", "second chapter").unwrap().size_bytes,
        store.put("W", 3, "Three", "the third one").unwrap().size_bytes,
    ]
    .iter()
    .sum();

    assert_eq!(
        store.cache_info("W").unwrap(),
        CacheInfo {
            count: 3,
            total_bytes: sizes
        }
    );

    assert_eq!(store.clear("W").unwrap(), 3);
    assert_eq!(store.cache_info("W").unwrap(), CacheInfo::default());
    assert!(store.list_chapter_numbers("W").unwrap().is_empty());
}

#[test]
fn cache_clear_leaves_other_works() {
    let store = test_store();
    store.put("w1", 1, "t", "one").unwrap();
    store.put("w1", 2, "t", "two").unwrap();
    store.put("w2", 1, "t", "other").unwrap();

    store.clear("w1").unwrap();

    assert!(store.list_chapter_numbers("w1").unwrap().is_empty());
    assert_eq!(store.list_chapter_numbers("w2").unwrap(), vec![1]);
    assert_eq!(store.cache_info("w2").unwrap().total_bytes, 5);
}

#[test]
fn cache_listing_is_restartable() {
    let store = test_store();
    store.put("W", 2, "t", "c").unwrap();
    assert_eq!(store.list_chapter_numbers("W").unwrap(), vec![2]);

    store.put("W", 1, "t", "c").unwrap();
    assert_eq!(store.list_chapter_numbers("W").unwrap(), vec![1, 2]);
}

#[test]
fn cache_shared_file_between_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chapters.db");
    let a = ChapterStore::open(&path).unwrap();
    let b = ChapterStore::open(&path).unwrap();

    a.put("W", 1, "t", "written by a").unwrap();
    assert_eq!(b.get("W", 1).unwrap().unwrap().content, "written by a");

    b.clear("W").unwrap();
    assert!(a.get("W", 1).unwrap().is_none());
}

#[tokio::test]
async fn cache_global_handle_is_initialized_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("global.db");

    let (first, second) = tokio::join!(ChapterStore::global(&path), ChapterStore::global(&path));
    let first = first.unwrap();
    let second = second.unwrap();
    assert!(std::ptr::eq(first, second));

    first.put("W", 1, "t", "c").unwrap();
    assert!(second.get("W", 1).unwrap().is_some());
}

// ========== CONTENT API ==========

#[tokio::test]
async fn content_fetch_and_cache_over_http() {
    let (base_url, _down) = spawn_content_api().await;
    let client = ContentClient::new(base_url, Duration::from_secs(5)).unwrap();
    let fetcher = ChapterFetcher::new(test_store(), client);

    let chapter = fetcher.fetch_and_cache("novel-x", 3).await.unwrap();
    assert_eq!(chapter.title, "Chapter 3");
    assert_eq!(chapter.content, "Text of novel-x chapter 3");
    assert_eq!(
        fetcher.store().get("novel-x", 3).unwrap(),
        Some(chapter)
    );
}

#[tokio::test]
async fn content_error_kinds() {
    let (base_url, down) = spawn_content_api().await;
    let client = ContentClient::new(base_url, Duration::from_secs(5)).unwrap();
    let fetcher = ChapterFetcher::new(test_store(), client);

    assert!(matches!(
        fetcher.fetch_and_cache("novel-x", 404).await,
        Err(AppError::Network(_))
    ));
    assert!(matches!(
        fetcher.fetch_and_cache("novel-x", 99).await,
        Err(AppError::Content(_))
    ));

    down.store(true, Ordering::SeqCst);
    assert!(matches!(
        fetcher.fetch_and_cache("novel-x", 1).await,
        Err(AppError::Network(_))
    ));
    assert!(fetcher.store().list_chapter_numbers("novel-x").unwrap().is_empty());
}

#[tokio::test]
async fn content_unreachable_is_network_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ContentClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let fetcher = ChapterFetcher::new(test_store(), client);

    assert!(matches!(
        fetcher.fetch_and_cache("novel-x", 1).await,
        Err(AppError::Network(_))
    ));
}

#[tokio::test]
async fn prefetch_does_not_interfere() {
    let (base_url, down) = spawn_content_api().await;
    let client = ContentClient::new(base_url, Duration::from_secs(5)).unwrap();
    let fetcher = ChapterFetcher::new(test_store(), client);

    down.store(true, Ordering::SeqCst);
    fetcher.prefetch("novel-x", 7).await;
    assert!(fetcher.store().get("novel-x", 7).unwrap().is_none());

    down.store(false, Ordering::SeqCst);
    let chapter = fetcher.fetch_and_cache("novel-x", 7).await.unwrap();
    assert_eq!(chapter.chapter_number, 7);
}

// ========== PROGRESS STORE ==========

#[test]
fn db_upsert_creates_then_merges() {
    let db = Database::open_memory().unwrap();

    let first = db.upsert_progress("u1", "novel-x", 5, 0, 1_000).unwrap();
    assert_eq!(first.current_chapter, 5);
    assert_eq!(first.chapters_read, vec![5]);
    assert!(!first.is_completed);
    assert_eq!(first.last_read_at, 1_000);

    let second = db.upsert_progress("u1", "novel-x", 6, 50, 2_000).unwrap();
    assert_eq!(second.current_chapter, 6);
    assert_eq!(second.current_position, 50);
    assert_eq!(second.chapters_read, vec![5, 6]);
    assert_eq!(second.last_read_at, 2_000);
}

#[test]
fn db_retry_is_idempotent() {
    let db = Database::open_memory().unwrap();
    let a = db.upsert_progress("u1", "novel-x", 4, 120, 1_000).unwrap();
    let b = db.upsert_progress("u1", "novel-x", 4, 120, 1_000).unwrap();
    assert_eq!(a, b);
}

#[test]
fn db_progress_is_per_user() {
    let db = Database::open_memory().unwrap();
    db.upsert_progress("u1", "novel-x", 2, 0, 1).unwrap();
    db.upsert_progress("u2", "novel-x", 9, 0, 1).unwrap();

    assert_eq!(
        db.get_progress("u1", "novel-x").unwrap().unwrap().chapters_read,
        vec![2]
    );
    assert_eq!(
        db.get_progress("u2", "novel-x").unwrap().unwrap().chapters_read,
        vec![9]
    );
}

#[test]
fn db_progress_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.db");
    {
        let db = Database::open(&path).unwrap();
        db.upsert_progress("u1", "novel-x", 3, 10, 1).unwrap();
    }
    let db = Database::open(&path).unwrap();
    let progress = db.get_progress("u1", "novel-x").unwrap().unwrap();
    assert_eq!(progress.current_position, 10);
}

// ========== SYNC API ==========

#[tokio::test]
async fn sync_remote_round_trip() {
    let (base_url, token, db) = spawn_sync_server().await;
    let client = RemoteProgressClient::new(base_url, token, "u1", Duration::from_secs(5)).unwrap();
    let pr = ProgressReconciler::new(client);

    assert!(pr.get_progress("u1", "novel-x").await.unwrap().is_none());

    let created = pr.record_progress("u1", "novel-x", 5, 0).await.unwrap();
    assert_eq!(created.chapters_read, vec![5]);
    assert!(!created.is_completed);

    let updated = pr.record_progress("u1", "novel-x", 6, 50).await.unwrap();
    assert_eq!(updated.current_chapter, 6);
    assert_eq!(updated.current_position, 50);
    assert_eq!(updated.chapters_read, vec![5, 6]);

    let done = pr.mark_completed("u1", "novel-x", true).await.unwrap();
    assert!(done.is_completed);

    let fetched = pr.get_progress("u1", "novel-x").await.unwrap().unwrap();
    assert_eq!(fetched, done);
    assert_eq!(db.get_progress("u1", "novel-x").unwrap().unwrap(), done);

    let list = pr.list_progress("u1").await.unwrap();
    assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn sync_rejects_bad_token() {
    let (base_url, _token, _db) = spawn_sync_server().await;
    let client =
        RemoteProgressClient::new(base_url, "not-a-token", "u1", Duration::from_secs(5)).unwrap();
    let pr = ProgressReconciler::new(client);

    assert!(matches!(
        pr.record_progress("u1", "novel-x", 1, 0).await,
        Err(AppError::RemoteUpsert(_))
    ));
    assert!(matches!(
        pr.get_progress("u1", "novel-x").await,
        Err(AppError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn sync_missing_chapter_is_bad_request() {
    let (base_url, token, db) = spawn_sync_server().await;

    let resp = reqwest::Client::new()
        .put(format!("{}/api/sync/progress/novel-x", base_url))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "position": 10 }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(db.get_progress("u1", "novel-x").unwrap().is_none());
}

#[tokio::test]
async fn sync_health() {
    let (base_url, _token, _db) = spawn_sync_server().await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"

[database]
path = "/tmp/progress.db"

[cache]
path = "/tmp/chapters.db"
max_bytes = 1048576

[content]
base_url = "https://novels.example.org"
timeout_seconds = 10

[remote]
base_url = "https://sync.example.org"
token = "abc"
user_id = "reader"
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.cache.max_bytes, 1_048_576);
    assert_eq!(config.content.timeout(), Duration::from_secs(10));
    assert!(config.remote.is_enabled());
    assert_eq!(config.remote.user_id, "reader");
    assert_eq!(config.auth.session_days, 30);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.cache.max_bytes, 0);
    assert!(!config.remote.is_enabled());
    assert_eq!(config.remote.user_id, "local");
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.auth.session_days, 30);
}
