use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local};
use motion_snap_common::config::Config;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    db_path: PathBuf,
    history_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HistoryItem {
    id: i64,
    seq: i64,
    captured_at_ms: i64,
    committed_at_ms: i64,
    score: i64,
    width: i64,
    height: i64,
    size_bytes: i64,
    caption: String,
    image_url: String,
    #[serde(skip)]
    path: String,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
    /// Page backwards: only entries older than this id.
    before_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// DB helpers (sync, wrapped in spawn_blocking)
// ---------------------------------------------------------------------------

fn open_history_db(db_path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn caption(committed_at_ms: i64, score: i64) -> String {
    let time = DateTime::from_timestamp_millis(committed_at_ms)
        .map(|dt| dt.with_timezone(&Local).format("%-I:%M:%S %p").to_string())
        .unwrap_or_default();
    format!("{} (score: {score})", time.to_lowercase())
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryItem> {
    let id: i64 = row.get(0)?;
    let committed_at_ms: i64 = row.get(3)?;
    let score: i64 = row.get(4)?;
    Ok(HistoryItem {
        id,
        seq: row.get(1)?,
        captured_at_ms: row.get(2)?,
        committed_at_ms,
        score,
        path: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        size_bytes: row.get(8)?,
        caption: caption(committed_at_ms, score),
        image_url: format!("/history/{id}/image"),
    })
}

const SELECT_COLUMNS: &str =
    "SELECT id, seq, captured_at_ms, committed_at_ms, score, path, width, height, size_bytes
     FROM history";

/// Newest first, matching how the history is displayed.
fn query_history(conn: &Connection, q: &HistoryQuery) -> rusqlite::Result<Vec<HistoryItem>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id < ?1 ORDER BY id DESC LIMIT ?2");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            q.before_id.unwrap_or(i64::MAX),
            q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        ],
        row_to_item,
    )?;
    rows.collect()
}

fn query_entry(conn: &Connection, id: i64) -> rusqlite::Result<Option<HistoryItem>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], row_to_item)?;
    rows.next().transpose()
}

/// Resolve a stored relative path under the history directory, refusing
/// anything that could escape it.
fn resolve_image_path(history_dir: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    if rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(history_dir.join(rel))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /history?limit=&before_id=
async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    let db_path = state.db_path.clone();
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<HistoryItem>> {
        let conn = open_history_db(&db_path)?;
        query_history(&conn, &q)
    })
    .await;

    match result {
        Ok(Ok(items)) => Json(items).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /history/:id
async fn get_entry(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> impl IntoResponse {
    let db_path = state.db_path.clone();
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<Option<HistoryItem>> {
        let conn = open_history_db(&db_path)?;
        query_entry(&conn, id)
    })
    .await;

    match result {
        Ok(Ok(Some(item))) => Json(item).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /history/:id/image — the committed frame as JPEG
async fn entry_image(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> impl IntoResponse {
    let db_path = state.db_path.clone();
    let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<Option<HistoryItem>> {
        let conn = open_history_db(&db_path)?;
        query_entry(&conn, id)
    })
    .await;

    let item = match result {
        Ok(Ok(Some(item))) => item,
        Ok(Ok(None)) => return StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(path) = resolve_image_path(&state.history_dir, &item.path) else {
        error!(id, path = %item.path, "refusing to serve path outside history dir");
        return StatusCode::FORBIDDEN.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to read history image");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/history", get(list_history))
        .route("/history/:id", get(get_entry))
        .route("/history/:id/image", get(entry_image))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let state = Arc::new(AppState {
        db_path: PathBuf::from(&config.history.db_path),
        history_dir: PathBuf::from(&config.history.dir),
    });

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr = %addr, "motion-snap history API starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_snap_common::history::HISTORY_SCHEMA;

    fn seeded_db(path: &Path, rows: usize) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(HISTORY_SCHEMA).unwrap();
        for i in 0..rows as i64 {
            conn.execute(
                "INSERT INTO history
                    (seq, captured_at_ms, committed_at_ms, score, path, width, height, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, 640, 480, 1000)",
                params![i, 1739871000000 + i, 1739871002000 + i, 10 + i, format!("d/{i}.jpg")],
            )
            .unwrap();
        }
    }

    #[test]
    fn history_is_newest_first_and_pages_backwards() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("history.db");
        seeded_db(&db_path, 5);
        let conn = open_history_db(&db_path).unwrap();

        let page = query_history(
            &conn,
            &HistoryQuery {
                limit: Some(2),
                before_id: None,
            },
        )
        .unwrap();
        let ids: Vec<i64> = page.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![5, 4]);
        assert_eq!(page[0].image_url, "/history/5/image");
        assert!(page[0].caption.ends_with("(score: 14)"));

        let older = query_history(
            &conn,
            &HistoryQuery {
                limit: Some(10),
                before_id: Some(4),
            },
        )
        .unwrap();
        let ids: Vec<i64> = older.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn missing_entry_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("history.db");
        seeded_db(&db_path, 1);
        let conn = open_history_db(&db_path).unwrap();
        assert!(query_entry(&conn, 1).unwrap().is_some());
        assert!(query_entry(&conn, 99).unwrap().is_none());
    }

    #[test]
    fn image_paths_cannot_escape_history_dir() {
        let dir = Path::new("/srv/history");
        assert_eq!(
            resolve_image_path(dir, "2025-02-18/x.jpg"),
            Some(PathBuf::from("/srv/history/2025-02-18/x.jpg"))
        );
        assert!(resolve_image_path(dir, "../etc/passwd").is_none());
        assert!(resolve_image_path(dir, "/etc/passwd").is_none());
    }
}
