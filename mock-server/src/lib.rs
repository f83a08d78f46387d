use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub id: Uuid,
    pub size: usize,
}

pub type Store = Arc<RwLock<HashMap<Uuid, Bytes>>>;

pub fn app() -> Router {
    let store: Store = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/health", get(health))
        .route("/blobs", get(list_blobs).post(create_blob))
        .route(
            "/blobs/{id}",
            get(get_blob).put(put_blob).delete(delete_blob),
        )
        .layer(DefaultBodyLimit::disable())
        .with_state(store)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn health() -> &'static str {
    "ok"
}

async fn list_blobs(State(store): State<Store>) -> Json<Vec<BlobInfo>> {
    let blobs = store.read().await;
    Json(
        blobs
            .iter()
            .map(|(id, data)| BlobInfo {
                id: *id,
                size: data.len(),
            })
            .collect(),
    )
}

async fn create_blob(State(store): State<Store>, body: Bytes) -> (StatusCode, Json<BlobInfo>) {
    let info = BlobInfo {
        id: Uuid::new_v4(),
        size: body.len(),
    };
    tracing::debug!(id = %info.id, size = info.size, "blob created");
    store.write().await.insert(info.id, body);
    (StatusCode::CREATED, Json(info))
}

async fn get_blob(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let blobs = store.read().await;
    let data = blobs.get(&id).cloned().ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

/// Store under a caller-chosen id: 201 when new, 200 when replaced.
async fn put_blob(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> (StatusCode, Json<BlobInfo>) {
    let info = BlobInfo {
        id,
        size: body.len(),
    };
    let replaced = store.write().await.insert(id, body).is_some();
    tracing::debug!(%id, size = info.size, replaced, "blob stored");
    let status = if replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(info))
}

/// Answers 200 with the removed blob's info; the client requires a body
/// length on every response, which a 204 would not carry.
async fn delete_blob(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> Result<Json<BlobInfo>, StatusCode> {
    let data = store.write().await.remove(&id).ok_or(StatusCode::NOT_FOUND)?;
    tracing::debug!(%id, "blob deleted");
    Ok(Json(BlobInfo {
        id,
        size: data.len(),
    }))
}
