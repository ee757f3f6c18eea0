//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks disk I/O under the storage root

use crate::handlers::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe: always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Performs a write/read/delete round trip on a hidden file directly under
/// the storage root. Hidden files never show up in listings.
///
/// HTTP 200 when the check passes, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let disk = check_disk(&state.storage.base_path).await;
    let disk_ok = disk.is_ok();

    let mut checks = HashMap::new();
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_ok,
            error: disk.err(),
        },
    );

    let body = ReadyResponse {
        status: if disk_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if disk_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Write, read back and delete a hidden marker directly under `root`.
///
/// The marker is removed whether or not the read succeeds.
async fn check_disk(root: &Path) -> Result<(), String> {
    const MARKER: &[u8] = b"readyz";
    let path = root.join(format!(".readyz-{}", Uuid::new_v4()));

    fs::write(&path, MARKER)
        .await
        .map_err(|err| format!("could not write {}: {}", path.display(), err))?;

    let read_back = fs::read(&path).await;
    let removed = fs::remove_file(&path).await;

    match read_back {
        Ok(bytes) if bytes == MARKER => {}
        Ok(_) => return Err("marker content mismatch".into()),
        Err(err) => return Err(format!("could not read {}: {}", path.display(), err)),
    }
    removed.map_err(|err| format!("could not remove {}: {}", path.display(), err))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
