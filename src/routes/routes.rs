//! Defines routes for uploading, listing, retrieving and deleting files.
//!
//! ## Structure
//! - **Upload endpoints** (multipart/form-data)
//!   - `POST   /upload/single`  : field `file`, one file
//!   - `POST   /upload/multiple`: field `files`, up to the configured count
//!   - `POST   /upload/image`   : field `image`, one `image/*` file
//!   - `POST   /upload/fields`  : fields `avatar`, `gallery`, `documents`
//!
//! - **File endpoints**
//!   - `GET    /files`           : list every stored file
//!   - `DELETE /files/{filename}`: delete by bare filename
//!   - `GET    {public_base}/{bucket}/{name}`: download a stored file
//!
//! Each upload route carries its own request body limit derived from its policy.

use crate::handlers::{
    AppState,
    file_handlers::{delete_file, index, list_files, serve_file},
    health_handlers::{healthz, readyz},
    upload_handlers::{upload_fields, upload_image, upload_multiple, upload_single},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router for all upload and file routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes(state: &AppState) -> Router<AppState> {
    let policies = &state.policies;
    let serve_path = format!(
        "{}/{{bucket}}/{{name}}",
        state.storage.public_base.trim_end_matches('/')
    );

    Router::new()
        .route("/", get(index))
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Upload routes
        .route(
            "/upload/single",
            post(upload_single)
                .layer(DefaultBodyLimit::max(policies.single.request_body_limit())),
        )
        .route(
            "/upload/multiple",
            post(upload_multiple)
                .layer(DefaultBodyLimit::max(policies.multiple.request_body_limit())),
        )
        .route(
            "/upload/image",
            post(upload_image).layer(DefaultBodyLimit::max(policies.image.request_body_limit())),
        )
        .route(
            "/upload/fields",
            post(upload_fields)
                .layer(DefaultBodyLimit::max(policies.fields.request_body_limit())),
        )
        // File routes
        .route("/files", get(list_files))
        .route("/files/{filename}", delete(delete_file))
        .route(&serve_path, get(serve_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        models::policy::EndpointPolicies,
        services::storage_service::StorageService,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    const BOUNDARY: &str = "upload-store-test-boundary";
    const MIB: usize = 1024 * 1024;

    struct Part<'a> {
        field: &'a str,
        filename: Option<&'a str>,
        content_type: &'a str,
        data: Vec<u8>,
    }

    fn file<'a>(field: &'a str, filename: &'a str, content_type: &'a str, data: Vec<u8>) -> Part<'a> {
        Part {
            field,
            filename: Some(filename),
            content_type,
            data,
        }
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part.filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        part.field, filename, part.content_type
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.field)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(&part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn setup() -> (TempDir, AppState, Router) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&root).unwrap();

        let cfg = AppConfig::for_storage_dir(root.to_string_lossy());
        let storage = StorageService::new(&root, cfg.public_base.clone());
        let state = AppState::new(storage, EndpointPolicies::from_config(&cfg));
        let app = routes(&state).with_state(state.clone());
        (temp_dir, state, app)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn upload(app: &Router, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn delete_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Count every file under the root, hidden ones included.
    fn files_on_disk(state: &AppState) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .map(|entry| {
                            let path = entry.unwrap().path();
                            if path.is_dir() { walk(&path) } else { 1 }
                        })
                        .sum::<usize>()
                })
                .unwrap_or(0)
        }
        walk(&state.storage.base_path)
    }

    #[tokio::test]
    async fn single_upload_lists_serves_and_deletes() {
        let (_tmp, state, app) = setup();
        let data = vec![b'%'; 2 * MIB];

        let (status, body) = upload(
            &app,
            "/upload/single",
            &[file("file", "report.pdf", "application/pdf", data.clone())],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let relative = body["file"]["relativePath"].as_str().unwrap().to_string();
        let url = body["file"]["url"].as_str().unwrap().to_string();
        let storage_name = body["file"]["storageName"].as_str().unwrap().to_string();
        assert!(relative.starts_with(&format!("{today}/report-")));
        assert!(relative.ends_with(".pdf"));
        assert!(url.ends_with(&relative));
        assert_eq!(body["file"]["originalName"], "report.pdf");
        assert_eq!(body["file"]["sizeBytes"], 2 * MIB);
        assert!(body["file"]["createdAt"].is_string());

        let (status, listing) = get_json(&app, "/files").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["count"], 1);
        assert_eq!(listing["files"][0]["url"], url.as_str());
        assert_eq!(listing["files"][0]["filename"], storage_name.as_str());

        let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let served = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(served.len(), data.len());

        let (status, deleted) = delete_json(&app, &format!("/files/{storage_name}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["relativePath"], relative.as_str());

        let (_, listing) = get_json(&app, "/files").await;
        assert_eq!(listing["count"], 0);
        assert_eq!(files_on_disk(&state), 0);

        let (status, _) = delete_json(&app, &format!("/files/{storage_name}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversize_image_is_rejected_without_residue() {
        let (_tmp, state, app) = setup();

        let (status, body) = upload(
            &app,
            "/upload/image",
            &[file("image", "huge.png", "image/png", vec![0u8; 6 * MIB])],
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
        assert_eq!(files_on_disk(&state), 0);
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(!state.storage.base_path.join(today).exists());
    }

    #[tokio::test]
    async fn image_endpoint_rejects_documents() {
        let (_tmp, state, app) = setup();

        let (status, body) = upload(
            &app,
            "/upload/image",
            &[file("image", "cv.pdf", "application/pdf", b"%PDF".to_vec())],
        )
        .await;

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body["error"].as_str().unwrap().contains("application/pdf"));
        assert_eq!(files_on_disk(&state), 0);
    }

    #[tokio::test]
    async fn executables_are_rejected() {
        let (_tmp, state, app) = setup();

        let (status, body) = upload(
            &app,
            "/upload/single",
            &[file("file", "setup.exe", "application/x-msdownload", b"MZ".to_vec())],
        )
        .await;

        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body["error"].as_str().unwrap().contains("application/x-msdownload"));
        assert_eq!(files_on_disk(&state), 0);
    }

    #[tokio::test]
    async fn unexpected_field_and_missing_file_are_bad_requests() {
        let (_tmp, _state, app) = setup();

        let (status, _) = upload(
            &app,
            "/upload/single",
            &[file("attachment", "a.txt", "text/plain", b"hi".to_vec())],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = upload(
            &app,
            "/upload/single",
            &[Part {
                field: "note",
                filename: None,
                content_type: "text/plain",
                data: b"just text".to_vec(),
            }],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "no file provided");
    }

    #[tokio::test]
    async fn multiple_upload_stores_each_file() {
        let (_tmp, _state, app) = setup();

        let (status, body) = upload(
            &app,
            "/upload/multiple",
            &[
                file("files", "a.txt", "text/plain", b"aaa".to_vec()),
                file("files", "b.png", "image/png", b"png".to_vec()),
            ],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["files"].as_array().unwrap().len(), 2);
        assert!(body["failed"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn too_many_files_rolls_back_the_request() {
        let (_tmp, state, app) = setup();
        let parts: Vec<_> = (0..6)
            .map(|_| file("files", "a.txt", "text/plain", b"x".to_vec()))
            .collect();

        let (status, _) = upload(&app, "/upload/multiple", &parts).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(files_on_disk(&state), 0);
    }

    #[tokio::test]
    async fn fields_upload_groups_files() {
        let (_tmp, _state, app) = setup();

        let (status, body) = upload(
            &app,
            "/upload/fields",
            &[
                file("avatar", "me.png", "image/png", b"1".to_vec()),
                file("gallery", "g1.jpg", "image/jpeg", b"2".to_vec()),
                file("gallery", "g2.gif", "image/gif", b"3".to_vec()),
                file("documents", "cv.pdf", "application/pdf", b"4".to_vec()),
            ],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"]["avatar"].as_array().unwrap().len(), 1);
        assert_eq!(body["files"]["gallery"].as_array().unwrap().len(), 2);
        assert_eq!(body["files"]["documents"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_ignores_directory_components() {
        let (_tmp, _state, app) = setup();

        let (status, body) = delete_json(&app, "/files/..%2F..%2Fetc%2Fpasswd").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn serving_unknown_paths_is_not_found() {
        let (_tmp, _state, app) = setup();

        for uri in ["/uploads/2024-01-15/missing.txt", "/uploads/not-a-date/a.txt"] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, _) = send(&app, request).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn health_checks_and_form() {
        let (_tmp, _state, app) = setup();

        let (status, body) = get_json(&app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(&app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["disk"]["ok"], true);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("/upload/single"));
    }
}
