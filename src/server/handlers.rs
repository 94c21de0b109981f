use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{TranslateError, TranslateResult};
use crate::export::ExportArtifact;
use crate::geom::PercentRect;
use crate::glossary::{GlossaryPatch, NewGlossaryEntry};
use crate::service;
use crate::session::validate_session_id;
use crate::settings;

use super::models::{
    BlockRequest, DocumentRequest, ErrorResponse, ExportRequest, PageRequest, PreviewQuery,
    RegionRequest, UploadRequest,
};
use super::state::{ServerState, SessionGuard, SessionLocks};

/// Base64 JSON uploads of large decks need far more than axum's default.
const BODY_LIMIT: usize = 200 * 1024 * 1024;

pub async fn run_server(settings: settings::Settings, addr: Option<String>) -> Result<()> {
    let service = service::open_service(&settings)?;
    let addr = addr.unwrap_or_else(|| settings.server_addr.clone());
    let state = Arc::new(ServerState {
        settings,
        service: Arc::new(service),
        locks: SessionLocks::default(),
    });
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/settings", get(settings_info))
        .route("/api/test-api", post(test_api))
        .route("/api/doc/upload", post(upload))
        .route("/api/doc/translate-page", post(translate_page))
        .route("/api/doc/translate-all", post(translate_all))
        .route("/api/doc/translate-region", post(translate_region))
        .route("/api/doc/region-block", post(save_region_block))
        .route("/api/doc/region-block/delete", post(delete_region_block))
        .route("/api/doc/preview", get(preview))
        .route("/api/doc/export", get(export_query).post(export_body))
        .route("/api/glossary", get(list_glossary).post(add_glossary))
        .route("/api/glossary/:id", put(update_glossary).delete(delete_glossary))
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(axum::middleware::from_fn(cors_middleware));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address {}", addr))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Failure answered as `{ "success": false, "error": ..., "kind": ... }`.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
    kind: &'static str,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            kind: "validation",
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            kind: "internal",
        }
    }
}

impl From<TranslateError> for ApiError {
    fn from(err: TranslateError) -> Self {
        let status = match &err {
            TranslateError::Validation(_) => StatusCode::BAD_REQUEST,
            TranslateError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TranslateError::Provider(_) => StatusCode::BAD_GATEWAY,
            TranslateError::Composition(_) | TranslateError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!("request failed: {:#}", err);
        }
        Self {
            status,
            message: err.to_string(),
            kind: err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorResponse {
            success: false,
            error: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Merges `"success": true` into an object payload.
fn success<T: Serialize>(payload: T) -> ApiResult {
    let value = serde_json::to_value(payload)
        .map_err(|err| ApiError::internal(format!("failed to encode response: {}", err)))?;
    let value = match value {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Value::Null => json!({ "success": true }),
        other => json!({ "success": true, "data": other }),
    };
    Ok(Json(value))
}

/// Runs service work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> TranslateResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("server task failed: {}", err)))?
        .map_err(ApiError::from)
}

/// [`blocking`] with the session lock moved into the work, so it is held until the work ends
/// even when the request itself is dropped.
async fn locked_blocking<T, F>(guard: SessionGuard, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> TranslateResult<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(move || {
        let _guard = guard;
        work()
    })
    .await
}

fn session_id(file_id: &str) -> Result<String, ApiError> {
    let file_id = file_id.trim();
    validate_session_id(file_id)?;
    Ok(file_id.to_string())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,PUT,DELETE,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
    headers.insert(
        "access-control-expose-headers",
        HeaderValue::from_static("content-disposition"),
    );
}

async fn settings_info(State(state): State<Arc<ServerState>>) -> ApiResult {
    success(json!({ "settings": state.settings.public_view() }))
}

async fn test_api(State(state): State<Arc<ServerState>>) -> ApiResult {
    let service = state.service.clone();
    let handle = tokio::runtime::Handle::current();
    let report = blocking(move || handle.block_on(service.check_connectivity())).await?;
    success(report)
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<UploadRequest>,
) -> ApiResult {
    if payload.data_base64.trim().is_empty() {
        return Err(ApiError::bad_request("no file uploaded"));
    }
    let bytes = BASE64
        .decode(payload.data_base64.trim())
        .map_err(|err| ApiError::bad_request(format!("invalid base64 payload: {}", err)))?;
    let service = state.service.clone();
    let summary = blocking(move || service.upload(&payload.filename, &bytes)).await?;
    success(summary)
}

async fn translate_page(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<PageRequest>,
) -> ApiResult {
    let file_id = session_id(&payload.file_id)?;
    let target_lang = payload.language.resolve().map_err(ApiError::bad_request)?;
    let guard = state.locks.acquire(&file_id).await;
    let service = state.service.clone();
    let handle = tokio::runtime::Handle::current();
    let result = locked_blocking(guard, move || {
        handle.block_on(service.translate_page(&file_id, payload.page, target_lang.as_deref()))
    })
    .await?;
    success(result)
}

async fn translate_all(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<DocumentRequest>,
) -> ApiResult {
    let file_id = session_id(&payload.file_id)?;
    let target_lang = payload.language.resolve().map_err(ApiError::bad_request)?;
    let guard = state.locks.acquire(&file_id).await;
    let service = state.service.clone();
    let handle = tokio::runtime::Handle::current();
    let summary = locked_blocking(guard, move || {
        handle.block_on(service.translate_all(&file_id, target_lang.as_deref()))
    })
    .await?;
    success(summary)
}

async fn translate_region(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<RegionRequest>,
) -> ApiResult {
    let file_id = session_id(&payload.file_id)?;
    let target_lang = payload.language.resolve().map_err(ApiError::bad_request)?;
    let region = payload
        .region
        .map(|region| PercentRect::new(region.x, region.y, region.width, region.height))
        .ok_or_else(|| ApiError::bad_request("missing region"))?;
    let service = state.service.clone();
    let handle = tokio::runtime::Handle::current();
    let result = blocking(move || {
        handle.block_on(service.translate_region(
            &file_id,
            payload.page,
            region,
            payload.image.as_deref(),
            target_lang.as_deref(),
        ))
    })
    .await?;
    success(result)
}

async fn save_region_block(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<BlockRequest>,
) -> ApiResult {
    let file_id = session_id(&payload.file_id)?;
    let block = payload
        .block
        .ok_or_else(|| ApiError::bad_request("missing block"))?;
    let guard = state.locks.acquire(&file_id).await;
    let service = state.service.clone();
    let result = locked_blocking(guard, move || {
        service.save_region_block(&file_id, payload.page, block)
    })
    .await?;
    success(result)
}

async fn delete_region_block(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<BlockRequest>,
) -> ApiResult {
    let file_id = session_id(&payload.file_id)?;
    let probe = payload
        .block
        .ok_or_else(|| ApiError::bad_request("missing block"))?;
    let guard = state.locks.acquire(&file_id).await;
    let service = state.service.clone();
    let result = locked_blocking(guard, move || {
        service.delete_region_block(&file_id, payload.page, &probe)
    })
    .await?;
    success(result)
}

async fn preview(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult {
    let file_id = session_id(&query.file_id)?;
    let service = state.service.clone();
    let result = blocking(move || service.preview(&file_id, query.page)).await?;
    success(result)
}

async fn export_query(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ExportRequest>,
) -> Result<Response<Body>, ApiError> {
    export(state, query).await
}

async fn export_body(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ExportRequest>,
) -> Result<Response<Body>, ApiError> {
    export(state, payload).await
}

async fn export(state: Arc<ServerState>, request: ExportRequest) -> Result<Response<Body>, ApiError> {
    let file_id = session_id(&request.file_id)?;
    let service = state.service.clone();
    let artifact = blocking(move || {
        service.export(
            &file_id,
            request.mode.unwrap_or_default(),
            request.orientation,
            request.translation_blocks,
        )
    })
    .await?;
    artifact_response(artifact)
}

fn artifact_response(artifact: ExportArtifact) -> Result<Response<Body>, ApiError> {
    let disposition = HeaderValue::from_str(&artifact.content_disposition)
        .map_err(|err| ApiError::internal(format!("invalid content disposition: {}", err)))?;
    let mut response = Response::new(Body::from(artifact.bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(artifact.mime));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

async fn list_glossary(State(state): State<Arc<ServerState>>) -> ApiResult {
    let service = state.service.clone();
    let glossary = blocking(move || service.glossary().list()).await?;
    success(json!({ "glossary": glossary }))
}

async fn add_glossary(
    State(state): State<Arc<ServerState>>,
    Json(entry): Json<NewGlossaryEntry>,
) -> ApiResult {
    let service = state.service.clone();
    let term = blocking(move || service.glossary().add(entry)).await?;
    success(json!({ "term": term }))
}

async fn update_glossary(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(patch): Json<GlossaryPatch>,
) -> ApiResult {
    let service = state.service.clone();
    let term = blocking(move || service.glossary().update(&id, patch)).await?;
    success(json!({ "term": term }))
}

async fn delete_glossary(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let service = state.service.clone();
    blocking(move || service.glossary().delete(&id)).await?;
    success(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use std::time::Duration;

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (TranslateError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                TranslateError::extraction("no text detected on page 1"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                TranslateError::from(ProviderError::new(Some(429), "slow down")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                TranslateError::composition("broken"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.kind, kind);
        }
    }

    #[test]
    fn success_merges_flag_into_objects() {
        let Json(value) = success(json!({ "page": 2 })).unwrap();
        assert_eq!(value, json!({ "page": 2, "success": true }));
        let Json(value) = success(vec![1, 2]).unwrap();
        assert_eq!(value, json!({ "success": true, "data": [1, 2] }));
    }

    #[test]
    fn session_ids_are_checked_before_locking() {
        assert_eq!(session_id(" abc12345 ").unwrap(), "abc12345");
        assert_eq!(session_id("../x").unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_stays_locked_until_dropped_request_work_ends() {
        let locks = SessionLocks::default();
        let guard = locks.acquire("abc12345").await;
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let request = locked_blocking(guard, move || {
            let _ = wait.recv();
            Ok(())
        });

        // the client goes away while the work is still running
        let abandoned = tokio::time::timeout(Duration::from_millis(20), request).await;
        assert!(abandoned.is_err());
        let early = tokio::time::timeout(Duration::from_millis(50), locks.acquire("abc12345")).await;
        assert!(early.is_err());

        release.send(()).unwrap();
        let later = tokio::time::timeout(Duration::from_secs(2), locks.acquire("abc12345")).await;
        assert!(later.is_ok());
    }
}
