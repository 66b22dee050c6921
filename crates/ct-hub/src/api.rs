//! # API Handlers
//!
//! Axum handlers for document ingest, lookups, analytics and async polling.
//! Errors render as `{"error": CODE}` with a status derived from the code;
//! partial saves additionally list the ids that were saved.

use crate::cache::CacheLookup;
use crate::executor::QueryExecutor;
use crate::store::QueryStore;
use axum::{
    async_trait,
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ct_core::{
    ActionRequest, ActionResponse, AsyncDataToken, Document, ErrorCode, QueryStoreError,
    TableFieldMapping,
};
use ct_store::Table;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub executor: Arc<QueryExecutor>,
    pub store: Arc<QueryStore>,
    pub started_at: DateTime<Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/document/:table",
            post(save_document).get(get_documents),
        )
        .route("/document/:table/bulk", post(save_documents))
        .route("/document/:table/:id", get(get_document))
        .route("/mappings/:table", get(field_mappings))
        .route("/analytics", post(analytics))
        .route("/async/analytics", post(async_analytics))
        .route("/async/:action/:key", get(poll))
        .route("/tables", post(create_table).get(list_tables))
        .route("/tables/:name", get(get_table))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NoSuchTable | ErrorCode::InvalidRequest | ErrorCode::UnknownAction => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::DocumentNotFound => StatusCode::NOT_FOUND,
        ErrorCode::ExecutionTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::ExecutorRejected | ErrorCode::CacheUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCode::DocumentSaveError | ErrorCode::DocumentGetError | ErrorCode::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub struct ApiError(QueryStoreError);

impl From<QueryStoreError> for ApiError {
    fn from(error: QueryStoreError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            tracing::error!("{}", self.0);
        } else {
            tracing::debug!("{}", self.0);
        }
        let mut body = json!({ "error": code });
        if let QueryStoreError::DocumentSaveError { saved, .. } = &self.0 {
            if !saved.is_empty() {
                body["saved"] = json!(saved);
            }
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor whose rejections render as `INVALID_REQUEST`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| QueryStoreError::invalid(rejection.body_text()))?;
        Ok(Self(value))
    }
}

// =============================================================================
// Documents
// =============================================================================

pub async fn save_document(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    ApiJson(document): ApiJson<Document>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    state.store.save(&table, document.clone()).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn save_documents(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    ApiJson(documents): ApiJson<Vec<Document>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.store.save_all(&table, &documents).await?;
    Ok((StatusCode::CREATED, Json(json!({ "saved": documents.len() }))))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Json<Document>> {
    Ok(Json(state.store.get(&table, &id).await?))
}

/// `GET /document/:table?id=a&id=b`
pub async fn get_documents(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Document>>> {
    let ids: Vec<String> = params
        .into_iter()
        .filter(|(k, _)| k == "id")
        .map(|(_, v)| v)
        .collect();
    Ok(Json(state.store.get_all(&table, &ids).await?))
}

pub async fn field_mappings(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> ApiResult<Json<TableFieldMapping>> {
    Ok(Json(state.store.field_mappings(&table).await?))
}

// =============================================================================
// Analytics
// =============================================================================

pub async fn analytics(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ActionRequest>,
) -> ApiResult<Json<ActionResponse>> {
    Ok(Json(state.executor.execute(&request).await?))
}

pub async fn async_analytics(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ActionRequest>,
) -> ApiResult<(StatusCode, Json<AsyncDataToken>)> {
    let token = state.executor.execute_async(&request).await?;
    Ok((StatusCode::ACCEPTED, Json(token)))
}

pub async fn poll(
    State(state): State<Arc<AppState>>,
    Path((action, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let token = AsyncDataToken::new(action, key);
    let response = match state.executor.fetch(&token).await? {
        CacheLookup::Ready(response) => (StatusCode::OK, Json(json!(response))).into_response(),
        CacheLookup::Pending => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "pending" }))).into_response()
        }
        CacheLookup::Absent => {
            (StatusCode::NOT_FOUND, Json(json!({ "status": "absent" }))).into_response()
        }
        CacheLookup::Failed(failure) => (
            status_for(failure.code),
            Json(json!({ "error": failure.code, "message": failure.message })),
        )
            .into_response(),
    };
    Ok(response)
}

// =============================================================================
// Tables & health
// =============================================================================

pub async fn create_table(
    State(state): State<Arc<AppState>>,
    ApiJson(table): ApiJson<Table>,
) -> ApiResult<(StatusCode, Json<Table>)> {
    state.store.create_table(&table).await?;
    Ok((StatusCode::CREATED, Json(table)))
}

pub async fn list_tables(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Table>>> {
    Ok(Json(state.store.tables().await?))
}

pub async fn get_table(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Table>> {
    Ok(Json(state.store.table(&name).await?))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    Json(json!({
        "status": "ok",
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": uptime.num_seconds(),
        "actions": state.executor.registry().opcodes(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{testing, ActionRegistry};
    use crate::cache::MemoryResultCache;
    use crate::executor::WorkerPool;
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> Router {
        let context = Arc::new(testing::empty_context().await);
        let store = Arc::new(QueryStore::new(&context));
        let executor = Arc::new(QueryExecutor::new(
            Arc::new(ActionRegistry::with_defaults().unwrap()),
            context,
            Arc::new(MemoryResultCache::new(Duration::from_secs(60), 100)),
            WorkerPool::new(2, 16),
            Duration::from_secs(5),
        ));
        router(Arc::new(AppState {
            executor,
            store,
            started_at: Utc::now(),
        }))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn seeded() -> Router {
        let app = app().await;
        let docs = json!(testing::documents());
        let (status, _) = send(&app, "POST", "/document/test-app/bulk", Some(docs)).await;
        assert_eq!(status, StatusCode::CREATED);
        app
    }

    #[tokio::test]
    async fn test_save_and_get_document() {
        let app = app().await;
        let doc = json!({"id": "A", "timestamp": 1_397_658_118_000_i64, "data": {"os": "android"}});
        let (status, _) = send(&app, "POST", "/document/test-app", Some(doc.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, "GET", "/document/test-app/A", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, doc);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let app = seeded().await;
        let doc = json!({"id": "A", "timestamp": 1, "data": {}});
        let (status, body) = send(&app, "POST", "/document/nope", Some(doc)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "NO_SUCH_TABLE"}));

        let bad = json!({"id": "", "timestamp": 1, "data": {}});
        let (status, body) = send(&app, "POST", "/document/test-app", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");

        let (status, body) = send(&app, "GET", "/document/test-app/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "DOCUMENT_NOT_FOUND");

        let (status, body) = send(&app, "GET", "/document/test-app?id=A&id=missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "DOCUMENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_bulk_get() {
        let app = seeded().await;
        let (status, body) = send(&app, "GET", "/document/test-app?id=E&id=W", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "E");
        assert_eq!(body[1]["id"], "W");
    }

    #[tokio::test]
    async fn test_sync_analytics() {
        let app = seeded().await;
        let request = json!({
            "opcode": "query",
            "table": "test-app",
            "filters": [{"operator": "equals", "field": "os", "value": "ios"}],
            "sort": {"field": "_timestamp", "order": "desc"}
        });
        let (status, body) = send(&app, "POST", "/analytics", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["opcode"], "query");
        let ids: Vec<&str> = body["documents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["E", "D"]);
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_bad_request() {
        let app = seeded().await;
        let request = json!({"opcode": "trend", "table": "test-app"});
        let (status, body) = send(&app, "POST", "/async/analytics", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UNKNOWN_ACTION");
    }

    #[tokio::test]
    async fn test_async_analytics_round_trip() {
        let app = seeded().await;
        let request = json!({"opcode": "group", "table": "test-app", "nesting": ["os"]});
        let (status, token) = send(&app, "POST", "/async/analytics", Some(request.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let uri = format!(
            "/async/{}/{}",
            token["action"].as_str().unwrap(),
            token["key"].as_str().unwrap()
        );

        let mut result = Value::Null;
        for _ in 0..200 {
            let (status, body) = send(&app, "GET", &uri, None).await;
            if status == StatusCode::OK {
                result = body;
                break;
            }
            assert_eq!(status, StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (_, direct) = send(&app, "POST", "/analytics", Some(request)).await;
        assert_eq!(result, direct);
        assert_eq!(result["result"], json!({"android": 7, "ios": 2}));
    }

    #[tokio::test]
    async fn test_poll_absent() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/async/query/deadbeef", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"status": "absent"}));
    }

    #[tokio::test]
    async fn test_mappings_and_tables() {
        let app = seeded().await;
        let (status, body) = send(&app, "GET", "/mappings/test-app", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["table"], "test-app");
        assert!(body["mappings"]
            .as_array()
            .unwrap()
            .contains(&json!({"field": "battery", "type": "LONG"})));

        let (status, _) = send(&app, "POST", "/tables", Some(json!({"name": "events"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&app, "GET", "/tables/events", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ttl_days"], 15);
        let (status, body) = send(&app, "GET", "/tables", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["events", "test-app"]);

        let (status, body) = send(&app, "GET", "/mappings/ghost", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "NO_SUCH_TABLE");
    }

    #[tokio::test]
    async fn test_health_lists_actions() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["actions"], json!(["group", "histogram", "query"]));
    }

    #[test]
    fn test_status_for_codes() {
        assert_eq!(status_for(ErrorCode::DocumentSaveError), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorCode::ExecutionTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorCode::ExecutorRejected), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_partial_save_body_lists_saved_ids() {
        let error = QueryStoreError::DocumentSaveError {
            table: "test-app".into(),
            message: "1 document(s) failed to index".into(),
            saved: vec!["A".into()],
        };
        let response = ApiError::from(error).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "DOCUMENT_SAVE_ERROR", "saved": ["A"]}));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_invalid_requests() {
        let app = app().await;
        let doc = json!({"id": "A", "timestamp": "abc", "data": {}});
        let (status, body) = send(&app, "POST", "/document/test-app", Some(doc)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "INVALID_REQUEST"}));

        let (status, body) = send(&app, "POST", "/document/test-app/bulk", Some(json!({"id": "A"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");

        let request = json!({"table": "test-app"});
        let (status, body) = send(&app, "POST", "/analytics", Some(request.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "INVALID_REQUEST"}));
        let (status, _) = send(&app, "POST", "/async/analytics", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_without_json_content_type_is_invalid() {
        let app = app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/analytics")
            .body(Body::from(r#"{"opcode": "query", "table": "test-app"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
