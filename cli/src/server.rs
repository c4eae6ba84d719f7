use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use tower_http::limit::RequestBodyLimitLayer;

use reps_core::models::{Month, MonthHeader, parse_date, validate_exercises};
use reps_core::remote::{
    CreateDayRecordRequest, CreateDayRecordResponse, ErrorResponse, RemoteDayRecord,
    ReplaceExercisesRequest,
};
use reps_core::store::RecordStore;

const BODY_LIMIT: usize = 2 * 1024 * 1024; // 2 MB

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<RecordStore>>,
    api_key: Option<String>,
}

impl AppState {
    fn store(&self) -> MutexGuard<'_, RecordStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<RemoteDayRecord>, ApiError> {
    let date = parse_date(&date).map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let record = state.store().get_by_date(date).context("database error")?;
    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No record for {date}")))
}

async fn create_day(
    State(state): State<AppState>,
    Json(req): Json<CreateDayRecordRequest>,
) -> Result<(StatusCode, Json<CreateDayRecordResponse>), ApiError> {
    validate_exercises(&req.exercises).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let created = state
        .store()
        .create(req.date, &req.exercises)
        .context("failed to create day record")?;
    let remote_id = created.ok_or_else(|| {
        ApiError::Conflict(format!("A record for {} already exists", req.date))
    })?;

    tracing::info!(date = %req.date, %remote_id, "created day record");
    Ok((
        StatusCode::CREATED,
        Json(CreateDayRecordResponse { remote_id }),
    ))
}

async fn replace_exercises(
    State(state): State<AppState>,
    Path(remote_id): Path<String>,
    Json(req): Json<ReplaceExercisesRequest>,
) -> Result<StatusCode, ApiError> {
    validate_exercises(&req.exercises).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let replaced = state
        .store()
        .replace_exercises(&remote_id, &req.exercises)
        .context("failed to replace exercises")?;
    if !replaced {
        return Err(ApiError::NotFound(format!("No record with id {remote_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_month(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Json<Vec<MonthHeader>>, ApiError> {
    let month = month
        .parse::<Month>()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let headers = state.store().list_month(month).context("database error")?;
    Ok(Json(headers))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/days", post(create_day))
        .route("/api/days/{date}", get(get_day))
        .route("/api/records/{remote_id}/exercises", put(replace_exercises))
        .route("/api/months/{month}", get(list_month))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        // Added after the auth layer so probes work without a key.
        .route("/api/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub(crate) fn router(store: RecordStore, api_key: Option<String>) -> Router {
    build_router(AppState {
        store: Arc::new(Mutex::new(store)),
        api_key,
    })
}

// --- Server startup ---

/// First and last four characters of the key. Short keys are fully masked.
fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn start_server(
    store: RecordStore,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let app = router(store, api_key.clone());

    if let Some(ref key) = api_key {
        if new_api_key {
            eprintln!("Generated new API key: {key}");
            eprintln!("Clients use it with --api-key or REPS_API_KEY");
        } else {
            eprintln!(
                "API key: {} (see api_key file in data directory)",
                redact_key(key)
            );
        }
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
