//! # API REST
//!
//! REST API for the master patient index.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialisation, CORS, status codes)
//!
//! The matching and merge logic lives in `mpi-core`; handlers here only translate between JSON
//! and core calls.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use mpi_core::{
    Actor, DuplicateCheckResult, DuplicateMatch, Gender, MergeRecord, MpiError, PatientDraft,
    PatientStore, ResolutionService, StoreError, StoredPatient, SuggestedAction,
};
use mpi_uuid::PatientId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// The resolution service as the REST layer holds it.
pub type SharedResolver = Arc<ResolutionService<dyn PatientStore>>;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    resolver: SharedResolver,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Body of `POST /merges`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MergeReq {
    pub primary_id: String,
    pub duplicate_ids: Vec<String>,
    /// Defaults to `system` when omitted.
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, check_duplicates, merge_patients, merge_history),
    components(schemas(
        HealthRes,
        MergeReq,
        PatientDraft,
        Gender,
        StoredPatient,
        DuplicateCheckResult,
        DuplicateMatch,
        SuggestedAction,
        MergeRecord,
        Actor,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router over `resolver`, with Swagger UI at `/swagger-ui`.
pub fn router(resolver: SharedResolver) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/duplicates/check", post(check_duplicates))
        .route("/merges", post(merge_patients))
        .route("/patients/:id/merges", get(merge_history))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(AppState { resolver })
}

/// Maps a core error onto a status code and a short public message.
fn error_response(context: &str, err: MpiError) -> (StatusCode, &'static str) {
    match err {
        MpiError::InvalidInput(_) | MpiError::Uuid(_) => {
            tracing::warn!("{}: {}", context, err);
            (StatusCode::BAD_REQUEST, "Invalid request")
        }
        MpiError::Store(StoreError::NotFound(_)) => {
            tracing::warn!("{}: {}", context, err);
            (StatusCode::NOT_FOUND, "Patient not found")
        }
        MpiError::Store(StoreError::AlreadyMerged(_)) => {
            tracing::warn!("{}: {}", context, err);
            (StatusCode::CONFLICT, "Patient already merged")
        }
        other => {
            tracing::error!("{}: {:?}", context, other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

fn parse_id(raw: &str) -> Result<PatientId, (StatusCode, &'static str)> {
    PatientId::parse(raw).map_err(|e| {
        tracing::warn!("Invalid patient id {:?}: {}", raw, e);
        (StatusCode::BAD_REQUEST, "Invalid patient id")
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "MPI REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/duplicates/check",
    request_body = PatientDraft,
    responses(
        (status = 200, description = "Duplicate check result", body = DuplicateCheckResult),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Internal server error")
    )
)]
/// Check a prospective registration for duplicates
///
/// Runs every match rule against the submitted demographics and returns the matches with a
/// suggested action (`block`, `warn` or `allow`).
///
/// # Errors
/// Only when the service runs fail-closed:
/// - `400 Bad Request` if the draft carries no searchable field,
/// - `500 Internal Server Error` if the check timed out.
#[axum::debug_handler]
async fn check_duplicates(
    State(state): State<AppState>,
    Json(draft): Json<PatientDraft>,
) -> Result<Json<DuplicateCheckResult>, (StatusCode, &'static str)> {
    state
        .resolver
        .check_duplicates(&draft)
        .await
        .map(Json)
        .map_err(|e| error_response("Duplicate check error", e))
}

#[utoipa::path(
    post,
    path = "/merges",
    request_body = MergeReq,
    responses(
        (status = 201, description = "Patients merged", body = MergeRecord),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Patient not found"),
        (status = 409, description = "Patient already merged"),
        (status = 500, description = "Internal server error")
    )
)]
/// Merge duplicate records into a primary record
///
/// Marks every duplicate as merged into the primary and writes one audit row.
///
/// # Errors
/// - `400 Bad Request` for malformed ids, an empty or repeating duplicate list, or an invalid
///   actor,
/// - `404 Not Found` if any id is unknown,
/// - `409 Conflict` if any record is already merged,
/// - `500 Internal Server Error` if the store write fails.
#[axum::debug_handler]
async fn merge_patients(
    State(state): State<AppState>,
    Json(req): Json<MergeReq>,
) -> Result<(StatusCode, Json<MergeRecord>), (StatusCode, &'static str)> {
    let primary_id = parse_id(&req.primary_id)?;
    let duplicate_ids = req
        .duplicate_ids
        .iter()
        .map(|id| parse_id(id))
        .collect::<Result<Vec<_>, _>>()?;
    let actor = match req.actor {
        Some(name) => Actor::new(name).map_err(|e| error_response("Invalid actor", e))?,
        None => Actor::system(),
    };

    let record = state
        .resolver
        .merge_patients(primary_id, duplicate_ids, actor)
        .await
        .map_err(|e| error_response("Merge error", e))?;

    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/merges",
    params(
        ("id" = String, Path, description = "Patient id (32 lowercase hex)")
    ),
    responses(
        (status = 200, description = "Merges involving the patient, newest first", body = [MergeRecord]),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Internal server error")
    )
)]
#[axum::debug_handler]
async fn merge_history(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Vec<MergeRecord>>, (StatusCode, &'static str)> {
    let patient_id = parse_id(&id)?;
    state
        .resolver
        .merge_history(patient_id)
        .await
        .map(Json)
        .map_err(|e| error_response("Merge history error", e))
}
