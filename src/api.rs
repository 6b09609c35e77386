use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::DataError;
use crate::hub::DataHub;
use crate::scheduler::job::UpdateJob;
use crate::scheduler::stats::SchedulerStatistics;
use crate::validation::QualityReport;
use crate::versioning::{DataVersion, Reproduction, VersionMetadata};

pub fn router(hub: DataHub) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/data/{source}", get(get_data))
        .route("/regional/{category}/{region}", get(get_regional))
        .route("/versions/{source}", get(list_versions))
        .route("/versions/{source}/latest", get(latest_version))
        .route("/versions/{source}/as-of", get(version_as_of))
        .route("/quality/{source}", get(quality))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/{id}", get(job_status))
        // `id` is the source id here
        .route("/jobs/{id}/refresh", post(refresh_source))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/calculations/{id}/reproduce", get(reproduce))
        .layer(CorsLayer::very_permissive())
        .with_state(hub)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DataError> for ApiError {
    fn from(e: DataError) -> Self {
        let status = match &e {
            DataError::NoDataAvailable(_)
            | DataError::UnknownSource(_)
            | DataError::JobNotFound(_) => StatusCode::NOT_FOUND,
            DataError::MalformedPayload { .. } => StatusCode::BAD_GATEWAY,
            DataError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(target: "api", status = %self.status, error = %self.message, "request failed");
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct DataQuery {
    #[serde(default)]
    refresh: Option<String>,
}

impl DataQuery {
    fn force(&self) -> bool {
        matches!(self.refresh.as_deref(), Some("1") | Some("true") | Some("yes"))
    }
}

async fn get_data(
    State(hub): State<DataHub>,
    Path(source): Path<String>,
    Query(q): Query<DataQuery>,
) -> ApiResult<Value> {
    Ok(Json(hub.get_data(&source, q.force()).await?))
}

async fn get_regional(
    State(hub): State<DataHub>,
    Path((category, region)): Path<(String, String)>,
) -> ApiResult<Value> {
    let value = hub.get_regional_data(&category, &region).await?;
    Ok(Json(json!({ "category": category, "region": region, "value": value })))
}

/// Version listing without payloads.
#[derive(Serialize)]
struct VersionSummary {
    id: String,
    label: String,
    timestamp: DateTime<Utc>,
    checksum: String,
    metadata: VersionMetadata,
}

impl From<DataVersion> for VersionSummary {
    fn from(v: DataVersion) -> Self {
        Self {
            id: v.id,
            label: v.label,
            timestamp: v.timestamp,
            checksum: v.checksum,
            metadata: v.metadata,
        }
    }
}

async fn list_versions(
    State(hub): State<DataHub>,
    Path(source): Path<String>,
) -> Json<Vec<VersionSummary>> {
    let list = hub.versions().list_versions(&source);
    Json(list.into_iter().map(VersionSummary::from).collect())
}

async fn latest_version(
    State(hub): State<DataHub>,
    Path(source): Path<String>,
) -> ApiResult<DataVersion> {
    hub.get_data_version(&source, None)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no versions stored for {source}")))
}

#[derive(Deserialize)]
struct AsOfQuery {
    ts: String,
}

async fn version_as_of(
    State(hub): State<DataHub>,
    Path(source): Path<String>,
    Query(q): Query<AsOfQuery>,
) -> ApiResult<DataVersion> {
    let at = DateTime::parse_from_rfc3339(&q.ts)
        .map_err(|e| ApiError::bad_request(format!("invalid ts `{}`: {e}", q.ts)))?
        .with_timezone(&Utc);
    hub.get_data_at_timestamp(&source, at)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no version of {source} at or before {at}")))
}

async fn quality(
    State(hub): State<DataHub>,
    Path(source): Path<String>,
) -> ApiResult<QualityReport> {
    let payload = hub.get_data(&source, false).await?;
    Ok(Json(hub.validate_data(&source, &payload)))
}

async fn job_stats(State(hub): State<DataHub>) -> Json<SchedulerStatistics> {
    Json(hub.get_statistics())
}

async fn job_status(State(hub): State<DataHub>, Path(id): Path<String>) -> ApiResult<UpdateJob> {
    hub.get_job_status(&id)
        .map(Json)
        .ok_or_else(|| DataError::JobNotFound(id).into())
}

async fn refresh_source(
    State(hub): State<DataHub>,
    Path(source): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let job_id = hub.schedule_immediate_update(&source)?;
    tracing::info!(target: "api", source = %source, job = %job_id, "manual refresh requested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

async fn cancel_job(State(hub): State<DataHub>, Path(id): Path<String>) -> ApiResult<Value> {
    if hub.get_job_status(&id).is_none() {
        return Err(DataError::JobNotFound(id).into());
    }
    let cancelled = hub.cancel_job(&id);
    Ok(Json(json!({ "job_id": id, "cancelled": cancelled })))
}

async fn reproduce(State(hub): State<DataHub>, Path(id): Path<String>) -> ApiResult<Reproduction> {
    hub.reproduce_calculation(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown calculation {id}")))
}
