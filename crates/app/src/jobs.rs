use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use jobbox_core::protocol::{AppliedJobsOrder, NewJob};
use jobbox_core::types::{Fields, InsertResult, JobDocument};
use jobbox_core::DocumentId;
use jobbox_storage::StatusToggle;

use crate::error::ApiError;
use crate::router::{AppState, Envelope};
use crate::telemetry;

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<Fields>, JsonRejection>,
) -> Result<Json<Envelope<InsertResult>>, ApiError> {
    let Json(fields) = payload?;
    let now = state.now();
    let job = NewJob { fields }.into_document(DocumentId::generate(), now)?;
    let result = state.storage().jobs().insert(&job, now).await?;

    telemetry::record_job_mutation("create_job");
    info!(stage = "jobs", job_id = %job.id, "job created");
    Ok(Json(Envelope::ok(result)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<JobDocument>>, ApiError> {
    Ok(Json(state.storage().jobs().list_all().await?))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobDocument>, ApiError> {
    let job_id = DocumentId::parse(&id)?;
    Ok(Json(state.storage().jobs().fetch_existing(job_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleStatusRequest {
    job_id: String,
    #[serde(default)]
    job_status: Option<bool>,
}

pub async fn toggle_status(
    State(state): State<AppState>,
    payload: Result<Json<ToggleStatusRequest>, JsonRejection>,
) -> Result<Json<Envelope<StatusToggle>>, ApiError> {
    let Json(body) = payload?;
    let job_id = DocumentId::parse(&body.job_id)?;
    let toggled = state
        .storage()
        .jobs()
        .toggle_status(job_id, body.job_status, state.now())
        .await?;

    telemetry::record_job_mutation("toggle_status");
    info!(stage = "jobs", %job_id, job_status = toggled.job_status, "job status toggled");
    Ok(Json(Envelope::ok(toggled)))
}

pub async fn applied(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Envelope<Vec<Value>>>, ApiError> {
    let jobs = state.storage().jobs().list_applied(&email, None).await?;
    Ok(Json(Envelope::ok(public_views(jobs)?)))
}

pub async fn applied_filtered(
    State(state): State<AppState>,
    Path((filter_value, email)): Path<(String, String)>,
) -> Result<Json<Envelope<Vec<Value>>>, ApiError> {
    let order: AppliedJobsOrder = filter_value.parse()?;
    let jobs = state
        .storage()
        .jobs()
        .list_applied(&email, Some(order))
        .await?;
    Ok(Json(Envelope::ok(public_views(jobs)?)))
}

fn public_views(jobs: Vec<JobDocument>) -> Result<Vec<Value>, ApiError> {
    jobs.into_iter()
        .map(|job| {
            job.into_public_view()
                .map_err(|err| ApiError::Internal(format!("failed to render job: {err}")))
        })
        .collect()
}
