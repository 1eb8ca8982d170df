use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use jobbox_core::protocol::{NewCandidateReply, NewEmployerMessage};
use jobbox_core::types::{CandidateReply, EmployerMessage, Fields, UpdateResult};
use jobbox_core::DocumentId;

use crate::error::ApiError;
use crate::router::AppState;
use crate::telemetry;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployerMessageRequest {
    job_id: String,
    #[serde(default)]
    candidate_email: String,
    #[serde(default)]
    employer_email: Option<String>,
    #[serde(default)]
    applied_job: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(flatten)]
    extra: Fields,
}

pub async fn send_employer_message(
    State(state): State<AppState>,
    payload: Result<Json<EmployerMessageRequest>, JsonRejection>,
) -> Result<Json<UpdateResult>, ApiError> {
    let Json(body) = payload?;
    let job_id = DocumentId::parse(&body.job_id)?;
    let now = state.now();
    let entry = NewEmployerMessage {
        job_id,
        candidate_email: body.candidate_email,
        employer_email: body.employer_email,
        applied_job: Some(body.applied_job.unwrap_or_else(|| job_id.to_string())),
        message: body.message,
        extra: body.extra,
    }
    .into_entry(now)?;

    let result = state
        .storage()
        .jobs()
        .push_employer_message(job_id, &entry, now)
        .await?;

    telemetry::record_job_mutation("employer_message");
    info!(stage = "messages", %job_id, message_id = %entry.message_id, "employer message stored");
    Ok(Json(result))
}

/// Messages the employer sent to one candidate about a job.
pub async fn employer_messages(
    State(state): State<AppState>,
    Path((applied_job, email)): Path<(String, String)>,
) -> Result<Json<Vec<EmployerMessage>>, ApiError> {
    let job_id = DocumentId::parse(&applied_job)?;
    let job = state.storage().jobs().fetch_existing(job_id).await?;
    Ok(Json(job.messages_for_candidate(&email)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateReplyRequest {
    job_id: String,
    #[serde(default)]
    candidate_email: String,
    #[serde(default)]
    employer_email: Option<String>,
    #[serde(default)]
    applied_job: Option<String>,
    #[serde(default)]
    reply: String,
    #[serde(flatten)]
    extra: Fields,
}

pub async fn send_candidate_reply(
    State(state): State<AppState>,
    payload: Result<Json<CandidateReplyRequest>, JsonRejection>,
) -> Result<Json<UpdateResult>, ApiError> {
    let Json(body) = payload?;
    let job_id = DocumentId::parse(&body.job_id)?;
    let now = state.now();
    let entry = NewCandidateReply {
        job_id,
        candidate_email: body.candidate_email,
        employer_email: body.employer_email,
        applied_job: body.applied_job,
        reply: body.reply,
        extra: body.extra,
    }
    .into_entry(now)?;

    let result = state
        .storage()
        .jobs()
        .push_candidate_reply(job_id, &entry, now)
        .await?;

    telemetry::record_job_mutation("candidate_reply");
    info!(stage = "messages", %job_id, reply_id = %entry.reply_id, "candidate reply stored");
    Ok(Json(result))
}

pub async fn candidate_replies(
    State(state): State<AppState>,
    Path((job_id, email)): Path<(String, String)>,
) -> Result<Json<Vec<CandidateReply>>, ApiError> {
    let job_id = DocumentId::parse(&job_id)?;
    let job = state.storage().jobs().fetch_existing(job_id).await?;
    Ok(Json(job.replies_from_candidate(&email)))
}
