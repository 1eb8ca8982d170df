//! Candidate side of a job thread: applying, asking questions and the
//! employer's answers to those questions.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use jobbox_core::protocol::{validate_reply_text, NewApplication, NewQuery, ReplyTarget};
use jobbox_core::types::{Fields, UpdateResult};
use jobbox_core::DocumentId;

use crate::error::ApiError;
use crate::router::{AppState, Envelope};
use crate::telemetry;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    job_id: String,
    user_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    applied_job: Option<Value>,
    #[serde(default)]
    apply_status: Option<Value>,
    #[serde(flatten)]
    profile: Fields,
}

pub async fn apply(
    State(state): State<AppState>,
    payload: Result<Json<ApplyRequest>, JsonRejection>,
) -> Result<Json<Envelope<UpdateResult>>, ApiError> {
    let Json(body) = payload?;
    let job_id = DocumentId::parse(&body.job_id)?;
    let now = state.now();
    let entry = NewApplication {
        user_id: DocumentId::parse(&body.user_id)?,
        email: body.email,
        applied_job: body.applied_job,
        apply_status: body.apply_status,
        profile: body.profile,
    }
    .into_entry(now)?;

    let result = state
        .storage()
        .jobs()
        .push_applicant(job_id, &entry, now)
        .await?;

    telemetry::record_job_mutation("apply");
    info!(stage = "applications", %job_id, email = %entry.email, "application recorded");
    Ok(Json(Envelope::ok(result)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    job_id: String,
    user_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    question: String,
}

pub async fn submit_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Envelope<UpdateResult>>, ApiError> {
    let Json(body) = payload?;
    let job_id = DocumentId::parse(&body.job_id)?;
    let now = state.now();
    let entry = NewQuery {
        asker_id: DocumentId::parse(&body.user_id)?,
        job_id,
        email: body.email,
        question: body.question,
    }
    .into_entry(now)?;

    let result = state
        .storage()
        .jobs()
        .push_query(job_id, &entry, now)
        .await?;

    telemetry::record_job_mutation("query");
    info!(stage = "applications", %job_id, query_id = %entry.query_id, "query recorded");
    Ok(Json(Envelope::ok(result)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    job_id: String,
    #[serde(default)]
    query_id: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    reply: String,
}

pub async fn reply(
    State(state): State<AppState>,
    payload: Result<Json<ReplyRequest>, JsonRejection>,
) -> Result<Json<Envelope<UpdateResult>>, ApiError> {
    let Json(body) = payload?;
    let job_id = DocumentId::parse(&body.job_id)?;
    let query_id = body.query_id.as_deref().map(DocumentId::parse).transpose()?;
    let target = ReplyTarget::from_parts(query_id, body.question)?;
    validate_reply_text(&body.reply)?;

    let result = state
        .storage()
        .jobs()
        .push_query_reply(job_id, &target, &body.reply, state.now())
        .await?;

    telemetry::record_job_mutation("reply");
    info!(stage = "applications", %job_id, target = target.match_field(), "query answered");
    Ok(Json(Envelope::ok(result)))
}
