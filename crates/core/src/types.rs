use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::DocumentId;

/// Free-form JSON fields carried alongside the typed parts of a document.
pub type Fields = Map<String, Value>;

pub const APPLICANT_DETAILS: &str = "applicantDetails";
pub const QUERIES: &str = "queries";
pub const EMPLOYER_TEXTS: &str = "employerTexts";
pub const CANDIDATE_REPLY: &str = "candidateReply";

/// Renders a timestamp the way documents and ordering columns store it:
/// RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A user record from the users collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub email: String,
    #[serde(flatten)]
    pub fields: Fields,
}

/// Aggregate record for one job posting, embedding everything related to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(default = "default_job_status")]
    pub job_status: bool,
    #[serde(default)]
    pub posted_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_status: Option<Value>,
    #[serde(default)]
    pub applicant_details: Vec<ApplicantDetail>,
    #[serde(default)]
    pub queries: Vec<QueryEntry>,
    #[serde(default)]
    pub employer_texts: Vec<EmployerMessage>,
    #[serde(default)]
    pub candidate_reply: Vec<CandidateReply>,
    #[serde(flatten)]
    pub fields: Fields,
}

fn default_job_status() -> bool {
    true
}

impl JobDocument {
    /// Employer messages addressed to one candidate, in send order.
    pub fn messages_for_candidate(&self, email: &str) -> Vec<EmployerMessage> {
        for_candidate(&self.employer_texts, email)
    }

    /// Replies written by one candidate, in send order.
    pub fn replies_from_candidate(&self, email: &str) -> Vec<CandidateReply> {
        for_candidate(&self.candidate_reply, email)
    }

    /// Renders the document without its applicant list.
    pub fn into_public_view(self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove(APPLICANT_DETAILS);
        }
        Ok(value)
    }
}

/// Entry of a message thread between an employer and one candidate.
pub trait CandidateThread {
    fn candidate_email(&self) -> &str;
}

fn for_candidate<T: CandidateThread + Clone>(entries: &[T], email: &str) -> Vec<T> {
    entries
        .iter()
        .filter(|entry| entry.candidate_email() == email)
        .cloned()
        .collect()
}

/// One application appended to `applicantDetails`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantDetail {
    pub id: DocumentId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_job: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_status: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub profile: Fields,
}

impl ApplicantDetail {
    /// Keys owned by the typed fields; never taken from `profile`.
    pub const RESERVED_KEYS: &'static [&'static str] =
        &["id", "email", "appliedJob", "applyStatus", "appliedAt"];
}

/// A candidate question and the employer replies to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEntry {
    pub query_id: DocumentId,
    /// Asker reference.
    pub id: DocumentId,
    pub job_id: DocumentId,
    pub email: String,
    pub question: String,
    #[serde(default)]
    pub reply: Vec<String>,
    pub asked_at: DateTime<Utc>,
}

/// Message sent by the employer to a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployerMessage {
    pub message_id: DocumentId,
    pub job_id: DocumentId,
    pub candidate_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_job: Option<String>,
    pub message: String,
    #[serde(default)]
    pub reply: Vec<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Fields,
}

impl EmployerMessage {
    /// Keys owned by the typed fields; never taken from `extra`.
    pub const RESERVED_KEYS: &'static [&'static str] = &[
        "messageId",
        "jobId",
        "candidateEmail",
        "employerEmail",
        "appliedJob",
        "message",
        "reply",
        "sentAt",
    ];
}

impl CandidateThread for EmployerMessage {
    fn candidate_email(&self) -> &str {
        &self.candidate_email
    }
}

/// Reply sent by a candidate back to the employer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateReply {
    pub reply_id: DocumentId,
    pub job_id: DocumentId,
    pub candidate_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_job: Option<String>,
    pub reply: String,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Fields,
}

impl CandidateReply {
    /// Keys owned by the typed fields; never taken from `extra`.
    pub const RESERVED_KEYS: &'static [&'static str] = &[
        "replyId",
        "jobId",
        "candidateEmail",
        "employerEmail",
        "appliedJob",
        "reply",
        "sentAt",
    ];
}

impl CandidateThread for CandidateReply {
    fn candidate_email(&self) -> &str {
        &self.candidate_email
    }
}

/// Result of inserting one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertResult {
    pub acknowledged: bool,
    pub inserted_id: DocumentId,
}

impl InsertResult {
    pub fn new(inserted_id: DocumentId) -> Self {
        Self {
            acknowledged: true,
            inserted_id,
        }
    }
}

/// Result of an update against a single job document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

impl UpdateResult {
    pub fn from_rows_affected(rows: u64) -> Self {
        Self {
            acknowledged: true,
            matched_count: rows,
            modified_count: rows,
        }
    }
}
