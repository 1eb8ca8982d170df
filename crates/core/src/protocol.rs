//! Store-independent half of the job update protocol.
//!
//! Every push is described by a `New*` value that validates caller input and
//! produces the exact entry to append, including generated identifiers and
//! timestamps. The storage layer only has to append the entry atomically.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::id::DocumentId;
use crate::types::{
    format_timestamp, ApplicantDetail, CandidateReply, EmployerMessage, Fields, JobDocument,
    QueryEntry, UserDocument,
};

/// Errors raised while turning caller input into documents or entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("field '{0}' is required and must not be blank")]
    MissingField(&'static str),
    #[error("reply target requires either 'queryId' or 'question'")]
    MissingReplyTarget,
    #[error("unknown filter '{0}', expected 'filterByDate' or 'filterCancel'")]
    UnknownFilter(String),
    #[error("document has an unexpected shape: {0}")]
    InvalidDocument(String),
}

fn require(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::MissingField(field));
    }
    Ok(())
}

/// Drops caller keys that would shadow a typed field of the entry.
fn without_reserved(mut fields: Fields, reserved: &[&str]) -> Fields {
    fields.retain(|key, _| !reserved.contains(&key.as_str()));
    fields
}

/// Ordering applied to the applied-jobs listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedJobsOrder {
    /// `filterByDate`: most recently posted first.
    NewestFirst,
    /// `filterCancel`: oldest posting first.
    OldestFirst,
}

impl AppliedJobsOrder {
    pub fn is_descending(self) -> bool {
        matches!(self, Self::NewestFirst)
    }
}

impl FromStr for AppliedJobsOrder {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filterByDate" => Ok(Self::NewestFirst),
            "filterCancel" => Ok(Self::OldestFirst),
            other => Err(ProtocolError::UnknownFilter(other.to_string())),
        }
    }
}

/// Which query entry a reply is appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// Exact entry by its generated id.
    Query(DocumentId),
    /// Entry whose question text matches; only valid when exactly one does.
    Question(String),
}

impl ReplyTarget {
    /// Picks the target from request parts, preferring the query id.
    pub fn from_parts(
        query_id: Option<DocumentId>,
        question: Option<String>,
    ) -> Result<Self, ProtocolError> {
        match (query_id, question) {
            (Some(id), _) => Ok(Self::Query(id)),
            (None, Some(question)) if !question.trim().is_empty() => Ok(Self::Question(question)),
            _ => Err(ProtocolError::MissingReplyTarget),
        }
    }

    /// Key inside a query entry compared against [`Self::match_value`].
    pub fn match_field(&self) -> &'static str {
        match self {
            Self::Query(_) => "queryId",
            Self::Question(_) => "question",
        }
    }

    pub fn match_value(&self) -> String {
        match self {
            Self::Query(id) => id.to_string(),
            Self::Question(question) => question.clone(),
        }
    }

    /// Returns `true` when the entry is selected by this target.
    pub fn matches(&self, entry: &QueryEntry) -> bool {
        match self {
            Self::Query(id) => entry.query_id == *id,
            Self::Question(question) => entry.question == *question,
        }
    }
}

/// Caller supplied fields for a new job posting.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub fields: Fields,
}

impl NewJob {
    /// Builds the stored document: assigns `_id`, defaults `jobStatus` to open and
    /// `postedDate` to `now` when the caller did not send them.
    pub fn into_document(
        mut self,
        id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<JobDocument, ProtocolError> {
        self.fields.insert("_id".to_string(), json!(id.to_string()));
        self.fields
            .entry("jobStatus")
            .or_insert(Value::Bool(true));
        self.fields
            .entry("postedDate")
            .or_insert_with(|| Value::String(format_timestamp(now)));

        serde_json::from_value(Value::Object(self.fields))
            .map_err(|err| ProtocolError::InvalidDocument(err.to_string()))
    }
}

/// Caller supplied fields for a new user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub fields: Fields,
}

impl NewUser {
    pub fn into_document(mut self, id: DocumentId) -> Result<UserDocument, ProtocolError> {
        let email = self
            .fields
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default();
        require("email", email)?;

        self.fields.insert("_id".to_string(), json!(id.to_string()));
        serde_json::from_value(Value::Object(self.fields))
            .map_err(|err| ProtocolError::InvalidDocument(err.to_string()))
    }
}

/// An application to push onto `applicantDetails`.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub user_id: DocumentId,
    pub email: String,
    pub applied_job: Option<Value>,
    pub apply_status: Option<Value>,
    pub profile: Fields,
}

impl NewApplication {
    pub fn into_entry(self, now: DateTime<Utc>) -> Result<ApplicantDetail, ProtocolError> {
        require("email", &self.email)?;
        Ok(ApplicantDetail {
            id: self.user_id,
            email: self.email,
            applied_job: self.applied_job,
            apply_status: self.apply_status,
            applied_at: Some(now),
            profile: without_reserved(self.profile, ApplicantDetail::RESERVED_KEYS),
        })
    }
}

/// A question to push onto `queries`.
#[derive(Debug, Clone)]
pub struct NewQuery {
    pub asker_id: DocumentId,
    pub job_id: DocumentId,
    pub email: String,
    pub question: String,
}

impl NewQuery {
    pub fn into_entry(self, now: DateTime<Utc>) -> Result<QueryEntry, ProtocolError> {
        require("email", &self.email)?;
        require("question", &self.question)?;
        Ok(QueryEntry {
            query_id: DocumentId::generate(),
            id: self.asker_id,
            job_id: self.job_id,
            email: self.email,
            question: self.question,
            reply: Vec::new(),
            asked_at: now,
        })
    }
}

/// An employer message to push onto `employerTexts`.
#[derive(Debug, Clone)]
pub struct NewEmployerMessage {
    pub job_id: DocumentId,
    pub candidate_email: String,
    pub employer_email: Option<String>,
    pub applied_job: Option<String>,
    pub message: String,
    pub extra: Fields,
}

impl NewEmployerMessage {
    pub fn into_entry(self, now: DateTime<Utc>) -> Result<EmployerMessage, ProtocolError> {
        require("candidateEmail", &self.candidate_email)?;
        require("message", &self.message)?;
        Ok(EmployerMessage {
            message_id: DocumentId::generate(),
            job_id: self.job_id,
            candidate_email: self.candidate_email,
            employer_email: self.employer_email,
            applied_job: self.applied_job,
            message: self.message,
            reply: Vec::new(),
            sent_at: now,
            extra: without_reserved(self.extra, EmployerMessage::RESERVED_KEYS),
        })
    }
}

/// A candidate reply to push onto `candidateReply`.
#[derive(Debug, Clone)]
pub struct NewCandidateReply {
    pub job_id: DocumentId,
    pub candidate_email: String,
    pub employer_email: Option<String>,
    pub applied_job: Option<String>,
    pub reply: String,
    pub extra: Fields,
}

impl NewCandidateReply {
    pub fn into_entry(self, now: DateTime<Utc>) -> Result<CandidateReply, ProtocolError> {
        require("candidateEmail", &self.candidate_email)?;
        require("reply", &self.reply)?;
        Ok(CandidateReply {
            reply_id: DocumentId::generate(),
            job_id: self.job_id,
            candidate_email: self.candidate_email,
            employer_email: self.employer_email,
            applied_job: self.applied_job,
            reply: self.reply,
            sent_at: now,
            extra: without_reserved(self.extra, CandidateReply::RESERVED_KEYS),
        })
    }
}

/// Validates a reply text appended to a query.
pub fn validate_reply_text(reply: &str) -> Result<(), ProtocolError> {
    require("reply", reply)
}
