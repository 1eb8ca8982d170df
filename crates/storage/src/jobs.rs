use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use jobbox_core::protocol::{AppliedJobsOrder, ReplyTarget};
use jobbox_core::types::{
    format_timestamp, ApplicantDetail, CandidateReply, EmployerMessage, InsertResult,
    JobDocument, QueryEntry, UpdateResult, CANDIDATE_REPLY, EMPLOYER_TEXTS, QUERIES,
};
use jobbox_core::DocumentId;

use crate::is_unavailable;

/// Pushes the applicant and makes sure both message threads exist without
/// resetting threads created by earlier applications.
const PUSH_APPLICANT: &str = "json_insert(document, \
     '$.applicantDetails', json('[]'), \
     '$.applicantDetails[#]', json(?), \
     '$.employerTexts', json('[]'), \
     '$.candidateReply', json('[]'))";

/// Repository for the jobs collection and the nested-array update protocol.
///
/// Every push is a single `UPDATE` statement, so concurrent pushes against the
/// same job are all applied; their relative order is whatever SQLite commits.
#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores a freshly built job document.
    pub async fn insert(
        &self,
        job: &JobDocument,
        now: DateTime<Utc>,
    ) -> Result<InsertResult, JobError> {
        let document = serde_json::to_string(job)?;
        let created_at = format_timestamp(now);
        sqlx::query(
            "INSERT INTO jobs (id, document, posted_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(document)
        .bind(&job.posted_date)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(InsertResult::new(job.id))
    }

    /// Lists every job in creation order.
    pub async fn list_all(&self) -> Result<Vec<JobDocument>, JobError> {
        let rows = sqlx::query("SELECT document FROM jobs ORDER BY created_at ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| decode(row.try_get::<&str, _>("document")?)).collect()
    }

    /// Loads one job by id.
    pub async fn fetch(&self, job_id: DocumentId) -> Result<Option<JobDocument>, JobError> {
        let row = sqlx::query("SELECT document FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode(row.try_get::<&str, _>("document")?)).transpose()
    }

    /// Loads one job, failing with [`JobError::NotFound`] when it does not exist.
    pub async fn fetch_existing(&self, job_id: DocumentId) -> Result<JobDocument, JobError> {
        self.fetch(job_id).await?.ok_or(JobError::NotFound)
    }

    /// Appends an application and, when given, sets the job level `applyStatus`.
    pub async fn push_applicant(
        &self,
        job_id: DocumentId,
        entry: &ApplicantDetail,
        now: DateTime<Utc>,
    ) -> Result<UpdateResult, JobError> {
        let entry_json = serde_json::to_string(entry)?;
        let status_json = entry
            .apply_status
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let document_expr = match status_json {
            Some(_) => format!("json_set({PUSH_APPLICANT}, '$.applyStatus', json(?))"),
            None => PUSH_APPLICANT.to_string(),
        };
        let sql = format!("UPDATE jobs SET document = {document_expr}, updated_at = ? WHERE id = ?");

        let mut query = sqlx::query(&sql).bind(entry_json);
        if let Some(status) = status_json {
            query = query.bind(status);
        }
        let result = query
            .bind(format_timestamp(now))
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;

        matched(result.rows_affected())
    }

    /// Appends a question to `queries`.
    pub async fn push_query(
        &self,
        job_id: DocumentId,
        entry: &QueryEntry,
        now: DateTime<Utc>,
    ) -> Result<UpdateResult, JobError> {
        self.append(job_id, QUERIES, entry, now).await
    }

    /// Appends an employer message to `employerTexts`.
    pub async fn push_employer_message(
        &self,
        job_id: DocumentId,
        entry: &EmployerMessage,
        now: DateTime<Utc>,
    ) -> Result<UpdateResult, JobError> {
        self.append(job_id, EMPLOYER_TEXTS, entry, now).await
    }

    /// Appends a candidate reply to `candidateReply`.
    pub async fn push_candidate_reply(
        &self,
        job_id: DocumentId,
        entry: &CandidateReply,
        now: DateTime<Utc>,
    ) -> Result<UpdateResult, JobError> {
        self.append(job_id, CANDIDATE_REPLY, entry, now).await
    }

    /// Appends `reply` to the reply list of the single query selected by `target`.
    ///
    /// The entry index is resolved from the current document and the write is
    /// guarded on that index still holding the matching entry. Queries are never
    /// removed, so an index stays valid once observed.
    pub async fn push_query_reply(
        &self,
        job_id: DocumentId,
        target: &ReplyTarget,
        reply: &str,
        now: DateTime<Utc>,
    ) -> Result<UpdateResult, JobError> {
        let job = self.fetch_existing(job_id).await?;
        let mut matching = job
            .queries
            .iter()
            .enumerate()
            .filter(|(_, entry)| target.matches(entry))
            .map(|(index, _)| index);

        let index = match (matching.next(), matching.count()) {
            (None, _) => return Err(JobError::QueryNotFound),
            (Some(index), 0) => index,
            (Some(_), others) => return Err(JobError::AmbiguousQuestion(others + 1)),
        };

        let entry_path = format!("$.{QUERIES}[{index}]");
        let sql = format!(
            "UPDATE jobs \
             SET document = json_insert(document, '{entry_path}.reply', json('[]'), '{entry_path}.reply[#]', ?), \
                 updated_at = ? \
             WHERE id = ? AND json_extract(document, '{entry_path}.{field}') = ?",
            field = target.match_field(),
        );
        let result = sqlx::query(&sql)
            .bind(reply)
            .bind(format_timestamp(now))
            .bind(job_id.to_string())
            .bind(target.match_value())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::QueryNotFound);
        }
        Ok(UpdateResult::from_rows_affected(result.rows_affected()))
    }

    /// Flips `jobStatus`.
    ///
    /// With `current` the new value is its negation, mirroring a client that
    /// sends the status it is looking at; without it the stored value is flipped
    /// in place.
    pub async fn toggle_status(
        &self,
        job_id: DocumentId,
        current: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<StatusToggle, JobError> {
        let next_expr = match current {
            Some(_) => "json(?)",
            None => "json(CASE WHEN json_extract(document, '$.jobStatus') = 0 THEN 'true' ELSE 'false' END)",
        };
        let sql = format!(
            "UPDATE jobs SET document = json_set(document, '$.jobStatus', {next_expr}), updated_at = ? \
             WHERE id = ? \
             RETURNING json_extract(document, '$.jobStatus') AS job_status"
        );

        let mut query = sqlx::query(&sql);
        if let Some(current) = current {
            query = query.bind((!current).to_string());
        }
        let row = query
            .bind(format_timestamp(now))
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(JobError::NotFound)?;

        let job_status: i64 = row.try_get("job_status")?;
        Ok(StatusToggle {
            result: UpdateResult::from_rows_affected(1),
            job_status: job_status != 0,
        })
    }

    /// Jobs the given email has applied to.
    ///
    /// Without an order the jobs come back in creation order; otherwise they are
    /// sorted on `postedDate`.
    pub async fn list_applied(
        &self,
        email: &str,
        order: Option<AppliedJobsOrder>,
    ) -> Result<Vec<JobDocument>, JobError> {
        let order_by = match order {
            None => "created_at ASC, rowid ASC",
            Some(order) if order.is_descending() => "posted_at DESC, created_at DESC, rowid DESC",
            Some(_) => "posted_at ASC, created_at ASC, rowid ASC",
        };
        let sql = format!(
            "SELECT document FROM jobs \
             WHERE EXISTS ( \
                 SELECT 1 FROM json_each(jobs.document, '$.applicantDetails') \
                  WHERE json_extract(value, '$.email') = ?) \
             ORDER BY {order_by}"
        );

        let rows = sqlx::query(&sql)
            .bind(email)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| decode(row.try_get::<&str, _>("document")?)).collect()
    }

    async fn append<T: Serialize>(
        &self,
        job_id: DocumentId,
        array: &'static str,
        entry: &T,
        now: DateTime<Utc>,
    ) -> Result<UpdateResult, JobError> {
        let entry_json = serde_json::to_string(entry)?;
        let result = sqlx::query(
            "UPDATE jobs \
             SET document = json_insert(document, ?, json('[]'), ?, json(?)), \
                 updated_at = ? \
             WHERE id = ?",
        )
        .bind(format!("$.{array}"))
        .bind(format!("$.{array}[#]"))
        .bind(entry_json)
        .bind(format_timestamp(now))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        matched(result.rows_affected())
    }
}

fn decode(document: &str) -> Result<JobDocument, JobError> {
    Ok(serde_json::from_str(document)?)
}

fn matched(rows: u64) -> Result<UpdateResult, JobError> {
    if rows == 0 {
        return Err(JobError::NotFound);
    }
    Ok(UpdateResult::from_rows_affected(rows))
}

/// Outcome of [`JobRepository::toggle_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusToggle {
    #[serde(flatten)]
    pub result: UpdateResult,
    pub job_status: bool,
}

/// Errors raised by the jobs repository.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("no query on this job matches the reply target")]
    QueryNotFound,
    #[error("{0} queries on this job share the same question")]
    AmbiguousQuestion(usize),
    #[error("failed to encode or decode job document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl JobError {
    /// Returns `true` when the store itself could not serve the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Database(err) if is_unavailable(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use chrono::{Duration, TimeZone};
    use jobbox_core::protocol::{
        NewApplication, NewCandidateReply, NewEmployerMessage, NewJob, NewQuery,
    };
    use jobbox_core::types::Fields;
    use serde_json::{json, Value};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn create_job(repo: &JobRepository, body: Value) -> DocumentId {
        let id = DocumentId::generate();
        let job = NewJob {
            fields: fields(body),
        }
        .into_document(id, now())
        .expect("job document");
        repo.insert(&job, now()).await.expect("insert job");
        id
    }

    fn application(email: &str) -> ApplicantDetail {
        NewApplication {
            user_id: DocumentId::generate(),
            email: email.to_string(),
            applied_job: Some(json!("Backend Engineer")),
            apply_status: Some(json!("applied")),
            profile: fields(json!({"name": "Candidate"})),
        }
        .into_entry(now())
        .expect("application")
    }

    fn query(job_id: DocumentId, question: &str) -> QueryEntry {
        NewQuery {
            asker_id: DocumentId::generate(),
            job_id,
            email: "cand@example.com".to_string(),
            question: question.to_string(),
        }
        .into_entry(now())
        .expect("query")
    }

    #[tokio::test]
    async fn inserted_job_reads_back_with_submitted_fields() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({"position": "SRE", "salary": 120000})).await;

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert_eq!(job.fields.get("position"), Some(&json!("SRE")));
        assert_eq!(job.fields.get("salary"), Some(&json!(120000)));
        assert!(job.job_status);
        assert_eq!(repo.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn fetch_missing_job_returns_none() {
        let (db, _dir) = setup_db().await;
        let missing = db.jobs().fetch(DocumentId::generate()).await.expect("fetch");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn apply_appends_entry_and_initializes_threads() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({"position": "SRE"})).await;

        let result = repo
            .push_applicant(id, &application("a@example.com"), now())
            .await
            .expect("apply");
        assert_eq!(result.matched_count, 1);

        let raw: String = sqlx::query_scalar("SELECT document FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(db.pool())
            .await
            .expect("raw document");
        let raw: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(raw["employerTexts"], json!([]));
        assert_eq!(raw["candidateReply"], json!([]));
        assert_eq!(raw["applyStatus"], json!("applied"));

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert_eq!(job.applicant_details.len(), 1);
        assert_eq!(job.applicant_details[0].profile.get("name"), Some(&json!("Candidate")));
    }

    #[tokio::test]
    async fn later_application_keeps_existing_threads() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({})).await;

        repo.push_applicant(id, &application("a@example.com"), now())
            .await
            .expect("first apply");
        let message = NewEmployerMessage {
            job_id: id,
            candidate_email: "a@example.com".to_string(),
            employer_email: None,
            applied_job: None,
            message: "Welcome".to_string(),
            extra: Fields::new(),
        }
        .into_entry(now())
        .expect("message");
        repo.push_employer_message(id, &message, now())
            .await
            .expect("message push");
        repo.push_applicant(id, &application("b@example.com"), now())
            .await
            .expect("second apply");

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert_eq!(job.applicant_details.len(), 2);
        assert_eq!(job.employer_texts.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_applies_are_all_kept() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({"position": "SRE"})).await;

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.push_applicant(id, &application(&format!("user{n}@example.com")), now())
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("apply");
        }

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert_eq!(job.applicant_details.len(), 16);
        for n in 0..16 {
            let email = format!("user{n}@example.com");
            assert!(job.applicant_details.iter().any(|a| a.email == email));
        }
    }

    #[tokio::test]
    async fn push_to_missing_job_is_not_found() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let missing = DocumentId::generate();

        let err = repo
            .push_query(missing, &query(missing, "Remote?"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound));

        let err = repo
            .push_applicant(missing, &application("a@example.com"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound));
    }

    #[tokio::test]
    async fn reply_by_query_id_targets_one_entry_among_duplicates() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({})).await;

        let first = query(id, "Is there a visa sponsorship?");
        let second = query(id, "Is there a visa sponsorship?");
        repo.push_query(id, &first, now()).await.expect("first");
        repo.push_query(id, &second, now()).await.expect("second");

        repo.push_query_reply(id, &ReplyTarget::Query(second.query_id), "Yes", now())
            .await
            .expect("reply");

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert!(job.queries[0].reply.is_empty());
        assert_eq!(job.queries[1].reply, vec!["Yes".to_string()]);
    }

    #[tokio::test]
    async fn reply_by_question_appends_in_order() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({})).await;
        repo.push_query(id, &query(id, "Salary range?"), now())
            .await
            .expect("query");
        repo.push_query(id, &query(id, "Start date?"), now())
            .await
            .expect("query");

        let target = ReplyTarget::Question("Start date?".to_string());
        repo.push_query_reply(id, &target, "July", now())
            .await
            .expect("reply");
        repo.push_query_reply(id, &target, "or August", now())
            .await
            .expect("reply");

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert!(job.queries[0].reply.is_empty());
        assert_eq!(job.queries[1].reply, vec!["July", "or August"]);
    }

    #[tokio::test]
    async fn reply_never_crosses_jobs() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let first_job = create_job(&repo, json!({})).await;
        let second_job = create_job(&repo, json!({})).await;
        repo.push_query(first_job, &query(first_job, "Remote?"), now())
            .await
            .expect("query");
        repo.push_query(second_job, &query(second_job, "Remote?"), now())
            .await
            .expect("query");

        repo.push_query_reply(
            second_job,
            &ReplyTarget::Question("Remote?".to_string()),
            "Hybrid",
            now(),
        )
        .await
        .expect("reply");

        let first = repo.fetch_existing(first_job).await.expect("fetch");
        let second = repo.fetch_existing(second_job).await.expect("fetch");
        assert!(first.queries[0].reply.is_empty());
        assert_eq!(second.queries[0].reply, vec!["Hybrid"]);
    }

    #[tokio::test]
    async fn reply_by_duplicated_question_is_ambiguous() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({})).await;
        repo.push_query(id, &query(id, "Remote?"), now())
            .await
            .expect("query");
        repo.push_query(id, &query(id, "Remote?"), now())
            .await
            .expect("query");

        let err = repo
            .push_query_reply(id, &ReplyTarget::Question("Remote?".into()), "Yes", now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::AmbiguousQuestion(2)));

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert!(job.queries.iter().all(|entry| entry.reply.is_empty()));
    }

    #[tokio::test]
    async fn reply_to_unknown_query_is_rejected() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({})).await;

        let err = repo
            .push_query_reply(id, &ReplyTarget::Query(DocumentId::generate()), "Yes", now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::QueryNotFound));

        let err = repo
            .push_query_reply(
                DocumentId::generate(),
                &ReplyTarget::Question("Remote?".into()),
                "Yes",
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound));
    }

    #[tokio::test]
    async fn toggling_twice_restores_status() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({"jobStatus": true})).await;

        let first = repo.toggle_status(id, None, now()).await.expect("toggle");
        assert!(!first.job_status);
        let second = repo.toggle_status(id, None, now()).await.expect("toggle");
        assert!(second.job_status);

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert!(job.job_status);
    }

    #[tokio::test]
    async fn toggle_with_client_status_negates_it() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({"jobStatus": true})).await;

        let toggled = repo
            .toggle_status(id, Some(true), now())
            .await
            .expect("toggle");
        assert!(!toggled.job_status);
        let toggled = repo
            .toggle_status(id, Some(false), now())
            .await
            .expect("toggle");
        assert!(toggled.job_status);

        let err = repo
            .toggle_status(DocumentId::generate(), None, now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound));
    }

    #[tokio::test]
    async fn applied_jobs_follow_requested_order() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let older = create_job(&repo, json!({"postedDate": "2024-01-10T00:00:00.000Z"})).await;
        let newer = create_job(&repo, json!({"postedDate": "2024-03-10T00:00:00.000Z"})).await;
        let untouched = create_job(&repo, json!({"postedDate": "2024-02-10T00:00:00.000Z"})).await;

        for id in [newer, older] {
            repo.push_applicant(id, &application("cand@example.com"), now())
                .await
                .expect("apply");
        }
        repo.push_applicant(untouched, &application("other@example.com"), now())
            .await
            .expect("apply");

        let ids = |jobs: Vec<JobDocument>| jobs.into_iter().map(|job| job.id).collect::<Vec<_>>();

        let newest = repo
            .list_applied("cand@example.com", Some(AppliedJobsOrder::NewestFirst))
            .await
            .expect("newest");
        assert_eq!(ids(newest), vec![newer, older]);

        let oldest = repo
            .list_applied("cand@example.com", Some(AppliedJobsOrder::OldestFirst))
            .await
            .expect("oldest");
        assert_eq!(ids(oldest), vec![older, newer]);

        let unordered = repo
            .list_applied("cand@example.com", None)
            .await
            .expect("unordered");
        assert_eq!(unordered.len(), 2);
        assert!(repo
            .list_applied("nobody@example.com", None)
            .await
            .expect("empty")
            .is_empty());
    }

    #[tokio::test]
    async fn message_threads_are_appended_with_ids() {
        let (db, _dir) = setup_db().await;
        let repo = db.jobs();
        let id = create_job(&repo, json!({})).await;
        let later = now() + Duration::minutes(5);

        let reply = NewCandidateReply {
            job_id: id,
            candidate_email: "a@example.com".to_string(),
            employer_email: Some("hr@example.com".to_string()),
            applied_job: Some(id.to_string()),
            reply: "Thanks!".to_string(),
            extra: fields(json!({"candidateName": "Ada"})),
        }
        .into_entry(later)
        .expect("reply");
        repo.push_candidate_reply(id, &reply, later)
            .await
            .expect("push reply");

        let job = repo.fetch_existing(id).await.expect("fetch");
        assert_eq!(job.candidate_reply, vec![reply]);
        assert_eq!(job.replies_from_candidate("a@example.com").len(), 1);
        assert!(job.replies_from_candidate("b@example.com").is_empty());
    }
}
