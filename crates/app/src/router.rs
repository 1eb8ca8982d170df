use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use jobbox_storage::Database;

use crate::problem::ProblemResponse;
use crate::{applications, jobs, messages, telemetry, users};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        Self {
            metrics,
            storage,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock, so tests can pin generated timestamps.
    #[cfg(test)]
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// `{status, data}` wrapper used by most job board responses.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: true,
            data: Some(data),
        }
    }

    pub fn from_option(data: Option<T>) -> Self {
        Self {
            status: data.is_some(),
            data,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/user", post(users::create))
        .route("/user/:email", get(users::by_email))
        .route("/jobs", get(jobs::list))
        .route("/job", post(jobs::create))
        .route("/job/:id", get(jobs::fetch))
        .route("/toggleJobStatus", patch(jobs::toggle_status))
        .route("/applied-jobs/:email", get(jobs::applied))
        .route("/filter/:filter_value/:email", get(jobs::applied_filtered))
        .route("/apply", patch(applications::apply))
        .route("/query", patch(applications::submit_query))
        .route("/reply", patch(applications::reply))
        .route("/messageByEmployer", patch(messages::send_employer_message))
        .route(
            "/employer/messages/:applied_job/:email",
            get(messages::employer_messages),
        )
        .route("/replyByCandidate", patch(messages::send_candidate_reply))
        .route(
            "/candidate/replies/:job_id/:email",
            get(messages::candidate_replies),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE])
}

async fn root() -> &'static str {
    "Job Box server is running"
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.storage().ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            warn!(stage = "storage", error = %err, "health check failed");
            ProblemResponse::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "document store did not answer",
            )
            .into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
}
