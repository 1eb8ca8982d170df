use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::Serialize;

const PROBLEM_JSON: &str = "application/problem+json";

/// RFC 7807 body. `type` is the stable error kind clients branch on.
#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'static str,
    status: u16,
    detail: String,
}

pub struct ProblemResponse {
    status: StatusCode,
    details: ProblemDetails,
}

impl ProblemResponse {
    pub fn new(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            details: ProblemDetails {
                kind,
                title: status.canonical_reason().unwrap_or("Error"),
                status: status.as_u16(),
                detail: detail.into(),
            },
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        counter!("http_problem_responses_total", "type" => self.details.kind).increment(1);

        let mut response = (self.status, Json(self.details)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}
