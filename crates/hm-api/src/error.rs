use std::{borrow::Cow, future::Future};

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use hm_common::index::StoreError;
use hm_common::search::SearchError;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Makes a client-supplied message safe to echo back: no control
/// characters, URLs, query strings or paths, bounded length.
fn sanitize_message(message: &str) -> String {
    const MAX_CHARS: usize = 240;

    let cleaned = message
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .map(|token| {
            if token.contains("://") {
                "[redacted-url]".to_string()
            } else if let Some((base, _)) = token.split_once('?') {
                if base.is_empty() {
                    "[redacted-query]".to_string()
                } else {
                    format!("{base}?[redacted]")
                }
            } else if token.starts_with('/') || token.contains('\\') {
                "[redacted-path]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut cleaned = match cleaned.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => {
            let mut truncated = cleaned[..cut].to_string();
            truncated.push('…');
            truncated
        }
        None => cleaned,
    };

    if cleaned.trim().is_empty() {
        cleaned = "unexpected error".to_string();
    }
    cleaned
}

pub async fn with_request_id<Fut, T>(request_id: Option<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    match request_id {
        Some(request_id) => REQUEST_ID.scope(request_id, fut).await,
        None => fut.await,
    }
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|value| value.clone()).ok()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("startup failed: {0}")]
    Startup(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();
        let request_id = current_request_id();

        if status.is_server_error() {
            error!(code, status = %status, request_id = request_id.as_deref().unwrap_or(""), error = %self, "api_error");
        } else {
            warn!(code, status = %status, request_id = request_id.as_deref().unwrap_or(""), error = %self, "api_error");
        }

        let body = Json(ErrorResponse {
            code,
            message: self.public_message().into_owned(),
            request_id,
        });

        (status, body).into_response()
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::TooManyRequests(_) => "too_many_requests",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Startup(_) | ApiError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> Cow<'static, str> {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::TooManyRequests(_) => Cow::Borrowed("too many requests"),
            ApiError::ServiceUnavailable(_) => Cow::Borrowed("service unavailable"),
            ApiError::Startup(_) | ApiError::Internal(_) => Cow::Borrowed("internal server error"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Startup(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short bounded label for request metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) | ApiError::NotFound(_) => "invalid",
            ApiError::TooManyRequests(_) => "throttled",
            ApiError::ServiceUnavailable(_) => "unavailable",
            ApiError::Startup(_) | ApiError::Internal(_) => "error",
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(value: SearchError) -> Self {
        match value {
            SearchError::InvalidCriteria(msg) => ApiError::BadRequest(msg),
            SearchError::Index(err) => ApiError::ServiceUnavailable(err.to_string()),
            SearchError::Store(err) => ApiError::ServiceUnavailable(err.to_string()),
            other @ (SearchError::DataConsistency { .. } | SearchError::ScoreDomain(_)) => {
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        ApiError::ServiceUnavailable(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::Value;

    use hm_common::index::IndexError;

    use super::*;

    #[tokio::test]
    async fn includes_request_id_in_response_body_when_present() {
        let err = ApiError::Internal("boom".into());
        let response = with_request_id(Some("req-123".into()), async { err.into_response() }).await;

        let (parts, body) = response.into_parts();
        assert_eq!(parts.status, StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = body.collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["request_id"], "req-123");
        assert_eq!(json["message"], "internal server error");
    }

    #[test]
    fn search_errors_map_to_statuses() {
        let status = |err: SearchError| ApiError::from(err).status_code();

        assert_eq!(status(SearchError::invalid("`to` before `from`")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(SearchError::Index(IndexError::Transport("timeout".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(SearchError::DataConsistency {
                missing: vec!["12345678901234".into()]
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn sanitizes_paths_urls_and_length() {
        let cleaned = sanitize_message("cannot read /etc/hm/reference.json via http://index:9200?x=1");
        assert!(!cleaned.contains("/etc"));
        assert!(cleaned.contains("[redacted-path]"));
        assert!(cleaned.contains("[redacted-url]"));

        let long = "é".repeat(500);
        let cleaned = sanitize_message(&long);
        assert_eq!(cleaned.chars().count(), 241);
        assert_eq!(sanitize_message("\n\t"), "unexpected error");
    }
}
