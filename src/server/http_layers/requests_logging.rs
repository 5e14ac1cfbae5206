//! Request logging middleware

use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{error, info};

#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// JSON bodies above this are summarised instead of printed.
const MAX_LOGGABLE_JSON_LENGTH: usize = 2048;

/// What the body logger does with a payload.
#[derive(Debug, PartialEq)]
enum BodyLog {
    /// Small JSON: buffer and print it.
    Print(usize),
    /// Audio, multipart uploads, large JSON: size only.
    Summarize(&'static str, usize),
    /// No usable Content-Length, e.g. streamed audio.
    Skip,
}

fn body_log(headers: &HeaderMap) -> BodyLog {
    let Some(size) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    else {
        return BodyLog::Skip;
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        if size <= MAX_LOGGABLE_JSON_LENGTH {
            BodyLog::Print(size)
        } else {
            BodyLog::Summarize("json", size)
        }
    } else if content_type.starts_with("audio/") {
        BodyLog::Summarize("audio", size)
    } else if content_type.starts_with("multipart/") {
        BodyLog::Summarize("upload", size)
    } else {
        BodyLog::Summarize("other", size)
    }
}

/// Logs `body` per `plan` and hands back an equivalent body.
async fn log_body(direction: &str, plan: BodyLog, body: Body) -> Result<Body, axum::Error> {
    match plan {
        BodyLog::Print(size) => {
            let bytes = axum::body::to_bytes(body, size).await?;
            info!("  {} Body: {}", direction, String::from_utf8_lossy(&bytes));
            Ok(Body::from(bytes))
        }
        BodyLog::Summarize(kind, size) => {
            info!("  {} Body: {} ({:#})", direction, kind, byte_unit::Byte::from(size));
            Ok(body)
        }
        BodyLog::Skip => Ok(body),
    }
}

fn log_headers(direction: &str, headers: &HeaderMap) {
    info!("  {} Headers:", direction);
    for (name, value) in headers.iter() {
        info!("    {:?}: {:?}", name, value);
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, request.uri());
    }
    if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", request.headers());
    }

    let request = if level >= RequestsLoggingLevel::Body {
        let plan = body_log(request.headers());
        let (parts, body) = request.into_parts();
        match log_body("Req", plan, body).await {
            Ok(body) => Request::from_parts(parts, body),
            Err(err) => {
                error!("Failed to read request body: {:?}", err);
                return internal_error();
            }
        }
    } else {
        request
    };

    let response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", response.headers());
    }

    let response = if level >= RequestsLoggingLevel::Body {
        let plan = body_log(response.headers());
        let (parts, body) = response.into_parts();
        match log_body("Resp", plan, body).await {
            Ok(body) => Response::from_parts(parts, body),
            Err(err) => {
                error!("Failed to read response body: {:?}", err);
                return internal_error();
            }
        }
    } else {
        response
    };

    let status = response.status().as_u16();
    let duration = start.elapsed();
    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }
    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(content_type: &str, length: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, length.parse().unwrap());
        headers
    }

    #[test]
    fn level_ordering() {
        let none = RequestsLoggingLevel::None;

        assert!(none < RequestsLoggingLevel::Headers);
        assert!(RequestsLoggingLevel::Body > RequestsLoggingLevel::None);
        assert_eq!(RequestsLoggingLevel::default(), RequestsLoggingLevel::Path);
    }

    #[test]
    fn only_small_json_is_printed() {
        assert_eq!(
            body_log(&headers("application/json", "42")),
            BodyLog::Print(42)
        );
        assert_eq!(
            body_log(&headers("application/json; charset=utf-8", "5000")),
            BodyLog::Summarize("json", 5000)
        );
        assert_eq!(
            body_log(&headers("audio/mpeg", "10")),
            BodyLog::Summarize("audio", 10)
        );
        assert_eq!(
            body_log(&headers("multipart/form-data; boundary=x", "900")),
            BodyLog::Summarize("upload", 900)
        );
    }

    #[test]
    fn missing_or_bad_length_is_skipped() {
        assert_eq!(body_log(&HeaderMap::new()), BodyLog::Skip);
        assert_eq!(
            body_log(&headers("application/json", "many")),
            BodyLog::Skip
        );
    }

    #[tokio::test]
    async fn printed_body_is_passed_on_intact() {
        let body = log_body("Req", BodyLog::Print(13), Body::from(r#"{"text":"hi"}"#))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"text":"hi"}"#);
    }
}
