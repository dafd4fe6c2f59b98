//! Caller-supplied request deadlines.
//!
//! A client may send `x-request-timeout` (milliseconds). The handler future is
//! raced against that budget; when the budget runs out the future is dropped,
//! which rolls back any open store transaction and discards pending cache
//! writes, and the caller receives `deadline_exceeded`.

use std::time::Duration;

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Upper bound applied to caller-supplied deadlines.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn parse_request_timeout(value: &str) -> Option<Duration> {
    let millis: u64 = value.trim().parse().ok()?;
    if millis == 0 {
        return None;
    }
    Some(Duration::from_millis(millis).min(MAX_REQUEST_TIMEOUT))
}

pub async fn deadline_middleware(req: Request, next: Next) -> Response {
    let timeout = req
        .headers()
        .get(REQUEST_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_request_timeout);

    let Some(timeout) = timeout else {
        return next.run(req).await;
    };

    match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Request deadline exceeded");
            AppError::DeadlineExceeded.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_timeout() {
        assert_eq!(parse_request_timeout("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_request_timeout("0"), None);
        assert_eq!(parse_request_timeout("abc"), None);
        assert_eq!(parse_request_timeout("999999999"), Some(MAX_REQUEST_TIMEOUT));
    }
}
