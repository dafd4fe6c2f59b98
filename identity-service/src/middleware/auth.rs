use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::sync::Arc;

use crate::auth::RequestContext;

pub const WARNING_HEADER: &str = "warning";

/// Attaches a fresh [`RequestContext`] built from the `Authorization` header.
/// The credential itself is resolved lazily by the first service call;
/// warnings it produced are echoed in `warning` response headers.
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    // Non-UTF-8 bytes survive lossily so that parsing rejects them instead of
    // the request turning anonymous.
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    let ctx = Arc::new(RequestContext::new(authorization));
    req.extensions_mut().insert(ctx.clone());

    let mut response = next.run(req).await;

    for warning in ctx.warnings() {
        match HeaderValue::from_str(&format!("199 - \"{}\"", warning.replace('"', "'"))) {
            Ok(value) => {
                response.headers_mut().append(WARNING_HEADER, value);
            }
            Err(e) => tracing::debug!(error = %e, "Warning not representable as a header"),
        }
    }
    response
}

/// Extractor for the request context of the current call. Requests that
/// bypassed the middleware are treated as anonymous.
pub struct Caller(pub Arc<RequestContext>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<Arc<RequestContext>>()
            .cloned()
            .unwrap_or_else(|| Arc::new(RequestContext::anonymous()));
        Ok(Caller(ctx))
    }
}
