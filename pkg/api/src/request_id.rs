use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::{Instrument, debug};
use uuid::Uuid;

/// Middleware that tags each API request with a unique id, runs the handler
/// inside a span carrying it, and echoes it back as `x-request-id`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let span = tracing::info_span!(
        "api_request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;
    debug!("request {} -> {}", request_id, response.status());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
