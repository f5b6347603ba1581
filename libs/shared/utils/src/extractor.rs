use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::signature::{verify_signature, SIGNATURE_HEADER};

/// Upper bound on webhook bodies buffered for signature checks.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

// Middleware for webhook signatures: buffers the body, checks the HMAC and
// hands the untouched bytes on to the handler.
pub async fn signature_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let provided = parts
        .headers
        .get(SIGNATURE_HEADER)
        .ok_or_else(|| AppError::Signature("Missing signature header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Signature("Invalid signature header format".to_string()))?
        .to_string();

    let bytes = to_bytes(body, MAX_WEBHOOK_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("Unreadable request body: {}", e)))?;

    if let Err(reason) = verify_signature(&bytes, &provided, &config.webhook_secret) {
        warn!("Rejected webhook: {}", reason);
        return Err(AppError::Signature(reason));
    }

    let request = Request::from_parts(parts, Body::from(bytes));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, http::StatusCode, middleware, routing::post, Router};
    use tower::ServiceExt;

    use crate::signature::compute_signature;

    fn app(secret: &str) -> Router {
        let config = Arc::new(AppConfig {
            webhook_secret: secret.to_string(),
            ..AppConfig::default()
        });

        Router::new()
            .route("/hook", post(|body: Bytes| async move { body }))
            .layer(middleware::from_fn_with_state(config, signature_middleware))
    }

    fn request(body: &'static str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/hook");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_valid_signature_passes_body_through() {
        let sig = compute_signature(b"{\"a\":1}", "secret").unwrap();
        let response = app("secret").oneshot(request("{\"a\":1}", Some(sig))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_missing_or_bad_signature_is_unauthorized() {
        let missing = app("secret").oneshot(request("{}", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = compute_signature(b"{}", "other").unwrap();
        let bad = app("secret").oneshot(request("{}", Some(wrong))).await.unwrap();
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
    }
}
