//! # Authentication
//!
//! Operator bearer authentication for the administrative trigger endpoints.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Rejects requests without a configured operator bearer token.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_token(&config, token)?;

    tracing::debug!(path = %request.uri().path(), "authenticated operator request");
    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            operator_tokens: vec!["test-token-123".to_string()],
            ..Default::default()
        })
    }

    async fn run_middleware(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler(_auth: OperatorAuth) -> &'static str {
            "OK"
        }

        Router::new()
            .route("/test", get(handler))
            .layer(axum::middleware::from_fn_with_state(config, auth_middleware))
            .oneshot(request)
            .await
            .unwrap()
    }

    fn request_with(authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/test");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let response = run_middleware(create_test_config(), request_with(None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let response = run_middleware(
            create_test_config(),
            request_with(Some("Basic dGVzdDoxMjM=")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let response =
            run_middleware(create_test_config(), request_with(Some("Bearer wrong-token"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[tokio::test]
    async fn valid_request_passes_through() {
        let response =
            run_middleware(create_test_config(), request_with(Some("Bearer test-token-123"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn multiple_tokens_supported() {
        let config = Arc::new(AppConfig {
            operator_tokens: vec![
                "token-one".to_string(),
                "token-two".to_string(),
                "token-three".to_string(),
            ],
            ..Default::default()
        });

        for candidate in ["token-one", "token-two", "token-three"] {
            let response = run_middleware(
                Arc::clone(&config),
                request_with(Some(&format!("Bearer {candidate}"))),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn handler_without_middleware_is_rejected() {
        async fn handler(_auth: OperatorAuth) -> &'static str {
            "OK"
        }
        let response = Router::new()
            .route("/test", get(handler))
            .oneshot(request_with(Some("Bearer test-token-123")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
