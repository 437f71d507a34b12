use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{Error, ErrorKind};

/// Response header carrying the service base URL on `Unauthenticated`.
pub const ROOT_HEADER: &str = "x-gatekeep-root";

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %self, "Auth internal error");
            let body = json!({ "detail": "Internal error", "kind": kind.as_str() });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }

        let status = match kind {
            ErrorKind::UnknownProvider => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = json!({ "detail": self.to_string(), "kind": kind.as_str() });
        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        match &self {
            Self::Unauthenticated { discovery_url } => {
                if let Ok(value) = HeaderValue::from_str(discovery_url) {
                    headers.insert(ROOT_HEADER, value);
                }
            }
            Self::InvalidCredentials(_)
            | Self::ExpiredAccessToken
            | Self::ExpiredOrRevokedSession
            | Self::InvalidSignature => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_points_at_root() {
        let response = Error::Unauthenticated { discovery_url: "https://data.example/".into() }.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[ROOT_HEADER], "https://data.example/");
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());

        let body = body_json(response).await;
        assert_eq!(body["detail"], "Not authenticated");
        assert_eq!(body["kind"], "unauthenticated");
    }

    #[tokio::test]
    async fn token_failures_ask_for_bearer() {
        let response = Error::ExpiredAccessToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
        assert_eq!(body_json(response).await["kind"], "expired_access_token");
    }

    #[tokio::test]
    async fn request_errors_keep_json_shape() {
        let response = Error::UnknownProvider("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "Unknown identity provider: nope");
        assert_eq!(body["kind"], "unknown_provider");

        let response = Error::BadRequest("expected JSON".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["kind"], "bad_request");
    }

    #[tokio::test]
    async fn provider_failure_is_internal() {
        let response = Error::Provider("ldap down".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["detail"], "Internal error");
    }

    #[tokio::test]
    async fn internal_errors_hide_detail() {
        let response = Error::Store(StoreError::Conflict("identity toy:alice".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["detail"], "Internal error");
        assert_eq!(body["kind"], "internal");
    }
}
