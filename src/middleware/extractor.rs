use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName};
use axum_extra::extract::CookieJar;

use super::cookies::{self, ACCESS_TOKEN_COOKIE_NAME, API_KEY_COOKIE_NAME};
use super::state::GateState;
use crate::config::AuthSettings;
use crate::error::Error;
use crate::gate::{ApiKey, PresentedCredentials};
use crate::types::CurrentPrincipal;

/// Header carrying a single-user API key.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-gatekeep-api-key");

/// Query parameter carrying a single-user API key.
pub const API_KEY_QUERY_PARAM: &str = "api_key";

/// Principal resolved from the request's credentials.
///
/// Use as an Axum extractor in route handlers. Rejects with `401` and a
/// machine-checkable `kind` when the credentials do not resolve.
///
/// # Example
///
/// ```rust,ignore
/// async fn metadata(auth: Authenticated) -> impl IntoResponse {
///     match auth.principal {
///         CurrentPrincipal::Authenticated(p) => format!("Hello, {}", p.uuid),
///         CurrentPrincipal::Admin => "Hello, admin".to_string(),
///         CurrentPrincipal::Public => "Hello, guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub principal: CurrentPrincipal,
    api_key_cookie: Option<ApiKey>,
}

impl Authenticated {
    /// Add the single-user API key cookie if this request should set it.
    #[must_use]
    pub fn jar(&self, jar: CookieJar, settings: &AuthSettings) -> CookieJar {
        match &self.api_key_cookie {
            Some(api_key) => cookies::add_api_key_cookie(jar, api_key, settings),
            None => jar,
        }
    }
}

impl<St> FromRequestParts<St> for Authenticated
where
    GateState: FromRef<St>,
    St: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
        let gate = GateState::from_ref(state);
        let credentials = presented_credentials(parts);
        let discovery_url = discovery_url(&parts.headers, &gate.settings);

        let resolution = gate.gate.resolve(&credentials, &discovery_url)?;
        Ok(Self {
            principal: resolution.principal,
            api_key_cookie: resolution.api_key_cookie,
        })
    }
}

fn presented_credentials(parts: &Parts) -> PresentedCredentials {
    let jar = CookieJar::from_headers(&parts.headers);
    let header_str = |name: &HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let api_key_query = parts.uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == API_KEY_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
    });

    PresentedCredentials {
        api_key_query,
        api_key_header: header_str(&API_KEY_HEADER),
        api_key_cookie: cookies::value(&jar, API_KEY_COOKIE_NAME),
        access_token_cookie: cookies::value(&jar, ACCESS_TOKEN_COOKIE_NAME),
        authorization: header_str(&AUTHORIZATION),
    }
}

/// Service base URL: the configured one, else rebuilt from the request.
pub(super) fn discovery_url(headers: &HeaderMap, settings: &AuthSettings) -> String {
    if let Some(url) = settings.public_base_url() {
        return url.to_string();
    }
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}/")
}
