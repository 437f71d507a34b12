use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::FormRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{Value, json};

use super::cookies::{self, REFRESH_TOKEN_COOKIE_NAME};
use super::extractor::{Authenticated, discovery_url};
use super::state::{AuthState, GateState, Providers};
use crate::authenticator::{CallbackParams, Credentials};
use crate::config::AuthSettings;
use crate::error::Error;
use crate::gate::AuthorizationGate;
use crate::session::{SessionManager, TokenBundle};
use crate::store::PrincipalStore;
use crate::types::{CurrentPrincipal, SessionId};

/// Auth routes plus the gate they share with application routes.
pub struct AuthRoutes<S> {
    state: AuthState<S>,
}

impl<S: PrincipalStore> AuthRoutes<S> {
    /// Select the access mode from `providers` and wire up the session manager.
    #[must_use]
    pub fn new(settings: AuthSettings, store: Arc<S>, providers: Providers) -> Self {
        let mode = settings.access_mode(providers.names());
        let gate = AuthorizationGate::new(&settings, mode);
        let manager = SessionManager::new(store, &settings);
        Self {
            state: AuthState {
                manager,
                providers,
                gate: GateState {
                    gate: Arc::new(gate),
                    settings: Arc::new(settings),
                },
            },
        }
    }

    /// State for the [`Authenticated`] extractor on application routes.
    #[must_use]
    pub fn gate_state(&self) -> GateState {
        self.state.gate.clone()
    }

    pub fn into_router(self) -> Router {
        let auth_path = self.state.gate.settings.auth_path.trim_end_matches('/').to_owned();

        Router::new()
            .route(
                &format!("{auth_path}/provider/{{provider}}/token"),
                post(login::<S>),
            )
            .route(
                &format!("{auth_path}/provider/{{provider}}/code"),
                get(code_login::<S>),
            )
            .route(&format!("{auth_path}/session/refresh"), post(refresh::<S>))
            .route(
                &format!("{auth_path}/session/revoke/{{session_id}}"),
                delete(revoke::<S>),
            )
            .route(&format!("{auth_path}/whoami"), get(whoami::<S>))
            .route(&format!("{auth_path}/logout"), post(logout::<S>))
            .with_state(self.state)
    }
}

/// Create the authentication router.
pub fn auth_routes<S: PrincipalStore>(settings: AuthSettings, store: Arc<S>, providers: Providers) -> Router {
    AuthRoutes::new(settings, store, providers).into_router()
}

// ── Login ──────────────────────────────────────────────────────────

async fn login<S: PrincipalStore>(
    State(state): State<AuthState<S>>,
    Path(provider): Path<String>,
    jar: CookieJar,
    form: Result<Form<Credentials>, FormRejection>,
) -> Result<(CookieJar, Json<TokenBundle>), Error> {
    let authenticator = state
        .providers
        .password(&provider)
        .ok_or_else(|| Error::UnknownProvider(provider.clone()))?;
    let Form(credentials) = form.map_err(|rejection| Error::BadRequest(rejection.body_text()))?;

    let external_id = authenticator
        .authenticate_dyn(&credentials)
        .await
        .map_err(Error::Provider)?
        .ok_or_else(|| {
            tracing::info!(provider = %provider, "login rejected");
            Error::InvalidCredentials("Incorrect username or password".into())
        })?;

    start_session(&state, jar, &provider, &external_id).await
}

async fn code_login<S: PrincipalStore>(
    State(state): State<AuthState<S>>,
    Path(provider): Path<String>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Json<TokenBundle>), Error> {
    let authenticator = state
        .providers
        .external(&provider)
        .ok_or_else(|| Error::UnknownProvider(provider.clone()))?;

    let external_id = authenticator
        .authenticate_dyn(&params)
        .await
        .map_err(Error::Provider)?
        .ok_or_else(|| {
            tracing::info!(provider = %provider, "external login rejected");
            Error::InvalidCredentials("Authentication failure".into())
        })?;

    start_session(&state, jar, &provider, &external_id).await
}

async fn start_session<S: PrincipalStore>(
    state: &AuthState<S>,
    jar: CookieJar,
    provider: &str,
    external_id: &str,
) -> Result<(CookieJar, Json<TokenBundle>), Error> {
    let bundle = state.manager.create_session(provider, external_id).await?;
    let jar = cookies::add_token_cookies(jar, &bundle, &state.gate.settings);
    Ok((jar, Json(bundle)))
}

// ── Refresh ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh token from the JSON body if there is one, else from the refresh cookie.
async fn refresh<S: PrincipalStore>(
    State(state): State<AuthState<S>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<TokenBundle>), Error> {
    let settings = &state.gate.settings;
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| Error::BadRequest(format!("Invalid refresh request: {e}")))?
            .refresh_token
    };
    let refresh_token = from_body
        .or_else(|| cookies::value(&jar, REFRESH_TOKEN_COOKIE_NAME))
        .ok_or_else(|| Error::Unauthenticated {
            discovery_url: discovery_url(&headers, settings),
        })?;

    let bundle = state.manager.slide_session(&refresh_token).await?;
    let jar = cookies::add_token_cookies(jar, &bundle, settings);
    Ok((jar, Json(bundle)))
}

// ── Revoke ─────────────────────────────────────────────────────────

/// Always `204` for a resolved principal: unknown, malformed and foreign
/// session ids are indistinguishable from a successful revoke.
async fn revoke<S: PrincipalStore>(
    State(state): State<AuthState<S>>,
    headers: HeaderMap,
    auth: Authenticated,
    Path(session_id): Path<String>,
) -> Result<StatusCode, Error> {
    let owner = match &auth.principal {
        CurrentPrincipal::Admin => None,
        CurrentPrincipal::Authenticated(principal) => Some(principal.uuid),
        CurrentPrincipal::Public => {
            return Err(Error::Unauthenticated {
                discovery_url: discovery_url(&headers, &state.gate.settings),
            });
        }
    };
    let Ok(session_id) = session_id.parse::<SessionId>() else {
        return Ok(StatusCode::NO_CONTENT);
    };

    // Principals may only revoke their own sessions; admin may revoke any.
    if let Some(owner) = owner {
        match state.manager.store().find_session(session_id).await? {
            Some(session) if session.principal_id == owner => {}
            _ => {
                tracing::debug!(session_id = %session_id, "revoke ignored for session not owned by caller");
                return Ok(StatusCode::NO_CONTENT);
            }
        }
    }

    state.manager.revoke_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Whoami ─────────────────────────────────────────────────────────

async fn whoami<S: PrincipalStore>(
    State(state): State<AuthState<S>>,
    auth: Authenticated,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), Error> {
    let jar = auth.jar(jar, &state.gate.settings);

    // The token carries a snapshot; the store knows the current identity set.
    let principal = match auth.principal.principal() {
        Some(principal) => state.manager.principal(principal.uuid).await?,
        None => None,
    };
    Ok((jar, Json(json!({ "data": principal }))))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout<S: PrincipalStore>(State(state): State<AuthState<S>>, jar: CookieJar) -> (CookieJar, Json<Value>) {
    let jar = cookies::clear_credential_cookies(jar, &state.gate.settings);
    (jar, Json(json!({})))
}
