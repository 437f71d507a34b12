use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use time::Duration;

use crate::config::AuthSettings;
use crate::gate::ApiKey;
use crate::session::TokenBundle;

pub(super) const ACCESS_TOKEN_COOKIE_NAME: &str = "gatekeep_access_token";
pub(super) const REFRESH_TOKEN_COOKIE_NAME: &str = "gatekeep_refresh_token";
pub(super) const API_KEY_COOKIE_NAME: &str = "gatekeep_api_key";
pub(super) const CSRF_COOKIE_NAME: &str = "gatekeep_csrf";

fn credential_cookie(
    name: &'static str,
    value: String,
    path: String,
    max_age: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(path)
        .max_age(max_age)
        .build()
}

/// Store a fresh token pair, plus a CSRF token readable by scripts.
///
/// The refresh cookie is scoped to the auth routes; nothing else needs it.
pub(super) fn add_token_cookies(jar: CookieJar, bundle: &TokenBundle, settings: &AuthSettings) -> CookieJar {
    let access = credential_cookie(
        ACCESS_TOKEN_COOKIE_NAME,
        bundle.access_token.clone(),
        "/".into(),
        Duration::seconds(bundle.expires_in),
        settings.secure_cookies,
    );
    let refresh = credential_cookie(
        REFRESH_TOKEN_COOKIE_NAME,
        bundle.refresh_token.clone(),
        settings.auth_path.clone(),
        Duration::seconds(bundle.refresh_token_expires_in),
        settings.secure_cookies,
    );
    let random_bytes: [u8; 16] = rand::rng().random();
    let csrf = Cookie::build((CSRF_COOKIE_NAME, hex::encode(random_bytes)))
        .secure(settings.secure_cookies)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    jar.add(access).add(refresh).add(csrf)
}

/// Remember the single-user API key so browsers need not repeat it.
pub(super) fn add_api_key_cookie(jar: CookieJar, api_key: &ApiKey, settings: &AuthSettings) -> CookieJar {
    jar.add(
        Cookie::build((API_KEY_COOKIE_NAME, api_key.as_str().to_owned()))
            .http_only(true)
            .secure(settings.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/")
            .build(),
    )
}

/// Expire every credential cookie, whether or not the request carried it.
pub(super) fn clear_credential_cookies(jar: CookieJar, settings: &AuthSettings) -> CookieJar {
    let removal = |name: &'static str, path: String| {
        Cookie::build((name, ""))
            .path(path)
            .max_age(Duration::ZERO)
            .build()
    };

    jar.add(removal(ACCESS_TOKEN_COOKIE_NAME, "/".into()))
        .add(removal(REFRESH_TOKEN_COOKIE_NAME, settings.auth_path.clone()))
        .add(removal(API_KEY_COOKIE_NAME, "/".into()))
        .add(removal(CSRF_COOKIE_NAME, "/".into()))
}

pub(super) fn value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name).map(|c| c.value().to_owned())
}
