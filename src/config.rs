use time::Duration;
use url::Url;

use crate::error::Error;
use crate::gate::{AccessMode, ApiKey};
use crate::token::{SecretKey, SecretKeys};

/// Authentication settings, loaded once at startup and never mutated.
///
/// Use [`from_env()`](AuthSettings::from_env) for convention-based setup,
/// or [`new()`](AuthSettings::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub(crate) secret_keys: SecretKeys,
    pub(crate) single_user_api_key: Option<ApiKey>,
    pub(crate) allow_anonymous_access: bool,
    pub(crate) access_token_max_age: Duration,
    pub(crate) refresh_token_max_age: Duration,
    pub(crate) session_max_age: Duration,
    pub(crate) public_base_url: Option<Url>,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
}

impl AuthSettings {
    /// Create settings with the given signing keys.
    ///
    /// All optional fields use defaults. Override with `with_*` methods.
    #[must_use]
    pub fn new(secret_keys: SecretKeys) -> Self {
        Self {
            secret_keys,
            single_user_api_key: None,
            allow_anonymous_access: false,
            access_token_max_age: Duration::minutes(15),
            refresh_token_max_age: Duration::days(7),
            session_max_age: Duration::days(365),
            public_base_url: None,
            secure_cookies: true,
            auth_path: "/api/v1/auth".into(),
        }
    }

    /// Create settings from environment variables.
    ///
    /// # Optional env vars
    /// - `GATEKEEP_SECRET_KEYS`: `;`-separated signing keys, current key first
    /// - `GATEKEEP_SINGLE_USER_API_KEY`: API key for single-user mode
    /// - `GATEKEEP_ALLOW_ANONYMOUS_ACCESS`: `"1"` or `"true"` to admit unauthenticated requests
    /// - `GATEKEEP_ACCESS_TOKEN_MAX_AGE`, `GATEKEEP_REFRESH_TOKEN_MAX_AGE`,
    ///   `GATEKEEP_SESSION_MAX_AGE`: lifetimes in seconds
    /// - `GATEKEEP_PUBLIC_BASE_URL`: base URL advertised to unauthenticated clients
    /// - `GATEKEEP_INSECURE_COOKIES`: `"1"` or `"true"` to drop the `Secure` cookie flag
    ///
    /// Without `GATEKEEP_SECRET_KEYS` an ephemeral key is generated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is present but invalid.
    pub fn from_env() -> Result<Self, Error> {
        let secret_keys = match std::env::var("GATEKEEP_SECRET_KEYS") {
            Ok(raw) => parse_secret_keys(&raw)?,
            Err(_) => {
                tracing::warn!("GATEKEEP_SECRET_KEYS not set; tokens will not survive a restart");
                SecretKeys::generate()
            }
        };

        let mut settings = Self::new(secret_keys)
            .with_allow_anonymous_access(env_flag("GATEKEEP_ALLOW_ANONYMOUS_ACCESS"))
            .with_secure_cookies(!env_flag("GATEKEEP_INSECURE_COOKIES"));

        if let Ok(key) = std::env::var("GATEKEEP_SINGLE_USER_API_KEY") {
            settings = settings.with_single_user_api_key(ApiKey::new(key));
        }
        if let Some(age) = env_seconds("GATEKEEP_ACCESS_TOKEN_MAX_AGE")? {
            settings = settings.with_access_token_max_age(age);
        }
        if let Some(age) = env_seconds("GATEKEEP_REFRESH_TOKEN_MAX_AGE")? {
            settings = settings.with_refresh_token_max_age(age);
        }
        if let Some(age) = env_seconds("GATEKEEP_SESSION_MAX_AGE")? {
            settings = settings.with_session_max_age(age);
        }
        if let Ok(url_str) = std::env::var("GATEKEEP_PUBLIC_BASE_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("GATEKEEP_PUBLIC_BASE_URL: {e}")))?;
            settings = settings.with_public_base_url(url);
        }

        Ok(settings)
    }

    #[must_use]
    pub fn with_single_user_api_key(mut self, key: ApiKey) -> Self {
        self.single_user_api_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_allow_anonymous_access(mut self, allow: bool) -> Self {
        self.allow_anonymous_access = allow;
        self
    }

    #[must_use]
    pub fn with_access_token_max_age(mut self, age: Duration) -> Self {
        self.access_token_max_age = age;
        self
    }

    #[must_use]
    pub fn with_refresh_token_max_age(mut self, age: Duration) -> Self {
        self.refresh_token_max_age = age;
        self
    }

    #[must_use]
    pub fn with_session_max_age(mut self, age: Duration) -> Self {
        self.session_max_age = age;
        self
    }

    #[must_use]
    pub fn with_public_base_url(mut self, url: Url) -> Self {
        self.public_base_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn secret_keys(&self) -> &SecretKeys {
        &self.secret_keys
    }

    #[must_use]
    pub fn allow_anonymous_access(&self) -> bool {
        self.allow_anonymous_access
    }

    #[must_use]
    pub fn public_base_url(&self) -> Option<&Url> {
        self.public_base_url.as_ref()
    }

    /// Select the access mode from the registered identity providers.
    ///
    /// With no providers the deployment is single-user; a key is generated
    /// if none is configured.
    #[must_use]
    pub fn access_mode(&self, providers: Vec<String>) -> AccessMode {
        if !providers.is_empty() {
            return AccessMode::ExternalProviders { providers };
        }
        let api_key = match &self.single_user_api_key {
            Some(key) => key.clone(),
            None => {
                tracing::warn!("no single-user API key configured; generated an ephemeral key");
                ApiKey::generate()
            }
        };
        AccessMode::SingleUser { api_key }
    }
}

fn parse_secret_keys(raw: &str) -> Result<SecretKeys, Error> {
    let keys = raw
        .split(';')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(SecretKey::new)
        .collect();
    SecretKeys::new(keys).map_err(|_| Error::Config("GATEKEEP_SECRET_KEYS is set but empty".into()))
}

fn env_flag(name: &str) -> bool {
    matches!(std::env::var(name).as_deref(), Ok("1") | Ok("true"))
}

/// Upper bound for any configured lifetime.
const MAX_LIFETIME: Duration = Duration::days(100 * 365);

fn env_seconds(name: &str) -> Result<Option<Duration>, Error> {
    match std::env::var(name) {
        Ok(raw) => parse_lifetime(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_lifetime(name: &str, raw: &str) -> Result<Duration, Error> {
    let secs = raw
        .trim()
        .parse::<i64>()
        .map_err(|e| Error::Config(format!("{name}: {e}")))?;
    let age = Duration::seconds(secs);
    if age <= Duration::ZERO || age > MAX_LIFETIME {
        return Err(Error::Config(format!(
            "{name}: must be between 1 and {} seconds",
            MAX_LIFETIME.whole_seconds()
        )));
    }
    Ok(age)
}
