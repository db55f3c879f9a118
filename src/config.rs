use url::Url;

use crate::error::Error;

const DEFAULT_API_URL: &str = "http://localhost:8000/api/";

/// Endpoint layout of the SkillConnect REST API.
///
/// The base URL is the only required field. Endpoint paths are joined
/// relative to it.
///
/// ```rust,ignore
/// use skillconnect_session::GatewayConfig;
///
/// let config = GatewayConfig::new("https://api.skillconnect.dev/api".parse()?)
///     .with_refresh_path("refresh/");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GatewayConfig {
    pub(crate) base_url: Url,
    pub(crate) login_path: String,
    pub(crate) refresh_path: String,
    pub(crate) register_path: String,
}

impl GatewayConfig {
    /// Default endpoint layout under `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            login_path: "login/".into(),
            refresh_path: "token/refresh/".into(),
            register_path: "register/".into(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Env vars
    /// - `SKILLCONNECT_API_URL`: API base URL (default `http://localhost:8000/api/`)
    /// - `SKILLCONNECT_LOGIN_PATH`: credential issuance endpoint
    /// - `SKILLCONNECT_REFRESH_PATH`: token renewal endpoint
    /// - `SKILLCONNECT_REGISTER_PATH`: account registration endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `SKILLCONNECT_API_URL` is not a valid base URL.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url = var("SKILLCONNECT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let base_url: Url = base_url
            .parse()
            .map_err(|e| Error::Config(format!("SKILLCONNECT_API_URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(
                "SKILLCONNECT_API_URL: not a base URL".into(),
            ));
        }

        let mut config = Self::new(base_url);
        if let Some(path) = var("SKILLCONNECT_LOGIN_PATH") {
            config = config.with_login_path(path);
        }
        if let Some(path) = var("SKILLCONNECT_REFRESH_PATH") {
            config = config.with_refresh_path(path);
        }
        if let Some(path) = var("SKILLCONNECT_REGISTER_PATH") {
            config = config.with_register_path(path);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_register_path(mut self, path: impl Into<String>) -> Self {
        self.register_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    #[must_use]
    pub fn register_path(&self) -> &str {
        &self.register_path
    }

    /// Resolve an endpoint path against the base URL.
    ///
    /// A leading `/` is ignored so that paths never escape the API prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("endpoint {path:?}: {e}")))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL.parse().expect("valid default URL"))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
