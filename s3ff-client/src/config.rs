use std::time::Duration;

use crate::{UploadError, UploadResult};

/// Prefix of the environment variables read by [`ClientConfig::from_env`]
pub const ENV_PREFIX: &str = "S3FF__";

/// Configuration for the upload client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the backend API, without trailing slash
    pub base_url: String,

    /// Bearer token for backend requests. Never sent to the object store.
    pub auth_token: Option<String>,

    /// Whole-request timeout applied by the transport
    pub request_timeout: Option<Duration>,

    pub connect_timeout: Option<Duration>,

    /// Size of the chunks part bodies are streamed in; also the granularity
    /// of `sending` progress events
    pub chunk_size: usize,

    pub user_agent: String,
}

impl ClientConfig {
    /// Create a config for a backend rooted at `base_url`
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: strip_trailing_slash(base_url.into()),
            auth_token: None,
            request_timeout: None,
            connect_timeout: Some(Duration::from_secs(30)),
            chunk_size: 64 * 1024,
            user_agent: concat!("s3ff-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Load from `S3FF__*` environment variables.
    ///
    /// `S3FF__BASE_URL` is required; `S3FF__AUTH_TOKEN`,
    /// `S3FF__REQUEST_TIMEOUT_SECS`, `S3FF__CONNECT_TIMEOUT_SECS` and
    /// `S3FF__CHUNK_SIZE` are optional.
    pub fn from_env() -> UploadResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable set.
    ///
    /// When a key appears twice the later value wins.
    pub fn from_vars<I, K, V>(vars: I) -> UploadResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut base_url = None;
        let mut overrides = Vec::new();

        for (key, value) in vars {
            let Some(stripped) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            // S3FF__REQUEST_TIMEOUT_SECS → request_timeout_secs
            let normalized = stripped.to_lowercase().replace("__", ".");
            let value = value.into();
            if normalized == "base_url" {
                base_url = Some(value);
            } else {
                overrides.push((normalized, value));
            }
        }

        let base_url = base_url
            .ok_or_else(|| UploadError::config(format!("{ENV_PREFIX}BASE_URL is not set")))?;
        let mut config = Self::new(base_url);

        for (key, value) in overrides {
            match key.as_str() {
                "auth_token" => config.auth_token = Some(value),
                "request_timeout_secs" => {
                    config.request_timeout = Some(Duration::from_secs(parse_number(&key, &value)?))
                }
                "connect_timeout_secs" => {
                    config.connect_timeout = Some(Duration::from_secs(parse_number(&key, &value)?))
                }
                "chunk_size" => config.chunk_size = parse_number(&key, &value)?,
                _ => tracing::debug!(key = %key, "ignoring unknown configuration key"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the backend bearer token
    pub fn with_auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the streaming chunk size
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn validate(&self) -> UploadResult<()> {
        if self.base_url.is_empty() {
            return Err(UploadError::config("base URL is empty"));
        }
        if self.chunk_size == 0 {
            return Err(UploadError::config("chunk size must be at least 1 byte"));
        }
        Ok(())
    }

    /// URL of a backend endpoint, e.g. `endpoint("finalize")` → `{base}/finalize/`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/", self.base_url, path.trim_matches('/'))
    }

    /// Build the HTTP client shared by the backend and the store.
    ///
    /// No default headers are installed: the store's complete request must
    /// go out without a content type.
    pub fn http_client(&self) -> UploadResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.clone());
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| UploadError::config(format!("cannot build HTTP client: {e}")))
    }
}

fn strip_trailing_slash(mut url: String) -> String {
    if url.ends_with('/') {
        url.pop();
    }
    url
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> UploadResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| UploadError::config(format!("{key} must be a number, got {value:?}")))
}
