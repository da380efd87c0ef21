use super::error::{RestMirrorError, RestResult};

/// Runtime configuration describing how to reach the REST mirror.
#[derive(Debug, Clone)]
pub struct RestMirrorConfig {
    /// Root URL of the REST endpoint, without a trailing table name.
    pub base_url: String,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Schema selected through `Accept-Profile`/`Content-Profile` headers.
    pub schema: Option<String>,
}

impl RestMirrorConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            schema: None,
        }
    }

    /// Attach an API key, sent both as `apikey` and as a bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Target a non-default schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Whether the mirror environment is configured at all.
    pub fn is_configured() -> bool {
        std::env::var("MIRROR_BASE_URL").is_ok_and(|value| !value.trim().is_empty())
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> RestResult<Self> {
        let base_url = std::env::var("MIRROR_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(RestMirrorError::MissingEnvVar {
                var: "MIRROR_BASE_URL",
            })?;

        let mut config = Self::new(base_url);
        if let Ok(api_key) = std::env::var("MIRROR_API_KEY") {
            config = config.with_api_key(api_key);
        }
        if let Ok(schema) = std::env::var("MIRROR_SCHEMA") {
            config = config.with_schema(schema);
        }
        Ok(config)
    }
}
