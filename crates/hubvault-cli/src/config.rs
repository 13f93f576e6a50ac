use std::time::Duration;

pub const DEFAULT_HUBSPOT_BASE_URL: &str = "https://api.hubapi.com";
pub const DEFAULT_MFILES_BASE_URL: &str = "http://localhost/REST";
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HubSpot private app token (bearer), only needed by CRM commands
    pub hubspot_token: Option<String>,
    pub hubspot_base_url: String,
    /// M-Files REST root, always ending in `/`
    pub mfiles_base_url: String,
    /// Request timeout applied to both clients
    pub timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `HUBSPOT_PRIVATE_APP_TOKEN`: HubSpot private app access token,
    ///   checked by `Config::hubspot_token` when a command talks to the CRM
    /// - `HUBSPOT_BASE_URL` (default `https://api.hubapi.com`)
    /// - `MFILES_BASE_URL` (default `http://localhost/REST`)
    /// - `MFILES_TIMEOUT`: request timeout in milliseconds (default 15000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let hubspot_token = lookup("HUBSPOT_PRIVATE_APP_TOKEN").filter(|t| !t.trim().is_empty());

        let hubspot_base_url = lookup("HUBSPOT_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_HUBSPOT_BASE_URL.to_string());

        let mfiles_base_url = normalize_base_url(
            &lookup("MFILES_BASE_URL").unwrap_or_else(|| DEFAULT_MFILES_BASE_URL.to_string()),
        );

        let timeout_ms = match lookup("MFILES_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(raw))?,
            None => DEFAULT_TIMEOUT_MS,
        };

        Ok(Self {
            hubspot_token,
            hubspot_base_url,
            mfiles_base_url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn hubspot_token(&self) -> Result<&str, ConfigError> {
        self.hubspot_token
            .as_deref()
            .ok_or(ConfigError::MissingHubSpotToken)
    }
}

/// Append the trailing slash relative request paths are joined onto.
pub fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HUBSPOT_PRIVATE_APP_TOKEN environment variable not set")]
    MissingHubSpotToken,

    #[error("MFILES_TIMEOUT must be a number of milliseconds, got {0:?}")]
    InvalidTimeout(String),
}
