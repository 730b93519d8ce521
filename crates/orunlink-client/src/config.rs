//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration against a local backend.

use orunlink_shared::constants::{DEFAULT_PAGE_SIZE, SUBSCRIPTION_BUFFER};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted backend.
    /// Env: `ORUNLINK_URL`
    /// Default: `http://localhost:54321`
    pub backend_url: String,

    /// Public (anonymous) API key for the hosted backend.
    /// Env: `ORUNLINK_ANON_KEY`
    /// Default: empty (development only).
    pub anon_key: String,

    /// Access code unlocking the moderation panel.
    /// Env: `ORUNLINK_MODERATION_CODE`
    /// Default: none (panel stays locked).
    pub moderation_code: Option<String>,

    /// Page size for list queries.
    /// Env: `ORUNLINK_PAGE_SIZE`
    /// Default: 50.
    pub page_size: u32,

    /// Per-subscription delivery buffer for the realtime feed.
    /// Env: `ORUNLINK_SUBSCRIPTION_BUFFER`
    /// Default: 64.
    pub subscription_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            moderation_code: None,
            page_size: DEFAULT_PAGE_SIZE,
            subscription_buffer: SUBSCRIPTION_BUFFER,
        }
    }
}

impl Config {
    /// Load the configuration from the environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend_url: std::env::var("ORUNLINK_URL").unwrap_or(defaults.backend_url),
            anon_key: std::env::var("ORUNLINK_ANON_KEY").unwrap_or(defaults.anon_key),
            moderation_code: std::env::var("ORUNLINK_MODERATION_CODE").ok(),
            page_size: std::env::var("ORUNLINK_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.page_size),
            subscription_buffer: std::env::var("ORUNLINK_SUBSCRIPTION_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.subscription_buffer),
        }
    }

    /// Check a code supplied by the user against the configured moderation
    /// access code.
    pub fn verify_moderation_code(&self, supplied: &str) -> bool {
        match &self.moderation_code {
            Some(code) => !code.is_empty() && code == supplied,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_code_must_match() {
        let mut config = Config::default();
        assert!(!config.verify_moderation_code("anything"));

        config.moderation_code = Some("open-sesame".into());
        assert!(config.verify_moderation_code("open-sesame"));
        assert!(!config.verify_moderation_code("wrong"));
    }
}
