//! Startup configuration loaded from environment variables.

use crate::Error;
use std::env;

/// Application settings for the generation pipeline.
///
/// Loaded once at process startup and shared read-only afterwards. A missing
/// fallback API key is a fatal configuration error: the fallback backend is
/// the last line of defense and must always be reachable. An empty primary
/// key list is allowed and simply disables the primary backend.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model served by the primary (key-rotating) backend.
    pub primary_model: String,
    /// Ordered API keys for the primary backend, tried first-to-last.
    pub primary_api_keys: Vec<String>,
    /// Model requested from the fallback router.
    pub fallback_model: String,
    /// API key for the fallback router (required).
    pub fallback_api_key: String,
    /// Optional `HTTP-Referer` header value for the fallback router.
    pub site_url: Option<String>,
    /// Optional `X-Title` header value for the fallback router.
    pub site_name: Option<String>,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings from an arbitrary variable lookup.
    ///
    /// Kept separate from [`Settings::from_env`] so tests can supply values
    /// without mutating process-global environment state.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let fallback_api_key = get("ROUTER_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::config("ROUTER_API_KEY environment variable is required for the fallback router")
            })?;

        Ok(Self {
            primary_model: get("PRIMARY_MODEL_NAME")
                .unwrap_or_else(|| "gemini-1.5-flash-latest".to_string()),
            primary_api_keys: parse_key_list(&get("GEMINI_API_KEYS").unwrap_or_default()),
            fallback_model: get("FALLBACK_MODEL_NAME")
                .unwrap_or_else(|| "gemini-1.5-pro-latest".to_string()),
            fallback_api_key,
            site_url: get("ROUTER_SITE_URL").filter(|v| !v.is_empty()),
            site_name: get("ROUTER_SITE_NAME").filter(|v| !v.is_empty()),
        })
    }

    /// Whether a primary backend should be constructed at all.
    pub fn has_primary(&self) -> bool {
        !self.primary_api_keys.is_empty()
    }
}

/// Parse a comma-separated key list, trimming entries and discarding empties.
fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
