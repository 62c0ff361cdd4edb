//! Tap configuration.
//!
//! Loaded from a JSON file (path from the first CLI argument or the
//! `QBSYNC_CONFIG` environment variable). Credential selection happens
//! eagerly at startup via [`crate::auth::Credentials::from_config`] so an
//! unusable configuration fails before any network call.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Production QuickBooks API host.
pub const API_BASE: &str = "https://quickbooks.api.intuit.com";

/// Sandbox QuickBooks API host.
pub const SANDBOX_API_BASE: &str = "https://sandbox-quickbooks.api.intuit.com";

fn default_page_size() -> usize {
    100
}

/// Complete tap configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TapConfig {
    /// OAuth2 client ID (direct credential variant).
    pub client_id: Option<String>,
    /// OAuth2 client secret (direct credential variant).
    pub client_secret: Option<String>,
    /// OAuth2 refresh token (required by both credential variants).
    pub refresh_token: String,
    /// QuickBooks company/realm ID.
    pub realm_id: String,
    /// Earliest record date to sync (RFC3339).
    pub start_date: DateTime<Utc>,
    /// Use the sandbox environment instead of production.
    #[serde(default)]
    pub sandbox: bool,
    /// Custom User-Agent header for API requests.
    pub user_agent: Option<String>,
    /// Proxy URL enabling token refresh without a client ID/secret.
    pub refresh_proxy_url: Option<String>,
    /// Authorization header value passed through to the refresh proxy.
    pub refresh_proxy_url_auth: Option<String>,
    /// Records per page (QuickBooks caps MAXRESULTS at 1000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Where to persist sync bookmarks between runs. No persistence if unset.
    pub state_path: Option<PathBuf>,
    /// Restrict the run to these stream names. All streams if unset.
    pub streams: Option<Vec<String>>,
}

impl TapConfig {
    /// Loads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: TapConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Returns the API host for the configured environment.
    pub fn api_base(&self) -> &'static str {
        if self.sandbox {
            SANDBOX_API_BASE
        } else {
            API_BASE
        }
    }
}
