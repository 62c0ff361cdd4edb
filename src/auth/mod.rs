//! OAuth2 token lifecycle for the QuickBooks API.
//!
//! Two credential strategies are supported:
//! - **Direct**: refresh against the QuickBooks token endpoint with HTTP
//!   Basic auth over `client_id:client_secret` and a form-encoded body.
//! - **Proxy**: refresh through a caller-operated proxy with a JSON body and
//!   an optional passthrough `Authorization` header, for deployments that
//!   keep the client secret out of tap configuration.
//!
//! One [`Authenticator`] (and therefore one live token) exists per distinct
//! credential identity; streams share it by reference through
//! [`AuthenticatorCache`]. Refresh is mutually exclusive: the token mutex is
//! held across the refresh request, so concurrent callers block and reuse
//! the resulting token instead of issuing redundant refreshes.

use crate::config::TapConfig;
use crate::error::SyncError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};


/// QuickBooks OAuth2 token endpoint.
pub const TOKEN_ENDPOINT: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

/// Fallback token lifetime when the endpoint omits `expires_in`.
const DEFAULT_TTL_SECS: i64 = 3600;

/// Refresh this many seconds before the token actually expires.
const REFRESH_THRESHOLD_SECS: i64 = 90;

/// Credential strategy, selected once from configuration.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Client credentials held locally; refresh via Basic auth.
    Direct {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        token_endpoint: String,
    },
    /// Refresh delegated to a proxy holding the client secret.
    Proxy {
        refresh_token: String,
        proxy_endpoint: String,
        proxy_auth_header: Option<String>,
    },
}

impl Credentials {
    /// Selects the credential variant from configuration.
    ///
    /// A config with `client_id` + `client_secret` yields [`Credentials::Direct`];
    /// one with `refresh_proxy_url` yields [`Credentials::Proxy`]. A config
    /// satisfying neither is a [`SyncError::Config`] — before any HTTP call.
    pub fn from_config(config: &TapConfig) -> Result<Self, SyncError> {
        if let (Some(client_id), Some(client_secret)) =
            (config.client_id.clone(), config.client_secret.clone())
        {
            return Ok(Credentials::Direct {
                client_id,
                client_secret,
                refresh_token: config.refresh_token.clone(),
                token_endpoint: TOKEN_ENDPOINT.to_string(),
            });
        }

        if let Some(proxy_endpoint) = config.refresh_proxy_url.clone() {
            return Ok(Credentials::Proxy {
                refresh_token: config.refresh_token.clone(),
                proxy_endpoint,
                proxy_auth_header: config.refresh_proxy_url_auth.clone(),
            });
        }

        Err(SyncError::Config(
            "insufficient credentials: set either client_id + client_secret + refresh_token, \
             or refresh_proxy_url + refresh_token"
                .to_string(),
        ))
    }

    /// Stable key identifying this credential set, used to share one live
    /// token across all streams with the same credentials.
    pub fn identity(&self) -> String {
        match self {
            Credentials::Direct { client_id, .. } => format!("direct:{}", client_id),
            Credentials::Proxy { proxy_endpoint, .. } => format!("proxy:{}", proxy_endpoint),
        }
    }
}

/// A cached access token.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub obtained_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Token {
    /// True once the token is within [`REFRESH_THRESHOLD_SECS`] of expiry.
    fn needs_refresh(&self) -> bool {
        let expires_at = self.obtained_at + self.ttl;
        Utc::now() + Duration::seconds(REFRESH_THRESHOLD_SECS) >= expires_at
    }
}

/// Token response from the token endpoint (both variants).
#[derive(Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Owns the token lifecycle for one credential identity.
pub struct Authenticator {
    credentials: Credentials,
    http_client: reqwest::Client,
    /// Held across the refresh request — this is the one lock in the crate
    /// that spans a network call, making refresh mutually exclusive.
    token: tokio::sync::Mutex<Option<Token>>,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            http_client: reqwest::Client::new(),
            token: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns a request-ready `Authorization: Bearer ...` value, refreshing
    /// first if no token is cached or the cached one is near expiry.
    pub async fn bearer_header(&self) -> Result<String, SyncError> {
        let mut guard = self.token.lock().await;
        let token = match guard.as_ref() {
            Some(token) if !token.needs_refresh() => token.clone(),
            _ => {
                let token = self.refresh().await?;
                *guard = Some(token.clone());
                token
            }
        };
        Ok(format!("Bearer {}", token.access_token))
    }

    /// Discards the cached token and refreshes unconditionally.
    ///
    /// Used when the query endpoint answers 401 despite a token that still
    /// looked valid locally (revocation, clock skew).
    pub async fn force_refresh(&self) -> Result<(), SyncError> {
        let mut guard = self.token.lock().await;
        let token = self.refresh().await?;
        *guard = Some(token);
        Ok(())
    }

    /// Issues the token-refresh request for the active credential variant.
    ///
    /// The direct variant sends the client credentials only in the Basic
    /// auth header; they are not repeated in the form body.
    async fn refresh(&self) -> Result<Token, SyncError> {
        let request = match &self.credentials {
            Credentials::Direct {
                client_id,
                client_secret,
                refresh_token,
                token_endpoint,
            } => {
                debug!(endpoint = %token_endpoint, "Refreshing token (direct)");
                let basic = BASE64.encode(format!("{}:{}", client_id, client_secret));
                self.http_client
                    .post(token_endpoint)
                    .header("Authorization", format!("Basic {}", basic))
                    .header("Accept", "application/json")
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", refresh_token.as_str()),
                    ])
            }
            Credentials::Proxy {
                refresh_token,
                proxy_endpoint,
                proxy_auth_header,
            } => {
                debug!(endpoint = %proxy_endpoint, "Refreshing token (proxy)");
                let mut request = self
                    .http_client
                    .post(proxy_endpoint)
                    .header("Accept", "application/json")
                    .json(&serde_json::json!({
                        "grant_type": "refresh_token",
                        "refresh_token": refresh_token,
                    }));
                if let Some(auth) = proxy_auth_header {
                    request = request.header("Authorization", auth);
                }
                request
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(SyncError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_response: TokenRefreshResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("invalid token response: {}", e)))?;

        info!(identity = %self.credentials.identity(), "Access token refreshed");

        Ok(Token {
            access_token: token_response.access_token,
            obtained_at: Utc::now(),
            ttl: Duration::seconds(token_response.expires_in.unwrap_or(DEFAULT_TTL_SECS)),
        })
    }
}

/// Keyed cache of authenticators: one per credential identity, owned by the
/// run context and shared by reference with every stream.
#[derive(Default)]
pub struct AuthenticatorCache {
    entries: Mutex<HashMap<String, Arc<Authenticator>>>,
}

impl AuthenticatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the authenticator for these credentials, creating it on first
    /// use. Subsequent calls with the same identity share the instance.
    pub fn get_or_create(&self, credentials: &Credentials) -> Arc<Authenticator> {
        let mut entries = self.entries.lock().expect("authenticator cache poisoned");
        Arc::clone(
            entries
                .entry(credentials.identity())
                .or_insert_with(|| Arc::new(Authenticator::new(credentials.clone()))),
        )
    }
}
