//! Per-stream sync engine.
//!
//! Drives one entity stream end to end: obtain an auth header, build the
//! page query, issue the request (with bounded retry and one forced
//! re-authentication on 401), normalize the page, emit records, advance the
//! bookmark, and loop while the paginator reports more pages.
//!
//! Page N+1 is never requested before page N's records are fully emitted
//! and its bookmark persisted, so an aborted run resumes from the last
//! completed page.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::TapConfig;
use crate::error::SyncError;
use crate::normalize::{parse_page, records_from_page, Record};
use crate::pagination::OffsetPaginator;
use crate::query::{build_query, MINOR_VERSION};
use crate::sink::RecordSink;
use crate::state::StateStore;
use crate::streams::StreamDescriptor;

#[cfg(test)]
mod tests;

/// Seconds to wait between transient attempts; one more attempt follows the
/// last delay, so the retry budget is always `BACKOFF_DELAYS.len() + 1`.
const BACKOFF_DELAYS: [u64; 2] = [1, 2];
const MAX_RETRIES: u32 = BACKOFF_DELAYS.len() as u32 + 1;

/// Counters for one stream's completed sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSummary {
    pub records: u64,
    pub pages: u64,
}

/// Syncs one entity stream against the query endpoint.
pub struct SyncEngine {
    stream: StreamDescriptor,
    authenticator: Arc<Authenticator>,
    http_client: reqwest::Client,
    base_url: String,
    realm_id: String,
    start_date: DateTime<Utc>,
    user_agent: Option<String>,
}

impl SyncEngine {
    pub fn new(
        stream: StreamDescriptor,
        authenticator: Arc<Authenticator>,
        config: &TapConfig,
    ) -> Self {
        Self::with_base_url(stream, authenticator, config, config.api_base().to_string())
    }

    /// Engine pointed at a custom API host (for testing with a mock server).
    pub fn with_base_url(
        stream: StreamDescriptor,
        authenticator: Arc<Authenticator>,
        config: &TapConfig,
        base_url: String,
    ) -> Self {
        Self {
            stream,
            authenticator,
            http_client: reqwest::Client::new(),
            base_url,
            realm_id: config.realm_id.clone(),
            start_date: config.start_date,
            user_agent: config.user_agent.clone(),
        }
    }

    fn query_url(&self) -> String {
        format!("{}/v3/company/{}/query", self.base_url, self.realm_id)
    }

    /// Runs the stream to completion, emitting every record through `sink`
    /// and advancing `state` as pages complete.
    pub async fn sync(&self, state: &StateStore, sink: &dyn RecordSink) -> Result<SyncSummary> {
        // Starting cursor: max of configured start date and persisted
        // bookmark. Full-table streams carry no cursor at all.
        let starting_cursor = self.stream.replication_key.map(|_| {
            state
                .bookmark(self.stream.name)
                .map_or(self.start_date, |bookmark| bookmark.max(self.start_date))
        });

        info!(
            stream = %self.stream.name,
            cursor = ?starting_cursor,
            "Starting stream sync"
        );

        let mut paginator = OffsetPaginator::new(self.stream.page_size);
        let mut summary = SyncSummary::default();

        loop {
            let query = build_query(&self.stream, starting_cursor, &paginator.current());
            debug!(stream = %self.stream.name, query = %query, "Requesting page");

            let page = self.fetch_page(&query).await?;
            summary.pages += 1;

            for record in records_from_page(&page) {
                sink.emit_record(self.stream.name, &record).await?;
                summary.records += 1;

                if let Some(key) = self.stream.replication_key {
                    if let Some(cursor) = record_cursor(self.stream.name, &record, key) {
                        state.advance(self.stream.name, cursor);
                    }
                }
            }

            // Checkpoint after the page is fully emitted, never mid-page.
            if self.stream.replication_key.is_some() {
                state.persist()?;
                sink.emit_state(&state.snapshot()).await?;
            }

            if paginator.has_more(&page) {
                paginator.advance();
            } else {
                break;
            }
        }

        info!(
            stream = %self.stream.name,
            records = summary.records,
            pages = summary.pages,
            "Stream sync complete"
        );
        Ok(summary)
    }

    /// Fetches one page, retrying transient failures with backoff and
    /// forcing a single re-authentication on 401 before giving up.
    async fn fetch_page(&self, query: &str) -> Result<Value, SyncError> {
        let mut forced_reauth = false;
        let mut attempt: u32 = 0;

        loop {
            let bearer = self.authenticator.bearer_header().await?;

            match self.request_page(query, &bearer).await {
                Ok(page) => return Ok(page),
                Err(err @ SyncError::Auth(_)) => {
                    if forced_reauth {
                        return Err(err);
                    }
                    forced_reauth = true;
                    warn!(
                        stream = %self.stream.name,
                        "Query endpoint rejected token; forcing one re-authentication"
                    );
                    self.authenticator.force_refresh().await?;
                }
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(err);
                    }
                    let delay_secs = BACKOFF_DELAYS[(attempt - 1) as usize];
                    warn!(
                        stream = %self.stream.name,
                        attempt = attempt,
                        max_retries = MAX_RETRIES,
                        delay_secs = delay_secs,
                        error = %err,
                        "Transient failure, backing off before retry"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Issues one GET against the query endpoint and classifies the outcome.
    async fn request_page(&self, query: &str, bearer: &str) -> Result<Value, SyncError> {
        let mut request = self
            .http_client
            .get(self.query_url())
            .query(&[("query", query), ("minorversion", MINOR_VERSION)])
            .header("Authorization", bearer)
            .header("Accept", "application/json");
        if let Some(user_agent) = &self.user_agent {
            request = request.header("User-Agent", user_agent);
        }

        let response = request.send().await.map_err(|e| SyncError::TransientHttp {
            status: None,
            message: format!("request failed: {}", e),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Auth(
                "query endpoint returned 401: token expired or invalid".to_string(),
            ));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::TransientHttp {
                status: Some(status.as_u16()),
                message: body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::MalformedResponse {
                stream: self.stream.name.to_string(),
                message: format!("query endpoint returned {}: {}", status, body),
            });
        }

        let body = response.text().await.map_err(|e| SyncError::TransientHttp {
            status: None,
            message: format!("failed to read response body: {}", e),
        })?;
        parse_page(self.stream.name, &body)
    }
}

/// Reads the replication cursor from a normalized record's synthetic
/// dotted replication-key field.
///
/// A value that fails to parse is logged, not swallowed: the record still
/// flows downstream, but the bookmark does not advance past it.
fn record_cursor(stream: &str, record: &Record, replication_key: &str) -> Option<DateTime<Utc>> {
    let raw = record.get(replication_key).and_then(Value::as_str)?;
    match raw.parse() {
        Ok(cursor) => Some(cursor),
        Err(e) => {
            warn!(
                stream = %stream,
                value = %raw,
                error = %e,
                "Unparsable replication timestamp; bookmark not advanced for this record"
            );
            None
        }
    }
}
