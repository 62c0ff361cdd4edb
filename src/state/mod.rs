//! Bookmark persistence between runs.
//!
//! Bookmarks are stored in a Singer-compatible state file:
//! `{"bookmarks": {"<stream>": {"replication_key_value": "<rfc3339>"}}}`.
//! A bookmark only ever moves forward within a run, and is written after
//! each fully-emitted page so an aborted run resumes from the last
//! completed page.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Per-stream bookmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub replication_key_value: Option<DateTime<Utc>>,
}

/// Full sync state across all streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    #[serde(default)]
    pub bookmarks: HashMap<String, Bookmark>,
}

/// Loads, advances, and persists sync state for a run.
///
/// Without a path the store is memory-only: bookmarks still advance within
/// the run (records carry correct cursors) but nothing survives it.
pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl StateStore {
    /// Loads state from `path`, or starts empty if the file does not exist
    /// or no path is configured.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let state = match &path {
            Some(p) if p.exists() => {
                let contents = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read state file {}", p.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse state file {}", p.display()))?
            }
            _ => State::default(),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the persisted cursor for `stream`, if any.
    pub fn bookmark(&self, stream: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().expect("state store poisoned");
        state
            .bookmarks
            .get(stream)
            .and_then(|b| b.replication_key_value)
    }

    /// Advances `stream`'s bookmark to `value` if it is ahead of the current
    /// one. A bookmark never moves backwards within a run.
    pub fn advance(&self, stream: &str, value: DateTime<Utc>) {
        let mut state = self.state.lock().expect("state store poisoned");
        let bookmark = state
            .bookmarks
            .entry(stream.to_string())
            .or_insert(Bookmark {
                replication_key_value: None,
            });
        match bookmark.replication_key_value {
            Some(current) if current >= value => {}
            _ => {
                debug!(stream = %stream, cursor = %value, "Bookmark advanced");
                bookmark.replication_key_value = Some(value);
            }
        }
    }

    /// Snapshot of the current state, for emission as a STATE message.
    pub fn snapshot(&self) -> State {
        self.state.lock().expect("state store poisoned").clone()
    }

    /// Writes the current state to the configured path. No-op when the
    /// store is memory-only.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let state = self.snapshot();
        let contents = serde_json::to_string_pretty(&state).context("Failed to serialize state")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        Ok(())
    }
}
