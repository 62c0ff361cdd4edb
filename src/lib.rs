//! qbsync - Incremental record extraction from the QuickBooks Online API.
//!
//! Pulls 29 business entity types (accounts, invoices, customers, payments,
//! ...) through the query endpoint and emits them as Singer-format
//! RECORD/STATE lines with resumable, per-stream bookmarks.
//!
//! # Architecture
//!
//! ```text
//! StreamRegistry (static descriptors)
//!          ↓  one descriptor per entity
//! ┌─────────────────────────────────────────┐
//! │       SyncEngine (per stream)            │
//! │  - build page query                      │
//! │  - fetch with retry / re-auth            │
//! │  - normalize + emit records              │
//! │  - advance bookmark per page             │
//! └─────────────────────────────────────────┘
//!    ↓ auth header            ↓ records
//! Authenticator          RecordSink (Singer stdout)
//! (one live token per
//!  credential identity)
//! ```
//!
//! # Core Types
//!
//! - [`auth::Credentials`] - Direct (Basic auth) or Proxy credential strategy
//! - [`auth::Authenticator`] - token lifecycle, shared across streams
//! - [`streams::StreamDescriptor`] - entity name, keys, page size
//! - [`sync::SyncEngine`] - the per-stream state machine
//! - [`sink::RecordSink`] - downstream emission seam
//! - [`state::StateStore`] - bookmark persistence between runs

pub mod auth;
pub mod config;
pub mod error;
pub mod normalize;
pub mod pagination;
pub mod query;
pub mod sink;
pub mod state;
pub mod streams;
pub mod sync;

pub use auth::{Authenticator, AuthenticatorCache, Credentials};
pub use config::TapConfig;
pub use error::SyncError;
pub use normalize::Record;
pub use sink::{RecordSink, SingerSink};
pub use state::StateStore;
pub use streams::StreamDescriptor;
pub use sync::{SyncEngine, SyncSummary};
