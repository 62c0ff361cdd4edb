//! Renders the SQL-like query string for one page request.
//!
//! Clause order is fixed by the remote query language:
//! `SELECT * FROM <entity>` → optional `WHERE <rk> >= '<cursor>'` →
//! `ORDERBY <rk>` → pagination clause. The `ORDERBY` accompanies every
//! incremental stream whether or not a cursor is known: offset pagination
//! over an unordered result set would not be stable across pages.
//!
//! The only interpolated value is the cursor's ISO-8601 rendering, which the
//! query language accepts as-is, so no escaping is performed.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::pagination::PageRequest;
use crate::streams::StreamDescriptor;

/// QuickBooks API minor version sent alongside every query.
pub const MINOR_VERSION: &str = "65";

/// Builds the query string for `stream` at `page`, filtered to records at or
/// after `cursor` when one is known.
pub fn build_query(
    stream: &StreamDescriptor,
    cursor: Option<DateTime<Utc>>,
    page: &PageRequest,
) -> String {
    let mut query = format!("SELECT * FROM {}", stream.name);

    if let Some(replication_key) = stream.replication_key {
        if let Some(cursor) = cursor {
            query.push_str(&format!(
                " WHERE {} >= '{}'",
                replication_key,
                cursor.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        query.push_str(&format!(" ORDERBY {}", replication_key));
    }

    if page.is_first() {
        query.push_str(&format!(" MAXRESULTS {}", page.page_size));
    } else {
        query.push_str(&format!(
            " STARTPOSITION {} MAXRESULTS {}",
            page.offset, page.page_size
        ));
    }

    query
}
