//! Offset pagination over the QuickBooks query endpoint.
//!
//! QuickBooks nests result arrays under response keys that vary by entity
//! type, so termination is decided by scanning every key of the result
//! envelope: a page is non-terminal whenever any array in it is filled to
//! the page size. An exactly-full final page therefore costs one extra,
//! empty-result request — deliberately preferred over silently truncating
//! a stream.

use serde_json::Value;

use crate::normalize::ENVELOPE_KEY;

/// One page's worth of request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based record offset; 1 on the first page.
    pub offset: usize,
    pub page_size: usize,
}

impl PageRequest {
    /// True for the first page of a stream (offset omitted from the query).
    pub fn is_first(&self) -> bool {
        self.offset <= 1
    }
}

/// Tracks the current offset for one stream's page loop.
#[derive(Debug)]
pub struct OffsetPaginator {
    offset: usize,
    page_size: usize,
}

impl OffsetPaginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            offset: 1,
            page_size,
        }
    }

    /// Parameters for the page about to be requested.
    pub fn current(&self) -> PageRequest {
        PageRequest {
            offset: self.offset,
            page_size: self.page_size,
        }
    }

    /// Decides from a parsed response body whether another page must be
    /// fetched: true iff any key of the result envelope holds an array of
    /// at least `page_size` elements.
    pub fn has_more(&self, page: &Value) -> bool {
        let Some(envelope) = page.get(ENVELOPE_KEY).and_then(Value::as_object) else {
            return false;
        };
        envelope
            .values()
            .any(|v| v.as_array().is_some_and(|a| a.len() >= self.page_size))
    }

    /// Advances to the next page's offset.
    pub fn advance(&mut self) {
        self.offset += self.page_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_page_means_more() {
        let paginator = OffsetPaginator::new(2);
        let page = json!({"QueryResponse": {"Invoice": [{"Id": "1"}, {"Id": "2"}], "maxResults": 2}});
        assert!(paginator.has_more(&page));
    }

    #[test]
    fn short_page_means_done() {
        let paginator = OffsetPaginator::new(2);
        let page = json!({"QueryResponse": {"Invoice": [{"Id": "1"}], "maxResults": 1}});
        assert!(!paginator.has_more(&page));
    }

    #[test]
    fn empty_envelope_means_done() {
        let paginator = OffsetPaginator::new(2);
        assert!(!paginator.has_more(&json!({"QueryResponse": {}})));
        assert!(!paginator.has_more(&json!({})));
    }

    #[test]
    fn any_full_array_key_counts() {
        // Key names are not predictable per entity; any full array wins.
        let paginator = OffsetPaginator::new(2);
        let page = json!({
            "QueryResponse": {
                "maxResults": 2,
                "Purchases": [{"Id": "1"}, {"Id": "2"}]
            }
        });
        assert!(paginator.has_more(&page));
    }

    #[test]
    fn non_array_values_are_ignored() {
        let paginator = OffsetPaginator::new(1);
        let page = json!({"QueryResponse": {"maxResults": 100, "startPosition": 1}});
        assert!(!paginator.has_more(&page));
    }

    #[test]
    fn offsets_advance_by_page_size() {
        let mut paginator = OffsetPaginator::new(100);
        assert_eq!(paginator.current(), PageRequest { offset: 1, page_size: 100 });
        assert!(paginator.current().is_first());
        paginator.advance();
        assert_eq!(paginator.current().offset, 101);
        assert!(!paginator.current().is_first());
        paginator.advance();
        assert_eq!(paginator.current().offset, 201);
    }
}
