//! Pagination result value objects.

use crate::models::Row;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Offset pagination with a total count.
#[derive(Debug, Clone, Serialize)]
pub struct PaginationResult {
    pub data: Vec<Row>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    /// 1-based position of the first row on this page; absent for an empty page.
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl PaginationResult {
    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }
}

/// Keyset pagination over a totally ordered column.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPaginationResult {
    pub data: Vec<Row>,
    pub per_page: u64,
    pub has_more: bool,
    /// Pass as `cursor` to fetch the next page. Present only when `has_more`.
    pub next_cursor: Option<JsonValue>,
    /// True whenever this page was requested with a cursor.
    pub has_previous: bool,
    /// Pass as `cursor` to fetch the previous page. `None` together with
    /// `has_previous` means the previous page is the first page.
    pub prev_cursor: Option<JsonValue>,
}

/// Offset pagination without the count query.
#[derive(Debug, Clone, Serialize)]
pub struct SimplePaginationResult {
    pub data: Vec<Row>,
    pub per_page: u64,
    pub current_page: u64,
    pub has_more: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}
